#![forbid(unsafe_code)]

pub mod booking;
pub mod calendar;
pub mod common;
pub mod directory;
pub mod layout;
pub mod period;

pub use common::{ContractViolation, MonotonicTimeNs, ReasonCodeId, SchemaVersion, Validate};
