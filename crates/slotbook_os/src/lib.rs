#![forbid(unsafe_code)]

pub mod admission;
pub mod availability;
pub mod config;
pub mod error;
pub mod locks;
pub mod reconcile;
pub mod runtime;

pub use error::BookingError;
pub use runtime::{BookingRuntime, ShardView, ShutdownReport};
