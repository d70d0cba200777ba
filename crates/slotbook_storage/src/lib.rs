#![forbid(unsafe_code)]

pub mod intake;
pub mod ledger;
pub mod repo;
pub mod schema;

pub use ledger::StorageError;
