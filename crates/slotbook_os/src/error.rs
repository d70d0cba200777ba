#![forbid(unsafe_code)]

use slotbook_contracts::ContractViolation;
use slotbook_storage::StorageError;
use thiserror::Error;

use crate::reconcile::ReconcileStage;

pub const PUBLIC_BUSY_MESSAGE: &str = "System busy, please retry.";

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("submission failed validation: {0}")]
    Validation(#[from] ContractViolation),
    #[error("slot {slot} is full ({occupied}/{capacity})")]
    CapacityExceeded {
        slot: String,
        occupied: u32,
        capacity: u32,
    },
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),
    #[error("reconciliation in progress")]
    ReconciliationBusy,
    #[error("reconciliation aborted at {stage} (shard {shard}): {source}")]
    ReconciliationAborted {
        stage: ReconcileStage,
        shard: String,
        #[source]
        source: StorageError,
    },
    #[error("no unused reference code after {attempts} attempts")]
    ReferenceCodeExhausted { attempts: u8 },
    #[error("configuration error: {0}")]
    Config(String),
}

impl BookingError {
    /// Stable identifier for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "validation",
            BookingError::CapacityExceeded { .. } => "capacity_exceeded",
            BookingError::StorageUnavailable(_) => "storage_unavailable",
            BookingError::ReconciliationBusy => "reconciliation_busy",
            BookingError::ReconciliationAborted { .. } => "reconciliation_aborted",
            BookingError::ReferenceCodeExhausted { .. } => "reference_code_exhausted",
            BookingError::Config(_) => "config",
        }
    }

    /// Text safe to show a client. Only a full slot is reported as such.
    pub fn public_message(&self) -> String {
        match self {
            BookingError::CapacityExceeded { .. } => {
                "That time slot is fully booked. Please choose another.".to_string()
            }
            _ => PUBLIC_BUSY_MESSAGE.to_string(),
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(
            self,
            BookingError::CapacityExceeded { .. } | BookingError::Validation(_)
        )
    }
}
