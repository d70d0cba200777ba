#![forbid(unsafe_code)]

pub mod observability;

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use slotbook_contracts::booking::BookingSubmission;
use slotbook_contracts::directory::BranchDirectory;
use slotbook_contracts::period::ShardId;
use slotbook_os::admission::{AdmissionAction, AdmissionOutcome};
use slotbook_os::availability::AvailabilityView;
use slotbook_os::config::{load_branch_directory, RuntimeConfig};
use slotbook_os::reconcile::ReconcileReport;
use slotbook_os::{BookingError, BookingRuntime, ShardView, ShutdownReport};
use slotbook_engines::admission::MatchKind;
use slotbook_storage::intake::InMemoryIntakeLog;
use slotbook_storage::ledger::{InMemoryLedgerStore, ShardTemplate};
use slotbook_storage::StorageError;

use crate::observability::LogFormat;

pub mod reason_codes {
    use slotbook_contracts::ReasonCodeId;

    pub const ADAPTER_RECONCILE_RETRY: ReasonCodeId = ReasonCodeId(0xAD70_0001);
    pub const ADAPTER_RECONCILE_WORKER_STOPPED: ReasonCodeId = ReasonCodeId(0xAD70_0002);
}

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 300_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub bind: SocketAddr,
    pub branch_config: Option<PathBuf>,
    pub reconcile_worker_enabled: bool,
    pub reconcile_interval_ms: u64,
    pub log_format: LogFormat,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, String> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    pub fn from_env_var_map(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let bind_raw = lookup("SLOTBOOK_HTTP_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind: SocketAddr = bind_raw
            .trim()
            .parse()
            .map_err(|err| format!("SLOTBOOK_HTTP_BIND '{bind_raw}' is not an address: {err}"))?;
        let branch_config = lookup("SLOTBOOK_BRANCH_CONFIG")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let reconcile_worker_enabled = match lookup("SLOTBOOK_RECONCILE_WORKER_ENABLED") {
            Some(v) => !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            ),
            None => true,
        };
        let reconcile_interval_ms = lookup("SLOTBOOK_RECONCILE_INTERVAL_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| (1_000..=3_600_000).contains(v))
            .unwrap_or(DEFAULT_RECONCILE_INTERVAL_MS);
        let log_format = lookup("SLOTBOOK_LOG_FORMAT")
            .map(|v| LogFormat::parse(&v))
            .unwrap_or_default();
        Ok(Self {
            bind,
            branch_config,
            reconcile_worker_enabled,
            reconcile_interval_ms,
            log_format,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BookingAdapterResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub reference_code: Option<String>,
    pub shard: Option<String>,
    pub reason_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AvailabilityAdapterQuery {
    pub date: String,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SlotAvailabilityEntry {
    pub slot: String,
    pub occupied: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AvailabilityAdapterResponse {
    pub status: String,
    pub branch: String,
    pub date: String,
    pub shard: String,
    pub capacity: u32,
    pub degraded: bool,
    pub slots: Vec<SlotAvailabilityEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ShardLineEntry {
    pub cells: Vec<String>,
    pub style: String,
    pub background: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ShardViewAdapterResponse {
    pub status: String,
    pub shard: String,
    pub lines: Vec<ShardLineEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ShardListAdapterResponse {
    pub status: String,
    pub shards: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorAdapterResponse {
    pub status: String,
    pub outcome: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub branches: usize,
    pub admitted: u64,
    pub rejected: u64,
    pub failed: u64,
}

/// Status code plus client-safe body for a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterRejection {
    pub http_status: u16,
    pub body: ErrorAdapterResponse,
}

impl AdapterRejection {
    pub fn from_error(err: &BookingError) -> Self {
        let (http_status, outcome) = match err {
            BookingError::Validation(_) => (400, "INVALID"),
            BookingError::CapacityExceeded { .. } => (409, "SLOT_FULL"),
            BookingError::StorageUnavailable(StorageError::ShardNotFound { .. }) => {
                (404, "NOT_FOUND")
            }
            BookingError::Config(_) => (500, "UNAVAILABLE"),
            BookingError::StorageUnavailable(_)
            | BookingError::ReconciliationBusy
            | BookingError::ReconciliationAborted { .. }
            | BookingError::ReferenceCodeExhausted { .. } => (503, "UNAVAILABLE"),
        };
        Self {
            http_status,
            body: ErrorAdapterResponse {
                status: "error".to_string(),
                outcome: outcome.to_string(),
                reason: err.public_message(),
            },
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterRejection>;

/// Booking runtime over the in-memory stores, shared by the HTTP handlers
/// and the reconciliation worker.
pub struct AdapterRuntime {
    runtime: BookingRuntime<InMemoryLedgerStore, InMemoryIntakeLog>,
}

impl AdapterRuntime {
    pub fn new(config: RuntimeConfig, directory: BranchDirectory) -> Result<Self, String> {
        let ledger = InMemoryLedgerStore::new_in_memory(ShardTemplate::mvp_v1())
            .map_err(|err| format!("ledger store init failed: {err}"))?;
        let intake = InMemoryIntakeLog::new_in_memory()
            .map_err(|err| format!("intake log init failed: {err}"))?;
        let runtime =
            BookingRuntime::init(config, directory, Arc::new(ledger), Arc::new(intake))
                .map_err(|err| err.to_string())?;
        Ok(Self { runtime })
    }

    pub fn default_from_env(config: &AdapterConfig) -> Result<Self, String> {
        let directory = match config.branch_config.as_deref() {
            Some(path) => load_branch_directory(path).map_err(|err| err.to_string())?,
            None => BranchDirectory::mvp_v1(),
        };
        Self::new(RuntimeConfig::mvp_v1(), directory)
    }

    pub fn health_report(&self) -> AdapterHealthResponse {
        let counters = self.runtime.admission().counters();
        AdapterHealthResponse {
            status: "ok".to_string(),
            branches: self.runtime.directory().branches.len(),
            admitted: counters.admitted,
            rejected: counters.rejected,
            failed: counters.failed,
        }
    }

    pub fn submit_booking(
        &self,
        submission: &BookingSubmission,
    ) -> AdapterResult<BookingAdapterResponse> {
        self.runtime
            .submit(submission)
            .map(booking_response)
            .map_err(|err| AdapterRejection::from_error(&err))
    }

    pub fn availability(
        &self,
        query: &AvailabilityAdapterQuery,
    ) -> AdapterResult<AvailabilityAdapterResponse> {
        self.runtime
            .availability(&query.date, &query.branch)
            .map(availability_response)
            .map_err(|err| AdapterRejection::from_error(&err))
    }

    pub fn reconcile(&self) -> Result<ReconcileReport, BookingError> {
        self.runtime.reconcile()
    }

    pub fn list_shards(&self) -> AdapterResult<ShardListAdapterResponse> {
        let shards = self
            .runtime
            .list_shards()
            .map_err(|err| AdapterRejection::from_error(&err))?;
        Ok(ShardListAdapterResponse {
            status: "ok".to_string(),
            shards: shards.into_iter().map(String::from).collect(),
        })
    }

    pub fn shard_view(&self, label: &str) -> AdapterResult<ShardViewAdapterResponse> {
        let shard = ShardId::new(label)
            .map_err(|err| AdapterRejection::from_error(&BookingError::Validation(err)))?;
        self.runtime
            .read_view(&shard)
            .map(shard_view_response)
            .map_err(|err| AdapterRejection::from_error(&err))
    }

    pub fn shutdown(self) -> ShutdownReport {
        self.runtime.shutdown()
    }
}

fn booking_response(outcome: AdmissionOutcome) -> BookingAdapterResponse {
    let label = match outcome.action {
        AdmissionAction::Inserted => "INSERTED",
        AdmissionAction::Updated(MatchKind::Resubmission) => "UPDATED_RESUBMISSION",
        AdmissionAction::Updated(MatchKind::Reschedule) => "UPDATED_RESCHEDULE",
    };
    BookingAdapterResponse {
        status: "ok".to_string(),
        outcome: label.to_string(),
        reason: None,
        reference_code: Some(outcome.reference_code.as_str().to_string()),
        shard: Some(outcome.shard.to_string()),
        reason_code: Some(outcome.reason_code.to_string()),
    }
}

fn availability_response(view: AvailabilityView) -> AvailabilityAdapterResponse {
    AvailabilityAdapterResponse {
        status: if view.degraded { "degraded" } else { "ok" }.to_string(),
        branch: view.branch.as_str().to_string(),
        date: view.date,
        shard: view.shard.to_string(),
        capacity: view.capacity,
        degraded: view.degraded,
        slots: view
            .slots
            .into_iter()
            .map(|s| SlotAvailabilityEntry {
                slot: s.slot,
                occupied: s.occupied,
                remaining: s.remaining,
            })
            .collect(),
    }
}

fn shard_view_response(view: ShardView) -> ShardViewAdapterResponse {
    ShardViewAdapterResponse {
        status: "ok".to_string(),
        shard: view.shard.to_string(),
        lines: view
            .lines
            .into_iter()
            .map(|line| ShardLineEntry {
                style: format!("{:?}", line.style),
                background: line.style.background_hex().to_string(),
                cells: line.cells,
            })
            .collect(),
    }
}
