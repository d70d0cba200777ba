#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use slotbook_contracts::booking::BookingSubmission;
use slotbook_contracts::directory::BranchDirectory;
use slotbook_contracts::layout::LedgerLine;
use slotbook_contracts::period::ShardId;
use slotbook_contracts::{MonotonicTimeNs, Validate};
use slotbook_storage::repo::{IntakeRepo, LedgerRepo};
use slotbook_storage::StorageError;
use tracing::{info, warn};

use crate::admission::{AdmissionController, AdmissionCounters, AdmissionOutcome};
use crate::availability::{AvailabilityCounter, AvailabilityView};
use crate::config::RuntimeConfig;
use crate::error::BookingError;
use crate::locks::ReconciliationGate;
use crate::reconcile::{ReconcileReport, ReconciliationEngine};

/// Committed lines of one shard as the presentation layer reads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardView {
    pub shard: ShardId,
    pub lines: Vec<LedgerLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub admissions: AdmissionCounters,
    pub reconcile_runs: u64,
    pub reconcile_aborts: u64,
    pub cached_shards_dropped: usize,
}

/// Process-wide booking state, built once at startup and torn down explicitly.
///
/// `init` validates the configuration and both storage schemas before any
/// request is served; every component shares the same storage handles and
/// reconciliation gate.
pub struct BookingRuntime<L: LedgerRepo, I: IntakeRepo> {
    ledger: Arc<L>,
    directory: Arc<BranchDirectory>,
    availability: Arc<AvailabilityCounter<L>>,
    admission: AdmissionController<L, I>,
    reconcile: ReconciliationEngine<L, I>,
    started_at: Instant,
}

impl<L: LedgerRepo, I: IntakeRepo> BookingRuntime<L, I> {
    pub fn init(
        config: RuntimeConfig,
        directory: BranchDirectory,
        ledger: Arc<L>,
        intake: Arc<I>,
    ) -> Result<Self, BookingError> {
        config.validate()?;
        directory.validate()?;
        ledger.verify_schema().map_err(schema_error("ledger"))?;
        intake.verify_schema().map_err(schema_error("intake"))?;

        let directory = Arc::new(directory);
        let gate = Arc::new(ReconciliationGate::new());
        let availability = Arc::new(AvailabilityCounter::new(
            config.availability,
            ledger.clone(),
            directory.clone(),
        )?);
        let admission = AdmissionController::new(
            config.admission,
            ledger.clone(),
            intake.clone(),
            directory.clone(),
            availability.clone(),
            gate.clone(),
        )?;
        let reconcile = ReconciliationEngine::new(
            config.reconcile,
            ledger.clone(),
            intake,
            directory.clone(),
            availability.clone(),
            gate,
        )?;
        info!(
            branches = directory.branches.len(),
            time_slots = directory.time_slots.len(),
            "booking runtime initialized"
        );
        Ok(Self {
            ledger,
            directory,
            availability,
            admission,
            reconcile,
            started_at: Instant::now(),
        })
    }

    pub fn directory(&self) -> &BranchDirectory {
        &self.directory
    }

    pub fn admission(&self) -> &AdmissionController<L, I> {
        &self.admission
    }

    pub fn submit(&self, submission: &BookingSubmission) -> Result<AdmissionOutcome, BookingError> {
        self.admission.submit(submission)
    }

    pub fn availability(&self, date: &str, branch: &str) -> Result<AvailabilityView, BookingError> {
        self.availability.query(date, branch, self.now())
    }

    pub fn reconcile(&self) -> Result<ReconcileReport, BookingError> {
        self.reconcile.run()
    }

    pub fn read_view(&self, shard: &ShardId) -> Result<ShardView, BookingError> {
        let lines = self.ledger.read_lines(shard).map_err(|e| {
            if !matches!(e, StorageError::ShardNotFound { .. }) {
                warn!(shard = %shard, error = %e, "shard read failed");
            }
            BookingError::StorageUnavailable(e)
        })?;
        Ok(ShardView {
            shard: shard.clone(),
            lines: lines.into_iter().map(|s| s.line).collect(),
        })
    }

    /// Shards in calendar order, unsorted last.
    pub fn list_shards(&self) -> Result<Vec<ShardId>, BookingError> {
        let mut shards = self.ledger.list_shards()?;
        shards.sort_by(|a, b| a.chronological_cmp(b));
        Ok(shards)
    }

    pub fn now(&self) -> MonotonicTimeNs {
        MonotonicTimeNs(self.started_at.elapsed().as_nanos() as u64)
    }

    pub fn shutdown(self) -> ShutdownReport {
        let cached_shards_dropped = self.availability.clear();
        let (reconcile_runs, reconcile_aborts) = self.reconcile.run_counts();
        let report = ShutdownReport {
            admissions: self.admission.counters(),
            reconcile_runs,
            reconcile_aborts,
            cached_shards_dropped,
        };
        info!(
            admitted = report.admissions.admitted,
            rejected = report.admissions.rejected,
            failed = report.admissions.failed,
            reconcile_runs,
            reconcile_aborts,
            "booking runtime shut down"
        );
        report
    }
}

fn schema_error(store: &'static str) -> impl Fn(StorageError) -> BookingError {
    move |e| BookingError::Config(format!("{store} schema: {e}"))
}
