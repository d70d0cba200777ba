#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use slotbook_contracts::booking::{
    BookingRecord, BookingSubmission, NormalizedSubmission, ReferenceCode, SubmissionType,
};
use slotbook_contracts::directory::BranchDirectory;
use slotbook_contracts::period::ShardId;
use slotbook_contracts::{ContractViolation, ReasonCodeId, Validate};
use slotbook_engines::admission::{
    decide, find_match, has_live_primary, merge_update, reason_codes, AdmissionDecision,
    MatchKind,
};
use slotbook_engines::refcode::ReferenceCodeGenerator;
use slotbook_storage::ledger::{RecordRow, RowIndex};
use slotbook_storage::repo::{IntakeRepo, LedgerRepo};
use slotbook_storage::StorageError;
use tracing::{error, info, warn};

use crate::availability::AvailabilityCounter;
use crate::config::AdmissionConfig;
use crate::error::BookingError;
use crate::locks::{ReconciliationGate, SlotLockTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionAction {
    Inserted,
    Updated(MatchKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionOutcome {
    pub action: AdmissionAction,
    pub reference_code: ReferenceCode,
    pub shard: ShardId,
    pub row: RowIndex,
    /// Live occupancy of the target slot before this write.
    pub occupied_before: u32,
    pub capacity: u32,
    /// False when the ledger row landed but the intake mirror append failed.
    pub intake_logged: bool,
    pub reason_code: ReasonCodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdmissionCounters {
    pub admitted: u64,
    pub rejected: u64,
    pub failed: u64,
}

/// Per-submission accept/reject with exactly one ledger row write on accept.
///
/// The live read and the write happen under the Slot Key's lock and a shared
/// hold on the reconciliation gate. Storage failures refuse the booking.
pub struct AdmissionController<L: LedgerRepo, I: IntakeRepo> {
    config: AdmissionConfig,
    ledger: Arc<L>,
    intake: Arc<I>,
    directory: Arc<BranchDirectory>,
    availability: Arc<AvailabilityCounter<L>>,
    locks: SlotLockTable,
    gate: Arc<ReconciliationGate>,
    codes: Mutex<ReferenceCodeGenerator>,
    admitted: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
}

impl<L: LedgerRepo, I: IntakeRepo> AdmissionController<L, I> {
    pub fn new(
        config: AdmissionConfig,
        ledger: Arc<L>,
        intake: Arc<I>,
        directory: Arc<BranchDirectory>,
        availability: Arc<AvailabilityCounter<L>>,
        gate: Arc<ReconciliationGate>,
    ) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self {
            config,
            ledger,
            intake,
            directory,
            availability,
            locks: SlotLockTable::new(),
            gate,
            codes: Mutex::new(ReferenceCodeGenerator::from_entropy()),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    /// Replaces the code source, e.g. with a seeded generator.
    pub fn with_code_generator(mut self, codes: ReferenceCodeGenerator) -> Self {
        self.codes = Mutex::new(codes);
        self
    }

    pub fn submit(&self, submission: &BookingSubmission) -> Result<AdmissionOutcome, BookingError> {
        let result = self.submit_inner(submission);
        match &result {
            Ok(_) => self.admitted.fetch_add(1, Ordering::Relaxed),
            Err(e) if e.is_user_rejection() => self.rejected.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    pub fn counters(&self) -> AdmissionCounters {
        AdmissionCounters {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn submit_inner(&self, submission: &BookingSubmission) -> Result<AdmissionOutcome, BookingError> {
        let year = self.config.year_policy.resolve();
        let normalized = submission.normalize(&self.directory, year).map_err(|v| {
            warn!(
                violation = %v,
                reason_code = %reason_codes::ADMIT_INPUT_SCHEMA_INVALID,
                "submission rejected before storage"
            );
            BookingError::Validation(v)
        })?;
        let capacity = self.directory.capacity(&normalized.branch).ok_or_else(|| {
            BookingError::Config(format!("no capacity for branch {}", normalized.branch))
        })?;

        let _shared = self
            .gate
            .admit(Duration::from_millis(self.config.gate_wait_ms))
            .ok_or_else(|| {
                warn!(
                    branch = %normalized.branch,
                    reason_code = %reason_codes::ADMIT_GATE_TIMEOUT,
                    "ledger gate held by reconciliation; refusing booking"
                );
                BookingError::ReconciliationBusy
            })?;
        let key = normalized.slot_key();
        self.locks
            .with_slot(&key, || self.admit_locked(&normalized, capacity, year))
    }

    fn admit_locked(
        &self,
        submission: &NormalizedSubmission,
        capacity: u32,
        year: i32,
    ) -> Result<AdmissionOutcome, BookingError> {
        let key = submission.slot_key();
        let shard = submission.shard();
        let rows = self.live_rows(&shard)?;
        let records: Vec<BookingRecord> = rows.iter().map(|r| r.record.clone()).collect();

        let decision = decide(&records, submission, capacity, year);
        let reason_code = decision.reason_code();
        let (action, row, record, occupied_before) = match decision {
            AdmissionDecision::Reject { occupied, capacity } => {
                info!(
                    slot = %key,
                    occupied,
                    capacity,
                    reason_code = %reason_code,
                    "submission rejected: slot full"
                );
                return Err(BookingError::CapacityExceeded {
                    slot: key.to_string(),
                    occupied,
                    capacity,
                });
            }
            AdmissionDecision::Insert { occupied } => {
                let elsewhere = self.rows_elsewhere(&shard)?;
                let code = self.insert_code(submission, &records, &elsewhere, year)?;
                let record = submission.to_record(code);
                let row = self
                    .ledger
                    .append_record(&shard, &record)
                    .map_err(|e| self.storage_failed(&shard, e))?;
                (AdmissionAction::Inserted, row, record, occupied)
            }
            AdmissionDecision::UpdateExisting {
                index,
                matched,
                reference_code,
                occupied,
            } => {
                let code = match reference_code {
                    Some(code) => code,
                    None => {
                        let elsewhere = self.rows_elsewhere(&shard)?;
                        self.trusted_or_fresh(submission, &records, &elsewhere)?
                    }
                };
                let record = merge_update(&records[index], submission, code);
                let row = rows[index].row;
                self.ledger
                    .update_record(&shard, row, &record)
                    .map_err(|e| self.storage_failed(&shard, e))?;
                (AdmissionAction::Updated(matched), row, record, occupied)
            }
        };
        self.availability.invalidate(&shard);

        let intake_logged = match self.intake.append_submission(&record) {
            Ok(_) => true,
            Err(e) => {
                error!(
                    shard = %shard,
                    error = %e,
                    "intake mirror append failed; ledger row kept"
                );
                false
            }
        };
        let Some(reference_code) = record.reference_code else {
            return Err(BookingError::Config("admitted row lost its reference code".to_string()));
        };
        info!(
            slot = %key,
            shard = %shard,
            reference_code = %reference_code,
            action = ?action,
            reason_code = %reason_code,
            "submission admitted"
        );
        Ok(AdmissionOutcome {
            action,
            reference_code,
            shard,
            row,
            occupied_before,
            capacity,
            intake_logged,
            reason_code,
        })
    }

    /// Live rows of the target shard, creating it from the template when absent.
    fn live_rows(&self, shard: &ShardId) -> Result<Vec<RecordRow>, BookingError> {
        match self.ledger.read_records(shard) {
            Ok(rows) => Ok(rows),
            Err(StorageError::ShardNotFound { .. }) => {
                match self.ledger.create_shard_from_template(shard) {
                    Ok(()) | Err(StorageError::ShardAlreadyExists { .. }) => {}
                    Err(e) => return Err(self.storage_failed(shard, e)),
                }
                info!(shard = %shard, "ledger shard created from template");
                self.ledger
                    .read_records(shard)
                    .map_err(|e| self.storage_failed(shard, e))
            }
            Err(e) => Err(self.storage_failed(shard, e)),
        }
    }

    /// Rows of every shard except `target`, for cross-period matching and
    /// code uniqueness. Read failures refuse the booking.
    fn rows_elsewhere(&self, target: &ShardId) -> Result<Vec<(ShardId, RecordRow)>, BookingError> {
        let shards = self
            .ledger
            .list_shards()
            .map_err(|e| self.storage_failed(target, e))?;
        let mut rows = Vec::new();
        for shard in shards.into_iter().filter(|s| s != target) {
            match self.ledger.read_records(&shard) {
                Ok(found) => rows.extend(found.into_iter().map(|row| (shard.clone(), row))),
                Err(StorageError::ShardNotFound { .. }) => {}
                Err(e) => return Err(self.storage_failed(&shard, e)),
            }
        }
        Ok(rows)
    }

    /// Code for a row added to the target shard.
    ///
    /// A reschedule whose booking sits in another period keeps that booking's
    /// code, so reconciliation purges the stale copy. An uncoded stale row is
    /// stamped with the new code first.
    fn insert_code(
        &self,
        submission: &NormalizedSubmission,
        records: &[BookingRecord],
        elsewhere: &[(ShardId, RecordRow)],
        year: i32,
    ) -> Result<ReferenceCode, BookingError> {
        if submission.submission_type == SubmissionType::Reschedule {
            let other: Vec<BookingRecord> = elsewhere.iter().map(|(_, r)| r.record.clone()).collect();
            if let Some((index, _)) = find_match(&other, submission, year) {
                let (from, stale) = &elsewhere[index];
                if let Some(code) = &stale.record.reference_code {
                    info!(from = %from, reference_code = %code, "reschedule moves booking across periods");
                    return Ok(code.clone());
                }
                let code = self.fresh_code(records, elsewhere)?;
                let mut stamped = stale.record.clone();
                stamped.reference_code = Some(code.clone());
                self.ledger
                    .update_record(from, stale.row, &stamped)
                    .map_err(|e| self.storage_failed(from, e))?;
                info!(from = %from, reference_code = %code, "uncoded booking stamped before cross-period move");
                return Ok(code);
            }
        }
        self.trusted_or_fresh(submission, records, elsewhere)
    }

    /// A supplied code is only kept by a joiner whose primary is still live.
    fn trusted_or_fresh(
        &self,
        submission: &NormalizedSubmission,
        records: &[BookingRecord],
        elsewhere: &[(ShardId, RecordRow)],
    ) -> Result<ReferenceCode, BookingError> {
        if let Some(code) = &submission.reference_code {
            let all = records.iter().chain(elsewhere.iter().map(|(_, r)| &r.record));
            if submission.joiner && has_live_primary(all, code) {
                return Ok(code.clone());
            }
            warn!(
                reference_code = %code,
                joiner = submission.joiner,
                "supplied reference code not honoured; issuing a fresh one"
            );
        }
        self.fresh_code(records, elsewhere)
    }

    fn fresh_code(
        &self,
        records: &[BookingRecord],
        elsewhere: &[(ShardId, RecordRow)],
    ) -> Result<ReferenceCode, BookingError> {
        let attempts = self.config.max_reference_attempts;
        let taken = |code: &ReferenceCode| {
            records
                .iter()
                .chain(elsewhere.iter().map(|(_, r)| &r.record))
                .any(|r| r.reference_code.as_ref() == Some(code))
        };
        self.codes
            .lock()
            .next_unused(attempts, taken)?
            .ok_or_else(|| {
                error!(
                    attempts,
                    reason_code = %reason_codes::ADMIT_REFERENCE_EXHAUSTED,
                    "reference code space exhausted"
                );
                BookingError::ReferenceCodeExhausted { attempts }
            })
    }

    fn storage_failed(&self, shard: &ShardId, err: StorageError) -> BookingError {
        error!(
            shard = %shard,
            error = %err,
            reason_code = %reason_codes::ADMIT_STORAGE_UNAVAILABLE,
            "ledger unavailable; refusing booking"
        );
        BookingError::StorageUnavailable(err)
    }
}
