#![forbid(unsafe_code)]

use std::cmp::Reverse;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use slotbook_contracts::booking::{BookingRecord, ReferenceCode};
use slotbook_contracts::calendar::iso_date;
use slotbook_contracts::directory::BranchDirectory;
use slotbook_contracts::layout::LedgerLine;
use slotbook_contracts::period::ShardId;
use slotbook_contracts::{ContractViolation, ReasonCodeId, Validate};
use slotbook_engines::dedup::dedup;
use slotbook_engines::grouping::{group_by_reference, latest_per_member, GroupMember};
use slotbook_engines::ordering::LedgerOrdering;
use slotbook_engines::render::render;
use slotbook_storage::intake::{IntakeRow, IntakeRowId};
use slotbook_storage::ledger::content_digest;
use slotbook_storage::repo::{IntakeRepo, LedgerRepo};
use slotbook_storage::StorageError;
use tracing::{debug, error, info, warn};

use crate::availability::AvailabilityCounter;
use crate::config::ReconcileConfig;
use crate::error::BookingError;
use crate::locks::ReconciliationGate;

pub mod reason_codes {
    use slotbook_contracts::ReasonCodeId;

    pub const RECON_OK_COMPLETE: ReasonCodeId = ReasonCodeId(0x5243_0001);
    pub const RECON_OK_NOTHING_TO_DO: ReasonCodeId = ReasonCodeId(0x5243_0002);

    pub const RECON_BUSY: ReasonCodeId = ReasonCodeId(0x5243_0010);
    pub const RECON_ABORTED_STORAGE: ReasonCodeId = ReasonCodeId(0x5243_00F1);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileStage {
    Collect,
    Group,
    Purge,
    Distribute,
    Dedup,
    Sort,
    Render,
    Commit,
    MarkSynced,
    Complete,
    Aborted,
}

impl ReconcileStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconcileStage::Collect => "COLLECT",
            ReconcileStage::Group => "GROUP",
            ReconcileStage::Purge => "PURGE",
            ReconcileStage::Distribute => "DISTRIBUTE",
            ReconcileStage::Dedup => "DEDUP",
            ReconcileStage::Sort => "SORT",
            ReconcileStage::Render => "RENDER",
            ReconcileStage::Commit => "COMMIT",
            ReconcileStage::MarkSynced => "MARK_SYNCED",
            ReconcileStage::Complete => "COMPLETE",
            ReconcileStage::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for ReconcileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardCommit {
    pub shard: ShardId,
    pub created: bool,
    pub lines_written: usize,
    pub booking_rows: usize,
    pub row_capacity: usize,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub collected: usize,
    pub groups: usize,
    pub manual_rows: usize,
    pub superseded_rows: usize,
    pub purged_rows: usize,
    pub carried_rows: usize,
    pub shards: Vec<ShardCommit>,
    pub stage: ReconcileStage,
    #[serde(skip)]
    pub reason_code: ReasonCodeId,
}

/// Rows of one shard being rebuilt this run. `incoming` is newest first and
/// wins over `existing` in DEDUP.
#[derive(Debug, Default)]
struct ShardWork {
    existed: bool,
    existing: Vec<BookingRecord>,
    incoming: Vec<BookingRecord>,
}

/// Rendered content waiting for COMMIT.
#[derive(Debug)]
struct PreparedShard {
    shard: ShardId,
    existed: bool,
    lines: Vec<LedgerLine>,
    booking_rows: usize,
}

/// Serialized batch job turning unsynced intake rows into canonical shards.
pub struct ReconciliationEngine<L: LedgerRepo, I: IntakeRepo> {
    config: ReconcileConfig,
    ledger: Arc<L>,
    intake: Arc<I>,
    directory: Arc<BranchDirectory>,
    availability: Arc<AvailabilityCounter<L>>,
    gate: Arc<ReconciliationGate>,
    runs: AtomicU64,
    aborts: AtomicU64,
}

impl<L: LedgerRepo, I: IntakeRepo> ReconciliationEngine<L, I> {
    pub fn new(
        config: ReconcileConfig,
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
            gate,
            runs: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
        })
    }

    /// (completed runs, aborted runs)
    pub fn run_counts(&self) -> (u64, u64) {
        (
            self.runs.load(Ordering::Relaxed),
            self.aborts.load(Ordering::Relaxed),
        )
    }

    /// One full pass. Overlapping calls fail fast with `ReconciliationBusy`.
    pub fn run(&self) -> Result<ReconcileReport, BookingError> {
        let Some(_run) = self.gate.try_start_run() else {
            warn!(reason_code = %reason_codes::RECON_BUSY, "reconciliation already running");
            return Err(BookingError::ReconciliationBusy);
        };
        let Some(_exclusive) = self
            .gate
            .exclusive(Duration::from_millis(self.config.gate_wait_ms))
        else {
            warn!(
                reason_code = %reason_codes::RECON_BUSY,
                "admissions did not drain; retrying later"
            );
            return Err(BookingError::ReconciliationBusy);
        };

        let result = self.run_exclusive();
        match &result {
            Ok(report) => {
                self.runs.fetch_add(1, Ordering::Relaxed);
                info!(
                    collected = report.collected,
                    groups = report.groups,
                    manual_rows = report.manual_rows,
                    superseded_rows = report.superseded_rows,
                    purged_rows = report.purged_rows,
                    carried_rows = report.carried_rows,
                    shards = report.shards.len(),
                    stage = %report.stage,
                    reason_code = %report.reason_code,
                    "reconciliation finished"
                );
            }
            Err(err) => {
                self.aborts.fetch_add(1, Ordering::Relaxed);
                error!(
                    kind = err.kind(),
                    error = %err,
                    stage = %ReconcileStage::Aborted,
                    reason_code = %reason_codes::RECON_ABORTED_STORAGE,
                    "reconciliation aborted; intake rows stay unsynced for retry"
                );
            }
        }
        result
    }

    fn run_exclusive(&self) -> Result<ReconcileReport, BookingError> {
        let year = self.config.year_policy.resolve();

        // COLLECT
        let collected = self
            .intake
            .list_unsynced()
            .map_err(|e| abort(ReconcileStage::Collect, None, e))?;
        if collected.is_empty() {
            return Ok(ReconcileReport {
                collected: 0,
                groups: 0,
                manual_rows: 0,
                superseded_rows: 0,
                purged_rows: 0,
                carried_rows: 0,
                shards: Vec::new(),
                stage: ReconcileStage::Complete,
                reason_code: reason_codes::RECON_OK_NOTHING_TO_DO,
            });
        }
        let collected_count = collected.len();
        let synced_ids: Vec<IntakeRowId> = collected.iter().map(|r| r.id).collect();

        // GROUP
        let mut grouped = group_by_reference(collected, |row: &IntakeRow| {
            row.record.reference_code.as_ref()
        });
        let mut superseded_rows = 0;
        for group in &mut grouped.groups {
            let before = group.members.len();
            let members = std::mem::take(&mut group.members);
            group.members = latest_per_member(
                members,
                |row: &IntakeRow| GroupMember::of(&row.record),
                |row: &IntakeRow| row.id.0,
            );
            superseded_rows += before - group.members.len();
        }
        let reprocessed: BTreeSet<ReferenceCode> = grouped.reference_codes().cloned().collect();
        let replaced: HashSet<(ReferenceCode, GroupMember)> = grouped
            .groups
            .iter()
            .flat_map(|g| {
                g.members
                    .iter()
                    .map(|row| (g.reference_code.clone(), GroupMember::of(&row.record)))
            })
            .collect();
        debug!(
            groups = grouped.groups.len(),
            manual_rows = grouped.manual.len(),
            superseded_rows,
            stage = %ReconcileStage::Group,
            "intake grouped"
        );

        // PURGE
        let mut work: BTreeMap<ShardId, ShardWork> = BTreeMap::new();
        let mut purged_rows = 0;
        let mut carried: Vec<BookingRecord> = Vec::new();
        let shards = self
            .ledger
            .list_shards()
            .map_err(|e| abort(ReconcileStage::Purge, None, e))?;
        for shard in shards {
            let rows = self
                .ledger
                .read_records(&shard)
                .map_err(|e| abort(ReconcileStage::Purge, Some(&shard), e))?;
            let (purged, kept): (Vec<BookingRecord>, Vec<BookingRecord>) = rows
                .into_iter()
                .map(|r| r.record)
                .partition(|r| {
                    r.reference_code
                        .as_ref()
                        .is_some_and(|code| reprocessed.contains(code))
                });
            if !purged.is_empty() {
                purged_rows += purged.len();
                carried.extend(purged.into_iter().filter(|r| {
                    r.reference_code
                        .clone()
                        .map_or(true, |code| !replaced.contains(&(code, GroupMember::of(r))))
                }));
                work.insert(
                    shard,
                    ShardWork {
                        existed: true,
                        existing: kept,
                        incoming: Vec::new(),
                    },
                );
            }
        }

        // DISTRIBUTE
        let groups = grouped.groups.len();
        let manual_rows = grouped.manual.len();
        let carried_rows = carried.len();
        for record in carried {
            let record = canonicalize(record, &self.directory, year);
            self.shard_work(&mut work, &record, year)?.existing.push(record);
        }
        let mut incoming: Vec<IntakeRow> = grouped
            .groups
            .into_iter()
            .flat_map(|g| g.members)
            .chain(grouped.manual)
            .collect();
        incoming.sort_by_key(|row| Reverse(row.id));
        for row in incoming {
            let record = canonicalize(row.record, &self.directory, year);
            self.shard_work(&mut work, &record, year)?.incoming.push(record);
        }

        // DEDUP, SORT, RENDER
        let ordering = LedgerOrdering::new(&self.directory, year);
        let prepared: Vec<PreparedShard> = work
            .into_iter()
            .map(|(shard, w)| {
                let mut records = dedup(w.incoming.into_iter().chain(w.existing).collect(), year);
                ordering.sort(&mut records);
                let rendered = render(&records, year);
                PreparedShard {
                    shard,
                    existed: w.existed,
                    lines: rendered.lines,
                    booking_rows: rendered.booking_rows,
                }
            })
            .collect();

        // COMMIT
        let mut commits = Vec::with_capacity(prepared.len());
        for shard in prepared {
            commits.push(self.commit_shard(shard)?);
        }

        // MARK_SYNCED
        self.intake
            .mark_synced(&synced_ids)
            .map_err(|e| abort(ReconcileStage::MarkSynced, None, e))?;

        Ok(ReconcileReport {
            collected: collected_count,
            groups,
            manual_rows,
            superseded_rows,
            purged_rows,
            carried_rows,
            shards: commits,
            stage: ReconcileStage::Complete,
            reason_code: reason_codes::RECON_OK_COMPLETE,
        })
    }

    /// Work entry for the shard `record` belongs to, loading it on first use.
    fn shard_work<'w>(
        &self,
        work: &'w mut BTreeMap<ShardId, ShardWork>,
        record: &BookingRecord,
        year: i32,
    ) -> Result<&'w mut ShardWork, BookingError> {
        match work.entry(ShardId::for_date_cell(&record.date, year)) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let loaded = self.load_shard(entry.key())?;
                Ok(entry.insert(loaded))
            }
        }
    }

    fn load_shard(&self, shard: &ShardId) -> Result<ShardWork, BookingError> {
        match self.ledger.read_records(shard) {
            Ok(rows) => Ok(ShardWork {
                existed: true,
                existing: rows.into_iter().map(|r| r.record).collect(),
                incoming: Vec::new(),
            }),
            Err(StorageError::ShardNotFound { .. }) => Ok(ShardWork::default()),
            Err(e) => Err(abort(ReconcileStage::Distribute, Some(shard), e)),
        }
    }

    fn commit_shard(&self, prepared: PreparedShard) -> Result<ShardCommit, BookingError> {
        let PreparedShard {
            shard,
            existed,
            lines,
            booking_rows,
        } = prepared;
        let fail = |e: StorageError| abort(ReconcileStage::Commit, Some(&shard), e);

        if !existed {
            match self.ledger.create_shard_from_template(&shard) {
                Ok(()) => info!(shard = %shard, "ledger shard created from template"),
                Err(StorageError::ShardAlreadyExists { .. }) => {}
                Err(e) => return Err(fail(e)),
            }
        }
        let trailing = self.config.trailing_clear_rows;
        let mut capacity = self.ledger.row_capacity(&shard).map_err(fail)?;
        let needed = lines.len() + trailing;
        if needed > capacity {
            capacity = self
                .ledger
                .extend_capacity(&shard, needed - capacity)
                .map_err(fail)?;
            debug!(shard = %shard, capacity, "shard capacity extended");
        }
        self.ledger
            .replace_content(&shard, &lines, trailing)
            .map_err(fail)?;
        if capacity > lines.len() + self.config.trim_threshold_rows {
            capacity = self
                .ledger
                .trim_capacity(&shard, lines.len() + self.config.trim_margin_rows)
                .map_err(fail)?;
            debug!(shard = %shard, capacity, "oversized shard trimmed");
        }
        self.availability.invalidate(&shard);

        let digest = content_digest(&lines);
        info!(
            shard = %shard,
            lines = lines.len(),
            booking_rows,
            digest = %digest,
            stage = %ReconcileStage::Commit,
            "shard committed"
        );
        Ok(ShardCommit {
            shard,
            created: !existed,
            lines_written: lines.len(),
            booking_rows,
            row_capacity: capacity,
            digest,
        })
    }
}

fn abort(stage: ReconcileStage, shard: Option<&ShardId>, source: StorageError) -> BookingError {
    BookingError::ReconciliationAborted {
        stage,
        shard: shard.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string()),
        source,
    }
}

/// Rewrites parseable branch, date and time cells into their canonical forms.
fn canonicalize(mut record: BookingRecord, directory: &BranchDirectory, year: i32) -> BookingRecord {
    if let Some(code) = directory.resolve_branch(&record.branch) {
        record.branch = code.as_str().to_string();
    }
    if let Some(date) = record.calendar_date(year) {
        record.date = iso_date(date);
    }
    if let Some(slot) = record.slot_start() {
        record.time_slot = slot.label();
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AvailabilityConfig, YearPolicy};
    use slotbook_contracts::booking::{BookingStatus, SessionType, SubmissionType};
    use slotbook_contracts::layout::StyleTag;
    use slotbook_contracts::MonotonicTimeNs;
    use slotbook_storage::intake::{InMemoryIntakeLog, IntakeFault};
    use slotbook_storage::ledger::{
        InMemoryLedgerStore, LedgerFault, RowIndex, RowLayout, ShardTemplate, StoredLine,
    };

    struct Fixture {
        ledger: Arc<InMemoryLedgerStore>,
        intake: Arc<InMemoryIntakeLog>,
        availability: Arc<AvailabilityCounter<InMemoryLedgerStore>>,
        gate: Arc<ReconciliationGate>,
        engine: ReconciliationEngine<InMemoryLedgerStore, InMemoryIntakeLog>,
    }

    fn fixture_with(template: ShardTemplate) -> Fixture {
        let ledger = Arc::new(InMemoryLedgerStore::new_in_memory(template).unwrap());
        let intake = Arc::new(InMemoryIntakeLog::new_in_memory().unwrap());
        let directory = Arc::new(BranchDirectory::mvp_v1());
        let availability = Arc::new(
            AvailabilityCounter::new(
                AvailabilityConfig {
                    cache_ttl_ms: 60_000,
                    year_policy: YearPolicy::Fixed(2025),
                },
                ledger.clone(),
                directory.clone(),
            )
            .unwrap(),
        );
        let gate = Arc::new(ReconciliationGate::new());
        let config = ReconcileConfig {
            gate_wait_ms: 50,
            trailing_clear_rows: 2,
            trim_threshold_rows: 50,
            trim_margin_rows: 10,
            year_policy: YearPolicy::Fixed(2025),
        };
        let engine = ReconciliationEngine::new(
            config,
            ledger.clone(),
            intake.clone(),
            directory,
            availability.clone(),
            gate.clone(),
        )
        .unwrap();
        Fixture {
            ledger,
            intake,
            availability,
            gate,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ShardTemplate::mvp_v1())
    }

    fn rec(name: &str, branch: &str, date: &str, slot: &str, code: &str, joiner: bool) -> BookingRecord {
        BookingRecord {
            branch: branch.to_string(),
            client_name: name.to_string(),
            phone: "09171234567".to_string(),
            date: date.to_string(),
            time_slot: slot.to_string(),
            services: vec!["Facial".to_string()],
            session: Some(SessionType::First),
            status: BookingStatus::Pending,
            after_care: false,
            payment_method: "Cash".to_string(),
            remarks: String::new(),
            submission_type: SubmissionType::New,
            joiner,
            reference_code: ReferenceCode::parse_cell(code),
            queue_no: String::new(),
        }
    }

    fn group(date: &str, code: &str) -> Vec<BookingRecord> {
        vec![
            rec("Ana", "DT", date, "10:00 AM", code, false),
            rec("Ben", "DT", date, "10:00 AM", code, true),
            rec("Cy", "DT", date, "10:00 AM", code, true),
        ]
    }

    fn shard(label: &str) -> ShardId {
        ShardId::new(label).unwrap()
    }

    fn snapshot(ledger: &InMemoryLedgerStore) -> Vec<(ShardId, Vec<StoredLine>)> {
        ledger
            .list_shards()
            .unwrap()
            .into_iter()
            .map(|s| {
                let lines = ledger.read_lines(&s).unwrap();
                (s, lines)
            })
            .collect()
    }

    fn names(ledger: &InMemoryLedgerStore, label: &str) -> Vec<String> {
        ledger
            .read_records(&shard(label))
            .unwrap()
            .into_iter()
            .map(|r| r.record.client_name)
            .collect()
    }

    #[test]
    fn at_reconcile_01_no_unsynced_rows_is_a_noop() {
        let f = fixture();
        let report = f.engine.run().unwrap();
        assert_eq!(report.stage, ReconcileStage::Complete);
        assert_eq!(report.reason_code, reason_codes::RECON_OK_NOTHING_TO_DO);
        assert!(report.shards.is_empty());
        assert!(f.ledger.list_shards().unwrap().is_empty());
    }

    #[test]
    fn at_reconcile_02_rows_land_in_their_period_shards() {
        let f = fixture();
        f.availability
            .query("2025-06-12", "DT", MonotonicTimeNs(0))
            .unwrap();
        for record in [
            rec("Ana", "DT", "2025-06-12", "10:00 AM", "", false),
            rec("Ben", "Northpoint", "Jun 20", "2pm", "", false),
            rec("Cy", "DT", "someday", "10:00 AM", "", false),
        ] {
            f.intake.append_submission(&record).unwrap();
        }
        let report = f.engine.run().unwrap();
        assert_eq!(report.collected, 3);
        assert_eq!(report.manual_rows, 3);
        assert_eq!(report.shards.len(), 3);
        assert!(report.shards.iter().all(|c| c.created));
        for commit in &report.shards {
            assert_eq!(commit.row_capacity, commit.lines_written + 10);
        }
        assert_eq!(names(&f.ledger, "Jun 1 - 15, 2025"), vec!["Ana"]);
        assert_eq!(names(&f.ledger, "Jun 16-30, 2025"), vec!["Ben"]);
        assert_eq!(names(&f.ledger, "Unsorted"), vec!["Cy"]);

        let ben = &f.ledger.read_records(&shard("Jun 16-30, 2025")).unwrap()[0].record;
        assert_eq!(ben.branch, "NP");
        assert_eq!(ben.date, "2025-06-20");
        assert_eq!(ben.time_slot, "2:00 PM");
        assert!(f.intake.list_unsynced().unwrap().is_empty());
        assert_eq!(f.availability.cached_shards(), 0);
    }

    #[test]
    fn at_reconcile_03_group_reschedule_moves_every_member() {
        let f = fixture();
        for record in group("2025-06-12", "BK-GRP234") {
            f.intake.append_submission(&record).unwrap();
        }
        f.engine.run().unwrap();
        assert_eq!(names(&f.ledger, "Jun 1 - 15, 2025"), vec!["Ana", "Ben", "Cy"]);

        for mut record in group("2025-06-20", "BK-GRP234") {
            record.submission_type = SubmissionType::Reschedule;
            f.intake.append_submission(&record).unwrap();
        }
        let report = f.engine.run().unwrap();
        assert_eq!(report.purged_rows, 3);
        assert_eq!(report.groups, 1);
        assert!(names(&f.ledger, "Jun 1 - 15, 2025").is_empty());
        assert_eq!(f.ledger.used_rows(&shard("Jun 1 - 15, 2025")).unwrap(), 0);
        assert_eq!(names(&f.ledger, "Jun 16-30, 2025"), vec!["Ana", "Ben", "Cy"]);
        let emptied = report
            .shards
            .iter()
            .find(|c| c.shard.as_str() == "Jun 1 - 15, 2025")
            .unwrap();
        assert_eq!(emptied.lines_written, 0);
        assert!(!emptied.created);
    }

    #[test]
    fn at_reconcile_04_rendered_shard_has_headers_groups_and_order() {
        let f = fixture();
        let mut rows = group("2025-06-12", "BK-GRP234");
        rows.reverse();
        rows.push(rec("Dee", "NP", "2025-06-12", "9:00 AM", "", false));
        let mut done = rec("Eve", "DT", "2025-06-12", "9:00 AM", "", false);
        done.status = BookingStatus::Done;
        rows.push(done);
        for record in &rows {
            f.intake.append_submission(record).unwrap();
        }
        f.engine.run().unwrap();

        let lines = f.ledger.read_lines(&shard("Jun 1 - 15, 2025")).unwrap();
        let summary: Vec<(StyleTag, String, String)> = lines
            .iter()
            .map(|l| (l.line.style, l.line.cells[1].clone(), l.line.cells[0].clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (StyleTag::DateHeader, String::new(), "Thursday, June 12, 2025".to_string()),
                (StyleTag::Group(0), "Ana".to_string(), "DT".to_string()),
                (StyleTag::Group(0), "Ben".to_string(), "DT".to_string()),
                (StyleTag::Group(0), "Cy".to_string(), "DT".to_string()),
                (StyleTag::Default, "Eve".to_string(), "DT".to_string()),
                (StyleTag::Divider, String::new(), String::new()),
                (StyleTag::Default, "Dee".to_string(), "NP".to_string()),
            ]
        );
        assert_eq!(lines[4].line.cells[13], "1");
    }

    #[test]
    fn at_reconcile_05_failed_mark_aborts_and_retry_is_identical() {
        let f = fixture();
        let mut done = rec("Dee", "NP", "2025-06-12", "9:00 AM", "", false);
        done.status = BookingStatus::Done;
        let mut rows = group("2025-06-12", "BK-GRP234");
        rows.push(done);
        rows.push(rec("Eve", "HB", "2025-06-25", "1:00 PM", "", false));
        for record in &rows {
            f.intake.append_submission(record).unwrap();
        }

        f.intake.inject_fault(IntakeFault::MarkUnavailable);
        let err = f.engine.run().unwrap_err();
        assert!(matches!(
            err,
            BookingError::ReconciliationAborted {
                stage: ReconcileStage::MarkSynced,
                ..
            }
        ));
        assert_eq!(f.intake.list_unsynced().unwrap().len(), 5);
        let first = snapshot(&f.ledger);

        f.intake.clear_faults();
        let report = f.engine.run().unwrap();
        assert_eq!(snapshot(&f.ledger), first);
        for commit in &report.shards {
            let lines: Vec<LedgerLine> = f
                .ledger
                .read_lines(&commit.shard)
                .unwrap()
                .into_iter()
                .map(|s| s.line)
                .collect();
            assert_eq!(commit.digest, content_digest(&lines));
        }
        assert!(f.intake.list_unsynced().unwrap().is_empty());
        assert_eq!(f.engine.run_counts(), (1, 1));
    }

    #[test]
    fn at_reconcile_06_commit_failure_leaves_everything_unsynced() {
        let f = fixture();
        f.intake
            .append_submission(&rec("Ana", "DT", "2025-06-12", "10:00 AM", "", false))
            .unwrap();
        f.intake
            .append_submission(&rec("Ben", "DT", "2025-06-20", "10:00 AM", "", false))
            .unwrap();
        f.ledger
            .inject_fault(LedgerFault::WriteUnavailableFor(shard("Jun 16-30, 2025")));
        match f.engine.run() {
            Err(BookingError::ReconciliationAborted { stage, shard, .. }) => {
                assert_eq!(stage, ReconcileStage::Commit);
                assert_eq!(shard, "Jun 16-30, 2025");
            }
            other => panic!("expected commit abort, got {other:?}"),
        }
        assert_eq!(f.intake.list_unsynced().unwrap().len(), 2);

        f.ledger.clear_faults();
        f.engine.run().unwrap();
        assert_eq!(names(&f.ledger, "Jun 1 - 15, 2025"), vec!["Ana"]);
        assert_eq!(names(&f.ledger, "Jun 16-30, 2025"), vec!["Ben"]);
    }

    #[test]
    fn at_reconcile_07_second_run_without_intake_changes_nothing() {
        let f = fixture();
        for record in group("2025-06-12", "BK-GRP234") {
            f.intake.append_submission(&record).unwrap();
        }
        f.engine.run().unwrap();
        let first = snapshot(&f.ledger);
        let report = f.engine.run().unwrap();
        assert_eq!(report.collected, 0);
        assert_eq!(snapshot(&f.ledger), first);
    }

    #[test]
    fn at_reconcile_08_intake_order_never_changes_output() {
        let mut rows = group("2025-06-12", "BK-GRP234");
        rows.push(rec("Dee", "NP", "2025-06-12", "9:00 AM", "", false));
        rows.push(rec("Eve", "WG", "2025-06-03", "4:00 PM", "BK-SOLO22", false));
        rows.push(rec("Fay", "DT", "2025-06-20", "11:00 AM", "", false));
        rows.push(rec("Gus", "ZZ", "2025-06-12", "9:00 AM", "", false));

        let forward = fixture();
        for record in &rows {
            forward.intake.append_submission(record).unwrap();
        }
        forward.engine.run().unwrap();

        let backward = fixture();
        for record in rows.iter().rev() {
            backward.intake.append_submission(record).unwrap();
        }
        backward.engine.run().unwrap();

        assert_eq!(snapshot(&forward.ledger), snapshot(&backward.ledger));
    }

    #[test]
    fn at_reconcile_09_coded_row_replaces_manual_duplicate() {
        let f = fixture();
        f.intake
            .append_submission(&rec("Ana Reyes", "DT", "2025-06-12", "10:00 AM", "", false))
            .unwrap();
        f.intake
            .append_submission(&rec("Ana Reyes", "DT", "2025-06-12", "10:00 AM", "", false))
            .unwrap();
        f.engine.run().unwrap();
        assert_eq!(names(&f.ledger, "Jun 1 - 15, 2025").len(), 1);

        f.intake
            .append_submission(&rec("ana  reyes", "DT", "June 12", "10am", "BK-CODE22", false))
            .unwrap();
        f.engine.run().unwrap();
        let rows = f.ledger.read_records(&shard("Jun 1 - 15, 2025")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].record.reference_code,
            ReferenceCode::parse_cell("BK-CODE22")
        );
    }

    #[test]
    fn at_reconcile_10_extension_keeps_existing_row_layout() {
        let mut template = ShardTemplate::mvp_v1();
        template.initial_capacity = 5;
        let f = fixture_with(template);
        let target = shard("Jun 1 - 15, 2025");
        f.ledger.create_shard_from_template(&target).unwrap();
        let custom = RowLayout {
            height_px: 40,
            validation_profile: "frozen_header".to_string(),
        };
        f.ledger
            .set_row_layout(&target, RowIndex(1), custom.clone())
            .unwrap();
        for (i, name) in ["Ana", "Ben", "Cy", "Dee", "Eve", "Fay"].iter().enumerate() {
            let slot = format!("{}:00 AM", 9 + (i % 3));
            f.intake
                .append_submission(&rec(name, "DT", "2025-06-12", &slot, "", false))
                .unwrap();
        }
        let report = f.engine.run().unwrap();
        assert_eq!(report.shards[0].lines_written, 7);
        assert_eq!(report.shards[0].row_capacity, 9);
        let meta = f.ledger.metadata(&target).unwrap();
        assert_eq!(meta.row_layouts.len(), 9);
        assert_eq!(meta.row_layouts[1], custom);
        assert_eq!(meta.row_layouts[8], f.ledger.template().row_layout);
    }

    #[test]
    fn at_reconcile_11_overlapping_run_fails_fast() {
        let f = fixture();
        let _running = f.gate.try_start_run().unwrap();
        assert!(matches!(f.engine.run(), Err(BookingError::ReconciliationBusy)));
        assert_eq!(f.engine.run_counts(), (0, 0));
    }

    #[test]
    fn at_reconcile_12_member_resubmission_keeps_the_rest_of_the_group() {
        let f = fixture();
        for record in group("2025-06-12", "BK-GRP234") {
            f.intake.append_submission(&record).unwrap();
        }
        f.engine.run().unwrap();

        let mut again = rec("Ana", "DT", "2025-06-12", "10:00 AM", "BK-GRP234", false);
        again.services = vec!["Peel".to_string()];
        f.intake.append_submission(&again).unwrap();
        let report = f.engine.run().unwrap();
        assert_eq!(report.purged_rows, 3);
        assert_eq!(report.carried_rows, 2);
        assert_eq!(names(&f.ledger, "Jun 1 - 15, 2025"), vec!["Ana", "Ben", "Cy"]);
        let rows = f.ledger.read_records(&shard("Jun 1 - 15, 2025")).unwrap();
        assert_eq!(rows[0].record.services, vec!["Peel".to_string()]);
        assert_eq!(rows[1].record.services, vec!["Facial".to_string()]);
    }

    #[test]
    fn at_reconcile_13_later_reschedule_in_same_window_wins() {
        let f = fixture();
        f.intake
            .append_submission(&rec("Ana", "DT", "2025-06-10", "10:00 AM", "BK-MOVE22", false))
            .unwrap();
        let mut moved = rec("Ana", "DT", "2025-06-20", "11:00 AM", "BK-MOVE22", false);
        moved.submission_type = SubmissionType::Reschedule;
        f.intake.append_submission(&moved).unwrap();

        let report = f.engine.run().unwrap();
        assert_eq!(report.collected, 2);
        assert_eq!(report.superseded_rows, 1);
        assert_eq!(report.shards.len(), 1);
        assert!(matches!(
            f.ledger.read_records(&shard("Jun 1 - 15, 2025")),
            Err(StorageError::ShardNotFound { .. })
        ));
        let rows = f.ledger.read_records(&shard("Jun 16-30, 2025")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record.time_slot, "11:00 AM");
        assert!(f.intake.list_unsynced().unwrap().is_empty());
    }

    #[test]
    fn at_reconcile_14_newest_resubmission_fields_survive_dedup() {
        let f = fixture();
        f.intake
            .append_submission(&rec("Ana", "DT", "2025-06-12", "10:00 AM", "BK-SVC222", false))
            .unwrap();
        let mut peel = rec("Ana", "DT", "2025-06-12", "10:00 AM", "BK-SVC222", false);
        peel.services = vec!["Peel".to_string()];
        f.intake.append_submission(&peel).unwrap();
        f.intake
            .append_submission(&rec("Dee", "NP", "2025-06-12", "9:00 AM", "", false))
            .unwrap();
        let mut dee = rec("Dee", "NP", "2025-06-12", "9:00 AM", "", false);
        dee.remarks = "bring towel".to_string();
        f.intake.append_submission(&dee).unwrap();

        f.engine.run().unwrap();
        let rows = f.ledger.read_records(&shard("Jun 1 - 15, 2025")).unwrap();
        assert_eq!(rows.len(), 2);
        let ana = rows.iter().find(|r| r.record.client_name == "Ana").unwrap();
        assert_eq!(ana.record.services, vec!["Peel".to_string()]);
        let dee = rows.iter().find(|r| r.record.client_name == "Dee").unwrap();
        assert_eq!(dee.record.remarks, "bring towel");
    }
}
