#![forbid(unsafe_code)]

use std::cmp::Ordering;

use chrono::NaiveDate;
use slotbook_contracts::booking::{BookingRecord, StatusClass};
use slotbook_contracts::directory::BranchDirectory;
use slotbook_contracts::layout::BookingColumn;

/// 1 active, 2 done (not 2nd session), 3 done 2nd session, 4 cancelled.
pub fn status_weight(record: &BookingRecord) -> u8 {
    match record.status.class() {
        StatusClass::Active => 1,
        StatusClass::Done if record.is_second_session() => 3,
        StatusClass::Done => 2,
        StatusClass::Cancelled => 4,
    }
}

/// Fields compare in declaration order; `None`-like flags sort missing values last.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    date_missing: bool,
    date: Option<NaiveDate>,
    branch_unknown: bool,
    branch_priority: usize,
    weight: u8,
    slot_missing: bool,
    slot_minutes: u16,
    non_numeric_reference: bool,
    numeric_reference: u64,
    reference: String,
    joiner: bool,
    cells: Vec<String>,
}

/// Total order over ledger rows within one shard.
#[derive(Debug, Clone, Copy)]
pub struct LedgerOrdering<'a> {
    directory: &'a BranchDirectory,
    default_year: i32,
}

impl<'a> LedgerOrdering<'a> {
    pub fn new(directory: &'a BranchDirectory, default_year: i32) -> Self {
        Self {
            directory,
            default_year,
        }
    }

    pub fn compare(&self, a: &BookingRecord, b: &BookingRecord) -> Ordering {
        self.key(a).cmp(&self.key(b))
    }

    pub fn sort(&self, records: &mut [BookingRecord]) {
        records.sort_by_cached_key(|r| self.key(r));
    }

    fn key(&self, record: &BookingRecord) -> SortKey {
        let date = record.calendar_date(self.default_year);
        let priority = self.directory.priority(&record.branch);
        let slot = record.slot_start();
        let weight = status_weight(record);
        // Numeric codes lead only among weight-2 rows.
        let numeric = if weight == 2 {
            record.reference_code.as_ref().and_then(|c| c.numeric_value())
        } else {
            Some(0)
        };
        SortKey {
            date_missing: date.is_none(),
            date,
            branch_unknown: priority.is_none(),
            branch_priority: priority.unwrap_or(usize::MAX),
            weight,
            slot_missing: slot.is_none(),
            slot_minutes: slot.map(|s| s.minutes()).unwrap_or(u16::MAX),
            non_numeric_reference: numeric.is_none(),
            numeric_reference: numeric.unwrap_or(0),
            reference: record
                .reference_code
                .as_ref()
                .map(|c| c.as_str().to_string())
                .unwrap_or_default(),
            joiner: record.joiner,
            cells: {
                // Queue numbers are rewritten after sorting.
                let mut cells = record.to_cells();
                cells[BookingColumn::QueueNo.position()].clear();
                cells
            },
        }
    }
}
