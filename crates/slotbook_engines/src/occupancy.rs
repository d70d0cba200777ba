#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use chrono::NaiveDate;
use slotbook_contracts::booking::{BookingRecord, BranchCode, SlotKey};
use slotbook_contracts::calendar::SlotStart;

/// Non-cancelled rows per slot start for one branch and date. Rows with an
/// unparseable date or time never count.
pub fn count_by_slot<'a, I>(
    records: I,
    branch: &BranchCode,
    date: NaiveDate,
    default_year: i32,
) -> BTreeMap<SlotStart, u32>
where
    I: IntoIterator<Item = &'a BookingRecord>,
{
    let mut counts = BTreeMap::new();
    for record in records {
        if record.status.is_cancelled()
            || !record.branch.eq_ignore_ascii_case(branch.as_str())
            || record.calendar_date(default_year) != Some(date)
        {
            continue;
        }
        if let Some(slot) = record.slot_start() {
            *counts.entry(slot).or_insert(0) += 1;
        }
    }
    counts
}

pub fn occupancy_at<'a, I>(records: I, key: &SlotKey, default_year: i32) -> u32
where
    I: IntoIterator<Item = &'a BookingRecord>,
{
    let seated = records
        .into_iter()
        .filter(|r| r.occupies(key, default_year))
        .count();
    u32::try_from(seated).unwrap_or(u32::MAX)
}
