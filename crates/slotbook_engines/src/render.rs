#![forbid(unsafe_code)]

use std::collections::HashMap;

use slotbook_contracts::booking::{BookingRecord, BookingStatus, ReferenceCode};
use slotbook_contracts::calendar::{iso_date, long_date_label};
use slotbook_contracts::layout::{BookingColumn, LedgerLine, StyleTag, LEDGER_COLUMN_COUNT};

const UNDATED_HEADER: &str = "Undated";

/// Output of one shard render: every line to commit, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedShard {
    pub lines: Vec<LedgerLine>,
    pub booking_rows: usize,
}

/// Expands sorted rows into the committed line sequence: date headers,
/// branch dividers, renumbered queue numbers and per-row style tags.
pub fn render(sorted: &[BookingRecord], default_year: i32) -> RenderedShard {
    let group_sizes = group_sizes(sorted);
    let mut palette: HashMap<&ReferenceCode, StyleTag> = HashMap::new();
    let mut queue: HashMap<(String, String), u32> = HashMap::new();
    let mut lines = Vec::with_capacity(sorted.len() * 2);
    let mut previous_date: Option<String> = None;
    let mut previous_branch: Option<String> = None;

    for record in sorted {
        let parsed = record.calendar_date(default_year);
        let date_key = parsed
            .map(iso_date)
            .unwrap_or_else(|| record.date.trim().to_string());
        let branch_key = record.branch.trim().to_ascii_uppercase();

        if previous_date.as_deref() != Some(date_key.as_str()) {
            let label = match parsed {
                Some(date) => long_date_label(date),
                None if date_key.is_empty() => UNDATED_HEADER.to_string(),
                None => date_key.clone(),
            };
            lines.push(pseudo_line(label, StyleTag::DateHeader));
            previous_date = Some(date_key.clone());
            previous_branch = None;
        } else if previous_branch
            .as_deref()
            .is_some_and(|b| b != branch_key.as_str())
        {
            lines.push(pseudo_line(String::new(), StyleTag::Divider));
        }
        previous_branch = Some(branch_key.clone());

        let mut row = record.clone();
        if row.status == BookingStatus::Done && !row.is_second_session() {
            let n = queue.entry((date_key, branch_key)).or_insert(0);
            *n += 1;
            row.queue_no = n.to_string();
        }

        let style = if row.status.is_cancelled() {
            StyleTag::Cancelled
        } else if row.status == BookingStatus::Done && row.is_second_session() {
            StyleTag::SecondSessionDone
        } else {
            match record.reference_code.as_ref() {
                Some(code) if group_sizes.get(code).copied().unwrap_or(0) > 1 => {
                    let next = StyleTag::group(palette.len());
                    *palette.entry(code).or_insert(next)
                }
                _ => StyleTag::Default,
            }
        };
        lines.push(LedgerLine::new(row.to_cells(), style));
    }

    RenderedShard {
        lines,
        booking_rows: sorted.len(),
    }
}

fn group_sizes(records: &[BookingRecord]) -> HashMap<&ReferenceCode, usize> {
    let mut sizes = HashMap::new();
    for code in records.iter().filter_map(|r| r.reference_code.as_ref()) {
        *sizes.entry(code).or_insert(0) += 1;
    }
    sizes
}

fn pseudo_line(first_cell: String, style: StyleTag) -> LedgerLine {
    let mut cells = vec![String::new(); LEDGER_COLUMN_COUNT];
    cells[BookingColumn::Branch.position()] = first_cell;
    LedgerLine::new(cells, style)
}
