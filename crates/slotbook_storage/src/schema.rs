#![forbid(unsafe_code)]

use slotbook_contracts::booking::BookingRecord;
use slotbook_contracts::layout::{BookingColumn, LEDGER_COLUMN_COUNT, SYNCED_HEADER};

use crate::ledger::StorageError;

/// Column positions resolved once from a stored header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSchema {
    positions: [usize; LEDGER_COLUMN_COUNT],
    synced: Option<usize>,
    width: usize,
}

impl LedgerSchema {
    /// Fails on the first required column the header does not carry.
    pub fn from_header(header: &[String], require_synced: bool) -> Result<Self, StorageError> {
        let normalized: Vec<String> = header.iter().map(|h| normalize_header(h)).collect();
        let find = |aliases: &[&str]| {
            normalized
                .iter()
                .position(|h| aliases.iter().any(|a| h == a))
        };
        let mut positions = [0usize; LEDGER_COLUMN_COUNT];
        for column in BookingColumn::ALL {
            positions[column.position()] =
                find(column_aliases(column)).ok_or(StorageError::MissingColumn {
                    column: column.header(),
                })?;
        }
        let synced = find(&["synced", "sync", "syncedflag"]);
        if require_synced && synced.is_none() {
            return Err(StorageError::MissingColumn {
                column: SYNCED_HEADER,
            });
        }
        Ok(Self {
            positions,
            synced,
            width: header.len(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn position(&self, column: BookingColumn) -> usize {
        self.positions[column.position()]
    }

    pub fn synced_position(&self) -> Option<usize> {
        self.synced
    }

    pub fn decode(&self, cells: &[String]) -> BookingRecord {
        BookingRecord::from_columns(|column| {
            cells
                .get(self.position(column))
                .map(String::as_str)
                .unwrap_or("")
        })
    }

    /// Cells laid out in this header's order; unmapped columns stay empty.
    pub fn encode(&self, record: &BookingRecord) -> Vec<String> {
        let mut cells = vec![String::new(); self.width];
        for column in BookingColumn::ALL {
            cells[self.position(column)] = record.cell(column);
        }
        cells
    }

    pub fn encode_with_synced(&self, record: &BookingRecord, synced: bool) -> Vec<String> {
        let mut cells = self.encode(record);
        if let Some(pos) = self.synced {
            cells[pos] = if synced { "TRUE" } else { "FALSE" }.to_string();
        }
        cells
    }

    pub fn synced_flag(&self, cells: &[String]) -> bool {
        self.synced
            .and_then(|pos| cells.get(pos))
            .map(|c| matches!(c.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"))
            .unwrap_or(false)
    }

    /// Re-lays canonical-order cells into this header's order.
    pub fn from_canonical_cells(&self, canonical: &[String]) -> Vec<String> {
        let mut cells = vec![String::new(); self.width];
        for column in BookingColumn::ALL {
            if let Some(value) = canonical.get(column.position()) {
                cells[self.position(column)] = value.clone();
            }
        }
        cells
    }

    /// Inverse of `from_canonical_cells`.
    pub fn to_canonical_cells(&self, cells: &[String]) -> Vec<String> {
        BookingColumn::ALL
            .iter()
            .map(|column| cells.get(self.position(*column)).cloned().unwrap_or_default())
            .collect()
    }
}

fn normalize_header(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

fn column_aliases(column: BookingColumn) -> &'static [&'static str] {
    match column {
        BookingColumn::Branch => &["branch", "branchcode"],
        BookingColumn::ClientName => &["clientname", "name", "fullname"],
        BookingColumn::Phone => &["phone", "phonenumber", "contactnumber", "mobile"],
        BookingColumn::Date => &["date", "appointmentdate"],
        BookingColumn::TimeSlot => &["timeslot", "time"],
        BookingColumn::Services => &["services", "service"],
        BookingColumn::Session => &["session", "sessiontype"],
        BookingColumn::Status => &["status"],
        BookingColumn::AfterCare => &["aftercare"],
        BookingColumn::PaymentMethod => &["paymentmethod", "payment"],
        BookingColumn::Remarks => &["remarks", "notes"],
        BookingColumn::SubmissionType => &["submissiontype", "type"],
        BookingColumn::ReferenceCode => &["referencecode", "refcode", "reference"],
        BookingColumn::QueueNo => &["no", "queueno"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotbook_contracts::layout::{intake_header, ledger_header};

    #[test]
    fn at_schema_01_canonical_headers_resolve() {
        let schema = LedgerSchema::from_header(&ledger_header(), false).unwrap();
        for column in BookingColumn::ALL {
            assert_eq!(schema.position(column), column.position());
        }
        assert_eq!(schema.synced_position(), None);
        let intake = LedgerSchema::from_header(&intake_header(), true).unwrap();
        assert_eq!(intake.synced_position(), Some(LEDGER_COLUMN_COUNT));
    }

    #[test]
    fn at_schema_02_missing_column_fails_fast() {
        let mut header = ledger_header();
        header.retain(|h| h != "Phone");
        assert_eq!(
            LedgerSchema::from_header(&header, false),
            Err(StorageError::MissingColumn { column: "Phone" })
        );
        assert_eq!(
            LedgerSchema::from_header(&ledger_header(), true),
            Err(StorageError::MissingColumn {
                column: SYNCED_HEADER
            })
        );
    }

    #[test]
    fn at_schema_03_reordered_header_maps_by_name() {
        let mut header = ledger_header();
        header.reverse();
        header[0] = "QUEUE NO".to_string();
        let schema = LedgerSchema::from_header(&header, false).unwrap();
        assert_eq!(schema.position(BookingColumn::QueueNo), 0);
        assert_eq!(schema.position(BookingColumn::Branch), LEDGER_COLUMN_COUNT - 1);
    }
}
