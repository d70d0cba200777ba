#![forbid(unsafe_code)]

use parking_lot::{Mutex, RwLock};
use slotbook_contracts::booking::BookingRecord;
use slotbook_contracts::layout::intake_header;

use crate::ledger::StorageError;
use crate::repo::IntakeRepo;
use crate::schema::LedgerSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntakeRowId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntakeRow {
    pub id: IntakeRowId,
    pub record: BookingRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeFault {
    AppendUnavailable,
    ListUnavailable,
    MarkUnavailable,
}

/// Append-only submission log. Rows are never rewritten except for the synced flag.
#[derive(Debug)]
pub struct InMemoryIntakeLog {
    header: Vec<String>,
    schema: LedgerSchema,
    rows: RwLock<Vec<Vec<String>>>,
    faults: Mutex<Vec<IntakeFault>>,
}

impl InMemoryIntakeLog {
    pub fn new_in_memory() -> Result<Self, StorageError> {
        Self::with_header(intake_header())
    }

    pub fn with_header(header: Vec<String>) -> Result<Self, StorageError> {
        let schema = LedgerSchema::from_header(&header, true)?;
        Ok(Self {
            header,
            schema,
            rows: RwLock::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn is_synced(&self, id: IntakeRowId) -> Option<bool> {
        let rows = self.rows.read();
        rows.get(id.0 as usize).map(|cells| self.schema.synced_flag(cells))
    }

    pub fn inject_fault(&self, fault: IntakeFault) {
        self.faults.lock().push(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    fn check(&self, fault: IntakeFault, op: &'static str) -> Result<(), StorageError> {
        if self.faults.lock().contains(&fault) {
            return Err(StorageError::Unavailable { op });
        }
        Ok(())
    }
}

impl IntakeRepo for InMemoryIntakeLog {
    fn verify_schema(&self) -> Result<LedgerSchema, StorageError> {
        LedgerSchema::from_header(&self.header, true)
    }

    fn append_submission(&self, record: &BookingRecord) -> Result<IntakeRowId, StorageError> {
        self.check(IntakeFault::AppendUnavailable, "intake_append")?;
        let mut rows = self.rows.write();
        rows.push(self.schema.encode_with_synced(record, false));
        Ok(IntakeRowId(rows.len() as u64 - 1))
    }

    fn list_unsynced(&self) -> Result<Vec<IntakeRow>, StorageError> {
        self.check(IntakeFault::ListUnavailable, "intake_list_unsynced")?;
        let rows = self.rows.read();
        Ok(rows
            .iter()
            .enumerate()
            .filter(|(_, cells)| !self.schema.synced_flag(cells))
            .map(|(i, cells)| IntakeRow {
                id: IntakeRowId(i as u64),
                record: self.schema.decode(cells),
            })
            .filter(|row| !row.record.is_blank())
            .collect())
    }

    fn mark_synced(&self, ids: &[IntakeRowId]) -> Result<(), StorageError> {
        self.check(IntakeFault::MarkUnavailable, "intake_mark_synced")?;
        let Some(pos) = self.schema.synced_position() else {
            return Err(StorageError::MissingColumn { column: "Synced" });
        };
        let mut rows = self.rows.write();
        if let Some(missing) = ids.iter().find(|id| id.0 as usize >= rows.len()) {
            return Err(StorageError::RowNotFound {
                shard: "intake".to_string(),
                row: missing.0 as usize,
            });
        }
        for id in ids {
            rows[id.0 as usize][pos] = "TRUE".to_string();
        }
        Ok(())
    }
}
