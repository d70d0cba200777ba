#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use slotbook_contracts::booking::BookingRecord;
use slotbook_contracts::layout::{ledger_header, LedgerLine, StyleTag};
use slotbook_contracts::period::ShardId;
use slotbook_contracts::ContractViolation;

use crate::repo::LedgerRepo;
use crate::schema::LedgerSchema;

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    Unavailable { op: &'static str },
    ShardNotFound { shard: String },
    ShardAlreadyExists { shard: String },
    RowNotFound { shard: String, row: usize },
    RowCapacityExceeded {
        shard: String,
        needed: usize,
        capacity: usize,
    },
    MissingColumn { column: &'static str },
    ContractViolation(ContractViolation),
}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Unavailable { op } => write!(f, "storage unavailable during {op}"),
            StorageError::ShardNotFound { shard } => write!(f, "shard not found: {shard}"),
            StorageError::ShardAlreadyExists { shard } => write!(f, "shard exists: {shard}"),
            StorageError::RowNotFound { shard, row } => write!(f, "row {row} not found in {shard}"),
            StorageError::RowCapacityExceeded {
                shard,
                needed,
                capacity,
            } => write!(f, "shard {shard} needs {needed} rows, has {capacity}"),
            StorageError::MissingColumn { column } => write!(f, "missing column: {column}"),
            StorageError::ContractViolation(v) => write!(f, "contract violation: {v}"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Content row position inside a shard, below the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowIndex(pub usize);

/// Structural metadata carried by a provisioned row. Content writes never touch it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowLayout {
    pub height_px: u16,
    pub validation_profile: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRule {
    pub column: String,
    pub allowed_values: Vec<String>,
}

/// Header, validation and row layout cloned onto every new shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardTemplate {
    pub header: Vec<String>,
    pub column_rules: Vec<ColumnRule>,
    pub row_layout: RowLayout,
    pub initial_capacity: usize,
}

impl ShardTemplate {
    pub fn mvp_v1() -> Self {
        Self {
            header: ledger_header(),
            column_rules: vec![
                ColumnRule {
                    column: "Status".to_string(),
                    allowed_values: ["Pending", "Confirmed", "Done", "Cancelled"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                },
                ColumnRule {
                    column: "Session".to_string(),
                    allowed_values: ["1st Session", "2nd Session", "Full Session", "Consultation"]
                        .iter()
                        .map(|s| s.to_string())
                        .collect(),
                },
            ],
            row_layout: RowLayout {
                height_px: 21,
                validation_profile: "booking_row_v1".to_string(),
            },
            initial_capacity: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLine {
    pub row: RowIndex,
    pub line: LedgerLine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRow {
    pub row: RowIndex,
    pub record: BookingRecord,
}

/// Snapshot of a shard's structural metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardMetadata {
    pub header: Vec<String>,
    pub column_rules: Vec<ColumnRule>,
    pub row_layouts: Vec<RowLayout>,
    pub used_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerFault {
    ReadUnavailable,
    WriteUnavailable,
    WriteUnavailableFor(ShardId),
}

#[derive(Debug, Clone)]
struct RowSlot {
    line: LedgerLine,
    layout: RowLayout,
}

#[derive(Debug, Clone)]
struct ShardState {
    header: Vec<String>,
    column_rules: Vec<ColumnRule>,
    schema: LedgerSchema,
    slots: Vec<RowSlot>,
}

impl ShardState {
    fn used_rows(&self) -> usize {
        self.slots
            .iter()
            .rposition(|s| !s.line.is_blank())
            .map(|i| i + 1)
            .unwrap_or(0)
    }
}

/// In-memory sharded ledger with spreadsheet-style row provisioning.
#[derive(Debug)]
pub struct InMemoryLedgerStore {
    template: ShardTemplate,
    template_schema: LedgerSchema,
    shards: RwLock<BTreeMap<ShardId, ShardState>>,
    faults: Mutex<Vec<LedgerFault>>,
    row_writes: AtomicU64,
}

impl InMemoryLedgerStore {
    pub fn new_in_memory(template: ShardTemplate) -> Result<Self, StorageError> {
        let template_schema = LedgerSchema::from_header(&template.header, false)?;
        Ok(Self {
            template,
            template_schema,
            shards: RwLock::new(BTreeMap::new()),
            faults: Mutex::new(Vec::new()),
            row_writes: AtomicU64::new(0),
        })
    }

    pub fn template(&self) -> &ShardTemplate {
        &self.template
    }

    /// Installs a shard with its own header, as an operator-created sheet would be.
    pub fn install_shard(
        &self,
        shard: &ShardId,
        header: Vec<String>,
        capacity: usize,
    ) -> Result<(), StorageError> {
        let schema = LedgerSchema::from_header(&header, false)?;
        let mut shards = self.shards.write();
        if shards.contains_key(shard) {
            return Err(StorageError::ShardAlreadyExists {
                shard: shard.to_string(),
            });
        }
        let width = header.len();
        shards.insert(
            shard.clone(),
            ShardState {
                header,
                column_rules: self.template.column_rules.clone(),
                schema,
                slots: (0..capacity)
                    .map(|_| RowSlot {
                        line: LedgerLine::blank(width),
                        layout: self.template.row_layout.clone(),
                    })
                    .collect(),
            },
        );
        Ok(())
    }

    pub fn set_row_layout(
        &self,
        shard: &ShardId,
        row: RowIndex,
        layout: RowLayout,
    ) -> Result<(), StorageError> {
        let mut shards = self.shards.write();
        let state = shard_mut(&mut shards, shard)?;
        let slot = state
            .slots
            .get_mut(row.0)
            .ok_or_else(|| StorageError::RowNotFound {
                shard: shard.to_string(),
                row: row.0,
            })?;
        slot.layout = layout;
        Ok(())
    }

    pub fn metadata(&self, shard: &ShardId) -> Result<ShardMetadata, StorageError> {
        let shards = self.shards.read();
        let state = shard_ref(&shards, shard)?;
        Ok(ShardMetadata {
            header: state.header.clone(),
            column_rules: state.column_rules.clone(),
            row_layouts: state.slots.iter().map(|s| s.layout.clone()).collect(),
            used_rows: state.used_rows(),
        })
    }

    pub fn inject_fault(&self, fault: LedgerFault) {
        self.faults.lock().push(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Single-row appends and updates performed so far.
    pub fn row_write_count(&self) -> u64 {
        self.row_writes.load(Ordering::SeqCst)
    }

    fn check_read(&self, op: &'static str) -> Result<(), StorageError> {
        if self.faults.lock().contains(&LedgerFault::ReadUnavailable) {
            return Err(StorageError::Unavailable { op });
        }
        Ok(())
    }

    fn check_write(&self, shard: &ShardId, op: &'static str) -> Result<(), StorageError> {
        let faults = self.faults.lock();
        let blocked = faults.iter().any(|f| match f {
            LedgerFault::WriteUnavailable => true,
            LedgerFault::WriteUnavailableFor(s) => s == shard,
            LedgerFault::ReadUnavailable => false,
        });
        if blocked {
            return Err(StorageError::Unavailable { op });
        }
        Ok(())
    }

    fn blank_slot(&self, width: usize) -> RowSlot {
        RowSlot {
            line: LedgerLine::blank(width),
            layout: self.template.row_layout.clone(),
        }
    }
}

impl LedgerRepo for InMemoryLedgerStore {
    fn verify_schema(&self) -> Result<LedgerSchema, StorageError> {
        let shards = self.shards.read();
        for state in shards.values() {
            LedgerSchema::from_header(&state.header, false)?;
        }
        Ok(self.template_schema.clone())
    }

    fn list_shards(&self) -> Result<Vec<ShardId>, StorageError> {
        self.check_read("list_shards")?;
        Ok(self.shards.read().keys().cloned().collect())
    }

    fn shard_exists(&self, shard: &ShardId) -> Result<bool, StorageError> {
        self.check_read("shard_exists")?;
        Ok(self.shards.read().contains_key(shard))
    }

    fn create_shard_from_template(&self, shard: &ShardId) -> Result<(), StorageError> {
        self.check_write(shard, "create_shard")?;
        let mut shards = self.shards.write();
        if shards.contains_key(shard) {
            return Err(StorageError::ShardAlreadyExists {
                shard: shard.to_string(),
            });
        }
        let width = self.template.header.len();
        shards.insert(
            shard.clone(),
            ShardState {
                header: self.template.header.clone(),
                column_rules: self.template.column_rules.clone(),
                schema: self.template_schema.clone(),
                slots: (0..self.template.initial_capacity)
                    .map(|_| self.blank_slot(width))
                    .collect(),
            },
        );
        Ok(())
    }

    fn read_lines(&self, shard: &ShardId) -> Result<Vec<StoredLine>, StorageError> {
        self.check_read("read_lines")?;
        let shards = self.shards.read();
        let state = shard_ref(&shards, shard)?;
        let used = state.used_rows();
        Ok(state.slots[..used]
            .iter()
            .enumerate()
            .map(|(i, slot)| StoredLine {
                row: RowIndex(i),
                line: LedgerLine::new(
                    state.schema.to_canonical_cells(&slot.line.cells),
                    slot.line.style,
                ),
            })
            .collect())
    }

    fn read_records(&self, shard: &ShardId) -> Result<Vec<RecordRow>, StorageError> {
        self.check_read("read_records")?;
        let shards = self.shards.read();
        let state = shard_ref(&shards, shard)?;
        Ok(state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.line.style.is_pseudo_row() && !slot.line.is_blank())
            .map(|(i, slot)| RecordRow {
                row: RowIndex(i),
                record: state.schema.decode(&slot.line.cells),
            })
            .filter(|r| !r.record.is_blank())
            .collect())
    }

    fn append_record(
        &self,
        shard: &ShardId,
        record: &BookingRecord,
    ) -> Result<RowIndex, StorageError> {
        self.check_write(shard, "append_record")?;
        let mut shards = self.shards.write();
        let state = shard_mut(&mut shards, shard)?;
        let next = state.used_rows();
        let width = state.header.len();
        if next >= state.slots.len() {
            let layout = self.template.row_layout.clone();
            state.slots.push(RowSlot {
                line: LedgerLine::blank(width),
                layout,
            });
        }
        state.slots[next].line = LedgerLine::new(state.schema.encode(record), StyleTag::Default);
        self.row_writes.fetch_add(1, Ordering::SeqCst);
        Ok(RowIndex(next))
    }

    fn update_record(
        &self,
        shard: &ShardId,
        row: RowIndex,
        record: &BookingRecord,
    ) -> Result<(), StorageError> {
        self.check_write(shard, "update_record")?;
        let mut shards = self.shards.write();
        let state = shard_mut(&mut shards, shard)?;
        let cells = state.schema.encode(record);
        let slot = state
            .slots
            .get_mut(row.0)
            .filter(|s| !s.line.is_blank() && !s.line.style.is_pseudo_row())
            .ok_or_else(|| StorageError::RowNotFound {
                shard: shard.to_string(),
                row: row.0,
            })?;
        slot.line.cells = cells;
        self.row_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn row_capacity(&self, shard: &ShardId) -> Result<usize, StorageError> {
        self.check_read("row_capacity")?;
        let shards = self.shards.read();
        Ok(shard_ref(&shards, shard)?.slots.len())
    }

    fn used_rows(&self, shard: &ShardId) -> Result<usize, StorageError> {
        self.check_read("used_rows")?;
        let shards = self.shards.read();
        Ok(shard_ref(&shards, shard)?.used_rows())
    }

    fn extend_capacity(&self, shard: &ShardId, additional: usize) -> Result<usize, StorageError> {
        self.check_write(shard, "extend_capacity")?;
        let mut shards = self.shards.write();
        let state = shard_mut(&mut shards, shard)?;
        let width = state.header.len();
        for _ in 0..additional {
            state.slots.push(self.blank_slot(width));
        }
        Ok(state.slots.len())
    }

    fn trim_capacity(&self, shard: &ShardId, keep_rows: usize) -> Result<usize, StorageError> {
        self.check_write(shard, "trim_capacity")?;
        let mut shards = self.shards.write();
        let state = shard_mut(&mut shards, shard)?;
        let floor = keep_rows.max(state.used_rows());
        if floor < state.slots.len() {
            state.slots.truncate(floor);
        }
        Ok(state.slots.len())
    }

    fn replace_content(
        &self,
        shard: &ShardId,
        lines: &[LedgerLine],
        trailing_clear: usize,
    ) -> Result<(), StorageError> {
        self.check_write(shard, "replace_content")?;
        let mut shards = self.shards.write();
        let state = shard_mut(&mut shards, shard)?;
        if lines.len() > state.slots.len() {
            return Err(StorageError::RowCapacityExceeded {
                shard: shard.to_string(),
                needed: lines.len(),
                capacity: state.slots.len(),
            });
        }
        let previous_used = state.used_rows();
        let width = state.header.len();
        for (slot, line) in state.slots.iter_mut().zip(lines) {
            slot.line = LedgerLine::new(state.schema.from_canonical_cells(&line.cells), line.style);
        }
        let clear_end = previous_used
            .max(lines.len() + trailing_clear)
            .min(state.slots.len());
        for slot in state.slots[lines.len()..clear_end].iter_mut() {
            slot.line = LedgerLine::blank(width);
        }
        Ok(())
    }
}

fn shard_ref<'a>(
    shards: &'a BTreeMap<ShardId, ShardState>,
    shard: &ShardId,
) -> Result<&'a ShardState, StorageError> {
    shards.get(shard).ok_or_else(|| StorageError::ShardNotFound {
        shard: shard.to_string(),
    })
}

fn shard_mut<'a>(
    shards: &'a mut BTreeMap<ShardId, ShardState>,
    shard: &ShardId,
) -> Result<&'a mut ShardState, StorageError> {
    shards.get_mut(shard).ok_or_else(|| StorageError::ShardNotFound {
        shard: shard.to_string(),
    })
}

/// SHA-256 over rendered lines; equal digests mean byte-identical content.
pub fn content_digest(lines: &[LedgerLine]) -> String {
    let mut hasher = Sha256::new();
    for line in lines {
        hasher.update(format!("{:?}", line.style).as_bytes());
        for cell in &line.cells {
            hasher.update([0x1f]);
            hasher.update(cell.as_bytes());
        }
        hasher.update([0x1e]);
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
