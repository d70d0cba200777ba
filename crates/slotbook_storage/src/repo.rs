#![forbid(unsafe_code)]

use slotbook_contracts::booking::BookingRecord;
use slotbook_contracts::layout::LedgerLine;
use slotbook_contracts::period::ShardId;

use crate::intake::{IntakeRow, IntakeRowId};
use crate::ledger::{RecordRow, RowIndex, StorageError, StoredLine};
use crate::schema::LedgerSchema;

/// Typed repository interface for the sharded booking ledger.
///
/// Shared between single-row admission writes and wholesale reconciliation
/// rewrites; callers coordinate through the runtime's locks.
pub trait LedgerRepo: Send + Sync {
    /// Resolves the column map of every stored header; fails on a missing column.
    fn verify_schema(&self) -> Result<LedgerSchema, StorageError>;

    fn list_shards(&self) -> Result<Vec<ShardId>, StorageError>;
    fn shard_exists(&self, shard: &ShardId) -> Result<bool, StorageError>;

    /// Clones the template's header, validation rules and row layout. Never data.
    fn create_shard_from_template(&self, shard: &ShardId) -> Result<(), StorageError>;

    /// Every line up to the last non-blank row, in canonical column order.
    fn read_lines(&self, shard: &ShardId) -> Result<Vec<StoredLine>, StorageError>;

    /// Booking rows only; header and divider pseudo-rows are skipped.
    fn read_records(&self, shard: &ShardId) -> Result<Vec<RecordRow>, StorageError>;

    fn append_record(
        &self,
        shard: &ShardId,
        record: &BookingRecord,
    ) -> Result<RowIndex, StorageError>;

    fn update_record(
        &self,
        shard: &ShardId,
        row: RowIndex,
        record: &BookingRecord,
    ) -> Result<(), StorageError>;

    fn row_capacity(&self, shard: &ShardId) -> Result<usize, StorageError>;
    fn used_rows(&self, shard: &ShardId) -> Result<usize, StorageError>;

    /// Adds provisioned rows carrying the template row layout. Returns the new capacity.
    fn extend_capacity(&self, shard: &ShardId, additional: usize) -> Result<usize, StorageError>;

    /// Drops provisioned rows past `keep_rows`, never below the used rows.
    fn trim_capacity(&self, shard: &ShardId, keep_rows: usize) -> Result<usize, StorageError>;

    /// Overwrites content and style of the leading rows and blanks the rows after
    /// them. Row layout metadata is left as it was.
    fn replace_content(
        &self,
        shard: &ShardId,
        lines: &[LedgerLine],
        trailing_clear: usize,
    ) -> Result<(), StorageError>;
}

/// Typed repository interface for the append-only intake log.
pub trait IntakeRepo: Send + Sync {
    fn verify_schema(&self) -> Result<LedgerSchema, StorageError>;
    fn append_submission(&self, record: &BookingRecord) -> Result<IntakeRowId, StorageError>;
    fn list_unsynced(&self) -> Result<Vec<IntakeRow>, StorageError>;
    fn mark_synced(&self, ids: &[IntakeRowId]) -> Result<(), StorageError>;
}
