#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use slotbook_contracts::booking::{BookingRecord, BranchCode};
use slotbook_contracts::calendar::{iso_date, parse_calendar_date};
use slotbook_contracts::directory::BranchDirectory;
use slotbook_contracts::period::ShardId;
use slotbook_contracts::{ContractViolation, MonotonicTimeNs, ReasonCodeId, Validate};
use slotbook_engines::occupancy::count_by_slot;
use slotbook_storage::repo::LedgerRepo;
use slotbook_storage::StorageError;
use tracing::{debug, warn};

use crate::config::AvailabilityConfig;
use crate::error::BookingError;

pub mod reason_codes {
    use slotbook_contracts::ReasonCodeId;

    pub const AVAIL_OK_CACHE_HIT: ReasonCodeId = ReasonCodeId(0x4156_0001);
    pub const AVAIL_OK_REFRESHED: ReasonCodeId = ReasonCodeId(0x4156_0002);
    pub const AVAIL_OK_NO_SHARD: ReasonCodeId = ReasonCodeId(0x4156_0003);
    pub const AVAIL_DEGRADED_STORAGE: ReasonCodeId = ReasonCodeId(0x4156_00F1);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAvailability {
    pub slot: String,
    pub occupied: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityView {
    pub branch: BranchCode,
    pub date: String,
    pub shard: ShardId,
    pub capacity: u32,
    pub slots: Vec<SlotAvailability>,
    /// Storage could not be read; counts are zero.
    pub degraded: bool,
    pub reason_code: ReasonCodeId,
}

#[derive(Debug, Clone)]
struct CachedShard {
    fetched_at: MonotonicTimeNs,
    records: Arc<Vec<BookingRecord>>,
}

/// Cached, read-only occupancy for the booking picker. Never a capacity gate.
#[derive(Debug)]
pub struct AvailabilityCounter<L: LedgerRepo> {
    config: AvailabilityConfig,
    ledger: Arc<L>,
    directory: Arc<BranchDirectory>,
    cache: Mutex<HashMap<ShardId, CachedShard>>,
}

impl<L: LedgerRepo> AvailabilityCounter<L> {
    pub fn new(
        config: AvailabilityConfig,
        ledger: Arc<L>,
        directory: Arc<BranchDirectory>,
    ) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self {
            config,
            ledger,
            directory,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn query(
        &self,
        date: &str,
        branch: &str,
        now: MonotonicTimeNs,
    ) -> Result<AvailabilityView, BookingError> {
        let year = self.config.year_policy.resolve();
        let branch = self
            .directory
            .resolve_branch(branch)
            .ok_or(ContractViolation::InvalidValue {
                field: "availability.branch",
                reason: "must name a configured branch",
            })?;
        let date = parse_calendar_date(date, year).ok_or(ContractViolation::InvalidValue {
            field: "availability.date",
            reason: "must be a calendar date",
        })?;
        let capacity = self.directory.capacity(&branch).unwrap_or(0);
        let shard = ShardId::for_date(date);

        let (records, degraded, reason_code) = match self.snapshot(&shard, now) {
            Ok((records, reason_code)) => (records, false, reason_code),
            Err(err) => {
                warn!(
                    shard = %shard,
                    error = %err,
                    reason_code = %reason_codes::AVAIL_DEGRADED_STORAGE,
                    "availability read failed; serving zero counts"
                );
                (
                    Arc::new(Vec::new()),
                    true,
                    reason_codes::AVAIL_DEGRADED_STORAGE,
                )
            }
        };

        let counts = count_by_slot(records.iter(), &branch, date, year);
        let slots = self
            .directory
            .slot_starts()
            .into_iter()
            .map(|slot| {
                let occupied = counts.get(&slot).copied().unwrap_or(0);
                SlotAvailability {
                    slot: slot.label(),
                    occupied,
                    remaining: capacity.saturating_sub(occupied),
                }
            })
            .collect();
        Ok(AvailabilityView {
            branch,
            date: iso_date(date),
            shard,
            capacity,
            slots,
            degraded,
            reason_code,
        })
    }

    pub fn invalidate(&self, shard: &ShardId) {
        self.cache.lock().remove(shard);
    }

    /// Drops every cached snapshot; returns how many were held.
    pub fn clear(&self) -> usize {
        let mut cache = self.cache.lock();
        let held = cache.len();
        cache.clear();
        held
    }

    pub fn cached_shards(&self) -> usize {
        self.cache.lock().len()
    }

    fn snapshot(
        &self,
        shard: &ShardId,
        now: MonotonicTimeNs,
    ) -> Result<(Arc<Vec<BookingRecord>>, ReasonCodeId), StorageError> {
        if let Some(hit) = self.cache.lock().get(shard) {
            if now < hit.fetched_at.saturating_add_ms(self.config.cache_ttl_ms) {
                return Ok((hit.records.clone(), reason_codes::AVAIL_OK_CACHE_HIT));
            }
        }
        let (records, reason_code) = match self.ledger.read_records(shard) {
            Ok(rows) => (
                rows.into_iter().map(|r| r.record).collect::<Vec<_>>(),
                reason_codes::AVAIL_OK_REFRESHED,
            ),
            Err(StorageError::ShardNotFound { .. }) => (Vec::new(), reason_codes::AVAIL_OK_NO_SHARD),
            Err(err) => return Err(err),
        };
        let records = Arc::new(records);
        debug!(shard = %shard, rows = records.len(), "availability snapshot refreshed");
        self.cache.lock().insert(
            shard.clone(),
            CachedShard {
                fetched_at: now,
                records: records.clone(),
            },
        );
        Ok((records, reason_code))
    }
}
