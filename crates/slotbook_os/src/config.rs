#![forbid(unsafe_code)]

use std::path::Path;

use chrono::{Datelike, Local};
use slotbook_contracts::directory::BranchDirectory;
use slotbook_contracts::{ContractViolation, Validate};

use crate::error::BookingError;

/// Year given to dates written without one ("Jun 12").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearPolicy {
    Current,
    Fixed(i32),
}

impl YearPolicy {
    pub fn resolve(self) -> i32 {
        match self {
            YearPolicy::Current => Local::now().year(),
            YearPolicy::Fixed(year) => year,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityConfig {
    pub cache_ttl_ms: u64,
    pub year_policy: YearPolicy,
}

impl AvailabilityConfig {
    pub fn mvp_v1() -> Self {
        Self {
            cache_ttl_ms: 60_000,
            year_policy: YearPolicy::Current,
        }
    }
}

impl Validate for AvailabilityConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.cache_ttl_ms > 3_600_000 {
            return Err(ContractViolation::InvalidRange {
                field: "availability_config.cache_ttl_ms",
                min: 0,
                max: 3_600_000,
                got: self.cache_ttl_ms as i64,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionConfig {
    pub gate_wait_ms: u64,
    pub max_reference_attempts: u8,
    pub year_policy: YearPolicy,
}

impl AdmissionConfig {
    pub fn mvp_v1() -> Self {
        Self {
            gate_wait_ms: 2_000,
            max_reference_attempts: 8,
            year_policy: YearPolicy::Current,
        }
    }
}

impl Validate for AdmissionConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.gate_wait_ms == 0 || self.gate_wait_ms > 60_000 {
            return Err(ContractViolation::InvalidRange {
                field: "admission_config.gate_wait_ms",
                min: 1,
                max: 60_000,
                got: self.gate_wait_ms as i64,
            });
        }
        if self.max_reference_attempts == 0 || self.max_reference_attempts > 32 {
            return Err(ContractViolation::InvalidRange {
                field: "admission_config.max_reference_attempts",
                min: 1,
                max: 32,
                got: i64::from(self.max_reference_attempts),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub gate_wait_ms: u64,
    pub trailing_clear_rows: usize,
    /// Spare rows beyond which a shard is trimmed.
    pub trim_threshold_rows: usize,
    /// Spare rows left after a trim.
    pub trim_margin_rows: usize,
    pub year_policy: YearPolicy,
}

impl ReconcileConfig {
    pub fn mvp_v1() -> Self {
        Self {
            gate_wait_ms: 10_000,
            trailing_clear_rows: 10,
            trim_threshold_rows: 500,
            trim_margin_rows: 100,
            year_policy: YearPolicy::Current,
        }
    }
}

impl Validate for ReconcileConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.gate_wait_ms == 0 || self.gate_wait_ms > 300_000 {
            return Err(ContractViolation::InvalidRange {
                field: "reconcile_config.gate_wait_ms",
                min: 1,
                max: 300_000,
                got: self.gate_wait_ms as i64,
            });
        }
        if self.trailing_clear_rows > 1_000 {
            return Err(ContractViolation::InvalidRange {
                field: "reconcile_config.trailing_clear_rows",
                min: 0,
                max: 1_000,
                got: self.trailing_clear_rows as i64,
            });
        }
        if self.trim_margin_rows >= self.trim_threshold_rows {
            return Err(ContractViolation::InvalidValue {
                field: "reconcile_config.trim_margin_rows",
                reason: "must be below trim_threshold_rows",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub availability: AvailabilityConfig,
    pub admission: AdmissionConfig,
    pub reconcile: ReconcileConfig,
}

impl RuntimeConfig {
    pub fn mvp_v1() -> Self {
        Self {
            availability: AvailabilityConfig::mvp_v1(),
            admission: AdmissionConfig::mvp_v1(),
            reconcile: ReconcileConfig::mvp_v1(),
        }
    }

    pub fn with_year_policy(mut self, year_policy: YearPolicy) -> Self {
        self.availability.year_policy = year_policy;
        self.admission.year_policy = year_policy;
        self.reconcile.year_policy = year_policy;
        self
    }
}

impl Validate for RuntimeConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.availability.validate()?;
        self.admission.validate()?;
        self.reconcile.validate()
    }
}

pub fn parse_branch_directory(json: &str) -> Result<BranchDirectory, BookingError> {
    let directory: BranchDirectory = serde_json::from_str(json)
        .map_err(|e| BookingError::Config(format!("branch directory: {e}")))?;
    directory.validate()?;
    Ok(directory)
}

pub fn load_branch_directory(path: &Path) -> Result<BranchDirectory, BookingError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| BookingError::Config(format!("read {}: {e}", path.display())))?;
    parse_branch_directory(&json)
}
