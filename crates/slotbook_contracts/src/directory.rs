#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::booking::BranchCode;
use crate::calendar::SlotStart;
use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchEntry {
    pub code: String,
    pub name: String,
    pub capacity: u32,
}

/// Branch directory handed over by the configuration provider. Entry order is
/// the ledger's branch priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDirectory {
    pub branches: Vec<BranchEntry>,
    pub time_slots: Vec<String>,
}

impl BranchDirectory {
    pub fn v1(
        branches: Vec<BranchEntry>,
        time_slots: Vec<String>,
    ) -> Result<Self, ContractViolation> {
        let directory = Self {
            branches,
            time_slots,
        };
        directory.validate()?;
        Ok(directory)
    }

    pub fn mvp_v1() -> Self {
        let branch = |code: &str, name: &str, capacity: u32| BranchEntry {
            code: code.to_string(),
            name: name.to_string(),
            capacity,
        };
        Self {
            branches: vec![
                branch("DT", "Downtown", 4),
                branch("NP", "Northpoint", 3),
                branch("HB", "Harbor", 3),
                branch("WG", "Westgate", 2),
            ],
            time_slots: [
                "9:00 AM", "10:00 AM", "11:00 AM", "12:00 PM", "1:00 PM", "2:00 PM", "3:00 PM",
                "4:00 PM", "5:00 PM",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }

    /// Accepts a short code or a branch name, case-insensitively.
    pub fn resolve_branch(&self, raw: &str) -> Option<BranchCode> {
        let wanted = raw.trim();
        self.branches
            .iter()
            .find(|b| b.code.eq_ignore_ascii_case(wanted) || b.name.eq_ignore_ascii_case(wanted))
            .and_then(|b| BranchCode::new(b.code.as_str()).ok())
    }

    pub fn capacity(&self, code: &BranchCode) -> Option<u32> {
        self.branches
            .iter()
            .find(|b| b.code.eq_ignore_ascii_case(code.as_str()))
            .map(|b| b.capacity)
    }

    /// Position in the priority table; `None` for unknown branches.
    pub fn priority(&self, branch_cell: &str) -> Option<usize> {
        let wanted = branch_cell.trim();
        self.branches
            .iter()
            .position(|b| b.code.eq_ignore_ascii_case(wanted) || b.name.eq_ignore_ascii_case(wanted))
    }

    pub fn slot_starts(&self) -> Vec<SlotStart> {
        self.time_slots
            .iter()
            .filter_map(|s| SlotStart::parse(s))
            .collect()
    }

    pub fn is_valid_slot(&self, slot: SlotStart) -> bool {
        self.time_slots
            .iter()
            .any(|s| SlotStart::parse(s) == Some(slot))
    }
}

impl Validate for BranchDirectory {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.branches.is_empty() || self.branches.len() > 256 {
            return Err(ContractViolation::InvalidRange {
                field: "branch_directory.branches",
                min: 1,
                max: 256,
                got: self.branches.len() as i64,
            });
        }
        let mut codes = BTreeSet::new();
        for branch in &self.branches {
            let code = BranchCode::new(branch.code.as_str())?;
            if !codes.insert(code) {
                return Err(ContractViolation::InvalidValue {
                    field: "branch_directory.branches.code",
                    reason: "must be unique",
                });
            }
            if branch.name.trim().is_empty() {
                return Err(ContractViolation::InvalidValue {
                    field: "branch_directory.branches.name",
                    reason: "must not be empty",
                });
            }
            if branch.capacity == 0 || branch.capacity > 1_000 {
                return Err(ContractViolation::InvalidRange {
                    field: "branch_directory.branches.capacity",
                    min: 1,
                    max: 1_000,
                    got: i64::from(branch.capacity),
                });
            }
        }
        if self.time_slots.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "branch_directory.time_slots",
                reason: "must list at least one slot",
            });
        }
        let mut starts = BTreeSet::new();
        for label in &self.time_slots {
            let Some(start) = SlotStart::parse(label) else {
                return Err(ContractViolation::InvalidValue {
                    field: "branch_directory.time_slots",
                    reason: "every label must be a time of day",
                });
            };
            if !starts.insert(start) {
                return Err(ContractViolation::InvalidValue {
                    field: "branch_directory.time_slots",
                    reason: "slot starts must be unique",
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_directory_01_mvp_directory_is_valid() {
        let dir = BranchDirectory::mvp_v1();
        assert!(dir.validate().is_ok());
        assert_eq!(dir.resolve_branch("northpoint").unwrap().as_str(), "NP");
        assert_eq!(dir.resolve_branch("hb").unwrap().as_str(), "HB");
        assert_eq!(dir.priority("WG"), Some(3));
        assert_eq!(dir.priority("ZZ"), None);
        assert_eq!(dir.slot_starts().len(), 9);
    }

    #[test]
    fn at_directory_02_rejects_duplicate_codes_and_zero_capacity() {
        let mut dir = BranchDirectory::mvp_v1();
        dir.branches[1].code = "dt".to_string();
        assert!(dir.validate().is_err());

        let mut dir = BranchDirectory::mvp_v1();
        dir.branches[0].capacity = 0;
        assert!(dir.validate().is_err());

        let mut dir = BranchDirectory::mvp_v1();
        dir.time_slots.push("10am".to_string());
        assert!(dir.validate().is_err());
    }
}
