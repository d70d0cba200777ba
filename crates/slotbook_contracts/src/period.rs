#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::calendar::parse_calendar_date;
use crate::{ContractViolation, Validate};

pub const UNSORTED_SHARD_LABEL: &str = "Unsorted";

/// Fortnight partition of the ledger, named by its label ("Jun 1 - 15, 2025").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShardId(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ShardId {
    pub fn new(label: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = ShardId(label.into());
        id.validate()?;
        Ok(id)
    }

    pub fn unsorted() -> Self {
        ShardId(UNSORTED_SHARD_LABEL.to_string())
    }

    /// Day 1-15 and day 16-end of month each form one shard.
    pub fn for_date(date: NaiveDate) -> Self {
        let month = date.format("%b");
        if date.day() <= 15 {
            ShardId(format!("{month} 1 - 15, {}", date.year()))
        } else {
            ShardId(format!(
                "{month} 16-{}, {}",
                last_day_of_month(date.year(), date.month()),
                date.year()
            ))
        }
    }

    /// Unparseable date cells land in the unsorted shard.
    pub fn for_date_cell(raw: &str, default_year: i32) -> Self {
        match parse_calendar_date(raw, default_year) {
            Some(date) => ShardId::for_date(date),
            None => ShardId::unsorted(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unsorted(&self) -> bool {
        self.0 == UNSORTED_SHARD_LABEL
    }

    /// Recovers the covered days from the label; `None` for unsorted or foreign labels.
    pub fn period(&self) -> Option<ShardPeriod> {
        let (left, year_text) = self.0.rsplit_once(", ")?;
        let year: i32 = year_text.trim().parse().ok()?;
        let (month_text, days) = left.split_once(' ')?;
        let first = NaiveDate::parse_from_str(&format!("{month_text} 1 {year}"), "%b %d %Y").ok()?;
        let last_day = last_day_of_month(year, first.month());
        let (start_day, end_day) = if days == "1 - 15" {
            (1, 15)
        } else {
            let end: u32 = days.strip_prefix("16-")?.parse().ok()?;
            if end != last_day {
                return None;
            }
            (16, end)
        };
        Some(ShardPeriod {
            start: NaiveDate::from_ymd_opt(year, first.month(), start_day)?,
            end: NaiveDate::from_ymd_opt(year, first.month(), end_day)?,
        })
    }

    /// Chronological order; unsorted and foreign labels after every dated shard.
    pub fn chronological_cmp(&self, other: &ShardId) -> Ordering {
        match (self.period(), other.period()) {
            (Some(a), Some(b)) => a.start.cmp(&b.start),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self
                .is_unsorted()
                .cmp(&other.is_unsorted())
                .then_with(|| self.0.cmp(&other.0)),
        }
    }
}

impl Validate for ShardId {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "shard_id",
                reason: "must not be empty",
            });
        }
        if self.0.len() > 64 || self.0.chars().any(|c| c.is_control()) {
            return Err(ContractViolation::InvalidValue {
                field: "shard_id",
                reason: "must be <= 64 chars and contain no control chars",
            });
        }
        Ok(())
    }
}

impl TryFrom<String> for ShardId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ShardId::new(value)
    }
}

impl From<ShardId> for String {
    fn from(value: ShardId) -> Self {
        value.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn at_period_01_fortnight_boundaries() {
        assert_eq!(ShardId::for_date(ymd(2025, 6, 1)).as_str(), "Jun 1 - 15, 2025");
        assert_eq!(ShardId::for_date(ymd(2025, 6, 15)).as_str(), "Jun 1 - 15, 2025");
        assert_eq!(ShardId::for_date(ymd(2025, 6, 16)).as_str(), "Jun 16-30, 2025");
        assert_eq!(ShardId::for_date(ymd(2025, 7, 31)).as_str(), "Jul 16-31, 2025");
        assert_eq!(ShardId::for_date(ymd(2024, 2, 20)).as_str(), "Feb 16-29, 2024");
        assert_eq!(ShardId::for_date(ymd(2025, 12, 20)).as_str(), "Dec 16-31, 2025");
    }

    #[test]
    fn at_period_02_yearless_cells_use_current_year() {
        assert_eq!(ShardId::for_date_cell("Jun 12", 2026).as_str(), "Jun 1 - 15, 2026");
        assert_eq!(ShardId::for_date_cell("Jun 20", 2026).as_str(), "Jun 16-30, 2026");
        assert!(ShardId::for_date_cell("someday", 2026).is_unsorted());
    }

    #[test]
    fn at_period_03_label_round_trips_to_period() {
        let shard = ShardId::for_date(ymd(2025, 6, 20));
        assert_eq!(
            shard.period(),
            Some(ShardPeriod {
                start: ymd(2025, 6, 16),
                end: ymd(2025, 6, 30)
            })
        );
        assert_eq!(ShardId::unsorted().period(), None);
        assert_eq!(ShardId::new("Jun 16-31, 2025").unwrap().period(), None);
    }

    #[test]
    fn at_period_04_chronological_order_puts_unsorted_last() {
        let mut shards = vec![
            ShardId::unsorted(),
            ShardId::for_date(ymd(2025, 7, 2)),
            ShardId::for_date(ymd(2025, 6, 20)),
            ShardId::for_date(ymd(2024, 12, 1)),
        ];
        shards.sort_by(|a, b| a.chronological_cmp(b));
        let labels: Vec<&str> = shards.iter().map(ShardId::as_str).collect();
        assert_eq!(
            labels,
            vec![
                "Dec 1 - 15, 2024",
                "Jun 16-30, 2025",
                "Jul 1 - 15, 2025",
                "Unsorted"
            ]
        );
    }
}
