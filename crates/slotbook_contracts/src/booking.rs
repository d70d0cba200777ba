#![forbid(unsafe_code)]

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::{iso_date, parse_calendar_date, SlotStart};
use crate::directory::BranchDirectory;
use crate::layout::{BookingColumn, LEDGER_COLUMN_COUNT};
use crate::period::ShardId;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const BOOKING_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

const JOINER_SUFFIX: &str = " (Joiner)";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BranchCode(String);

impl BranchCode {
    pub fn new(code: impl Into<String>) -> Result<Self, ContractViolation> {
        let code = BranchCode(code.into().trim().to_ascii_uppercase());
        code.validate()?;
        Ok(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for BranchCode {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.is_empty() || self.0.len() > 16 {
            return Err(ContractViolation::InvalidValue {
                field: "branch_code",
                reason: "must be 1..=16 chars",
            });
        }
        if !self.0.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ContractViolation::InvalidValue {
                field: "branch_code",
                reason: "must be ascii alphanumeric",
            });
        }
        Ok(())
    }
}

impl fmt::Display for BranchCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Group reference code. Degenerate cell values never construct one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferenceCode(String);

impl ReferenceCode {
    pub fn new(code: impl Into<String>) -> Result<Self, ContractViolation> {
        let code = code.into();
        match ReferenceCode::parse_cell(&code) {
            Some(c) if c.0.len() <= 32 => Ok(c),
            Some(_) => Err(ContractViolation::InvalidValue {
                field: "reference_code",
                reason: "must be <= 32 chars",
            }),
            None => Err(ContractViolation::InvalidValue {
                field: "reference_code",
                reason: "must not be empty or a placeholder",
            }),
        }
    }

    pub fn parse_cell(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let degenerate = trimmed.is_empty()
            || trimmed.chars().any(|c| c.is_control())
            || matches!(
                trimmed.to_ascii_lowercase().as_str(),
                "-" | "--" | "n/a" | "na" | "none" | "null" | "0"
            );
        if degenerate {
            None
        } else {
            Some(ReferenceCode(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn numeric_value(&self) -> Option<u64> {
        if self.0.chars().all(|c| c.is_ascii_digit()) {
            self.0.parse().ok()
        } else {
            None
        }
    }
}

impl fmt::Display for ReferenceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    First,
    Second,
    Full,
    Consultation,
}

impl SessionType {
    pub fn parse_cell(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_ascii_lowercase();
        if lower.contains("2nd") || lower.contains("second") {
            Some(SessionType::Second)
        } else if lower.contains("1st") || lower.contains("first") {
            Some(SessionType::First)
        } else if lower.contains("full") {
            Some(SessionType::Full)
        } else if lower.contains("consult") {
            Some(SessionType::Consultation)
        } else {
            None
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionType::First => "1st Session",
            SessionType::Second => "2nd Session",
            SessionType::Full => "Full Session",
            SessionType::Consultation => "Consultation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusClass {
    Active,
    Done,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Done,
    Cancelled,
    Other(String),
}

impl BookingStatus {
    pub fn parse_cell(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "" | "pending" => BookingStatus::Pending,
            "confirmed" => BookingStatus::Confirmed,
            "done" | "completed" => BookingStatus::Done,
            "cancelled" | "canceled" => BookingStatus::Cancelled,
            _ => BookingStatus::Other(trimmed.to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Confirmed => "Confirmed",
            BookingStatus::Done => "Done",
            BookingStatus::Cancelled => "Cancelled",
            BookingStatus::Other(text) => text,
        }
    }

    pub fn class(&self) -> StatusClass {
        match self {
            BookingStatus::Done => StatusClass::Done,
            BookingStatus::Cancelled => StatusClass::Cancelled,
            _ => StatusClass::Active,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.class() == StatusClass::Cancelled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionType {
    New,
    Reschedule,
}

impl SubmissionType {
    pub fn label(self) -> &'static str {
        match self {
            SubmissionType::New => "New Appointment",
            SubmissionType::Reschedule => "Reschedule",
        }
    }

    /// Decodes the submission-type cell into (type, joiner).
    pub fn parse_cell(raw: &str) -> (Self, bool) {
        let lower = raw.to_ascii_lowercase();
        let kind = if lower.contains("resched") {
            SubmissionType::Reschedule
        } else {
            SubmissionType::New
        };
        (kind, lower.contains("joiner"))
    }

    pub fn cell(self, joiner: bool) -> String {
        if joiner {
            format!("{}{JOINER_SUFFIX}", self.label())
        } else {
            self.label().to_string()
        }
    }
}

/// Keeps digits only and folds the +63 country prefix into a leading zero.
pub fn phone_digits(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 12 && digits.starts_with("63") {
        format!("0{}", &digits[2..])
    } else {
        digits
    }
}

pub fn normalize_phone(raw: &str) -> Result<String, ContractViolation> {
    let digits = phone_digits(raw);
    if !(7..=15).contains(&digits.len()) {
        return Err(ContractViolation::InvalidValue {
            field: "booking_submission.phone",
            reason: "must contain 7..=15 digits",
        });
    }
    Ok(digits)
}

pub fn normalize_client_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Capacity is enforced per (branch, date, slot start).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub branch: BranchCode,
    pub date: NaiveDate,
    pub slot: SlotStart,
}

impl SlotKey {
    pub fn shard(&self) -> ShardId {
        ShardId::for_date(self.date)
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.branch, iso_date(self.date), self.slot)
    }
}

/// One ledger or intake row. Cell-backed fields stay text because stored rows
/// may carry values the submission path would reject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookingRecord {
    pub branch: String,
    pub client_name: String,
    pub phone: String,
    pub date: String,
    pub time_slot: String,
    pub services: Vec<String>,
    pub session: Option<SessionType>,
    pub status: BookingStatus,
    pub after_care: bool,
    pub payment_method: String,
    pub remarks: String,
    pub submission_type: SubmissionType,
    pub joiner: bool,
    pub reference_code: Option<ReferenceCode>,
    pub queue_no: String,
}

impl BookingRecord {
    /// Decodes a record from a column accessor; missing cells read as empty.
    pub fn from_columns<'a>(cell: impl Fn(BookingColumn) -> &'a str) -> Self {
        let (submission_type, joiner) =
            SubmissionType::parse_cell(cell(BookingColumn::SubmissionType));
        Self {
            branch: cell(BookingColumn::Branch).trim().to_string(),
            client_name: cell(BookingColumn::ClientName).trim().to_string(),
            phone: cell(BookingColumn::Phone).trim().to_string(),
            date: cell(BookingColumn::Date).trim().to_string(),
            time_slot: cell(BookingColumn::TimeSlot).trim().to_string(),
            services: split_services(cell(BookingColumn::Services)),
            session: SessionType::parse_cell(cell(BookingColumn::Session)),
            status: BookingStatus::parse_cell(cell(BookingColumn::Status)),
            after_care: parse_flag(cell(BookingColumn::AfterCare)),
            payment_method: cell(BookingColumn::PaymentMethod).trim().to_string(),
            remarks: cell(BookingColumn::Remarks).trim().to_string(),
            submission_type,
            joiner,
            reference_code: ReferenceCode::parse_cell(cell(BookingColumn::ReferenceCode)),
            queue_no: cell(BookingColumn::QueueNo).trim().to_string(),
        }
    }

    pub fn cell(&self, column: BookingColumn) -> String {
        match column {
            BookingColumn::Branch => self.branch.clone(),
            BookingColumn::ClientName => self.client_name.clone(),
            BookingColumn::Phone => self.phone.clone(),
            BookingColumn::Date => self.date.clone(),
            BookingColumn::TimeSlot => self.time_slot.clone(),
            BookingColumn::Services => self.services.join(", "),
            BookingColumn::Session => self
                .session
                .map(SessionType::label)
                .unwrap_or_default()
                .to_string(),
            BookingColumn::Status => self.status.label().to_string(),
            BookingColumn::AfterCare => {
                let flag = if self.after_care { "Yes" } else { "No" };
                flag.to_string()
            }
            BookingColumn::PaymentMethod => self.payment_method.clone(),
            BookingColumn::Remarks => self.remarks.clone(),
            BookingColumn::SubmissionType => self.submission_type.cell(self.joiner),
            BookingColumn::ReferenceCode => self
                .reference_code
                .as_ref()
                .map(|c| c.as_str().to_string())
                .unwrap_or_default(),
            BookingColumn::QueueNo => self.queue_no.clone(),
        }
    }

    /// Cells in contractual column order.
    pub fn to_cells(&self) -> Vec<String> {
        let mut cells = Vec::with_capacity(LEDGER_COLUMN_COUNT);
        for column in BookingColumn::ALL {
            cells.push(self.cell(column));
        }
        cells
    }

    pub fn calendar_date(&self, default_year: i32) -> Option<NaiveDate> {
        parse_calendar_date(&self.date, default_year)
    }

    pub fn slot_start(&self) -> Option<SlotStart> {
        SlotStart::parse(&self.time_slot)
    }

    pub fn phone_digits(&self) -> String {
        phone_digits(&self.phone)
    }

    pub fn is_second_session(&self) -> bool {
        self.session == Some(SessionType::Second)
    }

    /// True when this row holds a seat at `key`.
    pub fn occupies(&self, key: &SlotKey, default_year: i32) -> bool {
        !self.status.is_cancelled()
            && self.branch.eq_ignore_ascii_case(key.branch.as_str())
            && self.calendar_date(default_year) == Some(key.date)
            && self.slot_start() == Some(key.slot)
    }

    pub fn is_blank(&self) -> bool {
        self.branch.is_empty()
            && self.client_name.is_empty()
            && self.phone.is_empty()
            && self.date.is_empty()
    }
}

fn split_services(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "yes" | "y" | "true" | "1" | "x"
    )
}

/// Raw booking request as entered by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSubmission {
    pub branch: String,
    pub client_name: String,
    pub phone: String,
    pub date: String,
    pub time_slot: String,
    pub services: Vec<String>,
    pub session: String,
    #[serde(default)]
    pub after_care: bool,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub remarks: String,
    pub submission_type: SubmissionType,
    #[serde(default)]
    pub joiner: bool,
    #[serde(default)]
    pub reference_code: Option<String>,
}

impl BookingSubmission {
    /// Resolves every field to its canonical form; nothing here touches storage.
    pub fn normalize(
        &self,
        directory: &BranchDirectory,
        default_year: i32,
    ) -> Result<NormalizedSubmission, ContractViolation> {
        let branch =
            directory
                .resolve_branch(&self.branch)
                .ok_or(ContractViolation::InvalidValue {
                    field: "booking_submission.branch",
                    reason: "must name a configured branch",
                })?;
        let date = parse_calendar_date(&self.date, default_year).ok_or(
            ContractViolation::InvalidValue {
                field: "booking_submission.date",
                reason: "must be a calendar date",
            },
        )?;
        let slot = SlotStart::parse(&self.time_slot).ok_or(ContractViolation::InvalidValue {
            field: "booking_submission.time_slot",
            reason: "must be a time of day",
        })?;
        if !directory.is_valid_slot(slot) {
            return Err(ContractViolation::InvalidValue {
                field: "booking_submission.time_slot",
                reason: "must be one of the configured time slots",
            });
        }
        let session =
            SessionType::parse_cell(&self.session).ok_or(ContractViolation::InvalidValue {
                field: "booking_submission.session",
                reason: "must be 1st, 2nd, Full or Consultation",
            })?;
        let reference_code = match &self.reference_code {
            Some(raw) => ReferenceCode::parse_cell(raw),
            None => None,
        };
        let normalized = NormalizedSubmission {
            schema_version: BOOKING_CONTRACT_VERSION,
            branch,
            client_name: self.client_name.split_whitespace().collect::<Vec<_>>().join(" "),
            phone: normalize_phone(&self.phone)?,
            date,
            slot,
            services: self
                .services
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            session,
            after_care: self.after_care,
            payment_method: self.payment_method.trim().to_string(),
            remarks: self.remarks.trim().to_string(),
            submission_type: self.submission_type,
            joiner: self.joiner,
            reference_code,
        };
        normalized.validate()?;
        Ok(normalized)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedSubmission {
    pub schema_version: SchemaVersion,
    pub branch: BranchCode,
    pub client_name: String,
    pub phone: String,
    pub date: NaiveDate,
    pub slot: SlotStart,
    pub services: Vec<String>,
    pub session: SessionType,
    pub after_care: bool,
    pub payment_method: String,
    pub remarks: String,
    pub submission_type: SubmissionType,
    pub joiner: bool,
    pub reference_code: Option<ReferenceCode>,
}

impl NormalizedSubmission {
    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            branch: self.branch.clone(),
            date: self.date,
            slot: self.slot,
        }
    }

    pub fn shard(&self) -> ShardId {
        ShardId::for_date(self.date)
    }

    /// Fresh Pending row for this submission under `reference_code`.
    pub fn to_record(&self, reference_code: ReferenceCode) -> BookingRecord {
        BookingRecord {
            branch: self.branch.as_str().to_string(),
            client_name: self.client_name.clone(),
            phone: self.phone.clone(),
            date: iso_date(self.date),
            time_slot: self.slot.label(),
            services: self.services.clone(),
            session: Some(self.session),
            status: BookingStatus::Pending,
            after_care: self.after_care,
            payment_method: self.payment_method.clone(),
            remarks: self.remarks.clone(),
            submission_type: self.submission_type,
            joiner: self.joiner,
            reference_code: Some(reference_code),
            queue_no: String::new(),
        }
    }
}

impl Validate for NormalizedSubmission {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != BOOKING_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "normalized_submission.schema_version",
                reason: "must match BOOKING_CONTRACT_VERSION",
            });
        }
        self.branch.validate()?;
        if self.client_name.is_empty() || self.client_name.len() > 120 {
            return Err(ContractViolation::InvalidValue {
                field: "booking_submission.client_name",
                reason: "must be 1..=120 chars",
            });
        }
        if self.client_name.chars().any(|c| c.is_control()) {
            return Err(ContractViolation::InvalidValue {
                field: "booking_submission.client_name",
                reason: "must not contain control chars",
            });
        }
        if self.services.is_empty() || self.services.len() > 16 {
            return Err(ContractViolation::InvalidRange {
                field: "booking_submission.services",
                min: 1,
                max: 16,
                got: self.services.len() as i64,
            });
        }
        if self.services.iter().any(|s| s.len() > 80 || s.contains(',')) {
            return Err(ContractViolation::InvalidValue {
                field: "booking_submission.services",
                reason: "each service must be <= 80 chars without commas",
            });
        }
        if self.payment_method.len() > 64 {
            return Err(ContractViolation::InvalidValue {
                field: "booking_submission.payment_method",
                reason: "must be <= 64 chars",
            });
        }
        if self.remarks.len() > 500 {
            return Err(ContractViolation::InvalidValue {
                field: "booking_submission.remarks",
                reason: "must be <= 500 chars",
            });
        }
        if self.joiner && self.reference_code.is_none() {
            return Err(ContractViolation::InvalidValue {
                field: "booking_submission.reference_code",
                reason: "joiner rows must carry their group's reference code",
            });
        }
        Ok(())
    }
}
