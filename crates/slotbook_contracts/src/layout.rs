#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

pub const LEDGER_COLUMN_COUNT: usize = 14;
pub const SYNCED_HEADER: &str = "Synced";

/// Ledger columns in their contractual order. The intake log appends `Synced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BookingColumn {
    Branch,
    ClientName,
    Phone,
    Date,
    TimeSlot,
    Services,
    Session,
    Status,
    AfterCare,
    PaymentMethod,
    Remarks,
    SubmissionType,
    ReferenceCode,
    QueueNo,
}

impl BookingColumn {
    pub const ALL: [BookingColumn; LEDGER_COLUMN_COUNT] = [
        BookingColumn::Branch,
        BookingColumn::ClientName,
        BookingColumn::Phone,
        BookingColumn::Date,
        BookingColumn::TimeSlot,
        BookingColumn::Services,
        BookingColumn::Session,
        BookingColumn::Status,
        BookingColumn::AfterCare,
        BookingColumn::PaymentMethod,
        BookingColumn::Remarks,
        BookingColumn::SubmissionType,
        BookingColumn::ReferenceCode,
        BookingColumn::QueueNo,
    ];

    pub fn header(self) -> &'static str {
        match self {
            BookingColumn::Branch => "Branch",
            BookingColumn::ClientName => "Client Name",
            BookingColumn::Phone => "Phone",
            BookingColumn::Date => "Date",
            BookingColumn::TimeSlot => "Time Slot",
            BookingColumn::Services => "Services",
            BookingColumn::Session => "Session",
            BookingColumn::Status => "Status",
            BookingColumn::AfterCare => "After-Care",
            BookingColumn::PaymentMethod => "Payment Method",
            BookingColumn::Remarks => "Remarks",
            BookingColumn::SubmissionType => "Submission Type",
            BookingColumn::ReferenceCode => "Reference Code",
            BookingColumn::QueueNo => "No.",
        }
    }

    pub fn position(self) -> usize {
        self as usize
    }
}

pub fn ledger_header() -> Vec<String> {
    BookingColumn::ALL
        .iter()
        .map(|c| c.header().to_string())
        .collect()
}

pub fn intake_header() -> Vec<String> {
    let mut header = ledger_header();
    header.push(SYNCED_HEADER.to_string());
    header
}

pub const GROUP_PALETTE: [&str; 6] = [
    "#FCE4EC", "#E3F2FD", "#E8F5E9", "#FFF3E0", "#F3E5F5", "#E0F7FA",
];

/// Presentation tag attached to every committed ledger line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "index")]
pub enum StyleTag {
    Default,
    Cancelled,
    SecondSessionDone,
    Group(u8),
    DateHeader,
    Divider,
}

impl StyleTag {
    pub fn group(ordinal: usize) -> Self {
        StyleTag::Group((ordinal % GROUP_PALETTE.len()) as u8)
    }

    pub fn background_hex(self) -> &'static str {
        match self {
            StyleTag::Default => "#FFFFFF",
            StyleTag::Cancelled => "#D9D9D9",
            StyleTag::SecondSessionDone => "#C8E6C9",
            StyleTag::Group(i) => GROUP_PALETTE[usize::from(i) % GROUP_PALETTE.len()],
            StyleTag::DateHeader => "#37474F",
            StyleTag::Divider => "#B0BEC5",
        }
    }

    pub fn is_pseudo_row(self) -> bool {
        matches!(self, StyleTag::DateHeader | StyleTag::Divider)
    }
}

/// One rendered shard row: content cells plus its style.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerLine {
    pub cells: Vec<String>,
    pub style: StyleTag,
}

impl LedgerLine {
    pub fn new(cells: Vec<String>, style: StyleTag) -> Self {
        Self { cells, style }
    }

    pub fn blank(width: usize) -> Self {
        Self {
            cells: vec![String::new(); width],
            style: StyleTag::Default,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|c| c.trim().is_empty())
    }
}
