#![forbid(unsafe_code)]

use slotbook_contracts::booking::{
    normalize_client_name, BookingRecord, NormalizedSubmission, ReferenceCode, SubmissionType,
};

use crate::occupancy::occupancy_at;

pub mod reason_codes {
    use slotbook_contracts::ReasonCodeId;

    pub const ADMIT_OK_INSERT: ReasonCodeId = ReasonCodeId(0x4144_0001);
    pub const ADMIT_OK_RESUBMISSION: ReasonCodeId = ReasonCodeId(0x4144_0002);
    pub const ADMIT_OK_RESCHEDULE: ReasonCodeId = ReasonCodeId(0x4144_0003);

    pub const ADMIT_CAPACITY_EXCEEDED: ReasonCodeId = ReasonCodeId(0x4144_0010);
    pub const ADMIT_INPUT_SCHEMA_INVALID: ReasonCodeId = ReasonCodeId(0x4144_00F1);
    pub const ADMIT_STORAGE_UNAVAILABLE: ReasonCodeId = ReasonCodeId(0x4144_00F2);
    pub const ADMIT_GATE_TIMEOUT: ReasonCodeId = ReasonCodeId(0x4144_00F3);
    pub const ADMIT_REFERENCE_EXHAUSTED: ReasonCodeId = ReasonCodeId(0x4144_00F4);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Resubmission,
    Reschedule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// Rewrite the live row at `index` in place.
    UpdateExisting {
        index: usize,
        matched: MatchKind,
        reference_code: Option<ReferenceCode>,
        occupied: u32,
    },
    Insert {
        occupied: u32,
    },
    Reject {
        occupied: u32,
        capacity: u32,
    },
}

impl AdmissionDecision {
    pub fn reason_code(&self) -> slotbook_contracts::ReasonCodeId {
        match self {
            AdmissionDecision::UpdateExisting {
                matched: MatchKind::Resubmission,
                ..
            } => reason_codes::ADMIT_OK_RESUBMISSION,
            AdmissionDecision::UpdateExisting {
                matched: MatchKind::Reschedule,
                ..
            } => reason_codes::ADMIT_OK_RESCHEDULE,
            AdmissionDecision::Insert { .. } => reason_codes::ADMIT_OK_INSERT,
            AdmissionDecision::Reject { .. } => reason_codes::ADMIT_CAPACITY_EXCEEDED,
        }
    }
}

/// Decides one submission against the live rows of its target shard.
///
/// A matched row already sitting on the target slot is rewritten without a
/// capacity check; anything that adds a seat to the slot needs
/// `occupied < capacity`.
pub fn decide(
    live: &[BookingRecord],
    submission: &NormalizedSubmission,
    capacity: u32,
    default_year: i32,
) -> AdmissionDecision {
    let key = submission.slot_key();
    let occupied = occupancy_at(live, &key, default_year);
    match find_match(live, submission, default_year) {
        Some((index, matched)) => {
            if live[index].occupies(&key, default_year) || occupied < capacity {
                AdmissionDecision::UpdateExisting {
                    index,
                    matched,
                    reference_code: live[index].reference_code.clone(),
                    occupied,
                }
            } else {
                AdmissionDecision::Reject { occupied, capacity }
            }
        }
        None if occupied < capacity => AdmissionDecision::Insert { occupied },
        None => AdmissionDecision::Reject { occupied, capacity },
    }
}

/// Row a submission should rewrite, if any.
///
/// Joiner rows share the primary's phone, so a row only matches when its
/// joiner role agrees and, for joiners, the client name does too.
pub fn find_match(
    live: &[BookingRecord],
    submission: &NormalizedSubmission,
    default_year: i32,
) -> Option<(usize, MatchKind)> {
    let same_party = |record: &BookingRecord| {
        !record.status.is_cancelled()
            && record.joiner == submission.joiner
            && record.phone_digits() == submission.phone
            && (!submission.joiner
                || normalize_client_name(&record.client_name)
                    == normalize_client_name(&submission.client_name))
    };
    match submission.submission_type {
        SubmissionType::New => live
            .iter()
            .position(|record| {
                same_party(record)
                    && record.calendar_date(default_year) == Some(submission.date)
                    && record.slot_start() == Some(submission.slot)
            })
            .map(|i| (i, MatchKind::Resubmission)),
        SubmissionType::Reschedule => {
            let by_code = submission.reference_code.as_ref().and_then(|code| {
                live.iter().position(|record| {
                    record.reference_code.as_ref() == Some(code) && same_party(record)
                })
            });
            by_code
                .or_else(|| live.iter().position(same_party))
                .map(|i| (i, MatchKind::Reschedule))
        }
    }
}

/// True when a live, non-joiner row carries `code`. Joiners may only attach
/// to a group whose primary is still seated.
pub fn has_live_primary<'a, I>(records: I, code: &ReferenceCode) -> bool
where
    I: IntoIterator<Item = &'a BookingRecord>,
{
    records.into_iter().any(|record| {
        !record.joiner
            && !record.status.is_cancelled()
            && record.reference_code.as_ref() == Some(code)
    })
}

/// Row written for an admitted update: the submission's fields over the
/// matched row's status and queue number.
pub fn merge_update(
    existing: &BookingRecord,
    submission: &NormalizedSubmission,
    reference_code: ReferenceCode,
) -> BookingRecord {
    let mut record = submission.to_record(reference_code);
    record.status = existing.status.clone();
    record.queue_no = existing.queue_no.clone();
    record
}
