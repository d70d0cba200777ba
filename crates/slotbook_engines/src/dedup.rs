#![forbid(unsafe_code)]

use std::collections::HashMap;

use slotbook_contracts::booking::{normalize_client_name, BookingRecord, StatusClass};
use slotbook_contracts::calendar::iso_date;

/// Partition key for duplicate rows. The reference code is not part of it; it
/// only decides which duplicate survives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub date: String,
    pub slot: String,
    pub branch: String,
    pub status: StatusClass,
    pub client: String,
}

pub fn identity_key(record: &BookingRecord, default_year: i32) -> IdentityKey {
    IdentityKey {
        date: record
            .calendar_date(default_year)
            .map(iso_date)
            .unwrap_or_else(|| record.date.trim().to_lowercase()),
        slot: record
            .slot_start()
            .map(|s| s.minutes().to_string())
            .unwrap_or_else(|| record.time_slot.trim().to_lowercase()),
        branch: record.branch.trim().to_ascii_uppercase(),
        status: record.status.class(),
        client: normalize_client_name(&record.client_name),
    }
}

/// One survivor per identity key, in first-appearance order of the key.
/// A coded row displaces an uncoded one; otherwise the first row stays.
pub fn dedup(records: Vec<BookingRecord>, default_year: i32) -> Vec<BookingRecord> {
    let mut survivors: Vec<BookingRecord> = Vec::with_capacity(records.len());
    let mut seen: HashMap<IdentityKey, usize> = HashMap::new();
    for record in records {
        let key = identity_key(&record, default_year);
        match seen.get(&key) {
            Some(&i) => {
                if survivors[i].reference_code.is_none() && record.reference_code.is_some() {
                    survivors[i] = record;
                }
            }
            None => {
                seen.insert(key, survivors.len());
                survivors.push(record);
            }
        }
    }
    survivors
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotbook_contracts::booking::{BookingStatus, ReferenceCode, SubmissionType};

    fn row(name: &str, code: &str, status: BookingStatus) -> BookingRecord {
        BookingRecord {
            branch: "DT".to_string(),
            client_name: name.to_string(),
            phone: "09170000000".to_string(),
            date: "2025-06-10".to_string(),
            time_slot: "10:00 AM".to_string(),
            services: vec!["Facial".to_string()],
            session: None,
            status,
            after_care: false,
            payment_method: String::new(),
            remarks: code.to_string(),
            submission_type: SubmissionType::New,
            joiner: false,
            reference_code: ReferenceCode::parse_cell(code),
            queue_no: String::new(),
        }
    }

    #[test]
    fn at_dedup_01_coded_row_survives_over_uncoded() {
        let uncoded = row("Ana Reyes", "", BookingStatus::Pending);
        let mut coded = row("  ana   REYES", "BK-KEEP22", BookingStatus::Confirmed);
        coded.date = "June 10, 2025".to_string();
        coded.time_slot = "10:00am".to_string();

        let out = dedup(vec![uncoded.clone(), coded.clone()], 2025);
        assert_eq!(out, vec![coded.clone()]);
        let out = dedup(vec![coded.clone(), uncoded], 2025);
        assert_eq!(out, vec![coded]);
    }

    #[test]
    fn at_dedup_02_first_coded_row_wins_between_codes() {
        let first = row("Ana", "BK-FIRST2", BookingStatus::Pending);
        let second = row("Ana", "BK-LATER3", BookingStatus::Pending);
        assert_eq!(dedup(vec![first.clone(), second], 2025), vec![first]);
    }

    #[test]
    fn at_dedup_03_distinct_status_class_or_client_are_kept() {
        let rows = vec![
            row("Ana", "BK-AAAA22", BookingStatus::Pending),
            row("Ana", "BK-AAAA22", BookingStatus::Cancelled),
            row("Ana", "BK-AAAA22", BookingStatus::Done),
            row("Ben", "BK-AAAA22", BookingStatus::Pending),
        ];
        assert_eq!(dedup(rows.clone(), 2025), rows);
    }

    #[test]
    fn at_dedup_04_dedup_is_idempotent() {
        let rows = vec![
            row("Ana", "", BookingStatus::Pending),
            row("Ana", "BK-AAAA22", BookingStatus::Pending),
            row("Ben", "", BookingStatus::Pending),
            row("ben", "", BookingStatus::Pending),
        ];
        let once = dedup(rows, 2025);
        assert_eq!(once.len(), 2);
        assert_eq!(dedup(once.clone(), 2025), once);
    }
}
