#![forbid(unsafe_code)]

use slotbook_contracts::booking::{
    BookingRecord, BookingStatus, ReferenceCode, SessionType, SubmissionType,
};
use slotbook_contracts::layout::intake_header;
use slotbook_storage::intake::{InMemoryIntakeLog, IntakeFault, IntakeRowId};
use slotbook_storage::repo::IntakeRepo;
use slotbook_storage::StorageError;

fn record(name: &str, code: &str) -> BookingRecord {
    BookingRecord {
        branch: "NP".to_string(),
        client_name: name.to_string(),
        phone: "09171234567".to_string(),
        date: "2025-06-20".to_string(),
        time_slot: "2:00 PM".to_string(),
        services: vec!["Massage".to_string(), "Scrub".to_string()],
        session: Some(SessionType::Full),
        status: BookingStatus::Pending,
        after_care: true,
        payment_method: "Card".to_string(),
        remarks: "first visit".to_string(),
        submission_type: SubmissionType::New,
        joiner: false,
        reference_code: ReferenceCode::parse_cell(code),
        queue_no: String::new(),
    }
}

#[test]
fn at_intake_db_01_appends_start_unsynced() {
    let log = InMemoryIntakeLog::new_in_memory().unwrap();
    let a = log.append_submission(&record("Ana", "BK-AAAA22")).unwrap();
    let b = log.append_submission(&record("Ben", "")).unwrap();
    assert_eq!((a, b), (IntakeRowId(0), IntakeRowId(1)));
    let unsynced = log.list_unsynced().unwrap();
    assert_eq!(unsynced.len(), 2);
    assert_eq!(unsynced[0].record, record("Ana", "BK-AAAA22"));
    assert_eq!(unsynced[1].record.reference_code, None);
    assert_eq!(log.is_synced(a), Some(false));
}

#[test]
fn at_intake_db_02_mark_synced_hides_rows() {
    let log = InMemoryIntakeLog::new_in_memory().unwrap();
    let a = log.append_submission(&record("Ana", "BK-AAAA22")).unwrap();
    let b = log.append_submission(&record("Ben", "BK-BBBB33")).unwrap();
    log.mark_synced(&[a]).unwrap();
    let unsynced = log.list_unsynced().unwrap();
    assert_eq!(unsynced.len(), 1);
    assert_eq!(unsynced[0].id, b);
    assert_eq!(log.len(), 2);
    assert!(matches!(
        log.mark_synced(&[IntakeRowId(9)]),
        Err(StorageError::RowNotFound { row: 9, .. })
    ));
    assert_eq!(log.is_synced(b), Some(false));
}

#[test]
fn at_intake_db_03_missing_synced_column_fails_fast() {
    let mut header = intake_header();
    header.pop();
    assert_eq!(
        InMemoryIntakeLog::with_header(header).err(),
        Some(StorageError::MissingColumn { column: "Synced" })
    );
}

#[test]
fn at_intake_db_04_faults_leave_log_untouched() {
    let log = InMemoryIntakeLog::new_in_memory().unwrap();
    let a = log.append_submission(&record("Ana", "BK-AAAA22")).unwrap();
    log.inject_fault(IntakeFault::MarkUnavailable);
    assert!(matches!(
        log.mark_synced(&[a]),
        Err(StorageError::Unavailable { .. })
    ));
    assert_eq!(log.is_synced(a), Some(false));
    log.clear_faults();
    log.mark_synced(&[a]).unwrap();
    assert_eq!(log.is_synced(a), Some(true));
}
