#![forbid(unsafe_code)]

use slotbook_contracts::booking::{
    BookingRecord, BookingStatus, ReferenceCode, SessionType, SubmissionType,
};
use slotbook_contracts::layout::{ledger_header, BookingColumn, LedgerLine, StyleTag};
use slotbook_contracts::period::ShardId;
use slotbook_storage::ledger::{
    content_digest, InMemoryLedgerStore, LedgerFault, RowIndex, RowLayout, ShardTemplate,
};
use slotbook_storage::repo::LedgerRepo;
use slotbook_storage::StorageError;

fn shard() -> ShardId {
    ShardId::new("Jun 1 - 15, 2025").unwrap()
}

fn store() -> InMemoryLedgerStore {
    let mut template = ShardTemplate::mvp_v1();
    template.initial_capacity = 10;
    InMemoryLedgerStore::new_in_memory(template).unwrap()
}

fn record(name: &str, phone: &str) -> BookingRecord {
    BookingRecord {
        branch: "DT".to_string(),
        client_name: name.to_string(),
        phone: phone.to_string(),
        date: "2025-06-10".to_string(),
        time_slot: "10:00 AM".to_string(),
        services: vec!["Facial".to_string()],
        session: Some(SessionType::First),
        status: BookingStatus::Pending,
        after_care: false,
        payment_method: "Cash".to_string(),
        remarks: String::new(),
        submission_type: SubmissionType::New,
        joiner: false,
        reference_code: Some(ReferenceCode::new("BK-TEST01").unwrap()),
        queue_no: String::new(),
    }
}

fn line(text: &str, style: StyleTag) -> LedgerLine {
    let mut cells = vec![String::new(); ledger_header().len()];
    cells[0] = text.to_string();
    cells[1] = "filler".to_string();
    LedgerLine::new(cells, style)
}

#[test]
fn at_ledger_db_01_new_shard_clones_template_structure_only() {
    let s = store();
    s.create_shard_from_template(&shard()).unwrap();
    let meta = s.metadata(&shard()).unwrap();
    assert_eq!(meta.header, ledger_header());
    assert_eq!(meta.column_rules, s.template().column_rules);
    assert_eq!(meta.row_layouts.len(), 10);
    assert!(meta
        .row_layouts
        .iter()
        .all(|l| *l == s.template().row_layout));
    assert_eq!(meta.used_rows, 0);
    assert!(s.read_records(&shard()).unwrap().is_empty());
    assert_eq!(
        s.create_shard_from_template(&shard()),
        Err(StorageError::ShardAlreadyExists {
            shard: shard().to_string()
        })
    );
}

#[test]
fn at_ledger_db_02_append_then_update_by_row_identity() {
    let s = store();
    s.create_shard_from_template(&shard()).unwrap();
    let first = s.append_record(&shard(), &record("Ana", "09170000001")).unwrap();
    let second = s.append_record(&shard(), &record("Ben", "09170000002")).unwrap();
    assert_eq!((first, second), (RowIndex(0), RowIndex(1)));

    let mut moved = record("Ben", "09170000002");
    moved.time_slot = "11:00 AM".to_string();
    s.update_record(&shard(), second, &moved).unwrap();

    let rows = s.read_records(&shard()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].record, moved);
    assert_eq!(s.row_write_count(), 3);
    assert!(matches!(
        s.update_record(&shard(), RowIndex(7), &moved),
        Err(StorageError::RowNotFound { row: 7, .. })
    ));
}

#[test]
fn at_ledger_db_03_replace_content_keeps_row_layout() {
    let s = store();
    s.create_shard_from_template(&shard()).unwrap();
    let custom = RowLayout {
        height_px: 42,
        validation_profile: "tall_row".to_string(),
    };
    s.set_row_layout(&shard(), RowIndex(1), custom.clone()).unwrap();

    let lines = vec![
        line("Tuesday, June 10, 2025", StyleTag::DateHeader),
        line("DT", StyleTag::Cancelled),
        line("NP", StyleTag::Group(2)),
    ];
    s.replace_content(&shard(), &lines, 5).unwrap();

    let meta = s.metadata(&shard()).unwrap();
    assert_eq!(meta.row_layouts[1], custom);
    assert_eq!(meta.used_rows, 3);
    let stored = s.read_lines(&shard()).unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[1].line.style, StyleTag::Cancelled);
    assert_eq!(stored[2].line.cells[0], "NP");
}

#[test]
fn at_ledger_db_04_capacity_must_be_extended_before_large_writes() {
    let s = store();
    s.create_shard_from_template(&shard()).unwrap();
    let lines: Vec<LedgerLine> = (0..14)
        .map(|i| line(&format!("row{i}"), StyleTag::Default))
        .collect();
    assert_eq!(
        s.replace_content(&shard(), &lines, 0),
        Err(StorageError::RowCapacityExceeded {
            shard: shard().to_string(),
            needed: 14,
            capacity: 10
        })
    );
    assert_eq!(s.extend_capacity(&shard(), 6).unwrap(), 16);
    s.replace_content(&shard(), &lines, 0).unwrap();
    let meta = s.metadata(&shard()).unwrap();
    assert_eq!(meta.used_rows, 14);
    assert_eq!(meta.row_layouts[15], s.template().row_layout);
}

#[test]
fn at_ledger_db_05_shorter_content_blanks_stale_rows() {
    let s = store();
    s.create_shard_from_template(&shard()).unwrap();
    let long: Vec<LedgerLine> = (0..8)
        .map(|i| line(&format!("row{i}"), StyleTag::Default))
        .collect();
    s.replace_content(&shard(), &long, 0).unwrap();
    s.replace_content(&shard(), &long[..2], 1).unwrap();
    let stored = s.read_lines(&shard()).unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(s.used_rows(&shard()).unwrap(), 2);
    assert_eq!(s.row_capacity(&shard()).unwrap(), 10);
}

#[test]
fn at_ledger_db_06_trim_never_drops_used_rows() {
    let s = store();
    s.create_shard_from_template(&shard()).unwrap();
    for i in 0..4 {
        s.append_record(&shard(), &record(&format!("C{i}"), "09170000001"))
            .unwrap();
    }
    assert_eq!(s.trim_capacity(&shard(), 1).unwrap(), 4);
    assert_eq!(s.read_records(&shard()).unwrap().len(), 4);
    assert_eq!(s.trim_capacity(&shard(), 50).unwrap(), 4);
}

#[test]
fn at_ledger_db_07_pseudo_rows_are_not_records() {
    let s = store();
    s.create_shard_from_template(&shard()).unwrap();
    let booking = record("Ana", "09170000001");
    let lines = vec![
        line("Tuesday, June 10, 2025", StyleTag::DateHeader),
        LedgerLine::new(booking.to_cells(), StyleTag::Default),
        LedgerLine::new(vec![String::new(); 14], StyleTag::Divider),
        LedgerLine::new(booking.to_cells(), StyleTag::Group(0)),
    ];
    s.replace_content(&shard(), &lines, 0).unwrap();
    let rows = s.read_records(&shard()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].row, RowIndex(1));
    assert_eq!(rows[1].row, RowIndex(3));
    assert_eq!(rows[0].record, booking);
}

#[test]
fn at_ledger_db_08_faults_surface_as_unavailable() {
    let s = store();
    s.create_shard_from_template(&shard()).unwrap();
    s.inject_fault(LedgerFault::WriteUnavailableFor(shard()));
    assert_eq!(
        s.append_record(&shard(), &record("Ana", "0917")),
        Err(StorageError::Unavailable {
            op: "append_record"
        })
    );
    assert!(s.read_records(&shard()).is_ok());
    s.inject_fault(LedgerFault::ReadUnavailable);
    assert!(matches!(
        s.read_records(&shard()),
        Err(StorageError::Unavailable { .. })
    ));
    s.clear_faults();
    assert!(s.append_record(&shard(), &record("Ana", "0917")).is_ok());
}

#[test]
fn at_ledger_db_09_operator_shard_with_reordered_header() {
    let s = store();
    let mut header = ledger_header();
    header.swap(0, 2);
    let legacy = ShardId::new("Jun 16-30, 2025").unwrap();
    s.install_shard(&legacy, header, 5).unwrap();
    let booking = record("Ana", "09170000001");
    s.append_record(&legacy, &booking).unwrap();
    assert_eq!(s.read_records(&legacy).unwrap()[0].record, booking);
    let lines = s.read_lines(&legacy).unwrap();
    assert_eq!(lines[0].line.cells[BookingColumn::Branch.position()], "DT");

    let mut broken = ledger_header();
    broken.retain(|h| h != "Status");
    assert_eq!(
        s.install_shard(&ShardId::unsorted(), broken, 5),
        Err(StorageError::MissingColumn { column: "Status" })
    );
}

#[test]
fn at_ledger_db_10_digest_tracks_content_and_style() {
    let a = vec![line("DT", StyleTag::Default)];
    let b = vec![line("DT", StyleTag::Cancelled)];
    assert_eq!(content_digest(&a), content_digest(&a.clone()));
    assert_ne!(content_digest(&a), content_digest(&b));
    assert_eq!(content_digest(&a).len(), 64);
}
