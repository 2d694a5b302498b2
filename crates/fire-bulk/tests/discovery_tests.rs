//! End-to-end discovery: scanning, fingerprint change detection and the
//! ledger state a rescan leaves behind.

mod common;

use assert_fs::prelude::*;

use common::{minimal_file, BulkFileBuilder, TestHarness};
use fire_bulk::db::file_repo;
use fire_bulk::scanner::FINGERPRINT_PREFIX_BYTES;
use fire_bulk::{Database, DirectoryScanner, FileStatus, Telemetry};

fn fingerprints(harness: &TestHarness) -> Vec<(String, String)> {
    file_repo::get_by_quarter(&harness.db, TestHarness::q4_2023())
        .unwrap()
        .into_iter()
        .map(|r| (r.schedule_code, r.fingerprint))
        .collect()
}

/// A bulk file a little over the fingerprint window.
fn large_file() -> String {
    let mut builder = BulkFileBuilder::new().columns(&["RCON2170", "RCON2948"]);
    let mut id = 100_000u32;
    let mut size = 0usize;
    while size < FINGERPRINT_PREFIX_BYTES as usize + 64 * 1024 {
        let rssd_id = id.to_string();
        builder = builder.row(&rssd_id, &["1,000", "2,000"]);
        size += rssd_id.len() + "\t1,000\t2,000\n".len();
        id += 1;
    }
    builder.build()
}

#[test]
fn test_rescan_of_unchanged_directory_is_idempotent() {
    let harness = TestHarness::new();
    let rc = harness.write_schedule("RC", &minimal_file("480228"));
    harness.write_schedule("RI", &minimal_file("480228"));

    let first = harness.scan();
    assert_eq!(first.inserted, 2);
    let before = fingerprints(&harness);

    file_repo::mark_processing(&harness.db, &rc).unwrap();
    file_repo::mark_completed(&harness.db, &rc, 1, 1).unwrap();

    let second = harness.scan();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.changed, 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(fingerprints(&harness), before);

    let statuses = harness.statuses();
    assert_eq!(statuses["RC"], FileStatus::Completed);
    assert_eq!(statuses["RI"], FileStatus::Pending);
}

#[test]
fn test_change_inside_fingerprint_window_resets_to_pending() {
    let harness = TestHarness::new();
    let rc = harness.write_schedule("RC", &minimal_file("480228"));
    harness.scan();
    file_repo::mark_processing(&harness.db, &rc).unwrap();
    file_repo::mark_completed(&harness.db, &rc, 1, 1).unwrap();
    let before = harness.record(&rc);

    // One byte changed near the start of the file.
    harness.write_schedule("RC", &minimal_file("480229"));
    let report = harness.scan();

    assert_eq!(report.changed, 1);
    let after = harness.record(&rc);
    assert_ne!(after.fingerprint, before.fingerprint);
    assert_eq!(after.status, FileStatus::Pending);
    assert!(after.row_count.is_none());
    assert!(after.completed_at.is_none());
}

#[test]
fn test_large_file_change_inside_window_resets_to_pending() {
    let harness = TestHarness::new();
    let content = large_file();
    assert!(content.len() as u64 > FINGERPRINT_PREFIX_BYTES);
    let rc = harness.write_schedule("RC", &content);
    harness.scan();
    file_repo::mark_processing(&harness.db, &rc).unwrap();
    file_repo::mark_completed(&harness.db, &rc, 10, 10).unwrap();
    let before = harness.record(&rc);

    // First data row's amount, well inside the first MiB; same size.
    let mut bytes = content.into_bytes();
    let first_amount = bytes.windows(5).position(|w| w == b"1,000").unwrap();
    assert!((first_amount as u64) < FINGERPRINT_PREFIX_BYTES);
    bytes[first_amount] = b'9';
    harness.write_file(&TestHarness::schedule_filename("RC", "12312023"), &bytes);

    let report = harness.scan();
    assert_eq!(report.changed, 1);
    assert_eq!(report.unchanged, 0);
    let after = harness.record(&rc);
    assert_ne!(after.fingerprint, before.fingerprint);
    assert_eq!(after.status, FileStatus::Pending);
    assert!(after.row_count.is_none());
}

#[test]
fn test_change_beyond_fingerprint_window_goes_unnoticed() {
    let harness = TestHarness::new();
    let content = large_file();
    assert!(content.len() as u64 > FINGERPRINT_PREFIX_BYTES);
    let rc = harness.write_schedule("RC", &content);
    harness.scan();
    file_repo::mark_processing(&harness.db, &rc).unwrap();
    file_repo::mark_completed(&harness.db, &rc, 10, 10).unwrap();
    let before = harness.record(&rc);

    // Flip the final digit of the last row; the size stays the same.
    let mut bytes = content.into_bytes();
    let last_digit = bytes.len() - 2;
    bytes[last_digit] = if bytes[last_digit] == b'0' { b'9' } else { b'0' };
    harness.write_file(&TestHarness::schedule_filename("RC", "12312023"), &bytes);

    let report = harness.scan();
    assert_eq!(report.changed, 0);
    assert_eq!(report.unchanged, 1);
    let after = harness.record(&rc);
    assert_eq!(after.fingerprint, before.fingerprint);
    assert_eq!(after.status, FileStatus::Completed);
}

#[test]
fn test_scan_groups_quarters_and_skips_unrecognised_files() {
    let harness = TestHarness::new();
    harness.write_schedule("RC", &minimal_file("1"));
    harness.write_schedule_dated("RC", "09302023", &minimal_file("1"));
    harness.write_file("FFIEC CDR Call Schedule RCCI 12312023(1 of 2).txt", b"IDRSSD\n");
    harness.write_file("FFIEC CDR Call Schedule RCCI 12312023(2 of 2).txt", b"IDRSSD\n");
    harness.write_file("FFIEC CDR Call Schedule RI 13312023.txt", b"IDRSSD\n");
    harness.write_file("readme.txt", b"not a bulk file");
    harness.write_file("FFIEC CDR Call Schedule RI 12312023.csv", b"ignored");

    let report = harness.scan();

    let quarters: Vec<String> = report.quarters.keys().map(|q| q.to_string()).collect();
    assert_eq!(quarters, vec!["2023-Q3", "2023-Q4"]);
    let q4_codes: Vec<&str> = report.quarters[&TestHarness::q4_2023()]
        .iter()
        .map(|r| r.schedule_code.as_str())
        .collect();
    assert_eq!(q4_codes, vec!["RC", "RCCI1", "RCCI2"]);
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(report.file_count(), 4);
}

#[test]
fn test_ledger_survives_reopen() {
    let harness = TestHarness::new();
    let rc = harness.write_schedule("RC", &minimal_file("480228"));
    harness.scan();
    file_repo::mark_processing(&harness.db, &rc).unwrap();
    file_repo::mark_failed(&harness.db, &rc, "disk hiccup").unwrap();

    let reopened = Database::open(&harness.db_path).unwrap();
    let record = file_repo::find_by_path(&reopened, &rc).unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Failed);
    assert_eq!(record.retry_count, 1);
    assert_eq!(record.error_message.as_deref(), Some("disk hiccup"));
}

#[test]
fn test_scanner_on_assert_fs_tree() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("FFIEC CDR Call Schedule RC 03312024.txt")
        .write_str(&minimal_file("1"))
        .unwrap();
    temp.child("FFIEC CDR Call Bulk POR 03312024.txt")
        .write_str("IDRSSD\tFinancial Institution Name\n1\tFirst Bank\n")
        .unwrap();
    temp.child("nested/FFIEC CDR Call Schedule RI 03312024.txt")
        .write_str(&minimal_file("1"))
        .unwrap();

    let db = Database::open_in_memory().unwrap();
    let scanner = DirectoryScanner::new(db.clone(), 2, Telemetry::disabled());
    let report = scanner.scan(temp.path()).unwrap();

    let codes: Vec<&str> = report
        .quarters
        .values()
        .flatten()
        .map(|r| r.schedule_code.as_str())
        .collect();
    assert_eq!(codes, vec!["POR", "RC"]);
    assert_eq!(file_repo::available_quarters(&db).unwrap().len(), 1);

    temp.close().unwrap();
}
