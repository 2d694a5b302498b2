//! End-to-end batches: organizer selection, per-file failure isolation,
//! resume and retry, and what the caller gets back.

mod common;

use std::collections::BTreeSet;
use std::path::PathBuf;

use common::{minimal_file, BulkFileBuilder, PipelineConfigBuilder, TestHarness};
use fire_bulk::broadcast::BatchPhase;
use fire_bulk::db::{file_repo, stats_repo, FileFilter};
use fire_bulk::pipeline::{BroadcastProgress, FnProgress, ProgressEvent, ProgressKind};
use fire_bulk::{BatchProgressBroadcaster, FileStatus};

/// A schedule file the canonicalizer rejects: no `IDRSSD` column.
fn broken_file() -> String {
    BulkFileBuilder::with_header(&["RSSD", "RIAD4340"])
        .row("480228", &["12"])
        .build()
}

fn paths(files: &[fire_bulk::FileRecord]) -> BTreeSet<PathBuf> {
    files.iter().map(|f| f.path.clone()).collect()
}

#[test]
fn test_partial_failure_keeps_good_records() {
    let harness = TestHarness::new();
    harness.write_schedule(
        "RC",
        &BulkFileBuilder::new()
            .columns(&["RCON2170", "RCON2948"])
            .description_row()
            .row("480228", &["2,948,000", "1,000"])
            .row("852320", &["500", "ND"])
            .build(),
    );
    let ri = harness.write_schedule("RI", &broken_file());

    let outcome = harness.run(false, false, None);

    let rc = &outcome.records_by_schedule["RC"];
    assert_eq!(rc.records.len(), 3);
    assert_eq!(rc.stats.sentinel_cells, 1);
    assert_eq!(outcome.completed, 1);

    assert_eq!(outcome.failed_files.len(), 1);
    let failed = &outcome.failed_files[0];
    assert_eq!(failed.path, ri);
    assert_eq!(failed.schedule_code, "RI");
    assert_eq!(failed.retry_count, 1);
    assert!(failed.error.contains("IDRSSD"));

    let statuses = harness.statuses();
    assert_eq!(statuses["RC"], FileStatus::Completed);
    assert_eq!(statuses["RI"], FileStatus::Failed);
    assert_eq!(harness.record(&ri).error_message, Some(failed.error.clone()));
}

#[test]
fn test_resume_is_a_strict_subset_covering_the_rest() {
    let harness = TestHarness::new();
    for code in ["RC", "RCN"] {
        harness.write_schedule(code, &minimal_file("480228"));
    }
    harness.write_schedule("RI", &broken_file());

    let full = harness.prepare(false, false);
    harness
        .processor()
        .process_prepared(&full, None, &fire_bulk::pipeline::NoopProgress)
        .unwrap();

    let resumed = harness.prepare(true, false);
    let completed: BTreeSet<PathBuf> = file_repo::get_by_quarter(&harness.db, TestHarness::q4_2023())
        .unwrap()
        .into_iter()
        .filter(|r| r.status == FileStatus::Completed)
        .map(|r| r.path)
        .collect();

    let full_set = paths(&full.files);
    let resumed_set = paths(&resumed.files);
    assert!(resumed_set.is_subset(&full_set));
    assert!(resumed_set.len() < full_set.len());
    assert_eq!(
        completed.union(&resumed_set).cloned().collect::<BTreeSet<_>>(),
        full_set
    );
    assert!(completed.is_disjoint(&resumed_set));
}

#[test]
fn test_resume_after_fix_finishes_quarter() {
    let harness = TestHarness::new();
    harness.write_schedule("RC", &minimal_file("480228"));
    harness.write_schedule("RI", &broken_file());
    harness.run(false, false, None);

    harness.write_schedule(
        "RI",
        &BulkFileBuilder::new()
            .columns(&["RIAD4340"])
            .row("480228", &["(12)"])
            .build(),
    );
    let outcome = harness.run(true, false, None);

    assert!(outcome.failed_files.is_empty());
    assert_eq!(outcome.total_files, 1);
    let ri = &outcome.records_by_schedule["RI"];
    assert_eq!(ri.records[0].amount, "-12");
    assert!(harness
        .statuses()
        .values()
        .all(|s| *s == FileStatus::Completed));
}

#[test]
fn test_retry_selects_exactly_the_failed_files() {
    let harness = TestHarness::new();
    harness.write_schedule("RC", &minimal_file("480228"));
    let rcn = harness.write_schedule("RCN", &broken_file());
    let ri = harness.write_schedule("RI", &broken_file());
    harness.run(false, false, None);

    let failed_before: BTreeSet<PathBuf> = file_repo::get_failed(&harness.db, None)
        .unwrap()
        .into_iter()
        .map(|(record, _)| record.path)
        .collect();
    assert_eq!(failed_before, BTreeSet::from([rcn.clone(), ri.clone()]));

    let retry = harness.prepare(true, true);
    assert_eq!(retry.reset_failed, 2);
    assert_eq!(paths(&retry.files), failed_before);
    for file in &retry.files {
        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(file.retry_count, 1);
        assert!(file.error_message.is_none());
    }

    // Still broken: the second failure bumps the count again.
    let outcome = harness
        .processor()
        .process_prepared(&retry, None, &fire_bulk::pipeline::NoopProgress)
        .unwrap();
    assert_eq!(outcome.failed_files.len(), 2);
    assert!(outcome.failed_files.iter().all(|f| f.retry_count == 2));
    assert_eq!(harness.record(&ri).retry_count, 2);
}

#[test]
fn test_requeue_by_another_run_mid_batch_is_respected() {
    let harness = TestHarness::new();
    let rc = harness.write_schedule("RC", &minimal_file("480228"));
    let ri = harness.write_schedule("RI", &minimal_file("480228"));

    // Another process requeues interrupted work while RC is converting.
    let db = harness.db.clone();
    let reporter = FnProgress(move |event: &ProgressEvent| {
        if event.kind == ProgressKind::Started && event.current_schedule == "RC" {
            file_repo::requeue_interrupted(&db, &FileFilter::default()).unwrap();
        }
    });
    let batch = harness.prepare(false, false);
    let outcome = harness
        .processor()
        .process_prepared(&batch, None, &reporter)
        .unwrap();

    assert_eq!(outcome.completed, 1);
    assert_eq!(outcome.skipped, 1);
    assert!(!outcome.records_by_schedule.contains_key("RC"));
    assert!(outcome.records_by_schedule.contains_key("RI"));
    assert_eq!(harness.record(&rc).status, FileStatus::Pending);
    assert_eq!(harness.record(&ri).status, FileStatus::Completed);

    // The requeued file is picked up by the next resume.
    let resumed = harness.run(true, false, None);
    assert_eq!(resumed.completed, 1);
    assert_eq!(harness.record(&rc).status, FileStatus::Completed);
}

#[test]
fn test_retry_without_resume_skips_completed_files() {
    let harness = TestHarness::new();
    harness.write_schedule("RC", &minimal_file("480228"));
    harness.write_schedule("RI", &broken_file());
    harness.run(false, false, None);

    let outcome = harness.run(false, true, None);
    assert_eq!(outcome.total_files, 2);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.failed_files.len(), 1);
    assert!(!outcome.records_by_schedule.contains_key("RC"));
}

#[test]
fn test_amount_cleaning_end_to_end() {
    let harness = TestHarness::new();
    harness.write_schedule(
        "RC",
        &BulkFileBuilder::new()
            .columns(&["RCON2170", "RCON2948", "RCON3210", "RCON3300"])
            .row("480228", &["(1,234)", "1,234.50", "ND", ""])
            .build(),
    );

    let outcome = harness.run(false, false, None);
    let rc = &outcome.records_by_schedule["RC"];

    let amounts: BTreeSet<(&str, &str)> = rc
        .records
        .iter()
        .map(|r| (r.metric_code.as_str(), r.amount.as_str()))
        .collect();
    assert_eq!(
        amounts,
        BTreeSet::from([("RCON2170", "-1234"), ("RCON2948", "1234.50")])
    );
    assert_eq!(rc.stats.sentinel_cells, 1);
    assert_eq!(rc.stats.blank_cells, 1);
    assert!(rc.records.iter().all(|r| !r.description.is_empty()));
}

#[test]
fn test_incomplete_quarter_still_processes_available_files() {
    let harness = TestHarness::new();
    harness.write_schedule("RC", &minimal_file("480228"));
    harness.write_schedule("RI", &minimal_file("480228"));

    let batch = harness.prepare(false, false);
    assert_eq!(batch.completeness.missing_schedules, vec!["RCN"]);
    assert!(batch.completeness.percentage < 100.0);
    assert_eq!(batch.files.len(), 2);

    let outcome = harness
        .processor()
        .process_prepared(&batch, None, &fire_bulk::pipeline::NoopProgress)
        .unwrap();
    assert_eq!(outcome.completed, 2);
}

#[test]
fn test_institution_filter_miss_yields_no_records() {
    let harness = TestHarness::new();
    let rc = harness.write_schedule(
        "RC",
        &BulkFileBuilder::new()
            .columns(&["RCON2170"])
            .row("480228", &["2,948,000"])
            .build(),
    );

    let outcome = harness.run(false, false, Some("999999"));

    assert!(outcome.failed_files.is_empty());
    assert_eq!(outcome.record_count(), 0);
    assert_eq!(outcome.completed, 1);
    assert_eq!(outcome.filter_misses, vec!["RC"]);
    let record = harness.record(&rc);
    assert_eq!(record.status, FileStatus::Completed);
    assert_eq!(record.row_count, Some(0));
}

#[test]
fn test_institution_filter_keeps_matching_rows_only() {
    let harness = TestHarness::new();
    harness.write_schedule(
        "RC",
        &BulkFileBuilder::new()
            .columns(&["RCON2170"])
            .row("480228", &["2,948,000"])
            .row("852320", &["12"])
            .build(),
    );

    let outcome = harness.run(false, false, Some(" 852320 "));
    let records = &outcome.records_by_schedule["RC"].records;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].rssd_id, "852320");
    assert_eq!(records[0].amount, "12");
    assert!(outcome.filter_misses.is_empty());
}

#[test]
fn test_chunked_conversion_matches_single_pass() {
    let content = {
        let mut builder = BulkFileBuilder::new().columns(&["RCON2170", "RIAD4340"]);
        for id in 1..=25 {
            let value = format!("{},000", id);
            builder = builder.row(&id.to_string(), &[&value, "(5)"]);
        }
        builder.build()
    };

    let single = TestHarness::new();
    single.write_schedule("RC", &content);
    let chunked = TestHarness::with_config(
        PipelineConfigBuilder::new()
            .large_file_bytes(1)
            .chunk_rows(3)
            .build(),
    );
    chunked.write_schedule("RC", &content);

    let sorted = |harness: &TestHarness| {
        let mut records = harness.run(false, false, None).records_by_schedule["RC"]
            .records
            .clone();
        records.sort_by(|a, b| (&a.rssd_id, &a.metric_code).cmp(&(&b.rssd_id, &b.metric_code)));
        records
    };
    let a = sorted(&single);
    assert_eq!(a.len(), 50);
    assert_eq!(a, sorted(&chunked));
}

#[test]
fn test_progress_events_are_broadcast() {
    let harness = TestHarness::new();
    harness.write_schedule("RC", &minimal_file("480228"));
    harness.write_schedule("RI", &broken_file());

    let broadcaster = BatchProgressBroadcaster::new(64);
    let mut rx = broadcaster.subscribe();
    let batch = harness.prepare(false, false);
    harness
        .processor()
        .process_prepared(&batch, None, &BroadcastProgress::new(broadcaster))
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    let phases: Vec<BatchPhase> = events.iter().map(|e| e.phase.clone()).collect();
    assert_eq!(
        phases,
        vec![
            BatchPhase::Started,
            BatchPhase::ScheduleCompleted,
            BatchPhase::Started,
            BatchPhase::ScheduleFailed,
            BatchPhase::BatchComplete,
        ]
    );
    let last = events.last().unwrap();
    assert!(last.batch_complete);
    let summary = last.summary.unwrap();
    assert_eq!((summary.completed, summary.failed), (1, 1));
    assert!(events[3].error.as_deref().unwrap().contains("IDRSSD"));
}

#[test]
fn test_runs_and_stats_are_recorded() {
    let harness = TestHarness::new();
    harness.write_schedule("RC", &minimal_file("480228"));
    harness.write_schedule("RI", &broken_file());
    let outcome = harness.run(false, false, None);

    let runs = stats_repo::recent_runs(&harness.db, 10).unwrap();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.id, outcome.batch_id);
    assert_eq!(run.quarter, "2023-Q4");
    assert_eq!(run.mode, "full");
    assert_eq!((run.completed_files, run.failed_files), (1, 1));
    assert!(run.finished_at.is_some());

    let stats = stats_repo::processing_stats(&harness.db).unwrap();
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.quarters.len(), 1);
    assert_eq!(outcome.completion_percentage(), 50.0);
}
