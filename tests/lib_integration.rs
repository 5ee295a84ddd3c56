//! Integration tests exercising the notekeep library API from an external crate.

use std::fs::{self, File};
use std::path::Path;
use std::thread;
use std::time::{Duration, SystemTime};

use notekeep::sanitize::SanitizerConfig;
use notekeep::{
    Config, Database, EmbeddingBackend, Engine, Error, GraphFormat, Partition, Pipeline,
    SearchOptions, StopOutcome, TaskStatus, TaskType,
};
use serde_json::json;
use tempfile::TempDir;

const DAY: u64 = 24 * 60 * 60;

fn write_note(root: &Path, rel: &str, text: &str, age_days: u64) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, text).unwrap();
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(SystemTime::now() - Duration::from_secs(age_days * DAY))
        .unwrap();
}

fn test_config(dir: &TempDir) -> Config {
    let notes = dir.path().join("notes");
    fs::create_dir_all(&notes).unwrap();
    Config {
        database_path: dir.path().join("notekeep.db"),
        notes_root: notes,
        embedding_backend: EmbeddingBackend::Hash,
        poll_interval_ms: 10,
        max_backoff_ms: 100,
        identity: "tester".to_string(),
        anonymization_key: Some("integration-key".to_string()),
        ..Config::default()
    }
}

/// Recent notes rank before an older note even when the older one matches better.
#[test]
fn test_search_ranks_hot_before_cold() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_note(&config.notes_root, "recent-one.md", "# One\n\nSome python notes.\n", 1);
    write_note(&config.notes_root, "recent-two.md", "# Two\n\nA python snippet.\n", 2);
    write_note(
        &config.notes_root,
        "old.md",
        "# Python\n\npython python python, all about python.\n",
        30,
    );
    let mut engine = Engine::open(config).unwrap();
    engine.index().unwrap();

    let ranked = engine.search("python", &SearchOptions::default()).unwrap();
    let partitions: Vec<Partition> = ranked.results.iter().map(|r| r.partition).collect();
    assert_eq!(
        partitions,
        vec![Partition::Hot, Partition::Hot, Partition::Cold]
    );
    assert_eq!(ranked.results[2].file_path, "old.md");
}

/// A second scan over unchanged files writes nothing.
#[test]
fn test_reindex_of_unchanged_files_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_note(&config.notes_root, "a.md", "# A\n\nalpha\n", 1);
    write_note(&config.notes_root, "b.md", "# B\n\nbeta\n", 40);
    let mut engine = Engine::open(config.clone()).unwrap();

    let first = engine.index().unwrap();
    assert_eq!(first.indexed, 2);

    let second = engine.index().unwrap();
    assert_eq!(second.indexed, 0);
    assert_eq!(second.skipped, 2);

    // Touched but not edited: read, hashed, not written.
    write_note(&config.notes_root, "a.md", "# A\n\nalpha\n", 0);
    let third = engine.index().unwrap();
    assert_eq!(third.indexed, 0);
    assert_eq!(third.unchanged, 1);
}

#[test]
fn test_classify_task_completes() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(test_config(&dir)).unwrap();

    let id = engine
        .enqueue_task(
            TaskType::Classify,
            &json!({
                "content": "Notes on python asyncio and programming patterns",
                "categories": ["programming", "cooking"]
            }),
        )
        .unwrap();
    let events = engine.run_pending().unwrap();
    assert_eq!(events.len(), 1);

    let task = engine.task(id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    let result = task.result.unwrap();
    assert_eq!(result["category"], "programming");
    assert_eq!(engine.worker_status().unwrap().queue.done, 1);
}

#[test]
fn test_blocked_path_is_rejected_without_a_row() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_note(&config.notes_root, "credentials/aws.md", "# AWS\n\nkeys\n", 1);
    let mut engine = Engine::open(config).unwrap();
    engine.index().unwrap();

    let err = engine
        .enqueue_task(TaskType::Summarize, &json!({ "path": "credentials/aws.md" }))
        .unwrap_err();
    assert!(matches!(err, Error::Security(_)));
    assert!(engine.tasks(None, 10).unwrap().is_empty());
}

#[test]
fn test_quota_exceeded_after_daily_limit() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        daily_task_quota: 2,
        ..test_config(&dir)
    };
    let engine = Engine::open(config).unwrap();
    let payload = json!({ "content": "short note" });

    engine.enqueue_task(TaskType::Summarize, &payload).unwrap();
    engine.enqueue_task(TaskType::Summarize, &payload).unwrap();
    let err = engine
        .enqueue_task(TaskType::Summarize, &payload)
        .unwrap_err();
    assert!(matches!(err, Error::QuotaExceeded { used: 2, max: 2, .. }));
    assert_eq!(engine.tasks(None, 10).unwrap().len(), 2);
}

#[test]
fn test_unresolved_reference_reported() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    write_note(
        &config.notes_root,
        "hub.md",
        "# Hub\n\nSee [[spoke]] and [[missing-note]].\n",
        1,
    );
    write_note(&config.notes_root, "spoke.md", "# Spoke\n", 1);
    let mut engine = Engine::open(config).unwrap();
    engine.index().unwrap();

    let report = engine.graph_stats(false, 5).unwrap();
    assert_eq!(report.note_count, 2);
    assert_eq!(report.edge_count, 1);
    assert_eq!(report.unresolved.len(), 1);
    assert_eq!(report.unresolved[0].target, "missing-note");

    let out = dir.path().join("graph.json");
    engine.export_graph(&out, GraphFormat::Json, false).unwrap();
    let exported: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(exported["links"].as_array().unwrap().len(), 1);
}

/// A task claimed by a run that died is executed again on the next open.
#[test]
fn test_interrupted_task_is_recovered() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        stale_task_secs: 0,
        ..test_config(&dir)
    };

    let engine = Engine::open(config.clone()).unwrap();
    let id = engine
        .enqueue_task(TaskType::Summarize, &json!({ "content": "Recover me. Twice." }))
        .unwrap();
    engine.shutdown().unwrap();

    {
        let db = Database::open(&config.database_path).unwrap();
        let claimed = db.claim_next_task().unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, TaskStatus::Processing);
    }
    thread::sleep(Duration::from_millis(5));

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.worker_status().unwrap().queue.pending, 1);
    engine.run_pending().unwrap();

    let task = engine.task(id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.attempts, 2);
}

/// With the default stale threshold, a claim orphaned long enough ago is
/// reclaimed by the next open.
#[test]
fn test_orphaned_claim_recovered_with_default_threshold() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    assert!(config.stale_task_secs > 0);

    let engine = Engine::open(config.clone()).unwrap();
    let id = engine
        .enqueue_task(TaskType::Summarize, &json!({ "content": "Still owed. Later." }))
        .unwrap();
    engine.shutdown().unwrap();

    {
        let db = Database::open(&config.database_path).unwrap();
        assert_eq!(db.claim_next_task().unwrap().unwrap().id, id);
    }
    // The dead run claimed it long before the stale threshold.
    rusqlite::Connection::open(&config.database_path)
        .unwrap()
        .execute(
            "UPDATE ai_task_queue SET claimed_at = '2000-01-01T00:00:00.000Z' WHERE id = ?1",
            [id],
        )
        .unwrap();

    let mut engine = Engine::open(config).unwrap();
    let events = engine.subscribe();
    engine.start_worker().unwrap();
    let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event.task_id, id);
    assert_eq!(event.status, TaskStatus::Done);
    engine.stop_worker(Duration::from_secs(5));
}

#[test]
fn test_background_worker_notifies_subscribers() {
    let dir = TempDir::new().unwrap();
    let mut engine = Engine::open(test_config(&dir)).unwrap();
    let events = engine.subscribe();
    assert!(engine.start_worker().unwrap());

    let id = engine
        .enqueue_task(TaskType::Summarize, &json!({ "content": "First point. Second point." }))
        .unwrap();
    let event = events.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event.task_id, id);
    assert_eq!(event.status, TaskStatus::Done);

    assert_eq!(
        engine.stop_worker(Duration::from_secs(5)),
        StopOutcome::Stopped
    );
}

#[test]
fn test_sanitizer_is_idempotent_and_scrubs() {
    let pipeline = Pipeline::new(
        SanitizerConfig::new(b"integration-key".to_vec(), 2000)
            .with_usernames(vec!["alice".to_string()])
            .with_day("2026-01-01"),
    )
    .unwrap();
    let input = "alice stored api_key=sk-abcdefghijklmnopqrstuvwx in /home/alice/.env";

    let once = pipeline.sanitize(input.as_bytes()).unwrap();
    assert!(!once.text().contains("sk-abcdefghijklmnopqrstuvwx"));
    assert!(!once.text().contains("/home/alice"));
    assert!(!once.text().contains("alice"));
    assert_eq!(once.signature().len(), 64);

    let twice = pipeline.sanitize(once.text().as_bytes()).unwrap();
    assert_eq!(twice.text(), once.text());
    assert_eq!(twice.signature(), once.signature());
}

#[test]
fn test_sanitizer_fails_closed_on_invalid_utf8() {
    let pipeline = Pipeline::new(SanitizerConfig::new(b"k".to_vec(), 10)).unwrap();
    let err = pipeline.sanitize(&[0x66, 0xff, 0x6f]).unwrap_err();
    assert!(matches!(err, Error::Sanitization { stage: "decode", .. }));
}

#[test]
fn test_invalid_config_is_rejected_at_open() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        blocked_paths: vec!["[broken".to_string()],
        ..test_config(&dir)
    };
    assert!(matches!(Engine::open(config), Err(Error::Config(_))));
}
