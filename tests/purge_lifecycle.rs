//! Purge engine preview-vs-commit behavior and cutoff-selector validation.

mod common;

use std::time::Duration;

use common::Note;
use persist_lite::config::EngineConfig;
use persist_lite::expr::Predicate;
use persist_lite::purge::{self, PurgeOptions, PurgeStrategy};
use persist_lite::repository::{CallerContext, Repository};

fn repo(dir: &tempfile::TempDir) -> Repository<Note> {
    persist_lite::mapping::clear_mapping_cache();
    Repository::<Note>::open(&dir.path().join("notes.sqlite3"), &EngineConfig::default()).expect("open repository")
}

#[test]
fn preview_mode_reports_candidates_without_deleting() {
    let dir = tempfile::tempdir().unwrap();
    let repository = repo(&dir);
    let caller = CallerContext::new("tester");
    repository.create(Note::new("n1", "stale"), &caller).unwrap();

    let options = PurgeOptions {
        safe_mode: true,
        strategy: PurgeStrategy::PurgeAll,
        cutoff_date: Some(chrono::Utc::now() + chrono::Duration::days(1)),
        ..PurgeOptions::default()
    };
    let result = purge::purge(&repository, Predicate::All, options).unwrap();
    assert!(result.is_preview);
    assert_eq!(result.preview.unwrap().affected_entity_count, 1);
    assert!(repository.get(&"n1".to_string()).unwrap().is_some());
}

#[test]
fn commit_mode_deletes_rows_past_cutoff() {
    let dir = tempfile::tempdir().unwrap();
    let repository = repo(&dir);
    let caller = CallerContext::new("tester");
    repository.create(Note::new("n1", "stale"), &caller).unwrap();
    repository.create(Note::new("n2", "fresh"), &caller).unwrap();

    let options = PurgeOptions {
        safe_mode: false,
        strategy: PurgeStrategy::PurgeAll,
        cutoff_date: Some(chrono::Utc::now() + chrono::Duration::days(1)),
        ..PurgeOptions::default()
    };
    let result = purge::purge(&repository, Predicate::All, options).unwrap();
    assert!(!result.is_preview);
    assert_eq!(result.entities_purged, 2);
    assert!(repository.get(&"n1".to_string()).unwrap().is_none());
    assert!(repository.get(&"n2".to_string()).unwrap().is_none());
}

#[test]
fn requires_exactly_one_cutoff_selector() {
    let dir = tempfile::tempdir().unwrap();
    let repository = repo(&dir);

    let neither = PurgeOptions::default();
    assert!(purge::purge(&repository, Predicate::All, neither).is_err());

    let both = PurgeOptions {
        age_threshold: Some(Duration::from_secs(60)),
        cutoff_date: Some(chrono::Utc::now()),
        ..PurgeOptions::default()
    };
    assert!(purge::purge(&repository, Predicate::All, both).is_err());
}
