//! Optimistic-concurrency versioning and soft-delete tombstone chains over
//! an on-disk database file.

mod common;

use common::Note;
use persist_lite::config::EngineConfig;
use persist_lite::expr::Predicate;
use persist_lite::repository::{CallerContext, ReadOptions, Repository};

fn repo(dir: &tempfile::TempDir) -> Repository<Note> {
    persist_lite::mapping::clear_mapping_cache();
    Repository::<Note>::open(&dir.path().join("notes.sqlite3"), &EngineConfig::default())
        .expect("open repository")
}

#[test]
fn update_bumps_version_and_rejects_stale_writes() {
    let dir = tempfile::tempdir().unwrap();
    let repository = repo(&dir);
    let caller = CallerContext::new("tester");

    let created = repository.create(Note::new("n1", "first"), &caller).unwrap();
    assert_eq!(created.version, 1);

    let mut edit = created.clone();
    edit.body = "second".to_string();
    let updated = repository.update(edit, &caller).unwrap();
    assert_eq!(updated.version, 2);

    let mut stale = created;
    stale.body = "conflict".to_string();
    let err = repository.update(stale, &caller).unwrap_err();
    assert!(matches!(
        err,
        persist_lite::EngineError::ConcurrencyConflict { expected: 1, actual: 2, .. }
    ));
}

#[test]
fn soft_delete_hides_row_but_keeps_tombstone_history() {
    let dir = tempfile::tempdir().unwrap();
    let repository = repo(&dir);
    let caller = CallerContext::new("tester");

    repository.create(Note::new("n1", "first"), &caller).unwrap();
    assert!(repository.delete(&"n1".to_string(), &caller).unwrap());

    assert!(repository.get(&"n1".to_string()).unwrap().is_none());

    let history = repository
        .get_by_key(&"n1".to_string(), ReadOptions { include_all_versions: true, include_deleted: true, ..Default::default() })
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, 1);
    assert!(!history[0].is_deleted);
    assert_eq!(history[1].version, 2);
    assert!(history[1].is_deleted);
}

#[test]
fn delete_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let repository = repo(&dir);
    let caller = CallerContext::new("tester");

    repository.create(Note::new("n1", "first"), &caller).unwrap();
    assert!(repository.delete(&"n1".to_string(), &caller).unwrap());
    assert!(repository.delete(&"n1".to_string(), &caller).unwrap());
}

#[test]
fn count_reflects_only_live_rows() {
    let dir = tempfile::tempdir().unwrap();
    let repository = repo(&dir);
    let caller = CallerContext::new("tester");

    repository.create(Note::new("n1", "a"), &caller).unwrap();
    repository.create(Note::new("n2", "b"), &caller).unwrap();
    repository.delete(&"n1".to_string(), &caller).unwrap();

    let live = repository.count(&Predicate::All, ReadOptions::default()).unwrap();
    assert_eq!(live, 1);
}
