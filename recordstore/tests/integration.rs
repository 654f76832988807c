use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use recordstore::{CallerId, Engine, EngineConfig, EngineError};
use recordstore_shared_tests as shared;

#[test]
fn shared_scenarios_against_a_freshly_opened_engine() {
    let cases: &[(&str, fn(&Engine) -> recordstore::Result<()>)] = &[
        ("create_then_read", shared::test_create_then_read),
        ("create_rejects_duplicate_primary_key", shared::test_create_rejects_duplicate_primary_key),
        ("lock_update_unlock_roundtrip", shared::test_lock_update_unlock_roundtrip),
        ("delete_then_read_fails", shared::test_delete_then_read_fails),
        ("update_rejects_primary_key_change", shared::test_update_rejects_primary_key_change),
        ("find_matches_by_prefix", shared::test_find_matches_by_prefix),
        ("find_with_no_matches_is_record_not_found", shared::test_find_with_no_matches_is_record_not_found),
        ("unlocking_without_a_lock_is_a_transaction_error", shared::test_unlocking_without_a_lock_is_a_transaction_error),
        ("release_all_owned_by_drops_a_stale_lock", shared::test_release_all_owned_by_drops_a_stale_lock),
        ("create_reuses_a_deleted_slot", shared::test_create_reuses_a_deleted_slot),
    ];

    for (name, case) in cases {
        let dir = tempfile::tempdir().unwrap();
        let engine = shared::open_engine(dir.path());
        case(&engine).unwrap_or_else(|e| panic!("scenario {name} failed: {e}"));
    }
}

#[test]
fn a_second_locker_waits_roughly_one_retry_interval_past_release() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        lock_retry_interval: Duration::from_millis(100),
        lock_expiry: Duration::from_secs(30),
        ..EngineConfig::default()
    };
    let engine = Arc::new(shared::open_engine_with_config(dir.path(), config));
    let n = engine.create(shared::row("Palace", "101", "199")).unwrap();

    let first = CallerId::new(1);
    let second = CallerId::new(2);
    engine.lock(n, first).unwrap();

    let engine2 = engine.clone();
    let handle = thread::spawn(move || {
        let started = Instant::now();
        engine2.lock(n, second).unwrap();
        started.elapsed()
    });

    thread::sleep(Duration::from_millis(250));
    engine.unlock(n, first).unwrap();

    let waited = handle.join().unwrap();
    assert!(waited >= Duration::from_millis(200));
    engine.unlock(n, second).unwrap();
}

#[test]
fn the_watchdog_breaks_a_lock_held_past_its_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        lock_expiry: Duration::from_millis(150),
        lock_retry_interval: Duration::from_millis(20),
        ..EngineConfig::default()
    };
    let engine = shared::open_engine_with_config(dir.path(), config);
    let n = engine.create(shared::row("Palace", "101", "199")).unwrap();

    engine.lock(n, CallerId::new(1)).unwrap();
    assert!(engine.is_locked(n));
    thread::sleep(Duration::from_millis(400));
    assert!(!engine.is_locked(n));

    // The lock being gone lets a new caller take it straight away.
    engine.lock(n, CallerId::new(2)).unwrap();
    engine.unlock(n, CallerId::new(2)).unwrap();
}

#[test]
fn concurrent_create_of_distinct_pks_yields_distinct_record_numbers() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(shared::open_engine(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = engine.clone();
            thread::spawn(move || engine.create(shared::row(&format!("Guest{i}"), "101", "199")).unwrap())
        })
        .collect();

    let mut numbers: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    numbers.sort_unstable();
    numbers.dedup();
    assert_eq!(numbers.len(), 8);
}

#[test]
fn concurrent_create_of_the_same_pk_lets_exactly_one_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(shared::open_engine(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || engine.create(shared::row("Palace", "101", "199")))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results.iter().filter(|r| matches!(r, Err(EngineError::DuplicateKey(_)))).count();
    assert_eq!(succeeded, 1);
    assert_eq!(duplicates, 7);
}

#[test]
fn updating_without_holding_the_lock_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let engine = shared::open_engine(dir.path());
    let n = engine.create(shared::row("Palace", "101", "199")).unwrap();

    let err = engine.update(n, shared::row("Palace", "101", "250"), CallerId::new(1)).unwrap_err();
    assert!(matches!(err, EngineError::TransactionError { .. }));
}

#[test]
fn reopening_the_same_combined_field_file_twice_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = shared::write_combined_fixture(dir.path());

    let first = Engine::open(&path, shared::hotel_schema(), EngineConfig::default()).unwrap();
    let n = first.create(shared::row("Palace", "101", "199")).unwrap();
    drop(first);

    // The split only ever happens in memory, so the file on disk still stores name+room
    // combined; opening it again must run the same alignment step and find the same record.
    let second = Engine::open(&path, shared::hotel_schema(), EngineConfig::default()).unwrap();
    assert_eq!(second.read(n).unwrap(), shared::row("Palace", "101", "199"));
}
