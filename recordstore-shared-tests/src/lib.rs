//! Shared test bodies exercised against an open `Engine`. Kept in their own crate so the same
//! scenario can be run from `recordstore`'s own test modules and from any downstream crate that
//! wants to validate an alternate engine configuration against the same behavior.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use recordstore::{CallerId, Engine, EngineConfig, EngineError, LogicalColumn, LogicalSchema, Result, Row};

pub const NAME_LEN: u16 = 56;
pub const ROOM_LEN: u16 = 8;
pub const RATE_LEN: u16 = 8;

fn encode_u16(v: u16) -> [u8; 2] {
    v.to_be_bytes()
}

fn encode_u32(v: u32) -> [u8; 4] {
    v.to_be_bytes()
}

fn write_field(file: &mut File, name: &str, length: u16) {
    file.write_all(&encode_u16(name.len() as u16)).unwrap();
    file.write_all(name.as_bytes()).unwrap();
    file.write_all(&encode_u16(length)).unwrap();
}

/// Builds a data file whose on-disk schema stores `name` and `room` as a single combined field,
/// matching the on-disk layout the engine is expected to split apart in memory at open time.
pub fn write_combined_fixture(dir: &Path) -> PathBuf {
    let path = dir.join("data.db");
    let mut file = File::create(&path).unwrap();
    file.write_all(b"RSDB").unwrap();
    let record_length = (NAME_LEN + ROOM_LEN) as u32 + RATE_LEN as u32;
    file.write_all(&encode_u32(record_length)).unwrap();
    file.write_all(&encode_u16(2)).unwrap();
    write_field(&mut file, "name", NAME_LEN + ROOM_LEN);
    write_field(&mut file, "rate", RATE_LEN);
    path
}

pub fn hotel_schema() -> LogicalSchema {
    LogicalSchema::new(vec![
        LogicalColumn { name: "name".into(), length: NAME_LEN, is_pk: true },
        LogicalColumn { name: "room".into(), length: ROOM_LEN, is_pk: true },
        LogicalColumn { name: "rate".into(), length: RATE_LEN, is_pk: false },
    ])
}

pub fn open_engine(dir: &Path) -> Engine {
    open_engine_with_config(dir, EngineConfig::default())
}

pub fn open_engine_with_config(dir: &Path, config: EngineConfig) -> Engine {
    let path = write_combined_fixture(dir);
    Engine::open(path, hotel_schema(), config).unwrap()
}

pub fn row(name: &str, room: &str, rate: &str) -> Row {
    vec![name.to_string(), room.to_string(), rate.to_string()]
}

pub fn test_create_then_read(engine: &Engine) -> Result<()> {
    let n = engine.create(row("Palace", "101", "199"))?;
    assert_eq!(engine.read(n)?, row("Palace", "101", "199"));
    Ok(())
}

pub fn test_create_rejects_duplicate_primary_key(engine: &Engine) -> Result<()> {
    engine.create(row("Palace", "101", "199"))?;
    let err = engine.create(row("Palace", "101", "250")).unwrap_err();
    assert!(matches!(err, EngineError::DuplicateKey(_)));
    Ok(())
}

pub fn test_lock_update_unlock_roundtrip(engine: &Engine) -> Result<()> {
    let n = engine.create(row("Palace", "101", "199"))?;
    let caller = CallerId::new(1);
    engine.lock(n, caller)?;
    engine.update(n, row("Palace", "101", "250"), caller)?;
    engine.unlock(n, caller)?;
    assert_eq!(engine.read(n)?, row("Palace", "101", "250"));
    Ok(())
}

pub fn test_delete_then_read_fails(engine: &Engine) -> Result<()> {
    let n = engine.create(row("Palace", "101", "199"))?;
    let caller = CallerId::new(1);
    engine.lock(n, caller)?;
    engine.delete(n, caller)?;
    engine.unlock(n, caller)?;
    assert!(matches!(engine.read(n), Err(EngineError::RecordNotFound(_))));
    Ok(())
}

pub fn test_update_rejects_primary_key_change(engine: &Engine) -> Result<()> {
    let n = engine.create(row("Palace", "101", "199"))?;
    let caller = CallerId::new(1);
    engine.lock(n, caller)?;
    engine.update(n, row("Palace", "102", "199"), caller)?;
    let err = engine.unlock(n, caller).unwrap_err();
    assert!(matches!(err, EngineError::TransactionError { .. }));
    Ok(())
}

pub fn test_find_matches_by_prefix(engine: &Engine) -> Result<()> {
    engine.create(row("Palace", "101", "199"))?;
    engine.create(row("Palace", "102", "250"))?;
    engine.create(row("Grand", "201", "300"))?;

    let exact = engine.find(&[Some("Palace".into()), Some("101".into()), None])?;
    assert_eq!(exact, vec![0]);

    let prefix_only = engine.find(&[Some("Pal".into()), None, None])?;
    assert_eq!(prefix_only.len(), 2);

    let prefix_with_room = engine.find(&[Some("Pal".into()), Some("101".into()), None])?;
    assert_eq!(prefix_with_room, vec![0]);
    Ok(())
}

pub fn test_find_with_no_matches_is_record_not_found(engine: &Engine) -> Result<()> {
    engine.create(row("Palace", "101", "199"))?;
    let err = engine.find(&[Some("Nonexistent".into()), None, None]).unwrap_err();
    assert!(matches!(err, EngineError::RecordNotFound(_)));
    Ok(())
}

pub fn test_unlocking_without_a_lock_is_a_transaction_error(engine: &Engine) -> Result<()> {
    let n = engine.create(row("Palace", "101", "199"))?;
    let err = engine.unlock(n, CallerId::new(1)).unwrap_err();
    assert!(matches!(err, EngineError::TransactionError { .. }));
    Ok(())
}

pub fn test_release_all_owned_by_drops_a_stale_lock(engine: &Engine) -> Result<()> {
    let n = engine.create(row("Palace", "101", "199"))?;
    let caller = CallerId::new(1);
    engine.lock(n, caller)?;
    assert!(engine.is_locked(n));
    engine.release_all_owned_by(caller);
    assert!(!engine.is_locked(n));
    Ok(())
}

pub fn test_create_reuses_a_deleted_slot(engine: &Engine) -> Result<()> {
    let n = engine.create(row("Palace", "101", "199"))?;
    let caller = CallerId::new(1);
    engine.lock(n, caller)?;
    engine.delete(n, caller)?;
    engine.unlock(n, caller)?;

    let reused = engine.create(row("Grand", "201", "300"))?;
    assert_eq!(reused, n);
    Ok(())
}
