//! The public storage engine: read, create, update, delete, find, lock, unlock and isLocked,
//! built on top of the physical file, the primary-key index and the lock manager.

use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::file::PhysicalFile;
use crate::lock::{CallerId, LockManager, Watchdog};
use crate::pkey::{PrimaryKey, PrimaryKeyIndex};
use crate::schema::{FieldSpec, LogicalSchema};
use crate::Row;

/// An open data file, ready to serve reads and row-level-locked writes.
///
/// Construction aligns the on-disk field layout with `logical_schema` (splitting a combined
/// physical field in memory where needed), scans the file once to seed the primary-key index,
/// and starts the deadlock watchdog. Dropping the engine stops the watchdog and closes the file.
pub struct Engine {
    file: PhysicalFile,
    logical_schema: LogicalSchema,
    index: PrimaryKeyIndex,
    locks: Arc<LockManager>,
    create_monitor: Mutex<()>,
    config: EngineConfig,
    _watchdog: Watchdog,
}

impl Engine {
    pub fn open(path: impl AsRef<Path>, logical_schema: LogicalSchema, config: EngineConfig) -> Result<Self> {
        crate::codec::validate_charset(config.charset)?;

        let file = PhysicalFile::open(path)?;
        debug!("data file opened");
        align_physical_layout(&file, &logical_schema)?;
        check_layout_matches_logical_schema(&file, &logical_schema)?;

        let index = PrimaryKeyIndex::build_from_scan(&file, &logical_schema, config.find_block_size)?;
        debug!("primary key index seeded from an initial file scan");

        let locks = Arc::new(LockManager::new(config.clone()));
        let watchdog = Watchdog::spawn(locks.clone(), config.lock_expiry, config.watchdog_tick());

        Ok(Self {
            file,
            logical_schema,
            index,
            locks,
            create_monitor: Mutex::new(()),
            config,
            _watchdog: watchdog,
        })
    }

    pub fn read(&self, n: u32) -> Result<Row> {
        self.file.get_record(n)?.ok_or_else(|| EngineError::RecordNotFound(format!("record {n}")))
    }

    /// Creates a new record. Fails with `DuplicateKey` if a live record already has this primary
    /// key, checked first against the index and, on a miss, by a confirming linear scan.
    pub fn create(&self, data: Row) -> Result<u32> {
        let _guard = self.create_monitor.lock();
        let pk = PrimaryKey::from_row(&data, &self.logical_schema);
        if self.lookup_pk(&pk)?.is_some() {
            return Err(EngineError::DuplicateKey(pk.into_values()));
        }
        let n = self.file.add(&data)?;
        self.index.insert(n, &data, &self.logical_schema);
        // A stray lock cell can exist for `n` if it belonged to a now-deleted record.
        self.locks.force_release(n);
        debug!("record {n} created");
        Ok(n)
    }

    pub fn lock(&self, n: u32, caller: CallerId) -> Result<()> {
        self.read(n)?;
        self.locks.lock(n, caller)
    }

    pub fn is_locked(&self, n: u32) -> bool {
        self.locks.is_locked(n)
    }

    pub fn update(&self, n: u32, data: Row, caller: CallerId) -> Result<()> {
        self.locks.stage_update(n, caller, data)
    }

    pub fn delete(&self, n: u32, caller: CallerId) -> Result<()> {
        self.locks.stage_delete(n, caller)
    }

    /// Commits whatever was staged on this lock (an update, a delete, or nothing) and releases
    /// it. The lock is released even if the commit itself fails.
    pub fn unlock(&self, n: u32, caller: CallerId) -> Result<()> {
        self.locks.commit_and_release(n, caller, |ctx| self.commit(n, ctx))
    }

    /// Releases every lock owned by `caller`, discarding any staged mutation. Intended for
    /// session teardown when a caller disconnects without unlocking cleanly.
    pub fn release_all_owned_by(&self, caller: CallerId) {
        self.locks.release_all_owned_by(caller);
    }

    /// Returns the record numbers of every live record whose columns match `criteria`: `None`
    /// matches anything, `Some(value)` matches by prefix after trimming both sides.
    ///
    /// If every primary-key column is given, the index is consulted first; a hit returns that
    /// single record directly. Otherwise (and on an index miss) this falls back to a linear
    /// scan, which also seeds the index with every match it sees along the way.
    pub fn find(&self, criteria: &[Option<String>]) -> Result<Vec<u32>> {
        if criteria.len() != self.logical_schema.column_count() {
            return Err(EngineError::format_error(format!(
                "find criteria has {} columns but the schema declares {}",
                criteria.len(),
                self.logical_schema.column_count()
            )));
        }

        let pk_indices = self.logical_schema.pk_column_indices();
        if !pk_indices.is_empty() && pk_indices.iter().all(|&i| criteria[i].is_some()) {
            let values = pk_indices.iter().map(|&i| criteria[i].clone().unwrap()).collect();
            let pk = PrimaryKey::new(values);
            if let Some(n) = self.index.lookup(&pk) {
                return Ok(vec![n]);
            }
        }

        let mut matches = Vec::new();
        let mut from = 0u32;
        loop {
            let block = match self.file.get_block(from, self.config.find_block_size)? {
                Some(block) => block,
                None => break,
            };
            let len = block.entries.len() as u32;
            for (n, deleted, row) in &block.entries {
                if *deleted {
                    continue;
                }
                let Some(row) = row else { continue };
                if row_matches(row, criteria) {
                    matches.push(*n);
                    self.index.insert(*n, row, &self.logical_schema);
                }
            }
            if len < self.config.find_block_size {
                break;
            }
            from += len;
        }

        if matches.is_empty() {
            Err(EngineError::RecordNotFound("no record matches the given criteria".to_string()))
        } else {
            Ok(matches)
        }
    }

    fn lookup_pk(&self, pk: &PrimaryKey) -> Result<Option<u32>> {
        if let Some(n) = self.index.lookup(pk) {
            return Ok(Some(n));
        }
        self.linear_find_pk(pk)
    }

    fn linear_find_pk(&self, pk: &PrimaryKey) -> Result<Option<u32>> {
        let mut from = 0u32;
        loop {
            let block = match self.file.get_block(from, self.config.find_block_size)? {
                Some(block) => block,
                None => return Ok(None),
            };
            let len = block.entries.len() as u32;
            for (n, deleted, row) in &block.entries {
                if *deleted {
                    continue;
                }
                let Some(row) = row else { continue };
                if &PrimaryKey::from_row(row, &self.logical_schema) == pk {
                    return Ok(Some(*n));
                }
            }
            if len < self.config.find_block_size {
                return Ok(None);
            }
            from += len;
        }
    }

    fn commit(&self, n: u32, ctx: Option<crate::txn::TransactionContext>) -> Result<()> {
        let ctx = match ctx {
            Some(ctx) => ctx,
            None => return Ok(()),
        };

        if ctx.is_deleted() {
            let pre = self.read(n)?;
            self.file.delete(n)?;
            self.index.remove(&pre, &self.logical_schema);
            debug!("record {n} deleted");
            return Ok(());
        }

        if let Some(pending) = ctx.pending() {
            let pre = self.read(n)?;
            let pre_pk = PrimaryKey::from_row(&pre, &self.logical_schema);
            let new_pk = PrimaryKey::from_row(pending, &self.logical_schema);
            if pre_pk != new_pk {
                return Err(EngineError::transaction_error(n, "update must not change the primary key"));
            }
            self.file.update(n, pending)?;
            debug!("record {n} updated");
        }
        Ok(())
    }
}

fn row_matches(row: &Row, criteria: &[Option<String>]) -> bool {
    row.iter().zip(criteria.iter()).all(|(value, criterion)| match criterion {
        None => true,
        Some(expected) => value.trim().starts_with(expected.trim()),
    })
}

/// Detects adjacent logical PK columns that are stored as a single combined physical field (the
/// second column absent, the first column's on-disk width equal to their combined width) and
/// splits that field in memory so the two line up with the logical schema. A no-op if the file
/// already has both columns.
fn align_physical_layout(file: &PhysicalFile, logical: &LogicalSchema) -> Result<()> {
    let columns = logical.columns();
    for i in 0..columns.len().saturating_sub(1) {
        let (first, second) = (&columns[i], &columns[i + 1]);
        if file.is_field_present(&second.name) || !file.is_field_present(&first.name) {
            continue;
        }
        let idx = file.index_of(&first.name)?;
        let existing_length = file.field_length(idx)?;
        if existing_length as u32 == first.length as u32 + second.length as u32 {
            file.split_field(
                idx,
                &[
                    FieldSpec { name: first.name.clone(), length: first.length },
                    FieldSpec { name: second.name.clone(), length: second.length },
                ],
            )?;
            debug!("split on-disk field {:?} into {:?} and {:?}", first.name, first.name, second.name);
        }
    }
    Ok(())
}

/// Confirms that, after alignment, the physical file's fields line up 1:1 with the logical
/// schema's columns by name, order, and length. Without this, a mismatch (e.g. a combined field
/// whose width doesn't match the sum `align_physical_layout` expected, so no split happened)
/// would only surface later as a short, wrongly-sliced `Row` rather than a fatal error at open.
fn check_layout_matches_logical_schema(file: &PhysicalFile, logical: &LogicalSchema) -> Result<()> {
    let columns = logical.columns();
    if file.field_count() != columns.len() {
        return Err(EngineError::format_error(format!(
            "on-disk schema has {} fields but the logical schema declares {}",
            file.field_count(),
            columns.len()
        )));
    }
    for (i, column) in columns.iter().enumerate() {
        let field_name = file.field_name(i).expect("index within bounds, just checked field_count");
        if field_name != column.name {
            return Err(EngineError::format_error(format!(
                "on-disk field {i} is {field_name:?} but the logical schema expects {:?} there",
                column.name
            )));
        }
        let field_length = file.field_length(i)?;
        if field_length != column.length {
            return Err(EngineError::format_error(format!(
                "on-disk field {field_name:?} is {field_length} bytes but the logical schema expects {}",
                column.length
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::LogicalColumn;
    use std::fs::File;
    use std::io::Write;

    fn write_fixture(dir: &tempfile::TempDir, fields: &[(&str, u16)]) -> std::path::PathBuf {
        let path = dir.path().join("data.db");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"TEST").unwrap();
        let record_length: u32 = fields.iter().map(|(_, l)| *l as u32).sum();
        file.write_all(&crate::codec::encode_u32(record_length)).unwrap();
        file.write_all(&crate::codec::encode_u16(fields.len() as u16)).unwrap();
        for (name, length) in fields {
            file.write_all(&crate::codec::encode_u16(name.len() as u16)).unwrap();
            file.write_all(name.as_bytes()).unwrap();
            file.write_all(&crate::codec::encode_u16(*length)).unwrap();
        }
        path
    }

    fn hotel_schema() -> LogicalSchema {
        LogicalSchema::new(vec![
            LogicalColumn { name: "name".into(), length: 56, is_pk: true },
            LogicalColumn { name: "room".into(), length: 8, is_pk: true },
            LogicalColumn { name: "rate".into(), length: 8, is_pk: false },
        ])
    }

    #[test]
    fn open_splits_a_combined_field_to_match_the_logical_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, &[("name", 64), ("rate", 8)]);
        let engine = Engine::open(&path, hotel_schema(), EngineConfig::default()).unwrap();
        let n = engine.create(vec!["Palace".into(), "101".into(), "199".into()]).unwrap();
        assert_eq!(engine.read(n).unwrap(), vec!["Palace".to_string(), "101".to_string(), "199".to_string()]);
    }

    #[test]
    fn open_fails_fatally_when_the_on_disk_layout_cannot_be_aligned() {
        let dir = tempfile::tempdir().unwrap();
        // "name" is 60 bytes on disk, not 56+8=64, so align_physical_layout has nothing to split
        // and the file is left with 2 fields against the logical schema's 3 columns.
        let path = write_fixture(&dir, &[("name", 60), ("rate", 8)]);
        let err = Engine::open(&path, hotel_schema(), EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::FormatError { .. }));
    }

    #[test]
    fn open_fails_fatally_when_a_field_name_does_not_match() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir, &[("name", 56), ("suite", 8), ("rate", 8)]);
        let err = Engine::open(&path, hotel_schema(), EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::FormatError { .. }));
    }
}
