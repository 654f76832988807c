//! The primary-key index: a `HashMap` from primary key to record number, kept as an
//! accelerator over the data file rather than a source of truth.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::Result;
use crate::file::PhysicalFile;
use crate::schema::LogicalSchema;
use crate::Row;

/// A primary key value: the trimmed values of a row's PK columns, in column order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PrimaryKey(Vec<String>);

impl PrimaryKey {
    pub fn new(values: Vec<String>) -> Self {
        Self(values.into_iter().map(|v| v.trim().to_string()).collect())
    }

    pub fn from_row(row: &Row, schema: &LogicalSchema) -> Self {
        let values = schema.pk_column_indices().into_iter().map(|i| row[i].trim().to_string()).collect();
        Self(values)
    }

    pub fn into_values(self) -> Vec<String> {
        self.0
    }
}

/// First-write-wins index over primary keys. A linear scan (in [`crate::engine::Engine`])
/// backstops every lookup that misses here, so the index never needs to be exhaustively correct
/// ahead of time — only rebuilt opportunistically as records are seen.
pub struct PrimaryKeyIndex {
    map: RwLock<HashMap<PrimaryKey, u32>>,
}

impl PrimaryKeyIndex {
    pub fn new() -> Self {
        Self { map: RwLock::new(HashMap::new()) }
    }

    /// Scans the whole file once, in blocks, populating the index with every live record found.
    pub fn build_from_scan(file: &PhysicalFile, schema: &LogicalSchema, block_size: u32) -> Result<Self> {
        let index = Self::new();
        let mut from = 0u32;
        loop {
            let block = match file.get_block(from, block_size)? {
                Some(block) => block,
                None => break,
            };
            let len = block.entries.len() as u32;
            for (n, deleted, row) in &block.entries {
                if *deleted {
                    continue;
                }
                if let Some(row) = row {
                    index.insert(*n, row, schema);
                }
            }
            if len < block_size {
                break;
            }
            from += len;
        }
        Ok(index)
    }

    /// Inserts `n` under `row`'s primary key, but only if no record currently occupies that key
    /// (first-write-wins — a later scan must never clobber an already-indexed slot).
    pub fn insert(&self, n: u32, row: &Row, schema: &LogicalSchema) {
        let pk = PrimaryKey::from_row(row, schema);
        self.map.write().entry(pk).or_insert(n);
    }

    /// Removes the entry for `row`'s primary key, if present.
    pub fn remove(&self, row: &Row, schema: &LogicalSchema) {
        let pk = PrimaryKey::from_row(row, schema);
        self.map.write().remove(&pk);
    }

    pub fn lookup(&self, pk: &PrimaryKey) -> Option<u32> {
        self.map.read().get(pk).copied()
    }
}

impl Default for PrimaryKeyIndex {
    fn default() -> Self {
        Self::new()
    }
}
