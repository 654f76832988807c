//! On-disk field layout (`FileSchema`) and the logical column view the engine exposes to callers
//! (`LogicalSchema`).

use crate::codec;
use crate::error::{EngineError, Result};
use crate::Row;

/// One physical field: a name and a fixed byte width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub length: u16,
}

/// The field layout as it is actually written to disk, read from the file header at open time.
///
/// `split_field` exists because a single on-disk field is sometimes two logical columns glued
/// together (see [`crate::engine::Engine::open`]); the split only ever happens in memory, never
/// on disk.
#[derive(Clone, Debug)]
pub struct FileSchema {
    fields: Vec<FieldSpec>,
}

impl FileSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_length(&self, i: usize) -> Result<u16> {
        self.fields
            .get(i)
            .map(|f| f.length)
            .ok_or_else(|| EngineError::format_error(format!("no field at index {i}")))
    }

    pub fn field_name(&self, i: usize) -> Option<String> {
        self.fields.get(i).map(|f| f.name.clone())
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| EngineError::format_error(format!("field {name:?} does not exist")))
    }

    pub fn is_field_present(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Sum of the lengths of every field before index `i` — the byte offset of field `i` within
    /// an encoded row.
    pub fn cumulative_length_before(&self, i: usize) -> Result<u32> {
        if i > self.fields.len() {
            return Err(EngineError::format_error(format!("no field at index {i}")));
        }
        Ok(self.fields[..i].iter().map(|f| f.length as u32).sum())
    }

    pub fn total_length(&self) -> u32 {
        self.fields.iter().map(|f| f.length as u32).sum()
    }

    /// Replaces field `i` with `new_fields`. The replacement fields' lengths must sum to the
    /// original field's length; nothing else about the file changes.
    pub fn split_field(&mut self, i: usize, new_fields: &[FieldSpec]) -> Result<()> {
        let existing_length = self.field_length(i)?;
        let total: u32 = new_fields.iter().map(|f| f.length as u32).sum();
        if total != existing_length as u32 {
            return Err(EngineError::format_error(format!(
                "split fields sum to {total} bytes but the original field is {existing_length} bytes"
            )));
        }
        self.fields.splice(i..=i, new_fields.iter().cloned());
        Ok(())
    }

    pub(crate) fn encode_row(&self, row: &[String]) -> Result<Vec<u8>> {
        if row.len() != self.fields.len() {
            return Err(EngineError::format_error(format!(
                "row has {} columns but the schema declares {}",
                row.len(),
                self.fields.len()
            )));
        }
        let mut buf = Vec::with_capacity(self.total_length() as usize);
        for (field, value) in self.fields.iter().zip(row.iter()) {
            buf.extend(codec::encode_ascii_field(value, field.length as usize)?);
        }
        Ok(buf)
    }

    pub(crate) fn decode_row(&self, buf: &[u8]) -> Result<Row> {
        let mut row = Vec::with_capacity(self.fields.len());
        for (i, field) in self.fields.iter().enumerate() {
            let offset = self.cumulative_length_before(i)? as usize;
            row.push(codec::decode_ascii_field(buf, offset, field.length as usize)?);
        }
        Ok(row)
    }
}

/// One logical column: a name, a byte width, and whether it participates in the primary key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogicalColumn {
    pub name: String,
    pub length: u16,
    pub is_pk: bool,
}

/// The column set the engine presents to callers. A `Row` is a `Vec<String>` positioned
/// according to this schema, one entry per column in declaration order.
#[derive(Clone, Debug)]
pub struct LogicalSchema {
    columns: Vec<LogicalColumn>,
}

impl LogicalSchema {
    pub fn new(columns: Vec<LogicalColumn>) -> Self {
        Self { columns }
    }

    pub fn pk_column_indices(&self) -> Vec<usize> {
        self.columns.iter().enumerate().filter(|(_, c)| c.is_pk).map(|(i, _)| i).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_length(&self, name: &str) -> Option<u16> {
        self.columns.iter().find(|c| c.name == name).map(|c| c.length)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[LogicalColumn] {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, u16)]) -> Vec<FieldSpec> {
        pairs.iter().map(|(name, length)| FieldSpec { name: name.to_string(), length: *length }).collect()
    }

    #[test]
    fn split_field_preserves_total_length() {
        let mut schema = FileSchema::new(fields(&[("name", 64), ("owner", 8)]));
        schema
            .split_field(0, &fields(&[("name", 56), ("room", 8)]))
            .unwrap();
        assert_eq!(schema.total_length(), 72);
        assert_eq!(schema.field_count(), 3);
        assert!(schema.is_field_present("room"));
    }

    #[test]
    fn split_field_rejects_length_mismatch() {
        let mut schema = FileSchema::new(fields(&[("name", 64)]));
        let err = schema.split_field(0, &fields(&[("name", 56), ("room", 4)])).unwrap_err();
        assert!(matches!(err, EngineError::FormatError { .. }));
    }

    #[test]
    fn cumulative_length_before_sums_preceding_fields() {
        let schema = FileSchema::new(fields(&[("name", 56), ("room", 8), ("rate", 8)]));
        assert_eq!(schema.cumulative_length_before(0).unwrap(), 0);
        assert_eq!(schema.cumulative_length_before(1).unwrap(), 56);
        assert_eq!(schema.cumulative_length_before(2).unwrap(), 64);
        assert_eq!(schema.cumulative_length_before(3).unwrap(), 72);
        assert!(schema.cumulative_length_before(4).is_err());
    }

    #[test]
    fn encode_decode_row_roundtrip() {
        let schema = FileSchema::new(fields(&[("name", 10), ("room", 4)]));
        let row = vec!["Palace".to_string(), "101".to_string()];
        let encoded = schema.encode_row(&row).unwrap();
        let decoded = schema.decode_row(&encoded).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn pk_column_indices_filters_by_flag() {
        let schema = LogicalSchema::new(vec![
            LogicalColumn { name: "name".into(), length: 56, is_pk: true },
            LogicalColumn { name: "room".into(), length: 8, is_pk: true },
            LogicalColumn { name: "rate".into(), length: 8, is_pk: false },
        ]);
        assert_eq!(schema.pk_column_indices(), vec![0, 1]);
        assert_eq!(schema.column_count(), 3);
    }
}
