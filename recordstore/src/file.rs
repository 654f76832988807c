//! The physical data file: a fixed header followed by fixed-width slots, each one deletion-flag
//! byte plus the encoded row. All access goes through a single mutex, matching the file's single
//! shared handle.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::error::{EngineError, Result};
use crate::schema::{FieldSpec, FileSchema};
use crate::Row;

struct FileInner {
    file: File,
    magic: [u8; 4],
    schema: FileSchema,
    data_offset: u64,
    record_length: u32,
}

/// A fixed-width, randomly-accessed data file: deleted slots are reused by `add`, and every
/// mutation is fsync'd before returning.
pub struct PhysicalFile {
    inner: Mutex<FileInner>,
}

fn read_exact_or_truncated(file: &mut File, buf: &mut [u8], what: &str) -> Result<()> {
    match file.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(EngineError::format_error(format!("data file is truncated while reading {what}")))
        }
        Err(e) => Err(EngineError::from(e)),
    }
}

impl PhysicalFile {
    /// Opens an existing data file and parses its header: a 4-byte magic, a big-endian u32 record
    /// length, a big-endian u16 field count, then that many `(u16 name length, name, u16 field
    /// length)` triples.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut magic = [0u8; 4];
        read_exact_or_truncated(&mut file, &mut magic, "the file magic")?;

        let mut u32_buf = [0u8; 4];
        read_exact_or_truncated(&mut file, &mut u32_buf, "the record length")?;
        let record_length = crate::codec::decode_u32(&u32_buf);

        let mut u16_buf = [0u8; 2];
        read_exact_or_truncated(&mut file, &mut u16_buf, "the field count")?;
        let field_count = crate::codec::decode_u16(&u16_buf) as usize;

        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            read_exact_or_truncated(&mut file, &mut u16_buf, "a field name length")?;
            let name_len = crate::codec::decode_u16(&u16_buf) as usize;
            let mut name_buf = vec![0u8; name_len];
            read_exact_or_truncated(&mut file, &mut name_buf, "a field name")?;
            let name = String::from_utf8(name_buf)
                .map_err(|_| EngineError::format_error("a field name is not valid UTF-8"))?;
            read_exact_or_truncated(&mut file, &mut u16_buf, "a field length")?;
            let length = crate::codec::decode_u16(&u16_buf);
            fields.push(FieldSpec { name, length });
        }

        let schema = FileSchema::new(fields);
        if schema.total_length() != record_length {
            return Err(EngineError::format_error(format!(
                "header record length {} does not match the schema's total field width {}",
                record_length,
                schema.total_length()
            )));
        }

        let data_offset = file.stream_position()?;
        Ok(Self { inner: Mutex::new(FileInner { file, magic, schema, data_offset, record_length }) })
    }

    pub fn magic(&self) -> [u8; 4] {
        self.inner.lock().magic
    }

    pub fn is_field_present(&self, name: &str) -> bool {
        self.inner.lock().schema.is_field_present(name)
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.inner.lock().schema.index_of(name)
    }

    pub fn field_length(&self, i: usize) -> Result<u16> {
        self.inner.lock().schema.field_length(i)
    }

    pub fn split_field(&self, i: usize, new_fields: &[FieldSpec]) -> Result<()> {
        self.inner.lock().schema.split_field(i, new_fields)
    }

    pub fn field_count(&self) -> usize {
        self.inner.lock().schema.field_count()
    }

    pub fn field_name(&self, i: usize) -> Option<String> {
        self.inner.lock().schema.field_name(i)
    }

    fn slot_size(record_length: u32) -> u64 {
        1 + record_length as u64
    }

    /// Reads record `n`. Returns `Ok(None)` if `n` is past the end of the file or its deletion
    /// flag is set.
    pub fn get_record(&self, n: u32) -> Result<Option<Row>> {
        let mut inner = self.inner.lock();
        let slot_size = Self::slot_size(inner.record_length);
        let offset = inner.data_offset + n as u64 * slot_size;
        let file_len = inner.file.metadata()?.len();
        if offset + slot_size > file_len {
            return Ok(None);
        }
        inner.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; slot_size as usize];
        inner.file.read_exact(&mut buf)?;
        if buf[0] != 0 {
            return Ok(None);
        }
        let row = inner.schema.decode_row(&buf[1..])?;
        Ok(Some(row))
    }

    /// Reads up to `count` consecutive slots starting at `from`. Returns `Ok(None)` only when
    /// `from` is already past the end of the file; a short final block is returned in full.
    pub fn get_block(&self, from: u32, count: u32) -> Result<Option<RecordBlock>> {
        let mut inner = self.inner.lock();
        let slot_size = Self::slot_size(inner.record_length);
        let offset = inner.data_offset + from as u64 * slot_size;
        let file_len = inner.file.metadata()?.len();
        if offset >= file_len {
            return Ok(None);
        }
        let remaining = file_len - offset;
        let want = count as u64 * slot_size;
        let to_read = remaining.min(want);
        if to_read % slot_size != 0 {
            return Err(EngineError::format_error("data file ends in the middle of a slot"));
        }

        inner.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; to_read as usize];
        inner.file.read_exact(&mut buf)?;

        let mut entries = Vec::with_capacity((to_read / slot_size) as usize);
        for (i, chunk) in buf.chunks(slot_size as usize).enumerate() {
            let n = from + i as u32;
            let deleted = chunk[0] != 0;
            let row = if deleted {
                inner.schema.decode_row(&chunk[1..]).ok()
            } else {
                Some(inner.schema.decode_row(&chunk[1..])?)
            };
            entries.push((n, deleted, row));
        }
        Ok(Some(RecordBlock { from, entries }))
    }

    /// Writes `row` into the first deleted slot found by a forward scan, or appends a new slot if
    /// none is free. Returns the record number it was written at.
    pub fn add(&self, row: &Row) -> Result<u32> {
        let mut inner = self.inner.lock();
        let slot_size = Self::slot_size(inner.record_length);
        let file_len = inner.file.metadata()?.len();
        let slot_count = (file_len - inner.data_offset) / slot_size;

        let mut target = None;
        for n in 0..slot_count {
            let offset = inner.data_offset + n * slot_size;
            inner.file.seek(SeekFrom::Start(offset))?;
            let mut flag = [0u8; 1];
            inner.file.read_exact(&mut flag)?;
            if flag[0] != 0 {
                target = Some(n);
                break;
            }
        }
        let n = target.unwrap_or(slot_count);

        let encoded = inner.schema.encode_row(row)?;
        let mut buf = vec![0u8; slot_size as usize];
        buf[0] = 0;
        buf[1..].copy_from_slice(&encoded);

        let offset = inner.data_offset + n * slot_size;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&buf)?;
        inner.file.flush()?;
        Ok(n as u32)
    }

    /// Overwrites record `n` in place, clearing its deletion flag.
    pub fn update(&self, n: u32, row: &Row) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot_size = Self::slot_size(inner.record_length);
        let encoded = inner.schema.encode_row(row)?;
        let mut buf = vec![0u8; slot_size as usize];
        buf[0] = 0;
        buf[1..].copy_from_slice(&encoded);

        let offset = inner.data_offset + n as u64 * slot_size;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&buf)?;
        inner.file.flush()?;
        Ok(())
    }

    /// Sets record `n`'s deletion flag, leaving the row bytes behind it untouched so the row can
    /// still be read back by anyone holding a stale block.
    pub fn delete(&self, n: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot_size = Self::slot_size(inner.record_length);
        let offset = inner.data_offset + n as u64 * slot_size;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&[1u8])?;
        inner.file.flush()?;
        Ok(())
    }
}

/// A contiguous run of slots read from the file, decoded eagerly. Entries are
/// `(record_number, deleted, row)`; `row` is `None` only for a deleted slot whose leftover bytes
/// failed to decode.
pub struct RecordBlock {
    pub from: u32,
    pub entries: Vec<(u32, bool, Option<Row>)>,
}

impl RecordBlock {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
