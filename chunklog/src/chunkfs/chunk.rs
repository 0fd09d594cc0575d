//! On-disk chunk format.
//!
//! A chunk is a single preallocated file:
//!
//! ```text
//! | magic "CHNK" (4) | version u32 BE (4) | record | record | ... | zero fill |
//!
//! record := | id u128 BE (16) | len u32 BE (4) | payload (len) |
//! ```
//!
//! The unused tail of the file is zero, so a record header with a zero ID
//! marks the end of data. Files start at `new_size` bytes and are extended in
//! `max_grow_increase_size` steps up to `max_chunk_size`.
//!
//! The record index is rebuilt when the file is opened and kept in memory.
//! Callers coordinate through [`ChunkAccessor`](super::ChunkAccessor), so a
//! chunk never sees an append concurrently with a reader.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::{BufMut, Bytes, BytesMut};
use ulid::Ulid;

use super::HEADER_SIZE;
use crate::config::ChunkConfig;
use crate::error::{Error, Result};
use crate::id::IdMinter;
use crate::model::Id;

const MAGIC: &[u8; 4] = b"CHNK";
const VERSION: u32 = 1;
const RECORD_HEADER_SIZE: u64 = 16 + 4;

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    id: Id,
    /// Offset of the payload within the file.
    offset: u64,
    len: u32,
}

#[derive(Debug)]
struct ChunkIndex {
    entries: Vec<IndexEntry>,
    /// Offset where the next record header goes.
    end: u64,
    /// Current file length.
    capacity: u64,
}

/// Result of [`Chunk::append`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Number of leading payloads that were written.
    pub written: usize,
    /// IDs assigned to the written payloads, in order.
    pub ids: Vec<Id>,
}

impl AppendOutcome {
    pub fn first_id(&self) -> Option<Id> {
        self.ids.first().copied()
    }

    pub fn last_id(&self) -> Option<Id> {
        self.ids.last().copied()
    }
}

/// A record as stored in a chunk, before it is attributed to a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub id: Id,
    pub payload: Bytes,
}

/// An open chunk file.
#[derive(Debug)]
pub struct Chunk {
    id: Id,
    path: PathBuf,
    file: File,
    config: ChunkConfig,
    index: RwLock<ChunkIndex>,
}

impl Chunk {
    /// Opens the chunk stored at `path`, creating an empty one when the file
    /// does not exist and `create` is set.
    pub fn open(path: &Path, id: Id, config: &ChunkConfig, create: bool) -> Result<Self> {
        if !path.exists() {
            if !create {
                return Err(Error::NotExist(format!("chunk {id} not found")));
            }
            return Self::create(path, id, config);
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let index = load_index(&file, id)?;
        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
            config: config.clone(),
            index: RwLock::new(index),
        })
    }

    fn create(path: &Path, id: Id, config: &ChunkConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(config.new_size)?;
        let mut header = BytesMut::with_capacity(HEADER_SIZE as usize);
        header.put_slice(MAGIC);
        header.put_u32(VERSION);
        file.write_all_at(&header, 0)?;
        file.sync_data()?;
        tracing::debug!(chunk = %id, path = %path.display(), "created chunk file");
        Ok(Self {
            id,
            path: path.to_path_buf(),
            file,
            config: config.clone(),
            index: RwLock::new(ChunkIndex {
                entries: Vec::new(),
                end: HEADER_SIZE,
                capacity: config.new_size,
            }),
        })
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_count(&self) -> usize {
        self.read_index().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records_count() == 0
    }

    /// Bytes used by the header and the stored records.
    pub fn size(&self) -> u64 {
        self.read_index().end
    }

    /// Writes the longest prefix of `payloads` that fits into the chunk,
    /// minting an ID for each written record.
    ///
    /// The data is synced before the index is updated, so the returned IDs
    /// are durable.
    #[tracing::instrument(level = "trace", skip_all, fields(chunk = %self.id))]
    pub fn append(&self, payloads: &[Bytes], minter: &IdMinter) -> Result<AppendOutcome> {
        let mut index = self.write_index();
        let mut end = index.end;
        let mut buf = BytesMut::new();
        let mut written = Vec::new();
        for payload in payloads {
            let needed = RECORD_HEADER_SIZE + payload.len() as u64;
            if end + needed > self.config.max_chunk_size || payload.len() > u32::MAX as usize {
                break;
            }
            let id = minter.next();
            buf.put_u128(id.0);
            buf.put_u32(payload.len() as u32);
            buf.put_slice(payload);
            written.push(IndexEntry {
                id,
                offset: end + RECORD_HEADER_SIZE,
                len: payload.len() as u32,
            });
            end += needed;
        }
        if written.is_empty() {
            return Ok(AppendOutcome::default());
        }

        self.ensure_capacity(&mut index, end)?;
        if let Err(err) = self.file.write_all_at(&buf, index.end) {
            // leave a zero header so a reopen does not pick up a torn record
            if let Err(reset) = self
                .file
                .write_all_at(&[0u8; RECORD_HEADER_SIZE as usize], index.end)
            {
                tracing::warn!(chunk = %self.id, error = %reset, "could not reset record header after failed write");
            }
            return Err(err.into());
        }
        self.file.sync_data()?;

        let ids: Vec<Id> = written.iter().map(|e| e.id).collect();
        index.entries.extend(written);
        index.end = end;
        Ok(AppendOutcome {
            written: ids.len(),
            ids,
        })
    }

    fn ensure_capacity(&self, index: &mut ChunkIndex, required: u64) -> Result<()> {
        if required <= index.capacity {
            return Ok(());
        }
        let mut capacity = index.capacity;
        while capacity < required {
            capacity = (capacity + self.config.max_grow_increase_size).min(self.config.max_chunk_size);
        }
        self.file.set_len(capacity)?;
        tracing::trace!(chunk = %self.id, from = index.capacity, to = capacity, "grew chunk file");
        index.capacity = capacity;
        Ok(())
    }

    /// Opens a cursor over the records in ascending or descending ID order.
    pub fn reader(&self, descending: bool) -> ChunkReader<'_> {
        let len = self.read_index().entries.len();
        ChunkReader {
            chunk: self,
            lo: 0,
            hi: len,
            descending,
        }
    }

    fn read_payload(&self, entry: &IndexEntry) -> Result<Bytes> {
        let mut buf = vec![0u8; entry.len as usize];
        self.file.read_exact_at(&mut buf, entry.offset)?;
        Ok(Bytes::from(buf))
    }

    fn read_index(&self) -> RwLockReadGuard<'_, ChunkIndex> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, ChunkIndex> {
        self.index.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn load_index(file: &File, id: Id) -> Result<ChunkIndex> {
    let capacity = file.metadata()?.len();
    if capacity < HEADER_SIZE {
        return Err(Error::Corruption(format!("chunk {id} is truncated")));
    }
    let mut header = [0u8; HEADER_SIZE as usize];
    file.read_exact_at(&mut header, 0)?;
    if &header[..4] != MAGIC {
        return Err(Error::Corruption(format!("chunk {id} has a bad magic")));
    }
    let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if version != VERSION {
        return Err(Error::Corruption(format!(
            "chunk {id} has unsupported version {version}"
        )));
    }

    let mut entries = Vec::new();
    let mut end = HEADER_SIZE;
    let mut rec_header = [0u8; RECORD_HEADER_SIZE as usize];
    while end + RECORD_HEADER_SIZE <= capacity {
        file.read_exact_at(&mut rec_header, end)?;
        let mut raw_id = [0u8; 16];
        raw_id.copy_from_slice(&rec_header[..16]);
        let record_id = u128::from_be_bytes(raw_id);
        if record_id == 0 {
            break;
        }
        let len = u32::from_be_bytes([rec_header[16], rec_header[17], rec_header[18], rec_header[19]]);
        let offset = end + RECORD_HEADER_SIZE;
        if offset + len as u64 > capacity {
            return Err(Error::Corruption(format!(
                "chunk {id} record at offset {end} overruns the file"
            )));
        }
        entries.push(IndexEntry {
            id: Ulid(record_id),
            offset,
            len,
        });
        end = offset + len as u64;
    }
    Ok(ChunkIndex {
        entries,
        end,
        capacity,
    })
}

/// Cursor over the records of a chunk.
///
/// The cursor covers the records present when it was opened. Every payload
/// it returns is a fresh copy read from the file.
pub struct ChunkReader<'a> {
    chunk: &'a Chunk,
    /// Remaining window of index positions, `[lo, hi)`.
    lo: usize,
    hi: usize,
    descending: bool,
}

impl ChunkReader<'_> {
    /// Positions the cursor on `id`, inclusively: ascending cursors skip
    /// records below `id`, descending cursors skip records above it.
    pub fn set_start_id(&mut self, id: Id) {
        let index = self.chunk.read_index();
        let entries = &index.entries[..self.hi.min(index.entries.len())];
        if self.descending {
            self.hi = entries.partition_point(|e| e.id <= id).max(self.lo);
        } else {
            self.lo = entries.partition_point(|e| e.id < id).min(self.hi);
        }
    }

    pub fn has_next(&self) -> bool {
        self.lo < self.hi
    }

    /// Number of records left.
    pub fn remaining(&self) -> usize {
        self.hi - self.lo
    }

    /// ID of the record [`next`](Iterator::next) would return.
    pub fn peek_id(&self) -> Option<Id> {
        self.peek_entry().map(|e| e.id)
    }

    /// Payload length of the record [`next`](Iterator::next) would return.
    pub fn peek_len(&self) -> Option<usize> {
        self.peek_entry().map(|e| e.len as usize)
    }

    /// Moves past the next record without reading its payload.
    pub fn skip_one(&mut self) {
        if self.has_next() {
            self.advance();
        }
    }

    fn peek_entry(&self) -> Option<IndexEntry> {
        if !self.has_next() {
            return None;
        }
        let pos = if self.descending { self.hi - 1 } else { self.lo };
        self.chunk.read_index().entries.get(pos).copied()
    }

    fn advance(&mut self) {
        if self.descending {
            self.hi -= 1;
        } else {
            self.lo += 1;
        }
    }
}

impl Iterator for ChunkReader<'_> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.peek_entry()?;
        self.advance();
        Some(
            self.chunk
                .read_payload(&entry)
                .map(|payload| RawRecord {
                    id: entry.id,
                    payload,
                }),
        )
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn config(new_size: u64, max: u64, grow: u64) -> ChunkConfig {
        ChunkConfig {
            new_size,
            max_chunk_size: max,
            max_grow_increase_size: grow,
        }
    }

    fn payloads(n: usize, size: usize) -> Vec<Bytes> {
        (0..n).map(|i| Bytes::from(vec![i as u8; size])).collect()
    }

    #[test]
    fn should_append_and_read_back_in_both_directions() {
        // given
        let dir = TempDir::new().unwrap();
        let minter = IdMinter::default();
        let chunk = Chunk::open(
            &dir.path().join("c"),
            minter.next(),
            &config(4096, 65536, 4096),
            true,
        )
        .unwrap();

        // when
        let outcome = chunk.append(&payloads(10, 100), &minter).unwrap();

        // then
        assert_eq!(outcome.written, 10);
        let asc: Vec<RawRecord> = chunk.reader(false).map(|r| r.unwrap()).collect();
        let mut desc: Vec<RawRecord> = chunk.reader(true).map(|r| r.unwrap()).collect();
        desc.reverse();
        assert_eq!(asc, desc);
        assert_eq!(asc.iter().map(|r| r.id).collect::<Vec<_>>(), outcome.ids);
        assert_eq!(asc[3].payload, Bytes::from(vec![3u8; 100]));
    }

    #[test]
    fn should_write_only_the_prefix_that_fits() {
        // given
        let dir = TempDir::new().unwrap();
        let minter = IdMinter::default();
        let chunk = Chunk::open(
            &dir.path().join("c"),
            minter.next(),
            &config(4096, 8192, 4096),
            true,
        )
        .unwrap();

        // when
        let first = chunk.append(&payloads(3, 4096), &minter).unwrap();
        let second = chunk.append(&payloads(1, 4096), &minter).unwrap();

        // then
        assert_eq!(first.written, 1);
        assert_eq!(second.written, 0);
        assert_eq!(chunk.records_count(), 1);
        assert_eq!(std::fs::metadata(chunk.path()).unwrap().len(), 8192);
    }

    #[test]
    fn should_refuse_record_larger_than_empty_chunk() {
        // given
        let dir = TempDir::new().unwrap();
        let minter = IdMinter::default();
        let chunk = Chunk::open(
            &dir.path().join("c"),
            minter.next(),
            &config(4096, 8192, 4096),
            true,
        )
        .unwrap();

        // when
        let outcome = chunk.append(&payloads(1, 8192), &minter).unwrap();

        // then
        assert_eq!(outcome.written, 0);
        assert!(chunk.is_empty());
    }

    #[test]
    fn should_rebuild_index_on_reopen() {
        // given
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c");
        let minter = IdMinter::default();
        let id = minter.next();
        let cfg = config(4096, 65536, 4096);
        let ids = {
            let chunk = Chunk::open(&path, id, &cfg, true).unwrap();
            chunk.append(&payloads(50, 200), &minter).unwrap().ids
        };

        // when
        let chunk = Chunk::open(&path, id, &cfg, false).unwrap();

        // then
        let read: Vec<Id> = chunk.reader(false).map(|r| r.unwrap().id).collect();
        assert_eq!(read, ids);
    }

    #[test]
    fn should_fail_to_open_missing_chunk_without_create() {
        // given
        let dir = TempDir::new().unwrap();

        // when
        let result = Chunk::open(
            &dir.path().join("missing"),
            Ulid::new(),
            &ChunkConfig::default(),
            false,
        );

        // then
        assert!(matches!(result, Err(Error::NotExist(_))));
    }

    #[test]
    fn should_detect_bad_magic() {
        // given
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c");
        std::fs::write(&path, vec![7u8; 64]).unwrap();

        // when
        let result = Chunk::open(&path, Ulid::new(), &ChunkConfig::default(), false);

        // then
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn should_position_cursor_inclusively_on_start_id() {
        // given
        let dir = TempDir::new().unwrap();
        let minter = IdMinter::default();
        let chunk = Chunk::open(
            &dir.path().join("c"),
            minter.next(),
            &config(4096, 65536, 4096),
            true,
        )
        .unwrap();
        let ids = chunk.append(&payloads(5, 10), &minter).unwrap().ids;

        // when
        let mut asc = chunk.reader(false);
        asc.set_start_id(ids[2]);
        let mut desc = chunk.reader(true);
        desc.set_start_id(ids[2]);

        // then
        assert_eq!(asc.remaining(), 3);
        assert_eq!(asc.peek_id(), Some(ids[2]));
        assert_eq!(desc.remaining(), 3);
        assert_eq!(desc.peek_id(), Some(ids[2]));
        desc.skip_one();
        assert_eq!(desc.next().unwrap().unwrap().id, ids[1]);
    }
}
