//! Geth's ancient (freezer) block database.
//!
//! Older blocks live outside the key/value store in append-only tables, one
//! file-set per table:
//!
//! | Table      | Compression | Content                         |
//! |------------|-------------|---------------------------------|
//! | `headers`  | snappy      | RLP-encoded block headers       |
//! | `hashes`   | raw         | canonical block hashes (32 B)   |
//! | `bodies`   | snappy      | RLP-encoded block bodies        |
//! | `receipts` | snappy      | RLP-encoded block receipts      |
//! | `diffs`    | raw         | RLP-encoded total difficulties  |
//!
//! ## Index Format
//!
//! Each table has a `*.{r,c}idx` index file with **6-byte entries**:
//! - bytes `[0..2]`: big-endian `u16`, data file number (`0` → `*.0000.{r,c}dat`)
//! - bytes `[2..6]`: big-endian `u32`, end offset of the item in that file
//!
//! There are N+1 entries for N items; entry 0 is `(0, 0)`. The length of
//! item N is `entry[N+1].offset − entry[N].offset`, unless the two entries
//! point at different files, in which case the item starts at offset 0 of
//! `entry[N+1].filenum`.

use std::{
    borrow::Cow,
    collections::{HashMap, hash_map::Entry},
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, error, warn};

use crate::error::StoreError;

pub const HEADERS_TABLE: &str = "headers";
pub const HASHES_TABLE: &str = "hashes";
pub const BODIES_TABLE: &str = "bodies";
pub const RECEIPTS_TABLE: &str = "receipts";
pub const DIFFICULTIES_TABLE: &str = "diffs";

/// Chain tables and whether their items are snappy-compressed.
pub const CHAIN_TABLES: [(&str, bool); 5] = [
    (HEADERS_TABLE, true),
    (HASHES_TABLE, false),
    (BODIES_TABLE, true),
    (RECEIPTS_TABLE, true),
    (DIFFICULTIES_TABLE, false),
];

/// Data files roll over once they would grow past this size.
pub const DEFAULT_MAX_FILE_SIZE: u32 = 2_000_000_000;

const INDEX_ENTRY_SIZE: u64 = 6;

// Guard against unreasonable allocations from corrupted index data
const MAX_ITEM_SIZE: usize = 16 * 1024 * 1024;

/// `rlp([1, 0])`: table version 1, no deleted tail items.
const TABLE_META: [u8; 3] = [0xc2, 0x01, 0x80];

/// One 6-byte entry in a `.{r,c}idx` index file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct IndexEntry {
    /// Data file number (e.g. `0` → `*.0000.*dat`).
    filenum: u16,
    /// End offset of the item within the data file.
    offset: u32,
}

impl IndexEntry {
    /// `b` must hold exactly one entry.
    fn from_bytes(b: &[u8]) -> Self {
        Self {
            filenum: u16::from_be_bytes([b[0], b[1]]),
            offset: u32::from_be_bytes([b[2], b[3], b[4], b[5]]),
        }
    }

    fn to_bytes(self) -> [u8; 6] {
        let mut b = [0u8; 6];
        b[..2].copy_from_slice(&self.filenum.to_be_bytes());
        b[2..].copy_from_slice(&self.offset.to_be_bytes());
        b
    }
}

/// Where an item lives, given the index entries around it.
fn item_location(start: IndexEntry, end: IndexEntry) -> Result<(u16, u32, usize), StoreError> {
    if start.filenum == end.filenum {
        if end.offset < start.offset {
            return Err(StoreError::Invariant(format!(
                "end offset ({}) < start offset ({})",
                end.offset, start.offset
            )));
        }
        Ok((start.filenum, start.offset, (end.offset - start.offset) as usize))
    } else {
        Ok((end.filenum, 0, end.offset as usize))
    }
}

fn file_size(path: &Path) -> Result<u64, StoreError> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(err) => Err(err.into()),
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)
}

/// A single append-only column of the freezer.
#[derive(Debug)]
pub struct FreezerTable {
    name: String,
    dir: PathBuf,
    compressed: bool,
    readonly: bool,
    index: File,
    /// Data file receiving appends; `None` when read-only.
    head: Option<File>,
    head_id: u16,
    head_bytes: u32,
    /// Items including the ones whose index entries are still pending.
    items: u64,
    /// Index entries of the batch being written, flushed on commit.
    pending_index: Vec<u8>,
    max_file_size: u32,
}

impl FreezerTable {
    fn open(dir: &Path, name: &str, compressed: bool, readonly: bool) -> Result<Self, StoreError> {
        let ext = if compressed { 'c' } else { 'r' };
        let index_path = dir.join(format!("{name}.{ext}idx"));
        let index = if readonly {
            File::open(&index_path).map_err(|e| {
                StoreError::Freezer(format!("cannot open {}: {e}", index_path.display()))
            })?
        } else {
            open_append(&index_path)?
        };
        let index_len = index.metadata()?.len();

        let mut table = Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            compressed,
            readonly,
            index,
            head: None,
            head_id: 0,
            head_bytes: 0,
            items: 0,
            pending_index: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        };

        if readonly {
            if index_len % INDEX_ENTRY_SIZE != 0 {
                return Err(StoreError::Invariant(format!(
                    "{name} index has invalid size {index_len} (not a multiple of 6)"
                )));
            }
            table.items = (index_len / INDEX_ENTRY_SIZE).saturating_sub(1);
            if table.items > 0 {
                table.check_tail()?;
                let last = table.read_entry(table.items)?;
                table.head_id = last.filenum;
                table.head_bytes = last.offset;
            }
        } else {
            table.repair(index_len)?;
            let meta = dir.join(format!("{name}.meta"));
            if !meta.exists() {
                fs::write(meta, TABLE_META)?;
            }
        }
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn items(&self) -> u64 {
        self.items
    }

    fn data_path(&self, filenum: u16) -> PathBuf {
        let ext = if self.compressed { 'c' } else { 'r' };
        self.dir.join(format!("{}.{filenum:04}.{ext}dat", self.name))
    }

    fn read_entry(&self, item: u64) -> Result<IndexEntry, StoreError> {
        let mut buf = [0u8; 6];
        let mut index = &self.index;
        index.seek(SeekFrom::Start(item * INDEX_ENTRY_SIZE))?;
        index.read_exact(&mut buf)?;
        Ok(IndexEntry::from_bytes(&buf))
    }

    /// Index entries `start..=start + count`.
    fn read_entries(&self, start: u64, count: u64) -> Result<Vec<IndexEntry>, StoreError> {
        let mut buf = vec![0u8; ((count + 1) * INDEX_ENTRY_SIZE) as usize];
        let mut index = &self.index;
        index.seek(SeekFrom::Start(start * INDEX_ENTRY_SIZE))?;
        index.read_exact(&mut buf)?;
        Ok(buf.chunks_exact(6).map(IndexEntry::from_bytes).collect())
    }

    fn check_tail(&self) -> Result<(), StoreError> {
        let first = self.read_entry(0)?;
        if first != IndexEntry::default() {
            return Err(StoreError::Invariant(format!(
                "{} table starts at file {} offset {}; pruned tails are not supported",
                self.name, first.filenum, first.offset
            )));
        }
        Ok(())
    }

    /// Brings index and data files back to a consistent state after a crash.
    fn repair(&mut self, mut index_len: u64) -> Result<(), StoreError> {
        if index_len == 0 {
            self.index.write_all(&IndexEntry::default().to_bytes())?;
            index_len = INDEX_ENTRY_SIZE;
        }
        let torn = index_len % INDEX_ENTRY_SIZE;
        if torn != 0 {
            warn!(table = %self.name, bytes = torn, "Truncating torn ancient index entry");
            index_len -= torn;
            self.index.set_len(index_len)?;
        }
        self.check_tail()?;

        let indexed = index_len / INDEX_ENTRY_SIZE - 1;
        let mut items = indexed;
        // entry 0 is (0, 0), so this always stops
        let last = loop {
            let entry = self.read_entry(items)?;
            if u64::from(entry.offset) <= file_size(&self.data_path(entry.filenum))? {
                break entry;
            }
            items -= 1;
        };
        if items < indexed {
            warn!(
                table = %self.name,
                dropped = indexed - items,
                "Dropping ancient index entries without data"
            );
            self.index.set_len((items + 1) * INDEX_ENTRY_SIZE)?;
        }

        let head = open_append(&self.data_path(last.filenum))?;
        if head.metadata()?.len() > u64::from(last.offset) {
            warn!(table = %self.name, file = last.filenum, "Truncating dangling ancient data");
            head.set_len(u64::from(last.offset))?;
        }
        self.remove_files_after(last.filenum)?;

        self.head = Some(head);
        self.head_id = last.filenum;
        self.head_bytes = last.offset;
        self.items = items;
        Ok(())
    }

    fn remove_files_after(&self, filenum: u16) -> Result<(), StoreError> {
        let mut next = filenum.checked_add(1);
        while let Some(id) = next {
            let path = self.data_path(id);
            if !path.exists() {
                break;
            }
            fs::remove_file(path)?;
            next = id.checked_add(1);
        }
        Ok(())
    }

    /// Reads up to `count` items from `start`. Stops early once more than
    /// `max_bytes` would be returned (`0` means no limit), but always returns
    /// at least one item.
    pub fn retrieve_items(
        &self,
        start: u64,
        count: u64,
        max_bytes: u64,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if start.checked_add(count).is_none_or(|end| end > self.items) {
            return Err(StoreError::Freezer(format!(
                "{}: items {start}..{} out of bounds ({} stored)",
                self.name,
                start.saturating_add(count),
                self.items
            )));
        }

        let entries = self.read_entries(start, count)?;
        let mut files: HashMap<u16, File> = HashMap::new();
        let mut items = Vec::with_capacity(count as usize);
        let mut total = 0u64;
        for (i, pair) in entries.windows(2).enumerate() {
            let (filenum, offset, len) = item_location(pair[0], pair[1]).map_err(|e| {
                StoreError::Invariant(format!("{} item #{}: {e}", self.name, start + i as u64))
            })?;
            if len > MAX_ITEM_SIZE {
                return Err(StoreError::Invariant(format!(
                    "{} item #{} claims unreasonable size {len} bytes (max {MAX_ITEM_SIZE})",
                    self.name,
                    start + i as u64
                )));
            }
            if max_bytes > 0 && !items.is_empty() && total + len as u64 > max_bytes {
                break;
            }

            let file = match files.entry(filenum) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(File::open(self.data_path(filenum))?),
            };
            file.seek(SeekFrom::Start(u64::from(offset)))?;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf)?;
            total += len as u64;

            if self.compressed {
                items.push(snap::raw::Decoder::new().decompress_vec(&buf)?);
            } else {
                items.push(buf);
            }
        }
        Ok(items)
    }

    /// Appends item `number`, which must be the next one. Returns the number
    /// of bytes written to the data file.
    fn append(&mut self, number: u64, data: &[u8]) -> Result<u64, StoreError> {
        if self.readonly {
            return Err(StoreError::ReadOnly);
        }
        if number != self.items {
            return Err(StoreError::Freezer(format!(
                "{}: appending item {number}, expected {}",
                self.name, self.items
            )));
        }

        let encoded: Cow<'_, [u8]> = if self.compressed {
            Cow::Owned(snap::raw::Encoder::new().compress_vec(data)?)
        } else {
            Cow::Borrowed(data)
        };
        let len = u32::try_from(encoded.len())
            .ok()
            .filter(|len| *len <= self.max_file_size)
            .ok_or_else(|| {
                StoreError::Freezer(format!(
                    "{}: item {number} of {} bytes does not fit in a data file",
                    self.name,
                    encoded.len()
                ))
            })?;
        let end = u64::from(self.head_bytes) + u64::from(len);
        if self.head_bytes > 0 && end > u64::from(self.max_file_size) {
            self.advance_head()?;
        }

        let head = self.head.as_mut().ok_or(StoreError::ReadOnly)?;
        head.write_all(&encoded)?;
        self.head_bytes += len;
        let entry = IndexEntry {
            filenum: self.head_id,
            offset: self.head_bytes,
        };
        self.pending_index.extend_from_slice(&entry.to_bytes());
        self.items += 1;
        Ok(u64::from(len))
    }

    fn advance_head(&mut self) -> Result<(), StoreError> {
        let next = self.head_id.checked_add(1).ok_or_else(|| {
            StoreError::Freezer(format!("{}: out of data file numbers", self.name))
        })?;
        if let Some(full) = &self.head {
            full.sync_all()?;
        }
        let head = open_append(&self.data_path(next))?;
        head.set_len(0)?;
        debug!(table = %self.name, file = next, "Opened new ancient data file");
        self.head = Some(head);
        self.head_id = next;
        self.head_bytes = 0;
        Ok(())
    }

    /// Drops every item from `items` onwards.
    pub fn truncate_head(&mut self, items: u64) -> Result<(), StoreError> {
        if self.readonly {
            return Err(StoreError::ReadOnly);
        }
        if items >= self.items {
            return Ok(());
        }
        let committed = self.items - (self.pending_index.len() as u64 / INDEX_ENTRY_SIZE);
        if items > committed {
            return Err(StoreError::Freezer(format!(
                "{}: cannot truncate to {items} inside an uncommitted batch",
                self.name
            )));
        }
        self.pending_index.clear();
        let entry = self.read_entry(items)?;
        self.index.set_len((items + 1) * INDEX_ENTRY_SIZE)?;
        if entry.filenum != self.head_id {
            self.head = Some(open_append(&self.data_path(entry.filenum))?);
            self.remove_files_after(entry.filenum)?;
        }
        if let Some(head) = &self.head {
            head.set_len(u64::from(entry.offset))?;
        }
        self.head_id = entry.filenum;
        self.head_bytes = entry.offset;
        self.items = items;
        Ok(())
    }

    fn sync(&self) -> Result<(), StoreError> {
        self.index.sync_all()?;
        if let Some(head) = &self.head {
            head.sync_all()?;
        }
        Ok(())
    }

    fn sync_data(&self) -> Result<(), StoreError> {
        if let Some(head) = &self.head {
            head.sync_all()?;
        }
        Ok(())
    }

    fn write_pending_index(&mut self) -> Result<(), StoreError> {
        self.index.write_all(&self.pending_index)?;
        self.pending_index.clear();
        Ok(())
    }
}

/// The five chain tables of a freezer directory, kept at equal length.
#[derive(Debug)]
pub struct Freezer {
    dir: PathBuf,
    readonly: bool,
    tables: Vec<FreezerTable>,
}

impl Freezer {
    /// Opens the freezer at `dir`.
    ///
    /// A writable open creates missing tables and repairs the ones left
    /// behind by a crash, truncating every table down to the shortest one. A
    /// read-only open never touches the directory and rejects tables of
    /// different lengths.
    pub fn open(dir: impl AsRef<Path>, readonly: bool) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        if !readonly {
            fs::create_dir_all(dir)?;
        }
        let tables = CHAIN_TABLES
            .iter()
            .map(|(name, compressed)| FreezerTable::open(dir, name, *compressed, readonly))
            .collect::<Result<Vec<_>, _>>()?;
        let mut freezer = Self {
            dir: dir.to_path_buf(),
            readonly,
            tables,
        };
        freezer.align_tables()?;
        debug!(path = %dir.display(), items = freezer.ancients(), readonly, "Opened ancient store");
        Ok(freezer)
    }

    /// Sets the size at which data files roll over.
    pub fn with_max_file_size(mut self, max_file_size: u32) -> Self {
        for table in &mut self.tables {
            table.max_file_size = max_file_size;
        }
        self
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn counts(&self) -> String {
        self.tables
            .iter()
            .map(|table| format!("{}={}", table.name, table.items))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn align_tables(&mut self) -> Result<(), StoreError> {
        let min = self.tables.iter().map(|t| t.items).min().unwrap_or(0);
        let max = self.tables.iter().map(|t| t.items).max().unwrap_or(0);
        if min == max {
            return Ok(());
        }
        if self.readonly {
            return Err(StoreError::Invariant(format!(
                "ancient table lengths differ ({})",
                self.counts()
            )));
        }
        warn!(
            path = %self.dir.display(),
            counts = %self.counts(),
            items = min,
            "Truncating ancient tables to a common length"
        );
        for table in &mut self.tables {
            table.truncate_head(min)?;
        }
        Ok(())
    }

    /// Number of blocks stored.
    pub fn ancients(&self) -> u64 {
        self.tables.iter().map(|t| t.items).min().unwrap_or(0)
    }

    pub fn table(&self, name: &str) -> Result<&FreezerTable, StoreError> {
        self.tables
            .iter()
            .find(|table| table.name == name)
            .ok_or_else(|| StoreError::Freezer(format!("unknown ancient table {name}")))
    }

    /// Item `number` of `table`, or `None` past the end of the store.
    pub fn ancient(&self, table: &str, number: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let table = self.table(table)?;
        if number >= table.items {
            return Ok(None);
        }
        Ok(table.retrieve_items(number, 1, 0)?.pop())
    }

    /// See [`FreezerTable::retrieve_items`].
    pub fn ancient_range(
        &self,
        table: &str,
        start: u64,
        count: u64,
        max_bytes: u64,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        self.table(table)?.retrieve_items(start, count, max_bytes)
    }

    /// Runs `f` against a write operation and returns the number of bytes it
    /// wrote. If `f` fails, or leaves the tables at different lengths, every
    /// table is truncated back to where it was.
    ///
    /// Index entries are only written once every table's data is on disk. A
    /// crash before that leaves the item count unchanged, and the next
    /// writable open drops the dangling data. A crash while the index files
    /// are being written can keep a prefix of the batch, made of blocks that
    /// are complete in every table.
    pub fn modify_ancients<F, E>(&mut self, f: F) -> Result<u64, E>
    where
        F: FnOnce(&mut AncientWriteOp<'_>) -> Result<(), E>,
        E: From<StoreError>,
    {
        if self.readonly {
            return Err(StoreError::ReadOnly.into());
        }
        let before = self.ancients();
        let mut op = AncientWriteOp {
            tables: &mut self.tables,
            written: 0,
        };
        let result = f(&mut op)
            .and_then(|()| op.check_aligned().map_err(E::from))
            .and_then(|()| commit_tables(op.tables).map_err(E::from));
        let written = op.written;

        match result {
            Ok(()) => Ok(written),
            Err(err) => {
                for table in &mut self.tables {
                    if let Err(rollback) = table.truncate_head(before) {
                        error!(table = %table.name, error = %rollback, "Failed to roll back ancient table");
                    }
                }
                Err(err)
            }
        }
    }

    /// Drops every block from `items` onwards.
    pub fn truncate_head(&mut self, items: u64) -> Result<(), StoreError> {
        for table in &mut self.tables {
            table.truncate_head(items)?;
        }
        Ok(())
    }

    /// Flushes every table to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        for table in &self.tables {
            table.sync()?;
        }
        Ok(())
    }
}

fn commit_tables(tables: &mut [FreezerTable]) -> Result<(), StoreError> {
    for table in tables.iter() {
        table.sync_data()?;
    }
    for table in tables.iter_mut() {
        table.write_pending_index()?;
    }
    for table in tables.iter() {
        table.index.sync_all()?;
    }
    Ok(())
}

/// Appends performed inside [`Freezer::modify_ancients`].
pub struct AncientWriteOp<'a> {
    tables: &'a mut [FreezerTable],
    written: u64,
}

impl AncientWriteOp<'_> {
    /// Appends already-encoded `data` as item `number` of `table`.
    pub fn append_raw(&mut self, table: &str, number: u64, data: &[u8]) -> Result<(), StoreError> {
        let target = self
            .tables
            .iter_mut()
            .find(|t| t.name == table)
            .ok_or_else(|| StoreError::Freezer(format!("unknown ancient table {table}")))?;
        self.written += target.append(number, data)?;
        Ok(())
    }

    fn check_aligned(&self) -> Result<(), StoreError> {
        let first = self.tables.first().map(|t| t.items);
        if self.tables.iter().any(|t| Some(t.items) != first) {
            let counts = self
                .tables
                .iter()
                .map(|t| format!("{}={}", t.name, t.items))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(StoreError::Invariant(format!(
                "ancient write left tables at different lengths ({counts})"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append_block(op: &mut AncientWriteOp<'_>, number: u64) -> Result<(), StoreError> {
        let hash = [number as u8; 32];
        op.append_raw(HASHES_TABLE, number, &hash)?;
        op.append_raw(HEADERS_TABLE, number, &vec![0xaa; 100 + number as usize])?;
        op.append_raw(BODIES_TABLE, number, &[0xc2, 0xc0, 0xc0])?;
        op.append_raw(RECEIPTS_TABLE, number, &[0xc0])?;
        op.append_raw(DIFFICULTIES_TABLE, number, &[number as u8 + 1])?;
        Ok(())
    }

    fn filled_freezer(dir: &Path, blocks: u64) -> Freezer {
        let mut freezer = Freezer::open(dir, false).unwrap();
        freezer
            .modify_ancients(|op| (0..blocks).try_for_each(|n| append_block(op, n)))
            .unwrap();
        freezer
    }

    #[test]
    fn index_entry_from_bytes() {
        let e = IndexEntry::from_bytes(&[0, 1, 0, 1, 2, 3]);
        assert_eq!(e.filenum, 1);
        assert_eq!(e.offset, 0x00010203);
        assert_eq!(e.to_bytes(), [0, 1, 0, 1, 2, 3]);
    }

    #[test]
    fn cross_file_item_starts_at_zero() {
        let start = IndexEntry {
            filenum: 0,
            offset: 900,
        };
        let end = IndexEntry {
            filenum: 1,
            offset: 40,
        };
        assert_eq!(item_location(start, end).unwrap(), (1, 0, 40));
        assert!(item_location(end, IndexEntry { filenum: 1, offset: 10 }).is_err());
    }

    #[test]
    fn writable_open_creates_tables() {
        let dir = tempfile::tempdir().unwrap();
        let freezer = Freezer::open(dir.path(), false).unwrap();
        assert_eq!(freezer.ancients(), 0);
        assert!(dir.path().join("headers.cidx").exists());
        assert!(dir.path().join("hashes.ridx").exists());
        assert_eq!(fs::read(dir.path().join("diffs.meta")).unwrap(), TABLE_META);
        assert_eq!(fs::read(dir.path().join("bodies.cidx")).unwrap(), vec![0u8; 6]);
    }

    #[test]
    fn read_only_open_leaves_directory_alone() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("ancient");
        assert!(Freezer::open(&missing, true).is_err());
        assert!(!missing.exists());
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let freezer = filled_freezer(dir.path(), 4);
        assert_eq!(freezer.ancients(), 4);
        assert_eq!(
            freezer.ancient(HASHES_TABLE, 2).unwrap(),
            Some(vec![2u8; 32])
        );
        assert_eq!(freezer.ancient(HASHES_TABLE, 4).unwrap(), None);

        let headers = freezer.ancient_range(HEADERS_TABLE, 1, 3, 0).unwrap();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0], vec![0xaa; 101]);
        assert_eq!(headers[2], vec![0xaa; 103]);
        assert!(freezer.ancient_range(HEADERS_TABLE, 2, 3, 0).is_err());
        drop(freezer);

        let reopened = Freezer::open(dir.path(), true).unwrap();
        assert_eq!(reopened.ancients(), 4);
        assert_eq!(
            reopened.ancient(DIFFICULTIES_TABLE, 3).unwrap(),
            Some(vec![4])
        );
    }

    #[test]
    fn range_reads_respect_byte_limit() {
        let dir = tempfile::tempdir().unwrap();
        let freezer = filled_freezer(dir.path(), 4);
        assert_eq!(freezer.ancient_range(HASHES_TABLE, 0, 4, 70).unwrap().len(), 2);
        // at least one item, even when it alone exceeds the limit
        assert_eq!(freezer.ancient_range(HASHES_TABLE, 0, 4, 10).unwrap().len(), 1);
        assert!(freezer.ancient_range(HASHES_TABLE, 0, 0, 0).unwrap().is_empty());
    }

    #[test]
    fn data_files_roll_over() {
        let dir = tempfile::tempdir().unwrap();
        let mut freezer = Freezer::open(dir.path(), false)
            .unwrap()
            .with_max_file_size(80);
        freezer
            .modify_ancients(|op| (0..5).try_for_each(|n| append_block(op, n)))
            .unwrap();

        // two 32-byte hashes per file
        assert!(dir.path().join("hashes.0000.rdat").exists());
        assert!(dir.path().join("hashes.0002.rdat").exists());
        let hashes = freezer.ancient_range(HASHES_TABLE, 0, 5, 0).unwrap();
        assert_eq!(hashes[2], vec![2u8; 32]);
        assert_eq!(hashes[4], vec![4u8; 32]);

        freezer.truncate_head(2).unwrap();
        assert_eq!(freezer.ancients(), 2);
        assert!(!dir.path().join("hashes.0001.rdat").exists());
        assert!(!dir.path().join("hashes.0002.rdat").exists());
        assert_eq!(freezer.ancient(HASHES_TABLE, 1).unwrap(), Some(vec![1u8; 32]));
    }

    #[test]
    fn failed_modification_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut freezer = filled_freezer(dir.path(), 2);

        let result = freezer.modify_ancients(|op| {
            append_block(op, 2)?;
            op.append_raw(HASHES_TABLE, 3, &[3u8; 32])?;
            Err(StoreError::Custom("boom".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(freezer.ancients(), 2);
        drop(freezer);
        assert_eq!(Freezer::open(dir.path(), true).unwrap().ancients(), 2);
    }

    #[test]
    fn interrupted_batch_leaves_count_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut freezer = filled_freezer(dir.path(), 2);
        let data = dir.path().join("headers.0000.cdat");
        let data_len = fs::metadata(&data).unwrap().len();

        let interrupted = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            freezer.modify_ancients(|op| -> Result<(), StoreError> {
                (2..5).try_for_each(|n| append_block(op, n))?;
                panic!("killed mid-batch");
            })
        }));
        assert!(interrupted.is_err());
        drop(freezer);

        // the data reached the files, the index entries did not
        assert!(fs::metadata(&data).unwrap().len() > data_len);
        assert_eq!(fs::metadata(dir.path().join("headers.cidx")).unwrap().len(), 3 * 6);

        let freezer = Freezer::open(dir.path(), false).unwrap();
        assert_eq!(freezer.ancients(), 2);
        assert_eq!(fs::metadata(&data).unwrap().len(), data_len);
    }

    #[test]
    fn truncation_inside_a_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut freezer = filled_freezer(dir.path(), 1);
        let result = freezer.modify_ancients(|op| {
            append_block(op, 1)?;
            append_block(op, 2)?;
            op.tables[0].truncate_head(2)
        });
        assert!(matches!(result, Err(StoreError::Freezer(_))), "{result:?}");
        assert_eq!(freezer.ancients(), 1);
    }

    #[test]
    fn unaligned_modification_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut freezer = filled_freezer(dir.path(), 1);
        let err = freezer
            .modify_ancients(|op| op.append_raw(HASHES_TABLE, 1, &[1u8; 32]))
            .unwrap_err();
        assert!(matches!(err, StoreError::Invariant(_)), "{err}");
        assert_eq!(freezer.ancients(), 1);
        assert_eq!(freezer.table(HASHES_TABLE).unwrap().items(), 1);
    }

    #[test]
    fn appends_must_be_contiguous() {
        let dir = tempfile::tempdir().unwrap();
        let mut freezer = filled_freezer(dir.path(), 1);
        let err = freezer
            .modify_ancients(|op| op.append_raw(HASHES_TABLE, 5, &[5u8; 32]))
            .unwrap_err();
        assert!(err.to_string().contains("expected 1"), "{err}");
    }

    #[test]
    fn mismatched_lengths_are_repaired_or_rejected() {
        let dir = tempfile::tempdir().unwrap();
        drop(filled_freezer(dir.path(), 3));
        // keep a single header
        let index = OpenOptions::new()
            .write(true)
            .open(dir.path().join("headers.cidx"))
            .unwrap();
        index.set_len(2 * INDEX_ENTRY_SIZE).unwrap();
        drop(index);

        let err = Freezer::open(dir.path(), true).unwrap_err();
        assert!(matches!(err, StoreError::Invariant(_)), "{err}");

        let freezer = Freezer::open(dir.path(), false).unwrap();
        assert_eq!(freezer.ancients(), 1);
        assert_eq!(freezer.table(BODIES_TABLE).unwrap().items(), 1);
        assert_eq!(freezer.ancient(HASHES_TABLE, 0).unwrap(), Some(vec![0u8; 32]));
    }

    #[test]
    fn torn_index_entry_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        drop(filled_freezer(dir.path(), 2));
        let mut index = OpenOptions::new()
            .append(true)
            .open(dir.path().join("hashes.ridx"))
            .unwrap();
        index.write_all(&[0, 0, 1]).unwrap();
        drop(index);

        let freezer = Freezer::open(dir.path(), false).unwrap();
        assert_eq!(freezer.ancients(), 2);
        assert_eq!(
            fs::metadata(dir.path().join("hashes.ridx")).unwrap().len(),
            3 * INDEX_ENTRY_SIZE
        );
    }

    #[test]
    fn index_entries_without_data_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        drop(filled_freezer(dir.path(), 3));
        // lose the last hash
        let data = OpenOptions::new()
            .write(true)
            .open(dir.path().join("hashes.0000.rdat"))
            .unwrap();
        data.set_len(2 * 32).unwrap();
        drop(data);

        let freezer = Freezer::open(dir.path(), false).unwrap();
        assert_eq!(freezer.ancients(), 2);
    }

    #[test]
    fn pruned_tail_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        drop(filled_freezer(dir.path(), 1));
        let mut index = fs::read(dir.path().join("diffs.ridx")).unwrap();
        index[5] = 1;
        fs::write(dir.path().join("diffs.ridx"), index).unwrap();

        let err = Freezer::open(dir.path(), true).unwrap_err();
        assert!(err.to_string().contains("tails are not supported"), "{err}");
    }
}
