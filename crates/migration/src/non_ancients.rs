//! Migration of the blocks still held in the live key/value store.
//!
//! The store is first copied wholesale (without the ancient store), then
//! every header and body above the last ancient block is rewritten in place.
//! Progress is tracked by a cursor stored next to the data, so an interrupted
//! run picks up after the last block it rewrote.

use std::{fmt, path::Path, time::Instant};

use cel2_common::types::BlockNumber;
use cel2_storage::{
    KeyValueStore,
    accessors::{
        delete_block_without_number, delete_canonical_hash, delete_last_migrated_block,
        read_all_hashes_in_range, read_body_rlp, read_head_header_hash, read_header_number,
        read_header_rlp, read_last_migrated_block, write_body, write_header,
        write_last_migrated_block,
    },
    backend::rocksdb::RocksDbStore,
};
use tracing::{debug, info};

use crate::{
    copy::{TreeCopier, remove_non_ancients},
    error::MigrationError,
    transform::{check_hash, transform_body, transform_header},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonAncientsPhase {
    CopyingTree,
    Transforming,
    PruningAncientsFromLive,
    RemovingCursor,
    Done,
}

impl fmt::Display for NonAncientsPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NonAncientsPhase::CopyingTree => "copying tree",
            NonAncientsPhase::Transforming => "transforming",
            NonAncientsPhase::PruningAncientsFromLive => "pruning ancients from live store",
            NonAncientsPhase::RemovingCursor => "removing cursor",
            NonAncientsPhase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonAncientsOptions {
    pub batch_size: u64,
    /// Keep whatever the destination already holds besides its ancient store
    /// instead of clearing it before the copy.
    pub keep_non_ancients: bool,
}

impl Default for NonAncientsOptions {
    fn default() -> Self {
        Self {
            batch_size: crate::ancients::DEFAULT_BATCH_SIZE,
            keep_non_ancients: false,
        }
    }
}

fn enter(phase: NonAncientsPhase) {
    info!(%phase, "Non-ancient migration");
}

/// Copies `src` (minus its ancient store) to `dst` and rewrites the blocks
/// above `last_ancient` there. Returns how many blocks this run rewrote.
pub fn migrate_non_ancients(
    src: &Path,
    dst: &Path,
    last_ancient: Option<BlockNumber>,
    options: NonAncientsOptions,
    copier: &dyn TreeCopier,
) -> Result<u64, MigrationError> {
    if !copier.is_available() {
        return Err(MigrationError::MissingDependency(format!(
            "{} is required to copy the non-ancient data",
            copier.name()
        )));
    }

    if let Some(cursor) = resume_cursor(dst)? {
        info!(cursor, "Resuming non-ancient migration");
    } else {
        enter(NonAncientsPhase::CopyingTree);
        if !options.keep_non_ancients {
            remove_non_ancients(dst)?;
        }
        copier.copy(src, dst)?;
    }

    let kv = RocksDbStore::open(dst)
        .map_err(MigrationError::store(format!("opening {}", dst.display())))?;
    transform_non_ancients(&kv, last_ancient, options.batch_size)
}

/// The cursor left by an interrupted run on `dst`, if any.
fn resume_cursor(dst: &Path) -> Result<Option<BlockNumber>, MigrationError> {
    if !RocksDbStore::exists(dst) {
        return Ok(None);
    }
    let kv = RocksDbStore::open_read_only(dst)
        .map_err(MigrationError::store(format!("opening {}", dst.display())))?;
    read_last_migrated_block(&kv).map_err(MigrationError::store("reading migration cursor"))
}

/// Rewrites, in place, every header and body of `kv` from the block after
/// `last_ancient` (or after the cursor) up to the head header, then removes
/// the blocks `[1, last_ancient]` the ancient store now holds.
pub fn transform_non_ancients(
    kv: &dyn KeyValueStore,
    last_ancient: Option<BlockNumber>,
    batch_size: u64,
) -> Result<u64, MigrationError> {
    if batch_size == 0 {
        return Err(MigrationError::Config("batch size must be positive".to_string()));
    }
    enter(NonAncientsPhase::Transforming);
    let cursor = read_last_migrated_block(kv).map_err(MigrationError::store("reading migration cursor"))?;
    let from = last_ancient
        .map(|n| n + 1)
        .max(cursor.map(|n| n + 1))
        .unwrap_or(0);

    let head_hash = read_head_header_hash(kv)
        .map_err(MigrationError::store("reading head header hash"))?
        .ok_or_else(|| MigrationError::NotFound("head header hash".to_string()))?;
    let to = read_header_number(kv, head_hash)
        .map_err(MigrationError::store("reading head header number"))?
        .ok_or_else(|| MigrationError::NotFound(format!("number of head header {head_hash:#x}")))?;

    let started = Instant::now();
    let mut transformed = 0u64;
    if from <= to {
        info!(from, to, ?cursor, "Rewriting non-ancient blocks");
    }
    for start in (from..=to).step_by(batch_size as usize) {
        // full windows, so the last one may reach past the head
        let end = start.saturating_add(batch_size - 1);
        let hashes = read_all_hashes_in_range(kv, start, end)
            .map_err(MigrationError::store(format!("listing blocks {start}..={end}")))?;

        for (number, hash) in hashes {
            let header = read_header_rlp(kv, number, hash)
                .map_err(MigrationError::store(format!("reading header #{number}")))?
                .ok_or_else(|| MigrationError::NotFound(format!("header #{number} {hash:#x}")))?;
            let body = read_body_rlp(kv, number, hash)
                .map_err(MigrationError::store(format!("reading body #{number}")))?
                .ok_or_else(|| MigrationError::NotFound(format!("body #{number} {hash:#x}")))?;

            let header = transform_header(&header)?;
            let body = transform_body(&body)?;
            check_hash(number, &header, hash)?;

            let mut batch = kv.new_batch();
            write_header(&mut batch, number, hash, &header);
            write_body(&mut batch, number, hash, &body);
            write_last_migrated_block(&mut batch, number);
            batch
                .write()
                .map_err(MigrationError::store(format!("writing block #{number}")))?;
            transformed += 1;
        }
        debug!(start, end, transformed, "Rewrote non-ancient batch");
    }
    info!(transformed, elapsed = ?started.elapsed(), "Rewrote non-ancient blocks");

    if let Some(last_ancient) = last_ancient.filter(|n| *n >= 1) {
        enter(NonAncientsPhase::PruningAncientsFromLive);
        let frozen = read_all_hashes_in_range(kv, 1, last_ancient)
            .map_err(MigrationError::store("listing frozen blocks"))?;
        let mut batch = kv.new_batch();
        for (number, hash) in &frozen {
            delete_block_without_number(&mut batch, *number, *hash);
            delete_canonical_hash(&mut batch, *number);
        }
        batch
            .write()
            .map_err(MigrationError::store("deleting frozen blocks"))?;
        info!(blocks = frozen.len(), last_ancient, "Removed frozen blocks from the live store");
    }

    enter(NonAncientsPhase::RemovingCursor);
    let mut batch = kv.new_batch();
    delete_last_migrated_block(&mut batch);
    batch
        .write()
        .map_err(MigrationError::store("removing migration cursor"))?;

    enter(NonAncientsPhase::Done);
    Ok(transformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cel2_common::{Bytes, H256, types::BlockHeader};
    use cel2_rlp::encode::RLPEncode;
    use cel2_storage::{
        accessors::{
            read_canonical_hash, write_canonical_hash, write_head_header_hash, write_header_number,
        },
        backend::in_memory::InMemoryStore,
    };

    const OLD_BODY: [u8; 4] = [0xc3, 0xc0, 0xc0, 0xc0];
    const NEW_BODY: [u8; 3] = [0xc2, 0xc0, 0xc0];

    fn header(number: BlockNumber) -> BlockHeader {
        BlockHeader {
            number,
            gas_limit: 8_000_000,
            timestamp: 100 + number,
            extra_data: Bytes::from_static(b"no validators"),
            ..Default::default()
        }
    }

    /// Blocks `0..=head`, each with an old-format body, head pointers set.
    fn live_chain(head: BlockNumber) -> (InMemoryStore, Vec<H256>) {
        let kv = InMemoryStore::default();
        let mut hashes = Vec::new();
        let mut batch = kv.new_batch();
        for number in 0..=head {
            let header = header(number);
            let hash = header.hash();
            write_header(&mut batch, number, hash, &header.encode_to_vec());
            write_header_number(&mut batch, hash, number);
            write_body(&mut batch, number, hash, &OLD_BODY);
            write_canonical_hash(&mut batch, number, hash);
            hashes.push(hash);
        }
        write_head_header_hash(&mut batch, hashes[head as usize]);
        batch.write().unwrap();
        (kv, hashes)
    }

    #[test]
    fn rewrites_blocks_after_the_ancients() {
        let (kv, hashes) = live_chain(9);

        let transformed = transform_non_ancients(&kv, Some(4), 3).unwrap();
        assert_eq!(transformed, 5);

        for number in 5..=9u64 {
            let hash = hashes[number as usize];
            assert_eq!(read_body_rlp(&kv, number, hash).unwrap().unwrap(), NEW_BODY);
            assert_eq!(read_canonical_hash(&kv, number).unwrap(), Some(hash));
        }
        for number in 1..=4u64 {
            let hash = hashes[number as usize];
            assert_eq!(read_header_rlp(&kv, number, hash).unwrap(), None);
            assert_eq!(read_canonical_hash(&kv, number).unwrap(), None);
            // the number lookup is kept for ancient reads
            assert_eq!(read_header_number(&kv, hash).unwrap(), Some(number));
        }
        // genesis stays in the live store
        assert_eq!(read_body_rlp(&kv, 0, hashes[0]).unwrap().unwrap(), OLD_BODY);
        assert_eq!(read_last_migrated_block(&kv).unwrap(), None);
    }

    #[test]
    fn last_window_covers_side_blocks_above_the_head() {
        let (kv, hashes) = live_chain(10);
        let mut side = Vec::new();
        let mut batch = kv.new_batch();
        for number in [11u64, 13] {
            let header = BlockHeader {
                timestamp: 5000 + number,
                ..header(number)
            };
            let hash = header.hash();
            write_header(&mut batch, number, hash, &header.encode_to_vec());
            write_header_number(&mut batch, hash, number);
            write_body(&mut batch, number, hash, &OLD_BODY);
            side.push(hash);
        }
        batch.write().unwrap();

        // windows [5, 8] and [9, 12]
        assert_eq!(transform_non_ancients(&kv, Some(4), 4).unwrap(), 7);
        assert_eq!(read_body_rlp(&kv, 10, hashes[10]).unwrap().unwrap(), NEW_BODY);
        assert_eq!(read_body_rlp(&kv, 11, side[0]).unwrap().unwrap(), NEW_BODY);
        assert_eq!(read_body_rlp(&kv, 13, side[1]).unwrap().unwrap(), OLD_BODY);
        assert_eq!(read_canonical_hash(&kv, 11).unwrap(), None);
    }

    #[test]
    fn resumes_after_the_cursor() {
        let (kv, hashes) = live_chain(6);
        // a previous run got through block 4
        let mut batch = kv.new_batch();
        for number in 0..=4u64 {
            write_body(&mut batch, number, hashes[number as usize], &NEW_BODY);
        }
        write_last_migrated_block(&mut batch, 4);
        batch.write().unwrap();

        assert_eq!(transform_non_ancients(&kv, None, 10).unwrap(), 2);
        for (number, hash) in hashes.iter().enumerate() {
            assert_eq!(read_body_rlp(&kv, number as u64, *hash).unwrap().unwrap(), NEW_BODY);
        }
        assert_eq!(read_last_migrated_block(&kv).unwrap(), None);
    }

    #[test]
    fn nothing_above_the_ancients() {
        let (kv, hashes) = live_chain(3);
        assert_eq!(transform_non_ancients(&kv, Some(3), 10).unwrap(), 0);
        assert_eq!(read_canonical_hash(&kv, 3).unwrap(), None);
        assert_eq!(read_canonical_hash(&kv, 0).unwrap(), Some(hashes[0]));
    }

    #[test]
    fn missing_head_is_reported() {
        let kv = InMemoryStore::default();
        let err = transform_non_ancients(&kv, None, 10).unwrap_err();
        assert!(matches!(err, MigrationError::NotFound(_)), "{err}");
    }

    #[test]
    fn missing_body_is_reported() {
        let (kv, hashes) = live_chain(2);
        kv.delete(&cel2_storage::schema::block_body_key(2, hashes[2])).unwrap();
        let err = transform_non_ancients(&kv, None, 10).unwrap_err();
        assert!(matches!(err, MigrationError::NotFound(ref what) if what.starts_with("body #2")), "{err}");
        // blocks before the failure are done and the cursor points at them
        assert_eq!(read_last_migrated_block(&kv).unwrap(), Some(1));
    }

    #[test]
    fn unavailable_copier_fails_before_touching_dst() {
        struct Missing;
        impl TreeCopier for Missing {
            fn name(&self) -> &'static str {
                "missing"
            }
            fn is_available(&self) -> bool {
                false
            }
            fn copy(&self, _: &Path, _: &Path) -> Result<(), MigrationError> {
                unreachable!()
            }
        }

        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(dst.path().join("keep"), b"").unwrap();
        let err = migrate_non_ancients(
            src.path(),
            dst.path(),
            None,
            NonAncientsOptions::default(),
            &Missing,
        )
        .unwrap_err();
        assert!(matches!(err, MigrationError::MissingDependency(_)));
        assert!(dst.path().join("keep").exists());
    }
}
