//! Streams frozen blocks from the old ancient store into the new one.
//!
//! A reader, a transformer and a writer run on their own threads, connected
//! by two bounded queues. Batches move through the queues by value, so at
//! most `2 * buffer_depth + 3` of them are alive at any time. The first stage
//! to fail cancels the others, and its error is the one returned.

use std::{
    path::Path,
    sync::{
        Mutex,
        atomic::{AtomicU8, Ordering},
        mpsc::{Receiver, SyncSender, sync_channel},
    },
    thread,
    time::Instant,
};

use cel2_common::{H256, types::BlockNumber};
use cel2_storage::{
    Freezer,
    ancient::{BODIES_TABLE, DIFFICULTIES_TABLE, HASHES_TABLE, HEADERS_TABLE, RECEIPTS_TABLE},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{MigrationError, Stage},
    transform::{check_hash, transform_body, transform_header},
};

pub const DEFAULT_BATCH_SIZE: u64 = 10_000;
pub const DEFAULT_BUFFER_DEPTH: usize = 10;

/// Blocks sampled from the tip of the source to estimate the size of a batch.
const SIZE_SAMPLE_BLOCKS: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncientsOptions {
    pub batch_size: u64,
    /// Capacity of each queue; 0 makes every hand-off a rendezvous.
    pub buffer_depth: usize,
    /// Soft memory ceiling in MiB, 0 for none. Honored by shrinking
    /// `buffer_depth`.
    pub memory_limit_mib: u64,
}

impl Default for AncientsOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            buffer_depth: DEFAULT_BUFFER_DEPTH,
            memory_limit_mib: 0,
        }
    }
}

/// A contiguous range of blocks, one column per ancient table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AncientBatch {
    pub start: BlockNumber,
    pub hashes: Vec<Vec<u8>>,
    pub headers: Vec<Vec<u8>>,
    pub bodies: Vec<Vec<u8>>,
    pub receipts: Vec<Vec<u8>>,
    pub tds: Vec<Vec<u8>>,
}

impl AncientBatch {
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    fn check_columns(&self, count: usize) -> Result<(), MigrationError> {
        let lengths = [
            self.hashes.len(),
            self.headers.len(),
            self.bodies.len(),
            self.receipts.len(),
            self.tds.len(),
        ];
        if lengths.iter().any(|len| *len != count) {
            return Err(MigrationError::Invariant(format!(
                "ancient batch at {} has columns of lengths {lengths:?}, expected {count}",
                self.start
            )));
        }
        Ok(())
    }

    fn byte_size(&self) -> usize {
        [
            &self.hashes,
            &self.headers,
            &self.bodies,
            &self.receipts,
            &self.tds,
        ]
        .iter()
        .flat_map(|column| column.iter())
        .map(Vec::len)
        .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StageState {
    Idle = 0,
    Running = 1,
    /// Upstream is done and this stage is consuming what is left in its queue.
    Draining = 2,
    Failed = 3,
    Done = 4,
}

impl From<u8> for StageState {
    fn from(value: u8) -> Self {
        match value {
            1 => StageState::Running,
            2 => StageState::Draining,
            3 => StageState::Failed,
            4 => StageState::Done,
            _ => StageState::Idle,
        }
    }
}

#[derive(Debug, Default)]
struct StageStatus(AtomicU8);

impl StageStatus {
    fn get(&self) -> StageState {
        self.0.load(Ordering::Acquire).into()
    }

    fn set(&self, state: StageState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Migration of the ancient store. The stage states can be polled from other
/// threads while [`run`](Self::run) is in progress.
#[derive(Debug, Default)]
pub struct AncientsPipeline {
    options: AncientsOptions,
    reader: StageStatus,
    transformer: StageStatus,
    writer: StageStatus,
    failure: Mutex<Option<MigrationError>>,
}

impl AncientsPipeline {
    pub fn new(options: AncientsOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn state(&self, stage: Stage) -> StageState {
        self.status(stage).get()
    }

    fn status(&self, stage: Stage) -> &StageStatus {
        match stage {
            Stage::Reader => &self.reader,
            Stage::Transformer => &self.transformer,
            Stage::Writer => &self.writer,
        }
    }

    /// Copies every block of `src/ancient` missing from `dst/ancient` and
    /// returns the destination's block count before and after.
    pub fn run(
        &self,
        src: &Path,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> Result<(u64, u64), MigrationError> {
        if self.options.batch_size == 0 {
            return Err(MigrationError::Config("batch size must be positive".to_string()));
        }
        let src_ancients = src.join("ancient");
        let dst_ancients = dst.join("ancient");
        if !src_ancients.is_dir() {
            return Err(MigrationError::NotFound(format!(
                "ancient store at {}",
                src_ancients.display()
            )));
        }
        // writable, since missing table metadata is created on open
        let old = Freezer::open(&src_ancients, false)
            .map_err(MigrationError::store(format!("opening {}", src_ancients.display())))?;
        let mut new = Freezer::open(&dst_ancients, false)
            .map_err(MigrationError::store(format!("opening {}", dst_ancients.display())))?;

        let total = old.ancients();
        let before = new.ancients();
        if before >= total {
            info!(ancients = before, "Ancient store already migrated");
            return Ok((before, before));
        }

        let buffer_depth = self.buffer_depth(&old)?;
        info!(
            from = before,
            to = total,
            batch_size = self.options.batch_size,
            buffer_depth,
            "Migrating ancient blocks"
        );

        // failures cancel this token, never the caller's
        let cancel = cancel.child_token();
        let (read_tx, read_rx) = sync_channel::<AncientBatch>(buffer_depth);
        let (transform_tx, transform_rx) = sync_channel::<AncientBatch>(buffer_depth);
        let started = Instant::now();

        thread::scope(|scope| -> Result<(), MigrationError> {
            let handles = [
                (
                    Stage::Reader,
                    thread::Builder::new()
                        .name("ancients-reader".to_string())
                        .spawn_scoped(scope, || {
                            self.stage(Stage::Reader, &cancel, || {
                                self.read(&old, before, total, read_tx, &cancel)
                            })
                        })?,
                ),
                (
                    Stage::Transformer,
                    thread::Builder::new()
                        .name("ancients-transformer".to_string())
                        .spawn_scoped(scope, || {
                            self.stage(Stage::Transformer, &cancel, || {
                                self.transform(read_rx, transform_tx, &cancel)
                            })
                        })?,
                ),
                (
                    Stage::Writer,
                    thread::Builder::new()
                        .name("ancients-writer".to_string())
                        .spawn_scoped(scope, || {
                            self.stage(Stage::Writer, &cancel, || {
                                self.write(&mut new, transform_rx, total, started, &cancel)
                            })
                        })?,
                ),
            ];
            for (stage, handle) in handles {
                if handle.join().is_err() {
                    self.status(stage).set(StageState::Failed);
                    cancel.cancel();
                    self.record_failure(MigrationError::Stage {
                        stage,
                        source: Box::new(MigrationError::Invariant("stage panicked".to_string())),
                    });
                }
            }
            Ok(())
        })?;

        if let Some(err) = self.failure.lock().ok().and_then(|mut slot| slot.take()) {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(MigrationError::Canceled);
        }
        new.sync()
            .map_err(MigrationError::store("syncing new ancient store"))?;
        let after = new.ancients();
        info!(
            migrated = after - before,
            ancients = after,
            elapsed = ?started.elapsed(),
            "Migrated ancient blocks"
        );
        Ok((before, after))
    }

    /// Runs one stage body, recording its state and its error, if it is the
    /// first real one.
    fn stage(
        &self,
        stage: Stage,
        cancel: &CancellationToken,
        body: impl FnOnce() -> Result<(), MigrationError>,
    ) {
        let status = self.status(stage);
        status.set(StageState::Running);
        match body() {
            Ok(()) => status.set(StageState::Done),
            Err(MigrationError::Canceled) => {
                debug!(%stage, "Stage canceled");
                status.set(StageState::Failed);
            }
            Err(err) => {
                error!(%stage, error = %err, "Stage failed");
                status.set(StageState::Failed);
                cancel.cancel();
                self.record_failure(MigrationError::Stage {
                    stage,
                    source: Box::new(err),
                });
            }
        }
    }

    /// Keeps the first failure; later ones are consequences of it.
    fn record_failure(&self, err: MigrationError) {
        if let Ok(mut slot) = self.failure.lock() {
            slot.get_or_insert(err);
        }
    }

    /// Marks `stage` as draining once `upstream` has finished.
    fn note_upstream(&self, stage: Stage, upstream: Stage) {
        if self.state(upstream) == StageState::Done && self.state(stage) == StageState::Running {
            self.status(stage).set(StageState::Draining);
        }
    }

    fn read(
        &self,
        old: &Freezer,
        from: u64,
        to: u64,
        tx: SyncSender<AncientBatch>,
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError> {
        for start in (from..to).step_by(self.options.batch_size as usize) {
            let count = self.options.batch_size.min(to - start);
            let range = |table: &str| {
                old.ancient_range(table, start, count, 0)
                    .map_err(MigrationError::store(format!(
                        "reading {table} {start}..{}",
                        start + count
                    )))
            };
            let batch = AncientBatch {
                start,
                hashes: range(HASHES_TABLE)?,
                headers: range(HEADERS_TABLE)?,
                bodies: range(BODIES_TABLE)?,
                receipts: range(RECEIPTS_TABLE)?,
                tds: range(DIFFICULTIES_TABLE)?,
            };
            batch.check_columns(count as usize)?;
            debug!(start, count, "Read ancient batch");

            if cancel.is_cancelled() {
                return Err(MigrationError::Canceled);
            }
            tx.send(batch).map_err(|_| MigrationError::Canceled)?;
        }
        Ok(())
    }

    fn transform(
        &self,
        rx: Receiver<AncientBatch>,
        tx: SyncSender<AncientBatch>,
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError> {
        loop {
            if cancel.is_cancelled() {
                return Err(MigrationError::Canceled);
            }
            let Ok(mut batch) = rx.recv() else {
                break;
            };
            self.note_upstream(Stage::Transformer, Stage::Reader);

            for j in 0..batch.len() {
                if cancel.is_cancelled() {
                    return Err(MigrationError::Canceled);
                }
                let number = batch.start + j as u64;
                let expected = ancient_hash(number, &batch.hashes[j])?;
                let header = transform_header(&batch.headers[j])?;
                let body = transform_body(&batch.bodies[j])?;
                check_hash(number, &header, expected)?;
                batch.headers[j] = header;
                batch.bodies[j] = body;
            }
            debug!(start = batch.start, count = batch.len(), "Transformed ancient batch");
            tx.send(batch).map_err(|_| MigrationError::Canceled)?;
        }
        // a closed queue is either the end of the input or a reader failure
        if cancel.is_cancelled() {
            return Err(MigrationError::Canceled);
        }
        Ok(())
    }

    fn write(
        &self,
        new: &mut Freezer,
        rx: Receiver<AncientBatch>,
        total: u64,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), MigrationError> {
        loop {
            if cancel.is_cancelled() {
                return Err(MigrationError::Canceled);
            }
            let Ok(batch) = rx.recv() else {
                break;
            };
            self.note_upstream(Stage::Writer, Stage::Transformer);

            let written = new.modify_ancients(|op| {
                for j in 0..batch.len() {
                    let number = batch.start + j as u64;
                    op.append_raw(HASHES_TABLE, number, &batch.hashes[j])?;
                    op.append_raw(HEADERS_TABLE, number, &batch.headers[j])?;
                    op.append_raw(BODIES_TABLE, number, &batch.bodies[j])?;
                    op.append_raw(RECEIPTS_TABLE, number, &batch.receipts[j])?;
                    op.append_raw(DIFFICULTIES_TABLE, number, &batch.tds[j])?;
                }
                Ok::<(), MigrationError>(())
            })?;
            let done = batch.start + batch.len() as u64;
            info!(
                migrated = done,
                total,
                bytes = written,
                elapsed = ?started.elapsed(),
                "Wrote ancient batch"
            );
        }
        if cancel.is_cancelled() {
            return Err(MigrationError::Canceled);
        }
        Ok(())
    }

    /// Queue capacity after applying the memory ceiling.
    fn buffer_depth(&self, old: &Freezer) -> Result<usize, MigrationError> {
        let AncientsOptions {
            batch_size,
            buffer_depth,
            memory_limit_mib,
        } = self.options;
        if memory_limit_mib == 0 {
            return Ok(buffer_depth);
        }
        let block_size = average_block_size(old)?;
        let depth = depth_for_memory_limit(buffer_depth, batch_size, block_size, memory_limit_mib);
        if depth < buffer_depth {
            warn!(
                requested = buffer_depth,
                depth,
                memory_limit_mib,
                block_size,
                "Lowering buffer depth to stay under the memory limit"
            );
        }
        Ok(depth)
    }
}

/// Runs an [`AncientsPipeline`] with `options`.
pub fn migrate_ancients(
    src: &Path,
    dst: &Path,
    options: AncientsOptions,
    cancel: &CancellationToken,
) -> Result<(u64, u64), MigrationError> {
    AncientsPipeline::new(options).run(src, dst, cancel)
}

fn ancient_hash(number: BlockNumber, bytes: &[u8]) -> Result<H256, MigrationError> {
    if bytes.len() != H256::len_bytes() {
        return Err(MigrationError::Invariant(format!(
            "ancient hash #{number} has length {}",
            bytes.len()
        )));
    }
    Ok(H256::from_slice(bytes))
}

/// Mean size of the last few blocks of `freezer`, all tables included.
fn average_block_size(freezer: &Freezer) -> Result<u64, MigrationError> {
    let items = freezer.ancients();
    let count = items.min(SIZE_SAMPLE_BLOCKS);
    if count == 0 {
        return Ok(0);
    }
    let start = items - count;
    let mut batch = AncientBatch {
        start,
        ..Default::default()
    };
    for (table, column) in [
        (HASHES_TABLE, &mut batch.hashes),
        (HEADERS_TABLE, &mut batch.headers),
        (BODIES_TABLE, &mut batch.bodies),
        (RECEIPTS_TABLE, &mut batch.receipts),
        (DIFFICULTIES_TABLE, &mut batch.tds),
    ] {
        *column = freezer
            .ancient_range(table, start, count, 0)
            .map_err(MigrationError::store("sampling block sizes"))?;
    }
    Ok(batch.byte_size() as u64 / count)
}

/// Largest depth `<= requested` whose `2 * depth + 3` resident batches fit in
/// `memory_limit_mib`. Every batch is counted twice, since the transformer
/// holds old and new encodings at once.
fn depth_for_memory_limit(
    requested: usize,
    batch_size: u64,
    block_size: u64,
    memory_limit_mib: u64,
) -> usize {
    let batch_bytes = batch_size.saturating_mul(block_size).saturating_mul(2);
    if batch_bytes == 0 {
        return requested;
    }
    let limit = memory_limit_mib.saturating_mul(1024 * 1024);
    let batches = limit / batch_bytes;
    let depth = batches.saturating_sub(3) / 2;
    requested.min(usize::try_from(depth).unwrap_or(usize::MAX))
}
