use std::{fs, path::PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    ancients::{AncientsOptions, AncientsPipeline},
    copy::TreeCopier,
    error::MigrationError,
    non_ancients::{NonAncientsOptions, migrate_non_ancients},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocksOptions {
    pub old_db: PathBuf,
    pub new_db: PathBuf,
    pub batch_size: u64,
    pub buffer_size: usize,
    pub memory_limit_mib: u64,
    /// Delete the new database before migrating.
    pub clear_all: bool,
    /// Keep the non-ancient data already in the new database.
    pub keep_non_ancients: bool,
    /// Stop once the ancient store is migrated.
    pub only_ancients: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlocksSummary {
    pub ancients_before: u64,
    pub ancients_after: u64,
    /// Blocks rewritten in the live store, `None` if that phase was skipped.
    pub non_ancients: Option<u64>,
}

/// Migrates all block data of `old_db` into `new_db`: the ancient store
/// first, then the live store.
pub fn migrate_blocks(
    options: &BlocksOptions,
    copier: &dyn TreeCopier,
    cancel: &CancellationToken,
) -> Result<BlocksSummary, MigrationError> {
    if !options.old_db.is_dir() {
        return Err(MigrationError::NotFound(format!(
            "old database at {}",
            options.old_db.display()
        )));
    }
    // nothing may be deleted if the copy cannot run afterwards
    if !options.only_ancients && !copier.is_available() {
        return Err(MigrationError::MissingDependency(format!(
            "{} is required to copy the non-ancient data",
            copier.name()
        )));
    }

    if options.clear_all && options.new_db.exists() {
        info!(path = %options.new_db.display(), "Removing new database");
        fs::remove_dir_all(&options.new_db)?;
    }
    fs::create_dir_all(&options.new_db)?;

    let pipeline = AncientsPipeline::new(AncientsOptions {
        batch_size: options.batch_size,
        buffer_depth: options.buffer_size,
        memory_limit_mib: options.memory_limit_mib,
    });
    let (ancients_before, ancients_after) =
        pipeline.run(&options.old_db, &options.new_db, cancel)?;
    let mut summary = BlocksSummary {
        ancients_before,
        ancients_after,
        non_ancients: None,
    };
    if options.only_ancients {
        info!(ancients = ancients_after, "Skipping non-ancient migration");
        return Ok(summary);
    }
    if cancel.is_cancelled() {
        return Err(MigrationError::Canceled);
    }

    let transformed = migrate_non_ancients(
        &options.old_db,
        &options.new_db,
        ancients_after.checked_sub(1),
        NonAncientsOptions {
            batch_size: options.batch_size,
            keep_non_ancients: options.keep_non_ancients,
        },
        copier,
    )?;
    summary.non_ancients = Some(transformed);
    info!(
        ancients = ancients_after,
        migrated_ancients = ancients_after - ancients_before,
        non_ancients = transformed,
        "Block migration finished"
    );
    Ok(summary)
}
