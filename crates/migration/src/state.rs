use std::{fs, path::PathBuf};

use cel2_common::types::{Genesis, parse_allocs};
use tracing::info;

use crate::{
    error::MigrationError,
    finalize::{FinalizeOptions, finalize_state},
    l1::{BlockSource, resolve_l1_start},
    rollup::{BlockId, DeployConfig, L1Deployments, RollupConfig},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateOptions {
    pub new_db: PathBuf,
    pub deploy_config: PathBuf,
    pub l1_deployments: PathBuf,
    pub l2_allocs: PathBuf,
    pub outfile_rollup_config: PathBuf,
    pub dry_run: bool,
    pub transition_time: u64,
}

/// Applies the L2 allocations to the migrated chain, appends the transition
/// block and writes the rollup config. A dry run stops before writing
/// anything and returns `None`.
pub fn migrate_state(
    options: &StateOptions,
    l1: &dyn BlockSource,
) -> Result<Option<RollupConfig>, MigrationError> {
    info!(path = %options.deploy_config.display(), "Loading deploy config");
    let mut deploy_config = DeployConfig::load(&options.deploy_config)?;
    deploy_config.check_migration()?;
    let deployments = L1Deployments::load(&options.l1_deployments)?;

    let l1_start = resolve_l1_start(l1, &mut deploy_config.l1_starting_block_tag)?;
    // the tag is always set by now
    deploy_config.check()?;

    let allocs = fs::read(&options.l2_allocs)?;
    let alloc = parse_allocs(&allocs).map_err(|e| {
        MigrationError::Config(format!(
            "cannot parse allocs at {}: {e}",
            options.l2_allocs.display()
        ))
    })?;
    info!(accounts = alloc.len(), "Loaded L2 allocations");
    let genesis = Genesis {
        chain_id: deploy_config.l2_chain_id,
        alloc,
    };

    let header = finalize_state(
        &options.new_db,
        &genesis,
        FinalizeOptions {
            commit: !options.dry_run,
            transition_time: options.transition_time,
        },
    )?;
    let Some(header) = header else {
        return Ok(None);
    };

    let rollup_config = RollupConfig::new(
        &deploy_config,
        &deployments,
        &l1_start,
        BlockId {
            hash: header.hash(),
            number: header.number,
        },
    )?;
    rollup_config.check()?;
    rollup_config.write(&options.outfile_rollup_config)?;
    Ok(Some(rollup_config))
}
