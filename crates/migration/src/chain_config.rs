use cel2_common::{
    U256,
    constants::{EIP1559_DENOMINATOR, EIP1559_DENOMINATOR_CANYON, EIP1559_ELASTICITY},
    types::{BlockNumber, ChainConfig, OptimismConfig},
};
use tracing::debug;

use crate::error::MigrationError;

/// Moves the fork schedule so every post-merge fork, plus the OP-stack forks,
/// is active from the transition block onward.
///
/// Forks already scheduled at or before the transition are left as they are.
pub fn rewrite_chain_config(
    config: Option<&mut ChainConfig>,
    block: BlockNumber,
    time: u64,
) -> Result<(), MigrationError> {
    let config = config.ok_or_else(|| MigrationError::NotFound("chain config".to_string()))?;

    for fork in [
        &mut config.london_block,
        &mut config.berlin_block,
        &mut config.arrow_glacier_block,
        &mut config.gray_glacier_block,
        &mut config.merge_netsplit_block,
        &mut config.bedrock_block,
    ] {
        activate_by(fork, block);
    }
    for fork in [
        &mut config.shanghai_time,
        &mut config.cancun_time,
        &mut config.canyon_time,
        &mut config.ecotone_time,
        &mut config.cel2_time,
    ] {
        activate_by(fork, time);
    }

    config.terminal_total_difficulty = Some(U256::zero());
    config.terminal_total_difficulty_passed = true;
    config.regolith_time = Some(0);
    config.optimism = Some(OptimismConfig {
        eip1559_elasticity: EIP1559_ELASTICITY,
        eip1559_denominator: EIP1559_DENOMINATOR,
        eip1559_denominator_canyon: Some(EIP1559_DENOMINATOR_CANYON),
    });

    debug!(block, time, "Rewrote chain config fork schedule");
    Ok(())
}

fn activate_by(fork: &mut Option<u64>, activation: u64) {
    if fork.is_none_or(|scheduled| scheduled > activation) {
        *fork = Some(activation);
    }
}
