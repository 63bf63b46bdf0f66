//! The rollup node's configuration, derived from the deploy config, the L1
//! deployments and the two anchor blocks.

use std::{fs, path::Path};

use cel2_common::{Address, H256, U256, types::BlockNumber, utils::u256_to_h256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::{
    error::MigrationError,
    l1::{BlockTag, L1Block},
};

/// Mode of the written rollup config file.
pub const ROLLUP_CONFIG_PERMISSIONS: u32 = 0o440;

/// Deploy configuration of the L2 chain. Keys not listed here are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployConfig {
    #[serde(rename = "l1ChainID")]
    pub l1_chain_id: u64,
    #[serde(rename = "l2ChainID")]
    pub l2_chain_id: u64,
    #[serde(default)]
    pub l1_block_time: u64,
    pub l2_block_time: u64,
    pub max_sequencer_drift: u64,
    pub sequencer_window_size: u64,
    pub channel_timeout: u64,
    #[serde(default)]
    pub p2p_sequencer_address: Address,
    pub batch_inbox_address: Address,
    pub batch_sender_address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l1_starting_block_tag: Option<BlockTag>,
    #[serde(with = "cel2_common::serde_utils::u64::hex_str")]
    pub l2_genesis_block_gas_limit: u64,
    #[serde(
        default,
        with = "cel2_common::serde_utils::u64::hex_str_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub l2_genesis_regolith_time_offset: Option<u64>,
    #[serde(
        default,
        with = "cel2_common::serde_utils::u64::hex_str_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub l2_genesis_canyon_time_offset: Option<u64>,
    #[serde(
        default,
        with = "cel2_common::serde_utils::u64::hex_str_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub l2_genesis_ecotone_time_offset: Option<u64>,
    #[serde(default)]
    pub gas_price_oracle_overhead: u64,
    #[serde(default)]
    pub gas_price_oracle_scalar: u64,
    #[serde(default)]
    pub gas_price_oracle_base_fee_scalar: u32,
    #[serde(default)]
    pub gas_price_oracle_blob_base_fee_scalar: u32,
    #[serde(default, rename = "eip1559Elasticity")]
    pub eip1559_elasticity: u64,
    #[serde(default, rename = "eip1559Denominator")]
    pub eip1559_denominator: u64,
    #[serde(default, rename = "eip1559DenominatorCanyon")]
    pub eip1559_denominator_canyon: u64,
    #[serde(default)]
    pub deploy_celo_contracts: bool,
    #[serde(default)]
    pub fund_dev_accounts: bool,
}

fn invalid(reason: impl Into<String>) -> MigrationError {
    MigrationError::Config(reason.into())
}

impl DeployConfig {
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let json = fs::read(path)
            .map_err(|e| invalid(format!("deploy config at {} not found: {e}", path.display())))?;
        serde_json::from_slice(&json)
            .map_err(|e| invalid(format!("cannot parse deploy config {}: {e}", path.display())))
    }

    /// Rejects options a migrated chain cannot honor.
    pub fn check_migration(&self) -> Result<(), MigrationError> {
        if self.deploy_celo_contracts {
            return Err(invalid("deployCeloContracts is not supported in migration"));
        }
        if self.fund_dev_accounts {
            return Err(invalid("fundDevAccounts is not supported in migration"));
        }
        Ok(())
    }

    /// Sanity checks, run once the L1 starting block tag is known.
    pub fn check(&self) -> Result<(), MigrationError> {
        if self.l1_starting_block_tag.is_none() {
            return Err(invalid("l1StartingBlockTag cannot be empty"));
        }
        if self.l1_chain_id == 0 {
            return Err(invalid("l1ChainID cannot be 0"));
        }
        if self.l2_chain_id == 0 {
            return Err(invalid("l2ChainID cannot be 0"));
        }
        if self.l2_block_time == 0 {
            return Err(invalid("l2BlockTime cannot be 0"));
        }
        if self.l1_block_time < self.l2_block_time {
            return Err(invalid(format!(
                "L2 block time ({}) is larger than L1 block time ({})",
                self.l2_block_time, self.l1_block_time
            )));
        }
        if self.max_sequencer_drift == 0 {
            return Err(invalid("maxSequencerDrift cannot be 0"));
        }
        if self.sequencer_window_size == 0 {
            return Err(invalid("sequencerWindowSize cannot be 0"));
        }
        if self.channel_timeout == 0 {
            return Err(invalid("channelTimeout cannot be 0"));
        }
        if self.l2_genesis_canyon_time_offset.is_some() && self.eip1559_denominator_canyon == 0 {
            return Err(invalid(
                "eip1559DenominatorCanyon cannot be 0 if Canyon is activated",
            ));
        }
        Ok(())
    }

    /// Fee scalar of the system config. A legacy scalar wins over the
    /// Ecotone pair.
    pub fn fee_scalar(&self) -> H256 {
        if self.gas_price_oracle_scalar != 0 {
            return u256_to_h256(U256::from(self.gas_price_oracle_scalar));
        }
        let mut scalar = [0u8; 32];
        scalar[0] = 1;
        scalar[24..28].copy_from_slice(&self.gas_price_oracle_blob_base_fee_scalar.to_be_bytes());
        scalar[28..32].copy_from_slice(&self.gas_price_oracle_base_fee_scalar.to_be_bytes());
        H256(scalar)
    }
}

/// Activation time of a fork scheduled `offset` seconds after genesis. A zero
/// offset activates it at time 0.
fn upgrade_time(offset: Option<u64>, genesis_time: u64) -> Option<u64> {
    offset.map(|offset| match offset {
        0 => 0,
        offset => genesis_time.saturating_add(offset),
    })
}

/// Addresses of the L1 contracts. Keys not listed here are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct L1Deployments {
    #[serde(default)]
    pub optimism_portal_proxy: Address,
    #[serde(default)]
    pub system_config_proxy: Address,
    #[serde(default)]
    pub protocol_versions_proxy: Address,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl L1Deployments {
    pub fn load(path: &Path) -> Result<Self, MigrationError> {
        let json = fs::read(path).map_err(|e| {
            invalid(format!("cannot read L1 deployments at {}: {e}", path.display()))
        })?;
        serde_json::from_slice(&json).map_err(|e| {
            invalid(format!("cannot parse L1 deployments at {}: {e}", path.display()))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockId {
    pub hash: H256,
    pub number: BlockNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    pub batcher_addr: Address,
    pub overhead: H256,
    pub scalar: H256,
    pub gas_limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupGenesis {
    pub l1: BlockId,
    pub l2: BlockId,
    pub l2_time: u64,
    pub system_config: SystemConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainOpConfig {
    #[serde(rename = "eip1559Elasticity")]
    pub eip1559_elasticity: u64,
    #[serde(rename = "eip1559Denominator")]
    pub eip1559_denominator: u64,
    #[serde(rename = "eip1559DenominatorCanyon")]
    pub eip1559_denominator_canyon: u64,
}

/// Rollup node configuration, in the node's snake_case JSON layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupConfig {
    pub genesis: RollupGenesis,
    pub block_time: u64,
    pub max_sequencer_drift: u64,
    pub seq_window_size: u64,
    pub channel_timeout: u64,
    pub l1_chain_id: u64,
    pub l2_chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regolith_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canyon_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecotone_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel2_time: Option<u64>,
    pub batch_inbox_address: Address,
    pub deposit_contract_address: Address,
    pub l1_system_config_address: Address,
    #[serde(default)]
    pub protocol_versions_address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_op_config: Option<ChainOpConfig>,
}

impl RollupConfig {
    /// Builds the config of a rollup starting at `l1_start` on L1, with
    /// `l2_genesis` (the transition block) as its first block.
    pub fn new(
        deploy: &DeployConfig,
        deployments: &L1Deployments,
        l1_start: &L1Block,
        l2_genesis: BlockId,
    ) -> Result<Self, MigrationError> {
        if deployments.optimism_portal_proxy.is_zero() {
            return Err(invalid("OptimismPortalProxy cannot be address(0)"));
        }
        if deployments.system_config_proxy.is_zero() {
            return Err(invalid("SystemConfigProxy cannot be address(0)"));
        }
        let genesis_time = l1_start.timestamp;
        let chain_op_config = (deploy.eip1559_denominator != 0).then_some(ChainOpConfig {
            eip1559_elasticity: deploy.eip1559_elasticity,
            eip1559_denominator: deploy.eip1559_denominator,
            eip1559_denominator_canyon: deploy.eip1559_denominator_canyon,
        });

        Ok(RollupConfig {
            genesis: RollupGenesis {
                l1: BlockId {
                    hash: l1_start.hash,
                    number: l1_start.number,
                },
                l2: l2_genesis,
                l2_time: genesis_time,
                system_config: SystemConfig {
                    batcher_addr: deploy.batch_sender_address,
                    overhead: u256_to_h256(U256::from(deploy.gas_price_oracle_overhead)),
                    scalar: deploy.fee_scalar(),
                    gas_limit: deploy.l2_genesis_block_gas_limit,
                },
            },
            block_time: deploy.l2_block_time,
            max_sequencer_drift: deploy.max_sequencer_drift,
            seq_window_size: deploy.sequencer_window_size,
            channel_timeout: deploy.channel_timeout,
            l1_chain_id: deploy.l1_chain_id,
            l2_chain_id: deploy.l2_chain_id,
            regolith_time: upgrade_time(deploy.l2_genesis_regolith_time_offset, genesis_time),
            canyon_time: upgrade_time(deploy.l2_genesis_canyon_time_offset, genesis_time),
            ecotone_time: upgrade_time(deploy.l2_genesis_ecotone_time_offset, genesis_time),
            cel2_time: Some(genesis_time),
            batch_inbox_address: deploy.batch_inbox_address,
            deposit_contract_address: deployments.optimism_portal_proxy,
            l1_system_config_address: deployments.system_config_proxy,
            protocol_versions_address: deployments.protocol_versions_proxy,
            chain_op_config,
        })
    }

    pub fn check(&self) -> Result<(), MigrationError> {
        let fail = |reason: &str| Err(invalid(format!("rollup config: {reason}")));
        if self.block_time == 0 {
            return fail("block time cannot be 0");
        }
        if self.channel_timeout == 0 {
            return fail("channel timeout must be set");
        }
        if self.seq_window_size < 2 {
            return fail("sequencing window size must be at least 2");
        }
        if self.genesis.l1.hash.is_zero() {
            return fail("genesis l1 hash cannot be empty");
        }
        if self.genesis.l2.hash.is_zero() {
            return fail("genesis l2 hash cannot be empty");
        }
        if self.genesis.system_config.gas_limit == 0 {
            return fail("genesis gas limit cannot be 0");
        }
        if self.l1_chain_id == 0 || self.l2_chain_id == 0 {
            return fail("chain ids cannot be 0");
        }
        if self.l1_chain_id == self.l2_chain_id {
            return fail("L1 and L2 chain ids must differ");
        }
        if self.batch_inbox_address.is_zero() {
            return fail("batch inbox address cannot be empty");
        }
        if self.deposit_contract_address.is_zero() {
            return fail("deposit contract address cannot be empty");
        }
        if self.l1_system_config_address.is_zero() {
            return fail("L1 system config address cannot be empty");
        }
        let forks = [self.regolith_time, self.canyon_time, self.ecotone_time];
        let scheduled: Vec<u64> = forks.into_iter().flatten().collect();
        if scheduled.windows(2).any(|pair| pair[0] > pair[1]) {
            return fail("forks must activate in order");
        }
        Ok(())
    }

    /// Writes the config as JSON to `path`, read-only for everyone but
    /// root once written.
    pub fn write(&self, path: &Path) -> Result<(), MigrationError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| invalid(format!("cannot encode rollup config: {e}")))?;
        if path.exists() {
            // a previous run leaves the file read-only
            fs::remove_file(path)?;
        }
        fs::write(path, json)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(ROLLUP_CONFIG_PERMISSIONS))?;
        }
        info!(file = %path.display(), "Wrote rollup config");
        Ok(())
    }
}
