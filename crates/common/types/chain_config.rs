use ethereum_types::U256;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chain configuration as stored under `ethereum-config-<genesis hash>`.
///
/// Only the fork schedule entries touched by the migration are typed; every
/// other key is carried through `extra` so a rewrite never loses settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub berlin_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub london_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrow_glacier_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gray_glacier_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_netsplit_block: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedrock_block: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shanghai_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancun_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regolith_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canyon_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecotone_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel2_time: Option<u64>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::serde_utils::u256::number_opt"
    )]
    pub terminal_total_difficulty: Option<U256>,
    #[serde(default)]
    pub terminal_total_difficulty_passed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimism: Option<OptimismConfig>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// EIP-1559 parameters of an OP-stack chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimismConfig {
    pub eip1559_elasticity: u64,
    pub eip1559_denominator: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eip1559_denominator_canyon: Option<u64>,
}
