use std::collections::BTreeMap;

use bytes::Bytes;
use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// Account allocated by the L2 genesis, applied on top of the migrated state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    #[serde(
        default,
        with = "crate::serde_utils::bytes",
        skip_serializing_if = "Bytes::is_empty"
    )]
    pub code: Bytes,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub storage: BTreeMap<H256, H256>,
    #[serde(default, with = "crate::serde_utils::u256::hex_or_dec")]
    pub balance: U256,
    #[serde(default, with = "crate::serde_utils::u64::hex_str")]
    pub nonce: u64,
}

/// Allocation set, iterated in ascending address order.
pub type GenesisAlloc = BTreeMap<Address, GenesisAccount>;

/// The parts of the L2 genesis the state migration consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Genesis {
    pub chain_id: u64,
    pub alloc: GenesisAlloc,
}

/// Allocs dumps come either as a bare address map or wrapped in `accounts`.
#[derive(Deserialize)]
#[serde(untagged)]
enum AllocsFile {
    Wrapped { accounts: GenesisAlloc },
    Bare(GenesisAlloc),
}

pub fn parse_allocs(json: &[u8]) -> Result<GenesisAlloc, serde_json::Error> {
    Ok(match serde_json::from_slice(json)? {
        AllocsFile::Wrapped { accounts } => accounts,
        AllocsFile::Bare(alloc) => alloc,
    })
}
