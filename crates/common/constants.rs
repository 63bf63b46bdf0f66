use ethereum_types::{Address, H160, H256};
use hex_literal::hex;

pub use cel2_trie::EMPTY_TRIE_HASH;

/// Root of an empty transactions or receipts trie.
pub const EMPTY_ROOT_HASH: H256 = EMPTY_TRIE_HASH;

/// `keccak256(rlp([]))`, the uncle hash of a block without uncles.
pub const EMPTY_UNCLE_HASH: H256 = H256(hex!(
    "1dcc4de8dec75d7aab85b567b6ccd41ad312451b948a7413f0a142fd40d49347"
));

/// `keccak256("")`
pub const EMPTY_CODE_HASH: H256 = H256(hex!(
    "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
));

/// L2 predeploy collecting sequencer fees; coinbase of the transition block.
pub const SEQUENCER_FEE_VAULT: Address = H160(hex!("4200000000000000000000000000000000000011"));

/// Extra data stamped into the transition block.
pub const MIGRATION_EXTRA_DATA: &[u8] = b"CeL2 migration";

/// Length of the vanity prefix of the legacy validator extra data.
pub const ISTANBUL_EXTRA_VANITY: usize = 32;

/// EIP-1559 parameters of the L2 chain.
pub const EIP1559_DENOMINATOR: u64 = 50;
pub const EIP1559_DENOMINATOR_CANYON: u64 = 250;
pub const EIP1559_ELASTICITY: u64 = 10;
