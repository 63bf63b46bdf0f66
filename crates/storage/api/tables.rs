//! Key prefixes of the geth rawdb schema.
//!
//! Composite keys are built in [`crate::schema`]; nothing else should
//! concatenate these by hand.

/// Head header hash: `"LastHeader"` => [`H256`](cel2_common::H256)
pub const HEAD_HEADER_KEY: &[u8] = b"LastHeader";

/// Head block hash: `"LastBlock"` => [`H256`](cel2_common::H256)
pub const HEAD_BLOCK_KEY: &[u8] = b"LastBlock";

/// Head fast-sync block hash: `"LastFast"` => [`H256`](cel2_common::H256)
pub const HEAD_FAST_BLOCK_KEY: &[u8] = b"LastFast";

/// Finalized block hash: `"LastFinalized"` => [`H256`](cel2_common::H256)
pub const FINALIZED_BLOCK_KEY: &[u8] = b"LastFinalized";

/// Last block rewritten by an interrupted non-ancient migration:
/// `"celoLastMigratedBlock"` => `u64` big endian
pub const LAST_MIGRATED_BLOCK_KEY: &[u8] = b"celoLastMigratedBlock";

/// Headers, total difficulties and canonical hashes share this prefix:
/// - `"h" + num + hash` => header RLP
/// - `"h" + num + hash + "t"` => total difficulty RLP
/// - `"h" + num + "n"` => canonical hash
pub const HEADER_PREFIX: u8 = b'h';
pub const HEADER_TD_SUFFIX: u8 = b't';
pub const HEADER_HASH_SUFFIX: u8 = b'n';

/// Block numbers: `"H" + hash` => `u64` big endian
pub const HEADER_NUMBER_PREFIX: u8 = b'H';

/// Block bodies: `"b" + num + hash` => body RLP
pub const BLOCK_BODY_PREFIX: u8 = b'b';

/// Block receipts: `"r" + num + hash` => receipts RLP
pub const BLOCK_RECEIPTS_PREFIX: u8 = b'r';

/// Contract code: `"c" + code hash` => bytecode
pub const CODE_PREFIX: u8 = b'c';

/// Snapshot accounts: `"a" + keccak(address)` => account RLP
pub const SNAPSHOT_ACCOUNT_PREFIX: u8 = b'a';

/// Snapshot storage: `"o" + keccak(address) + keccak(slot)` => value RLP
pub const SNAPSHOT_STORAGE_PREFIX: u8 = b'o';

/// Trie key preimages: `"secure-key-" + hash` => preimage
pub const PREIMAGE_PREFIX: &[u8] = b"secure-key-";

/// Chain configuration: `"ethereum-config-" + genesis hash` => JSON
pub const CONFIG_PREFIX: &[u8] = b"ethereum-config-";
