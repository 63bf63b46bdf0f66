//! Composite keys of the geth rawdb schema (`core/rawdb/schema.go`).
//!
//! | Data              | Key format                              |
//! |-------------------|-----------------------------------------|
//! | Canonical hash    | `"h" + num(8 BE) + "n"`                 |
//! | Block header      | `"h" + num(8 BE) + hash(32)`            |
//! | Total difficulty  | `"h" + num(8 BE) + hash(32) + "t"`      |
//! | Block number      | `"H" + hash(32)`                        |
//! | Block body        | `"b" + num(8 BE) + hash(32)`            |
//! | Block receipts    | `"r" + num(8 BE) + hash(32)`            |
//! | Contract code     | `"c" + code hash(32)`                   |
//! | Snapshot account  | `"a" + account hash(32)`                |
//! | Snapshot storage  | `"o" + account hash(32) + slot hash(32)`|
//! | Preimage          | `"secure-key-" + hash(32)`              |
//! | Trie node         | `node hash(32)`                         |
//! | Chain config      | `"ethereum-config-" + genesis hash(32)` |

use cel2_common::{H256, types::BlockNumber};

use crate::api::tables::{
    BLOCK_BODY_PREFIX, BLOCK_RECEIPTS_PREFIX, CODE_PREFIX, CONFIG_PREFIX, HEADER_HASH_SUFFIX,
    HEADER_NUMBER_PREFIX, HEADER_PREFIX, HEADER_TD_SUFFIX, PREIMAGE_PREFIX,
    SNAPSHOT_ACCOUNT_PREFIX, SNAPSHOT_STORAGE_PREFIX,
};

/// Length of a `"h" + num + hash` header key.
pub const HEADER_KEY_LEN: usize = 41;

fn block_key(prefix: u8, number: BlockNumber, hash: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(HEADER_KEY_LEN);
    key.push(prefix);
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(hash.as_bytes());
    key
}

/// `"h" + num(8 BE)`, shared by every header-table key of a block number.
pub fn header_number_prefix(number: BlockNumber) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(HEADER_PREFIX);
    key.extend_from_slice(&number.to_be_bytes());
    key
}

/// `"h" + num(8 BE) + "n"` → canonical block hash
pub fn canonical_hash_key(number: BlockNumber) -> Vec<u8> {
    let mut key = header_number_prefix(number);
    key.push(HEADER_HASH_SUFFIX);
    key
}

/// `"h" + num(8 BE) + hash(32)` → RLP-encoded block header
pub fn header_key(number: BlockNumber, hash: H256) -> Vec<u8> {
    block_key(HEADER_PREFIX, number, hash)
}

/// `"h" + num(8 BE) + hash(32) + "t"` → RLP-encoded total difficulty
pub fn header_td_key(number: BlockNumber, hash: H256) -> Vec<u8> {
    let mut key = header_key(number, hash);
    key.push(HEADER_TD_SUFFIX);
    key
}

/// `"H" + hash(32)` → block number (8-byte BE)
pub fn header_number_key(hash: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(HEADER_NUMBER_PREFIX);
    key.extend_from_slice(hash.as_bytes());
    key
}

/// `"b" + num(8 BE) + hash(32)` → RLP-encoded block body
pub fn block_body_key(number: BlockNumber, hash: H256) -> Vec<u8> {
    block_key(BLOCK_BODY_PREFIX, number, hash)
}

/// `"r" + num(8 BE) + hash(32)` → RLP-encoded block receipts
pub fn block_receipts_key(number: BlockNumber, hash: H256) -> Vec<u8> {
    block_key(BLOCK_RECEIPTS_PREFIX, number, hash)
}

pub fn code_key(code_hash: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(CODE_PREFIX);
    key.extend_from_slice(code_hash.as_bytes());
    key
}

pub fn account_snapshot_key(account_hash: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(SNAPSHOT_ACCOUNT_PREFIX);
    key.extend_from_slice(account_hash.as_bytes());
    key
}

/// `"o" + account hash`, shared by every storage slot of one account.
pub fn storage_snapshot_prefix(account_hash: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(65);
    key.push(SNAPSHOT_STORAGE_PREFIX);
    key.extend_from_slice(account_hash.as_bytes());
    key
}

pub fn storage_snapshot_key(account_hash: H256, slot_hash: H256) -> Vec<u8> {
    let mut key = storage_snapshot_prefix(account_hash);
    key.extend_from_slice(slot_hash.as_bytes());
    key
}

pub fn preimage_key(hash: H256) -> Vec<u8> {
    [PREIMAGE_PREFIX, hash.as_bytes()].concat()
}

/// Legacy hash-scheme trie nodes are keyed by their bare hash.
pub fn trie_node_key(node_hash: H256) -> Vec<u8> {
    node_hash.as_bytes().to_vec()
}

pub fn config_key(genesis_hash: H256) -> Vec<u8> {
    [CONFIG_PREFIX, genesis_hash.as_bytes()].concat()
}
