//! Typed reads and writes over the rawdb key schema.
//!
//! Reads go straight to a [`KeyValueStore`]; writes are queued on a
//! [`KvBatch`] so callers decide what must land atomically.

use cel2_common::{
    H256, U256,
    types::{BlockHeader, BlockNumber, ChainConfig},
};
use cel2_rlp::{decode::RLPDecode, encode::RLPEncode};

use crate::{
    api::{
        KeyValueStore, KvBatch,
        tables::{
            FINALIZED_BLOCK_KEY, HEAD_BLOCK_KEY, HEAD_FAST_BLOCK_KEY, HEAD_HEADER_KEY,
            LAST_MIGRATED_BLOCK_KEY,
        },
    },
    error::StoreError,
    schema::{
        HEADER_KEY_LEN, block_body_key, block_receipts_key, canonical_hash_key, config_key,
        header_key, header_number_key, header_number_prefix, header_td_key,
    },
};

fn decode_hash(key: &[u8], value: Vec<u8>) -> Result<H256, StoreError> {
    if value.len() != 32 {
        return Err(StoreError::InvalidValue {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: format!("expected a 32-byte hash, got {} bytes", value.len()),
        });
    }
    Ok(H256::from_slice(&value))
}

fn decode_number(key: &[u8], value: Vec<u8>) -> Result<BlockNumber, StoreError> {
    let bytes: [u8; 8] = value
        .as_slice()
        .try_into()
        .map_err(|_| StoreError::InvalidValue {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: format!("expected an 8-byte number, got {} bytes", value.len()),
        })?;
    Ok(u64::from_be_bytes(bytes))
}

fn read_hash(kv: &dyn KeyValueStore, key: &[u8]) -> Result<Option<H256>, StoreError> {
    kv.get(key)?.map(|value| decode_hash(key, value)).transpose()
}

fn read_number(kv: &dyn KeyValueStore, key: &[u8]) -> Result<Option<BlockNumber>, StoreError> {
    kv.get(key)?.map(|value| decode_number(key, value)).transpose()
}

pub fn read_head_header_hash(kv: &dyn KeyValueStore) -> Result<Option<H256>, StoreError> {
    read_hash(kv, HEAD_HEADER_KEY)
}

pub fn read_head_block_hash(kv: &dyn KeyValueStore) -> Result<Option<H256>, StoreError> {
    read_hash(kv, HEAD_BLOCK_KEY)
}

pub fn read_head_fast_block_hash(kv: &dyn KeyValueStore) -> Result<Option<H256>, StoreError> {
    read_hash(kv, HEAD_FAST_BLOCK_KEY)
}

pub fn read_finalized_block_hash(kv: &dyn KeyValueStore) -> Result<Option<H256>, StoreError> {
    read_hash(kv, FINALIZED_BLOCK_KEY)
}

pub fn read_header_number(
    kv: &dyn KeyValueStore,
    hash: H256,
) -> Result<Option<BlockNumber>, StoreError> {
    read_number(kv, &header_number_key(hash))
}

pub fn read_canonical_hash(
    kv: &dyn KeyValueStore,
    number: BlockNumber,
) -> Result<Option<H256>, StoreError> {
    read_hash(kv, &canonical_hash_key(number))
}

pub fn read_header_rlp(
    kv: &dyn KeyValueStore,
    number: BlockNumber,
    hash: H256,
) -> Result<Option<Vec<u8>>, StoreError> {
    kv.get(&header_key(number, hash))
}

pub fn read_header(
    kv: &dyn KeyValueStore,
    number: BlockNumber,
    hash: H256,
) -> Result<Option<BlockHeader>, StoreError> {
    read_header_rlp(kv, number, hash)?
        .map(|rlp| BlockHeader::decode(&rlp).map_err(StoreError::from))
        .transpose()
}

pub fn read_body_rlp(
    kv: &dyn KeyValueStore,
    number: BlockNumber,
    hash: H256,
) -> Result<Option<Vec<u8>>, StoreError> {
    kv.get(&block_body_key(number, hash))
}

pub fn read_receipts_rlp(
    kv: &dyn KeyValueStore,
    number: BlockNumber,
    hash: H256,
) -> Result<Option<Vec<u8>>, StoreError> {
    kv.get(&block_receipts_key(number, hash))
}

pub fn read_td(
    kv: &dyn KeyValueStore,
    number: BlockNumber,
    hash: H256,
) -> Result<Option<U256>, StoreError> {
    kv.get(&header_td_key(number, hash))?
        .map(|rlp| U256::decode(&rlp).map_err(StoreError::from))
        .transpose()
}

/// Every `(number, hash)` with a header key in `[from, to]`, canonical or
/// not, ordered by number then hash.
pub fn read_all_hashes_in_range(
    kv: &dyn KeyValueStore,
    from: BlockNumber,
    to: BlockNumber,
) -> Result<Vec<(BlockNumber, H256)>, StoreError> {
    let mut hashes = Vec::new();
    for number in from..=to {
        kv.for_each_with_prefix(&header_number_prefix(number), &mut |key, _| {
            // skips the canonical-hash and td keys sharing the prefix
            if key.len() == HEADER_KEY_LEN {
                hashes.push((number, H256::from_slice(&key[9..])));
            }
            Ok(())
        })?;
    }
    Ok(hashes)
}

pub fn read_chain_config(
    kv: &dyn KeyValueStore,
    genesis_hash: H256,
) -> Result<Option<ChainConfig>, StoreError> {
    kv.get(&config_key(genesis_hash))?
        .map(|json| serde_json::from_slice(&json).map_err(StoreError::from))
        .transpose()
}

pub fn read_last_migrated_block(kv: &dyn KeyValueStore) -> Result<Option<BlockNumber>, StoreError> {
    read_number(kv, LAST_MIGRATED_BLOCK_KEY)
}

/// Writes the header under its `"h" + num + hash` key only.
pub fn write_header(batch: &mut KvBatch<'_>, number: BlockNumber, hash: H256, rlp: &[u8]) {
    batch.put(header_key(number, hash), rlp);
}

pub fn write_header_number(batch: &mut KvBatch<'_>, hash: H256, number: BlockNumber) {
    batch.put(header_number_key(hash), number.to_be_bytes());
}

pub fn write_body(batch: &mut KvBatch<'_>, number: BlockNumber, hash: H256, rlp: &[u8]) {
    batch.put(block_body_key(number, hash), rlp);
}

pub fn write_receipts(batch: &mut KvBatch<'_>, number: BlockNumber, hash: H256, rlp: &[u8]) {
    batch.put(block_receipts_key(number, hash), rlp);
}

pub fn write_td(batch: &mut KvBatch<'_>, number: BlockNumber, hash: H256, td: U256) {
    batch.put(header_td_key(number, hash), td.encode_to_vec());
}

pub fn write_canonical_hash(batch: &mut KvBatch<'_>, number: BlockNumber, hash: H256) {
    batch.put(canonical_hash_key(number), hash.as_bytes());
}

pub fn write_head_header_hash(batch: &mut KvBatch<'_>, hash: H256) {
    batch.put(HEAD_HEADER_KEY, hash.as_bytes());
}

pub fn write_head_block_hash(batch: &mut KvBatch<'_>, hash: H256) {
    batch.put(HEAD_BLOCK_KEY, hash.as_bytes());
}

pub fn write_head_fast_block_hash(batch: &mut KvBatch<'_>, hash: H256) {
    batch.put(HEAD_FAST_BLOCK_KEY, hash.as_bytes());
}

pub fn write_finalized_block_hash(batch: &mut KvBatch<'_>, hash: H256) {
    batch.put(FINALIZED_BLOCK_KEY, hash.as_bytes());
}

pub fn write_chain_config(
    batch: &mut KvBatch<'_>,
    genesis_hash: H256,
    config: &ChainConfig,
) -> Result<(), StoreError> {
    batch.put(config_key(genesis_hash), serde_json::to_vec(config)?);
    Ok(())
}

pub fn write_last_migrated_block(batch: &mut KvBatch<'_>, number: BlockNumber) {
    batch.put(LAST_MIGRATED_BLOCK_KEY, number.to_be_bytes());
}

pub fn delete_last_migrated_block(batch: &mut KvBatch<'_>) {
    batch.delete(LAST_MIGRATED_BLOCK_KEY);
}

/// Removes the header, body, receipts and total difficulty of a block, but
/// not its `"H" + hash` number entry.
pub fn delete_block_without_number(batch: &mut KvBatch<'_>, number: BlockNumber, hash: H256) {
    batch.delete(header_key(number, hash));
    batch.delete(block_body_key(number, hash));
    batch.delete(block_receipts_key(number, hash));
    batch.delete(header_td_key(number, hash));
}

pub fn delete_canonical_hash(batch: &mut KvBatch<'_>, number: BlockNumber) {
    batch.delete(canonical_hash_key(number));
}
