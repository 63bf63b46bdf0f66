use bytes::{BufMut, Bytes};
use cel2_rlp::{
    constants::RLP_EMPTY_LIST,
    decode::{RLPDecode, decode_list_items, get_item_with_prefix},
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use ethereum_types::{Address, Bloom, H64, H256, U256};

use crate::utils::keccak;

pub type BlockNumber = u64;
pub type BlockHash = H256;

/// Number of fields of a header written before the chain adopted the
/// Ethereum header layout.
pub const LEGACY_HEADER_FIELDS: usize = 10;
/// Minimum number of fields of an Ethereum-layout header.
pub const ETHEREUM_HEADER_FIELDS: usize = 15;

/// Position of the extra data field for a header with `field_count` fields.
pub fn extra_data_index(field_count: usize) -> Option<usize> {
    match field_count {
        LEGACY_HEADER_FIELDS => Some(9),
        n if n >= ETHEREUM_HEADER_FIELDS => Some(12),
        _ => None,
    }
}

/// Block header.
///
/// Decodes both layouts the legacy chain has used. Legacy headers (no uncle
/// hash, difficulty, gas limit, mix digest nor nonce) come out with those
/// fields zeroed; encoding always produces the Ethereum layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub parent_hash: H256,
    pub ommers_hash: H256,
    pub coinbase: Address,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: BlockNumber,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub prev_randao: H256,
    pub nonce: H64,
    pub base_fee_per_gas: Option<u64>,
    pub withdrawals_root: Option<H256>,
    pub blob_gas_used: Option<u64>,
    pub excess_blob_gas: Option<u64>,
    pub parent_beacon_block_root: Option<H256>,
}

impl BlockHeader {
    pub fn hash(&self) -> BlockHash {
        keccak(self.encode_to_vec())
    }

    fn decode_legacy(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (parent_hash, decoder) = decoder.decode_field("parent_hash")?;
        let (coinbase, decoder) = decoder.decode_field("coinbase")?;
        let (state_root, decoder) = decoder.decode_field("state_root")?;
        let (transactions_root, decoder) = decoder.decode_field("transactions_root")?;
        let (receipts_root, decoder) = decoder.decode_field("receipts_root")?;
        let (logs_bloom, decoder) = decoder.decode_field("logs_bloom")?;
        let (number, decoder) = decoder.decode_field("number")?;
        let (gas_used, decoder) = decoder.decode_field("gas_used")?;
        let (timestamp, decoder) = decoder.decode_field("timestamp")?;
        let (extra_data, decoder) = decoder.decode_field("extra_data")?;
        let rest = decoder.finish()?;
        let header = BlockHeader {
            parent_hash,
            coinbase,
            state_root,
            transactions_root,
            receipts_root,
            logs_bloom,
            number,
            gas_used,
            timestamp,
            extra_data,
            ..Default::default()
        };
        Ok((header, rest))
    }

    fn decode_ethereum(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (parent_hash, decoder) = decoder.decode_field("parent_hash")?;
        let (ommers_hash, decoder) = decoder.decode_field("ommers_hash")?;
        let (coinbase, decoder) = decoder.decode_field("coinbase")?;
        let (state_root, decoder) = decoder.decode_field("state_root")?;
        let (transactions_root, decoder) = decoder.decode_field("transactions_root")?;
        let (receipts_root, decoder) = decoder.decode_field("receipts_root")?;
        let (logs_bloom, decoder) = decoder.decode_field("logs_bloom")?;
        let (difficulty, decoder) = decoder.decode_field("difficulty")?;
        let (number, decoder) = decoder.decode_field("number")?;
        let (gas_limit, decoder) = decoder.decode_field("gas_limit")?;
        let (gas_used, decoder) = decoder.decode_field("gas_used")?;
        let (timestamp, decoder) = decoder.decode_field("timestamp")?;
        let (extra_data, decoder) = decoder.decode_field("extra_data")?;
        let (prev_randao, decoder) = decoder.decode_field("prev_randao")?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (base_fee_per_gas, decoder) = decoder.decode_optional_field();
        let (withdrawals_root, decoder) = decoder.decode_optional_field();
        let (blob_gas_used, decoder) = decoder.decode_optional_field();
        let (excess_blob_gas, decoder) = decoder.decode_optional_field();
        let (parent_beacon_block_root, decoder) = decoder.decode_optional_field();
        let rest = decoder.finish()?;
        let header = BlockHeader {
            parent_hash,
            ommers_hash,
            coinbase,
            state_root,
            transactions_root,
            receipts_root,
            logs_bloom,
            difficulty,
            number,
            gas_limit,
            gas_used,
            timestamp,
            extra_data,
            prev_randao,
            nonce,
            base_fee_per_gas,
            withdrawals_root,
            blob_gas_used,
            excess_blob_gas,
            parent_beacon_block_root,
        };
        Ok((header, rest))
    }
}

impl RLPEncode for BlockHeader {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.parent_hash)
            .encode_field(&self.ommers_hash)
            .encode_field(&self.coinbase)
            .encode_field(&self.state_root)
            .encode_field(&self.transactions_root)
            .encode_field(&self.receipts_root)
            .encode_field(&self.logs_bloom)
            .encode_field(&self.difficulty)
            .encode_field(&self.number)
            .encode_field(&self.gas_limit)
            .encode_field(&self.gas_used)
            .encode_field(&self.timestamp)
            .encode_field(&self.extra_data)
            .encode_field(&self.prev_randao)
            .encode_field(&self.nonce)
            .encode_optional_field(&self.base_fee_per_gas)
            .encode_optional_field(&self.withdrawals_root)
            .encode_optional_field(&self.blob_gas_used)
            .encode_optional_field(&self.excess_blob_gas)
            .encode_optional_field(&self.parent_beacon_block_root)
            .finish();
    }
}

impl RLPDecode for BlockHeader {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (item, _) = get_item_with_prefix(rlp)?;
        match decode_list_items(item)?.len() {
            LEGACY_HEADER_FIELDS => Self::decode_legacy(rlp),
            n if n >= ETHEREUM_HEADER_FIELDS => Self::decode_ethereum(rlp),
            n => Err(RLPDecodeError::Custom(format!(
                "unexpected number of header fields: {n}"
            ))),
        }
    }
}

/// Block body in the L2 layout: `[transactions, uncles]`.
///
/// Transactions are kept as their encoded list, since the migration never
/// needs to look inside them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBody {
    pub transactions: Bytes,
}

impl BlockBody {
    pub fn empty() -> Self {
        Self {
            transactions: Bytes::from_static(&[RLP_EMPTY_LIST]),
        }
    }
}

impl RLPEncode for BlockBody {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_raw(&self.transactions)
            .encode_raw(&[RLP_EMPTY_LIST])
            .finish();
    }
}

/// Block body as written by the legacy chain:
/// `[transactions, randomness, epochSnarkData]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CeloBody {
    pub transactions: Bytes,
    pub randomness: Bytes,
    pub epoch_snark_data: Bytes,
}

impl RLPDecode for CeloBody {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (transactions, decoder) = decoder.get_encoded_item()?;
        let (randomness, decoder) = decoder.get_encoded_item()?;
        let (epoch_snark_data, decoder) = decoder.get_encoded_item()?;
        let rest = decoder.finish()?;
        let body = CeloBody {
            transactions: Bytes::copy_from_slice(transactions),
            randomness: Bytes::copy_from_slice(randomness),
            epoch_snark_data: Bytes::copy_from_slice(epoch_snark_data),
        };
        Ok((body, rest))
    }
}

impl From<CeloBody> for BlockBody {
    fn from(body: CeloBody) -> Self {
        BlockBody {
            transactions: body.transactions,
        }
    }
}
