use bytes::{BufMut, Bytes};
use cel2_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use ethereum_types::{H256, U256};

use crate::constants::{EMPTY_CODE_HASH, EMPTY_TRIE_HASH};

/// Account as committed into the state trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountState {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: H256,
    pub code_hash: H256,
}

impl Default for AccountState {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            storage_root: EMPTY_TRIE_HASH,
            code_hash: EMPTY_CODE_HASH,
        }
    }
}

impl RLPEncode for AccountState {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.nonce)
            .encode_field(&self.balance)
            .encode_field(&self.storage_root)
            .encode_field(&self.code_hash)
            .finish();
    }
}

impl RLPDecode for AccountState {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (balance, decoder) = decoder.decode_field("balance")?;
        let (storage_root, decoder) = decoder.decode_field("storage_root")?;
        let (code_hash, decoder) = decoder.decode_field("code_hash")?;
        let state = AccountState {
            nonce,
            balance,
            storage_root,
            code_hash,
        };
        Ok((state, decoder.finish()?))
    }
}

impl AccountState {
    /// Decodes the snapshot ("slim") encoding, where an empty storage root or
    /// an empty code hash is stored as an empty string.
    pub fn decode_slim(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (nonce, decoder) = decoder.decode_field("nonce")?;
        let (balance, decoder) = decoder.decode_field("balance")?;
        let (storage_root, decoder): (Bytes, _) = decoder.decode_field("storage_root")?;
        let (code_hash, decoder): (Bytes, _) = decoder.decode_field("code_hash")?;
        decoder.finish()?;
        Ok(AccountState {
            nonce,
            balance,
            storage_root: expand_slim_hash(&storage_root, EMPTY_TRIE_HASH)?,
            code_hash: expand_slim_hash(&code_hash, EMPTY_CODE_HASH)?,
        })
    }

    pub fn encode_slim(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        Encoder::new(&mut buf)
            .encode_field(&self.nonce)
            .encode_field(&self.balance)
            .encode_field(slim_hash(&self.storage_root, EMPTY_TRIE_HASH))
            .encode_field(slim_hash(&self.code_hash, EMPTY_CODE_HASH))
            .finish();
        buf
    }
}

fn slim_hash<'a>(hash: &'a H256, empty: H256) -> &'a [u8] {
    if *hash == empty { &[] } else { hash.as_bytes() }
}

fn expand_slim_hash(bytes: &[u8], empty: H256) -> Result<H256, RLPDecodeError> {
    match bytes.len() {
        0 => Ok(empty),
        32 => Ok(H256::from_slice(bytes)),
        _ => Err(RLPDecodeError::InvalidLength),
    }
}
