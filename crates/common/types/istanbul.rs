use bytes::{BufMut, Bytes};
use cel2_rlp::{
    decode::RLPDecode,
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::{Decoder, Encoder},
};
use ethereum_types::U256;

use crate::constants::ISTANBUL_EXTRA_VANITY;

/// BLS aggregated signature over a block, `[bitmap, signature, round]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IstanbulAggregatedSeal {
    pub bitmap: U256,
    pub signature: Bytes,
    pub round: U256,
}

impl IstanbulAggregatedSeal {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl RLPEncode for IstanbulAggregatedSeal {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.bitmap)
            .encode_field(&self.signature)
            .encode_field(&self.round)
            .finish();
    }
}

impl RLPDecode for IstanbulAggregatedSeal {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (bitmap, decoder) = decoder.decode_field("bitmap")?;
        let (signature, decoder) = decoder.decode_field("signature")?;
        let (round, decoder) = decoder.decode_field("round")?;
        let rest = decoder.finish()?;
        Ok((
            IstanbulAggregatedSeal {
                bitmap,
                signature,
                round,
            },
            rest,
        ))
    }
}

/// Validator data carried after the vanity bytes of a legacy header's extra
/// data. Validator set changes and the proposer seal are kept encoded since
/// they are written back untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IstanbulExtra {
    pub added_validators: Bytes,
    pub added_validators_public_keys: Bytes,
    pub removed_validators: Bytes,
    pub seal: Bytes,
    pub aggregated_seal: IstanbulAggregatedSeal,
    pub parent_aggregated_seal: IstanbulAggregatedSeal,
}

impl IstanbulExtra {
    /// Splits a header's extra data into its vanity prefix and validator data.
    pub fn from_extra_data(extra: &[u8]) -> Result<(&[u8], Self), RLPDecodeError> {
        if extra.len() < ISTANBUL_EXTRA_VANITY {
            return Err(RLPDecodeError::InvalidLength);
        }
        let (vanity, encoded) = extra.split_at(ISTANBUL_EXTRA_VANITY);
        Ok((vanity, Self::decode(encoded)?))
    }

    /// Inverse of [`from_extra_data`](Self::from_extra_data).
    pub fn to_extra_data(&self, vanity: &[u8]) -> Bytes {
        let mut extra = vanity.to_vec();
        self.encode(&mut extra);
        Bytes::from(extra)
    }

    /// Drops both aggregated seals, which are not covered by the block hash.
    pub fn clear_aggregated_seals(&mut self) {
        self.aggregated_seal = IstanbulAggregatedSeal::default();
        self.parent_aggregated_seal = IstanbulAggregatedSeal::default();
    }
}

impl RLPEncode for IstanbulExtra {
    fn encode(&self, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_raw(&self.added_validators)
            .encode_raw(&self.added_validators_public_keys)
            .encode_raw(&self.removed_validators)
            .encode_raw(&self.seal)
            .encode_field(&self.aggregated_seal)
            .encode_field(&self.parent_aggregated_seal)
            .finish();
    }
}

impl RLPDecode for IstanbulExtra {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let decoder = Decoder::new(rlp)?;
        let (added_validators, decoder) = decoder.get_encoded_item()?;
        let (added_validators_public_keys, decoder) = decoder.get_encoded_item()?;
        let (removed_validators, decoder) = decoder.get_encoded_item()?;
        let (seal, decoder) = decoder.get_encoded_item()?;
        let (aggregated_seal, decoder) = decoder.decode_field("aggregated_seal")?;
        let (parent_aggregated_seal, decoder) = decoder.decode_field("parent_aggregated_seal")?;
        let rest = decoder.finish()?;
        let extra = IstanbulExtra {
            added_validators: Bytes::copy_from_slice(added_validators),
            added_validators_public_keys: Bytes::copy_from_slice(added_validators_public_keys),
            removed_validators: Bytes::copy_from_slice(removed_validators),
            seal: Bytes::copy_from_slice(seal),
            aggregated_seal,
            parent_aggregated_seal,
        };
        Ok((extra, rest))
    }
}
