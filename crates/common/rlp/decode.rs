use bytes::Bytes;
use ethereum_types::{Bloom, H64, H160, H256, U256};

use crate::{constants::RLP_NULL, error::RLPDecodeError};

pub trait RLPDecode: Sized {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError>;

    fn decode(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let (decoded, remaining) = Self::decode_unfinished(rlp)?;
        if !remaining.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok(decoded)
    }
}

/// Location of the first item in `data`: whether it is a list, where its
/// payload starts and how long the payload is.
fn item_header(data: &[u8]) -> Result<(bool, usize, usize), RLPDecodeError> {
    let first = *data.first().ok_or(RLPDecodeError::InvalidLength)?;
    let (is_list, offset, len) = match first {
        0x00..=0x7f => return Ok((false, 0, 1)),
        0x80..=0xb7 => (false, 1, (first - RLP_NULL) as usize),
        0xb8..=0xbf => {
            let len_of_len = (first - 0xb7) as usize;
            let len = decode_length(data.get(1..1 + len_of_len))?;
            (false, 1 + len_of_len, len)
        }
        0xc0..=0xf7 => (true, 1, (first - 0xc0) as usize),
        0xf8..=0xff => {
            let len_of_len = (first - 0xf7) as usize;
            let len = decode_length(data.get(1..1 + len_of_len))?;
            (true, 1 + len_of_len, len)
        }
    };
    let end = offset
        .checked_add(len)
        .ok_or(RLPDecodeError::InvalidLength)?;
    if end > data.len() {
        return Err(RLPDecodeError::InvalidLength);
    }
    if !is_list && len == 1 && offset == 1 && data[1] < RLP_NULL {
        // single bytes below 0x80 must be encoded as themselves
        return Err(RLPDecodeError::MalformedData);
    }
    Ok((is_list, offset, len))
}

fn decode_length(be: Option<&[u8]>) -> Result<usize, RLPDecodeError> {
    let be = be.ok_or(RLPDecodeError::InvalidLength)?;
    if be.first() == Some(&0) {
        return Err(RLPDecodeError::MalformedData);
    }
    if be.len() > std::mem::size_of::<usize>() {
        return Err(RLPDecodeError::InvalidLength);
    }
    let len = be.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
    if len < 56 {
        return Err(RLPDecodeError::MalformedData);
    }
    Ok(len)
}

/// Decodes the first item of `data`.
/// Returns whether it is a list, its payload, and the bytes that follow it.
pub fn decode_rlp_item(data: &[u8]) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    let (is_list, offset, len) = item_header(data)?;
    Ok((is_list, &data[offset..offset + len], &data[offset + len..]))
}

/// Splits off the first item of `data`, prefix included.
pub fn get_item_with_prefix(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let (_, offset, len) = item_header(data)?;
    Ok(data.split_at(offset + len))
}

/// Decodes a byte string, failing on lists.
pub fn decode_bytes(data: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let (is_list, payload, rest) = decode_rlp_item(data)?;
    if is_list {
        return Err(RLPDecodeError::UnexpectedList);
    }
    Ok((payload, rest))
}

/// Splits an encoded list into its items, each one kept with its prefix.
pub fn decode_list_items(data: &[u8]) -> Result<Vec<&[u8]>, RLPDecodeError> {
    let (is_list, mut payload, rest) = decode_rlp_item(data)?;
    if !is_list {
        return Err(RLPDecodeError::UnexpectedString);
    }
    if !rest.is_empty() {
        return Err(RLPDecodeError::InvalidLength);
    }
    let mut items = Vec::new();
    while !payload.is_empty() {
        let (item, remaining) = get_item_with_prefix(payload)?;
        items.push(item);
        payload = remaining;
    }
    Ok(items)
}

fn static_left_pad<const N: usize>(data: &[u8]) -> Result<[u8; N], RLPDecodeError> {
    if data.len() > N {
        return Err(RLPDecodeError::InvalidLength);
    }
    if data.first() == Some(&0) {
        return Err(RLPDecodeError::MalformedData);
    }
    let mut padded = [0u8; N];
    padded[N - data.len()..].copy_from_slice(data);
    Ok(padded)
}

impl RLPDecode for bool {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        let value = match first {
            RLP_NULL => false,
            0x01 => true,
            _ => return Err(RLPDecodeError::MalformedBoolean),
        };
        Ok((value, &rlp[1..]))
    }
}

macro_rules! impl_decode_uint {
    ($($t:ty),*) => {
        $(
            impl RLPDecode for $t {
                fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                    let (bytes, rest) = decode_bytes(rlp)?;
                    let padded = static_left_pad::<{ std::mem::size_of::<$t>() }>(bytes)?;
                    Ok((<$t>::from_be_bytes(padded), rest))
                }
            }
        )*
    };
}

impl_decode_uint!(u8, u16, u32, u64, usize);

impl RLPDecode for U256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let padded = static_left_pad::<32>(bytes)?;
        Ok((U256::from_big_endian(&padded), rest))
    }
}

impl<const N: usize> RLPDecode for [u8; N] {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let value: [u8; N] = bytes
            .try_into()
            .map_err(|_| RLPDecodeError::InvalidLength)?;
        Ok((value, rest))
    }
}

macro_rules! impl_decode_hash {
    ($($t:ty),*) => {
        $(
            impl RLPDecode for $t {
                fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                    let (bytes, rest) = decode_bytes(rlp)?;
                    if bytes.len() != <$t>::len_bytes() {
                        return Err(RLPDecodeError::InvalidLength);
                    }
                    Ok((<$t>::from_slice(bytes), rest))
                }
            }
        )*
    };
}

impl_decode_hash!(H64, H160, H256, Bloom);

impl RLPDecode for Bytes {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((Bytes::copy_from_slice(bytes), rest))
    }
}

impl RLPDecode for String {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        let value = std::str::from_utf8(bytes).map_err(|_| RLPDecodeError::MalformedData)?;
        Ok((value.to_string(), rest))
    }
}

impl<T: RLPDecode> RLPDecode for Vec<T> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (is_list, mut payload, rest) = decode_rlp_item(rlp)?;
        if !is_list {
            return Err(RLPDecodeError::UnexpectedString);
        }
        let mut items = Vec::new();
        while !payload.is_empty() {
            let (item, remaining) = T::decode_unfinished(payload)?;
            items.push(item);
            payload = remaining;
        }
        Ok((items, rest))
    }
}
