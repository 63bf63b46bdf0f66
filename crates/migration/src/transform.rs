//! Rewrites legacy headers and bodies into the layouts the L2 chain expects.
//!
//! Every function here is pure. Headers keep their field layout; only the
//! aggregated seals inside the validator extra data are cleared, since the
//! legacy chain never hashed them. The result must hash to the recorded
//! block hash, which [`check_hash`] enforces.

use cel2_common::{
    H256,
    types::{BlockBody, BlockNumber, CeloBody, IstanbulExtra, extra_data_index},
    utils::keccak,
};
use cel2_rlp::{
    decode::{RLPDecode, decode_bytes, decode_list_items, decode_rlp_item},
    encode::RLPEncode,
    error::RLPDecodeError,
    structs::Encoder,
};

use crate::error::MigrationError;

/// Clears both aggregated seals of a legacy header. Headers whose extra data
/// holds no validator data are returned unchanged.
pub fn transform_header(old: &[u8]) -> Result<Vec<u8>, MigrationError> {
    let fields = decode_list_items(old).map_err(MigrationError::format("header"))?;
    let index = extra_data_index(fields.len()).ok_or_else(|| MigrationError::Format {
        what: "header".to_string(),
        source: RLPDecodeError::Custom(format!("unexpected number of fields: {}", fields.len())),
    })?;
    let (extra, _) = decode_bytes(fields[index]).map_err(MigrationError::format("header extra data"))?;

    let Ok((vanity, mut istanbul)) = IstanbulExtra::from_extra_data(extra) else {
        return Ok(old.to_vec());
    };
    istanbul.clear_aggregated_seals();
    let new_extra = istanbul.to_extra_data(vanity).encode_to_vec();

    let mut new = Vec::with_capacity(old.len());
    let mut encoder = Encoder::new(&mut new);
    for (i, field) in fields.iter().enumerate() {
        encoder = if i == index {
            encoder.encode_raw(&new_extra)
        } else {
            encoder.encode_raw(field)
        };
    }
    encoder.finish();
    Ok(new)
}

/// `[transactions, randomness, epochSnarkData]` → `[transactions, []]`
pub fn transform_body(old: &[u8]) -> Result<Vec<u8>, MigrationError> {
    let body: BlockBody = CeloBody::decode(old)
        .map_err(MigrationError::format("body"))?
        .into();
    Ok(body.encode_to_vec())
}

pub fn hash_header(header: &[u8]) -> Result<H256, MigrationError> {
    let (is_list, _, rest) = decode_rlp_item(header).map_err(MigrationError::format("header"))?;
    if !is_list || !rest.is_empty() {
        return Err(MigrationError::Format {
            what: "header".to_string(),
            source: RLPDecodeError::UnexpectedString,
        });
    }
    Ok(keccak(header))
}

/// Whether `header` hashes to `expected`, and the hash it actually has.
pub fn verify_hash(header: &[u8], expected: H256) -> Result<(bool, H256), MigrationError> {
    let observed = hash_header(header)?;
    Ok((observed == expected, observed))
}

/// Fails with [`MigrationError::HashMismatch`] unless `header` hashes to
/// `expected`.
pub fn check_hash(number: BlockNumber, header: &[u8], expected: H256) -> Result<(), MigrationError> {
    match verify_hash(header, expected)? {
        (true, _) => Ok(()),
        (false, observed) => Err(MigrationError::HashMismatch {
            number,
            expected,
            observed,
        }),
    }
}
