use ethereum_types::{H256, U256};
use sha3::{Digest, Keccak256};

pub fn keccak(data: impl AsRef<[u8]>) -> H256 {
    H256(Keccak256::digest(data.as_ref()).into())
}

pub fn u256_to_h256(value: U256) -> H256 {
    H256(value.to_big_endian())
}

pub fn h256_to_u256(value: H256) -> U256 {
    U256::from_big_endian(value.as_bytes())
}
