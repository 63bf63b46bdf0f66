use bytes::{BufMut, Bytes};
use ethereum_types::{Bloom, H64, H160, H256, U256};

use crate::constants::{RLP_EMPTY_LIST, RLP_NULL};

pub trait RLPEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn length(&self) -> usize {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf.len()
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

/// Writes the prefix of a list whose payload is `payload_len` bytes long.
pub fn encode_length(payload_len: usize, buf: &mut dyn BufMut) {
    if payload_len < 56 {
        buf.put_u8(RLP_EMPTY_LIST + payload_len as u8);
    } else {
        let be = payload_len.to_be_bytes();
        let start = be.iter().take_while(|b| **b == 0).count();
        buf.put_u8(0xf7 + (be.len() - start) as u8);
        buf.put_slice(&be[start..]);
    }
}

/// Total encoded size of a list whose payload is `payload_len` bytes long.
pub fn list_length(payload_len: usize) -> usize {
    if payload_len < 56 {
        1 + payload_len
    } else {
        let be = payload_len.to_be_bytes();
        let start = be.iter().take_while(|b| **b == 0).count();
        1 + (be.len() - start) + payload_len
    }
}

/// Writes `value` as an RLP byte string.
pub fn encode_bytes(value: &[u8], buf: &mut dyn BufMut) {
    match value.len() {
        1 if value[0] < RLP_NULL => buf.put_u8(value[0]),
        len if len < 56 => {
            buf.put_u8(RLP_NULL + len as u8);
            buf.put_slice(value);
        }
        len => {
            let be = len.to_be_bytes();
            let start = be.iter().take_while(|b| **b == 0).count();
            buf.put_u8(0xb7 + (be.len() - start) as u8);
            buf.put_slice(&be[start..]);
            buf.put_slice(value);
        }
    }
}

fn encode_trimmed(be: &[u8], buf: &mut dyn BufMut) {
    let start = be.iter().take_while(|b| **b == 0).count();
    encode_bytes(&be[start..], buf);
}

impl RLPEncode for bool {
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self {
            buf.put_u8(0x01);
        } else {
            buf.put_u8(RLP_NULL);
        }
    }
}

macro_rules! impl_encode_uint {
    ($($t:ty),*) => {
        $(
            impl RLPEncode for $t {
                fn encode(&self, buf: &mut dyn BufMut) {
                    encode_trimmed(&self.to_be_bytes(), buf);
                }
            }
        )*
    };
}

impl_encode_uint!(u8, u16, u32, u64, usize);

impl RLPEncode for U256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_trimmed(&self.to_big_endian(), buf);
    }
}

impl RLPEncode for [u8] {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl<const N: usize> RLPEncode for [u8; N] {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl RLPEncode for Bytes {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self, buf);
    }
}

impl RLPEncode for str {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

impl RLPEncode for String {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_bytes(self.as_bytes(), buf);
    }
}

macro_rules! impl_encode_hash {
    ($($t:ty),*) => {
        $(
            impl RLPEncode for $t {
                fn encode(&self, buf: &mut dyn BufMut) {
                    encode_bytes(self.as_bytes(), buf);
                }
            }
        )*
    };
}

impl_encode_hash!(H64, H160, H256, Bloom);

impl<T: RLPEncode> RLPEncode for Vec<T> {
    fn encode(&self, buf: &mut dyn BufMut) {
        let mut payload = Vec::new();
        for item in self {
            item.encode(&mut payload);
        }
        encode_length(payload.len(), buf);
        buf.put_slice(&payload);
    }
}

impl<T: RLPEncode + ?Sized> RLPEncode for &T {
    fn encode(&self, buf: &mut dyn BufMut) {
        (**self).encode(buf);
    }
}
