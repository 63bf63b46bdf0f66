use bytes::BufMut;

use crate::{
    decode::{RLPDecode, decode_rlp_item, get_item_with_prefix},
    encode::{RLPEncode, encode_length},
    error::RLPDecodeError,
};

/// # Struct decoding helper
///
/// Used to decode a struct from RLP format.
/// The struct's fields must implement [`RLPDecode`] and are decoded in order.
///
/// ```
/// # use cel2_rlp::structs::Decoder;
/// # use cel2_rlp::error::RLPDecodeError;
/// # fn main() -> Result<(), RLPDecodeError> {
/// let rlp = [0xc2, 0x01, 0x02];
/// let decoder = Decoder::new(&rlp)?;
/// let (a, decoder): (u8, _) = decoder.decode_field("a")?;
/// let (b, decoder): (u8, _) = decoder.decode_field("b")?;
/// decoder.finish()?;
/// assert_eq!((a, b), (1, 2));
/// # Ok(())
/// # }
/// ```
#[must_use = "`Decoder` must be consumed with `finish` to perform decoding checks"]
#[derive(Debug)]
pub struct Decoder<'a> {
    payload: &'a [u8],
    remaining: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, RLPDecodeError> {
        match decode_rlp_item(buf)? {
            (true, payload, remaining) => Ok(Self { payload, remaining }),
            (false, _, _) => Err(RLPDecodeError::UnexpectedString),
        }
    }

    pub fn decode_field<T: RLPDecode>(self, name: &str) -> Result<(T, Self), RLPDecodeError> {
        let (field, rest) = <T as RLPDecode>::decode_unfinished(self.payload)
            .map_err(|err| field_decode_error::<T>(name, err))?;
        let updated_self = Self {
            payload: rest,
            ..self
        };
        Ok((field, updated_self))
    }

    /// Decodes the next field if there is one left, returning `None` otherwise
    /// or when it fails to decode.
    pub fn decode_optional_field<T: RLPDecode>(self) -> (Option<T>, Self) {
        match <T as RLPDecode>::decode_unfinished(self.payload) {
            Ok((field, rest)) => {
                let updated_self = Self {
                    payload: rest,
                    ..self
                };
                (Some(field), updated_self)
            }
            Err(_) => (None, self),
        }
    }

    /// Returns the next field without decoding it, prefix included.
    pub fn get_encoded_item(self) -> Result<(&'a [u8], Self), RLPDecodeError> {
        let (item, rest) = get_item_with_prefix(self.payload)?;
        let updated_self = Self {
            payload: rest,
            ..self
        };
        Ok((item, updated_self))
    }

    pub fn is_done(&self) -> bool {
        self.payload.is_empty()
    }

    /// Finishes decoding, returning the bytes after the struct.
    /// Fails if there are fields left to decode.
    pub fn finish(self) -> Result<&'a [u8], RLPDecodeError> {
        if self.is_done() {
            Ok(self.remaining)
        } else {
            Err(RLPDecodeError::MalformedData)
        }
    }
}

fn field_decode_error<T>(field_name: &str, err: RLPDecodeError) -> RLPDecodeError {
    let typ = std::any::type_name::<T>();
    let err_msg = format!("Error decoding field '{field_name}' of type {typ}: {err}");
    RLPDecodeError::Custom(err_msg)
}

/// # Struct encoding helper
///
/// Used to encode a struct into RLP format.
/// Fields are written in the order `encode_field` is called.
///
/// ```
/// # use cel2_rlp::structs::Encoder;
/// let mut buf = Vec::new();
/// Encoder::new(&mut buf)
///     .encode_field(&1u8)
///     .encode_field(&2u8)
///     .finish();
/// assert_eq!(buf, vec![0xc2, 0x01, 0x02]);
/// ```
#[must_use = "`Encoder` must be consumed with `finish` to perform the encoding"]
pub struct Encoder<'a> {
    buf: &'a mut dyn BufMut,
    temp_buf: Vec<u8>,
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut dyn BufMut) -> Self {
        Self {
            buf,
            temp_buf: Vec::new(),
        }
    }

    pub fn encode_field<T: RLPEncode + ?Sized>(mut self, value: &T) -> Self {
        value.encode(&mut self.temp_buf);
        self
    }

    /// Writes the field only when present. Optional fields must come last.
    pub fn encode_optional_field<T: RLPEncode>(mut self, opt_value: &Option<T>) -> Self {
        if let Some(value) = opt_value {
            value.encode(&mut self.temp_buf);
        }
        self
    }

    /// Writes an already encoded item as the next field.
    pub fn encode_raw(mut self, value: &[u8]) -> Self {
        self.temp_buf.put_slice(value);
        self
    }

    pub fn finish(mut self) {
        encode_length(self.temp_buf.len(), &mut *self.buf);
        self.buf.put_slice(&self.temp_buf);
    }
}
