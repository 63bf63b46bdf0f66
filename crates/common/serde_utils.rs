//! Serde helpers for the number and byte formats found in geth-style JSON.

pub mod u64 {
    use serde::Deserialize;

    /// A JSON number or a string holding either `0x`-prefixed hex or decimal digits.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    pub fn parse(value: &str) -> Result<u64, String> {
        match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            Some("") => Ok(0),
            Some(hex) => u64::from_str_radix(hex, 16).map_err(|e| format!("{value}: {e}")),
            None => value.parse().map_err(|e| format!("{value}: {e}")),
        }
    }

    pub mod hex_str {
        use super::{NumberOrString, parse};
        use serde::{Deserialize, Deserializer, Serializer, de::Error};

        pub fn deserialize<'de, D>(d: D) -> Result<u64, D::Error>
        where
            D: Deserializer<'de>,
        {
            match NumberOrString::deserialize(d)? {
                NumberOrString::Number(value) => Ok(value),
                NumberOrString::String(value) => parse(&value).map_err(D::Error::custom),
            }
        }

        pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&format!("{value:#x}"))
        }
    }

    pub mod hex_str_opt {
        use super::{NumberOrString, parse};
        use serde::{Deserialize, Deserializer, Serializer, de::Error};

        pub fn deserialize<'de, D>(d: D) -> Result<Option<u64>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<NumberOrString>::deserialize(d)? {
                None => Ok(None),
                Some(NumberOrString::Number(value)) => Ok(Some(value)),
                Some(NumberOrString::String(value)) => {
                    parse(&value).map(Some).map_err(D::Error::custom)
                }
            }
        }

        pub fn serialize<S>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(value) => serializer.serialize_str(&format!("{value:#x}")),
                None => serializer.serialize_none(),
            }
        }
    }
}

pub mod u256 {
    use ethereum_types::U256;
    use serde::Deserialize;

    /// Balances and difficulties: hex or decimal strings, or plain numbers.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Float(f64),
        String(String),
    }

    pub fn parse(value: &str) -> Result<U256, String> {
        match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
            Some("") => Ok(U256::zero()),
            Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| format!("{value}: {e}")),
            None => U256::from_dec_str(value).map_err(|e| format!("{value}: {e:?}")),
        }
    }

    pub mod hex_or_dec {
        use super::{Raw, parse};
        use ethereum_types::U256;
        use serde::{Deserialize, Deserializer, Serializer, de::Error};

        pub fn deserialize<'de, D>(d: D) -> Result<U256, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Raw::deserialize(d)? {
                Raw::Number(value) => Ok(U256::from(value)),
                Raw::Float(value) => {
                    // only reachable for integers too wide for u64
                    parse(&format!("{value:.0}")).map_err(D::Error::custom)
                }
                Raw::String(value) => parse(&value).map_err(D::Error::custom),
            }
        }

        pub fn serialize<S>(value: &U256, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            serializer.serialize_str(&format!("{value:#x}"))
        }
    }

    /// Written back as JSON numbers when they fit in 64 bits, decimal strings otherwise.
    pub mod number_opt {
        use super::{Raw, parse};
        use ethereum_types::U256;
        use serde::{Deserialize, Deserializer, Serializer, de::Error};

        pub fn deserialize<'de, D>(d: D) -> Result<Option<U256>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<Raw>::deserialize(d)? {
                None => Ok(None),
                Some(Raw::Number(value)) => Ok(Some(U256::from(value))),
                Some(Raw::Float(value)) => parse(&format!("{value:.0}"))
                    .map(Some)
                    .map_err(D::Error::custom),
                Some(Raw::String(value)) => parse(&value).map(Some).map_err(D::Error::custom),
            }
        }

        pub fn serialize<S>(value: &Option<U256>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                None => serializer.serialize_none(),
                Some(value) if value.bits() <= 64 => serializer.serialize_u64(value.low_u64()),
                Some(value) => serializer.serialize_str(&value.to_string()),
            }
        }
    }
}

pub mod bytes {
    use ::bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn deserialize<'de, D>(d: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(d)?;
        let hex_str = value.strip_prefix("0x").unwrap_or(&value);
        hex::decode(hex_str)
            .map(Bytes::from)
            .map_err(|e| D::Error::custom(e.to_string()))
    }

    pub fn serialize<S>(value: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(value)))
    }
}
