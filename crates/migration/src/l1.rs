//! L1 blocks the rollup is anchored to, fetched over JSON-RPC.
//!
//! Transient failures are retried with a doubling backoff; a rate-limited
//! node's `Retry-After` takes precedence over it.

use std::{fmt, str::FromStr, time::Duration};

use cel2_common::{H256, types::BlockNumber};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::MigrationError;

/// The L1 block fields the rollup configuration needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L1Block {
    pub hash: H256,
    pub number: BlockNumber,
    pub timestamp: u64,
}

/// A block reference by hash or by number.
///
/// Written as a hex string either way: 32-byte hashes are told apart from
/// numbers by their length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Hash(H256),
    Number(BlockNumber),
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Hash(hash) => write!(f, "{hash:#x}"),
            BlockTag::Number(number) => write!(f, "{number:#x}"),
        }
    }
}

impl FromStr for BlockTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(digits) = s.strip_prefix("0x") else {
            return s
                .parse()
                .map(BlockTag::Number)
                .map_err(|_| format!("invalid block tag {s}"));
        };
        if digits.len() == 64 {
            let bytes = hex::decode(digits).map_err(|e| format!("invalid block hash {s}: {e}"))?;
            return Ok(BlockTag::Hash(H256::from_slice(&bytes)));
        }
        u64::from_str_radix(digits, 16)
            .map(BlockTag::Number)
            .map_err(|e| format!("invalid block number {s}: {e}"))
    }
}

impl Serialize for BlockTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            String(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(number) => Ok(BlockTag::Number(number)),
            Raw::String(s) => s.parse().map_err(D::Error::custom),
        }
    }
}

/// Source of L1 blocks.
pub trait BlockSource {
    /// Block `number`, or the latest block when `None`.
    fn block_by_number(&self, number: Option<BlockNumber>) -> Result<L1Block, RpcError>;

    fn block_by_hash(&self, hash: H256) -> Result<L1Block, RpcError>;
}

/// Fetches the block the rollup starts from. Without a tag the latest block
/// is used, and `tag` is set to its hash.
pub fn resolve_l1_start(
    source: &dyn BlockSource,
    tag: &mut Option<BlockTag>,
) -> Result<L1Block, MigrationError> {
    let block = match *tag {
        None => {
            let block = source.block_by_number(None)?;
            *tag = Some(BlockTag::Hash(block.hash));
            block
        }
        Some(BlockTag::Hash(hash)) => source.block_by_hash(hash)?,
        Some(BlockTag::Number(number)) => source.block_by_number(Some(number))?,
    };
    info!(number = block.number, hash = %block.hash, "Using L1 start block");
    Ok(block)
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("cannot reach {url}: {cause}")]
    Transport { url: String, cause: String },

    #[error("{method} got no answer within {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("{method} returned HTTP {status}: {body}")]
    Http {
        method: String,
        status: u16,
        /// Seconds from the `Retry-After` header, when present.
        retry_after: Option<u64>,
        body: String,
    },

    #[error("{method} was rejected with code {code}: {message}")]
    Node {
        method: String,
        code: i64,
        message: String,
    },

    #[error("invalid `{field}` in the {method} response: {cause}")]
    Response {
        method: String,
        field: String,
        cause: String,
    },

    #[error("{method} still failing after {attempts} attempts: {last}")]
    GaveUp {
        method: String,
        attempts: u32,
        last: Box<RpcError>,
    },
}

impl RpcError {
    /// Transport failures, timeouts, rate limits and gateway errors may go
    /// away on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::Transport { .. } | RpcError::Timeout { .. } => true,
            RpcError::Http { status, .. } => matches!(*status, 429 | 502 | 503 | 504),
            RpcError::Node { .. } | RpcError::Response { .. } | RpcError::GaveUp { .. } => false,
        }
    }

    /// Delay requested by a rate-limiting node.
    pub fn requested_delay(&self) -> Option<Duration> {
        match self {
            RpcError::Http {
                status: 429,
                retry_after: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    fn response(method: &str, field: &str, cause: impl Into<String>) -> Self {
        RpcError::Response {
            method: method.into(),
            field: field.into(),
            cause: cause.into(),
        }
    }
}

/// Timeouts and retry policy of [`RpcBlockSource`].
#[derive(Debug, Clone)]
pub struct RpcClientOptions {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Attempts after the first one, only for transient errors.
    pub retries: u32,
    /// First backoff delay, doubled after every failed attempt.
    pub backoff: Duration,
}

impl Default for RpcClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retries: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// [`BlockSource`] over an Ethereum JSON-RPC endpoint, using blocking HTTP.
pub struct RpcBlockSource {
    http: reqwest::blocking::Client,
    url: String,
    options: RpcClientOptions,
}

impl RpcBlockSource {
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Self::with_options(url, RpcClientOptions::default())
    }

    pub fn with_options(url: &str, options: RpcClientOptions) -> Result<Self, RpcError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(|e| RpcError::Transport {
                url: url.to_string(),
                cause: e.to_string(),
            })?;
        Ok(Self {
            http,
            url: url.to_string(),
            options,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let attempts = self.options.retries.saturating_add(1);
        let mut backoff = self.options.backoff;
        let mut attempt = 1;
        loop {
            let err = match self.send(method, &request) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_transient() {
                return Err(err);
            }
            if attempt >= attempts {
                return Err(if attempt == 1 {
                    err
                } else {
                    RpcError::GaveUp {
                        method: method.into(),
                        attempts: attempt,
                        last: Box::new(err),
                    }
                });
            }
            let delay = err.requested_delay().unwrap_or(backoff);
            warn!(method, attempt, error = %err, ?delay, "L1 request failed, retrying");
            std::thread::sleep(delay);
            backoff = backoff.saturating_mul(2);
            attempt += 1;
        }
    }

    fn send(&self, method: &str, request: &Value) -> Result<Value, RpcError> {
        debug!(method, url = %self.url, "L1 request");
        let response = self.http.post(&self.url).json(request).send().map_err(|e| {
            if e.is_timeout() {
                RpcError::Timeout {
                    method: method.into(),
                    timeout: self.options.request_timeout,
                }
            } else {
                RpcError::Transport {
                    url: self.url.clone(),
                    cause: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok());
            return Err(RpcError::Http {
                method: method.into(),
                status: status.as_u16(),
                retry_after,
                body: response.text().unwrap_or_default(),
            });
        }

        let response: Value = response
            .json()
            .map_err(|e| RpcError::response(method, "body", e.to_string()))?;
        parse_response(method, response)
    }
}

impl BlockSource for RpcBlockSource {
    fn block_by_number(&self, number: Option<BlockNumber>) -> Result<L1Block, RpcError> {
        let tag = match number {
            Some(number) => format!("{number:#x}"),
            None => "latest".to_string(),
        };
        let result = self.call("eth_getBlockByNumber", json!([tag, false]))?;
        parse_block("eth_getBlockByNumber", &result)
    }

    fn block_by_hash(&self, hash: H256) -> Result<L1Block, RpcError> {
        let result = self.call("eth_getBlockByHash", json!([format!("{hash:#x}"), false]))?;
        parse_block("eth_getBlockByHash", &result)
    }
}

fn parse_response(method: &str, mut response: Value) -> Result<Value, RpcError> {
    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        return Err(RpcError::Node {
            method: method.into(),
            code,
            message,
        });
    }
    response
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| RpcError::response(method, "result", "missing result field"))
}

fn field<'a>(method: &str, block: &'a Value, name: &str) -> Result<&'a str, RpcError> {
    block
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::response(method, name, "missing or not a string"))
}

fn parse_u64(method: &str, name: &str, value: &str) -> Result<u64, RpcError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(digits, 16).map_err(|e| RpcError::response(method, name, e.to_string()))
}

fn parse_block(method: &str, block: &Value) -> Result<L1Block, RpcError> {
    if block.is_null() {
        return Err(RpcError::response(method, "result", "block not found"));
    }
    let hash = field(method, block, "hash")?;
    let hash = hex::decode(hash.strip_prefix("0x").unwrap_or(hash))
        .map_err(|e| RpcError::response(method, "hash", e.to_string()))?;
    if hash.len() != 32 {
        return Err(RpcError::response(
            method,
            "hash",
            format!("expected 32 bytes, got {}", hash.len()),
        ));
    }
    Ok(L1Block {
        hash: H256::from_slice(&hash),
        number: parse_u64(method, "number", field(method, block, "number")?)?,
        timestamp: parse_u64(method, "timestamp", field(method, block, "timestamp")?)?,
    })
}
