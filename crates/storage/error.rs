use cel2_common::H256;
use cel2_rlp::error::RLPDecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("DecodeError: {0}")]
    RLPDecode(#[from] RLPDecodeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("Chain config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Snappy error: {0}")]
    Snappy(#[from] snap::Error),
    #[error("Ancient store error: {0}")]
    Freezer(String),
    #[error("Ancient store is inconsistent: {0}")]
    Invariant(String),
    #[error("Invalid value stored under {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("State root mismatch: expected {expected:#x}, computed {computed:#x}")]
    StateRootMismatch { expected: H256, computed: H256 },
    #[error("Store is read-only")]
    ReadOnly,
    #[error("{0}")]
    Custom(String),
}
