use std::fmt;

use cel2_common::{H256, types::BlockNumber};
use cel2_rlp::error::RLPDecodeError;
use cel2_storage::StoreError;

use crate::l1::RpcError;

/// The three stages of the ancients pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reader,
    Transformer,
    Writer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Reader => write!(f, "reader"),
            Stage::Transformer => write!(f, "transformer"),
            Stage::Writer => write!(f, "writer"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Malformed {what}: {source}")]
    Format {
        what: String,
        #[source]
        source: RLPDecodeError,
    },
    #[error("Hash mismatch at block {number}: expected {expected:#x}, got {observed:#x}")]
    HashMismatch {
        number: BlockNumber,
        expected: H256,
        observed: H256,
    },
    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },
    #[error("Missing dependency: {0}")]
    MissingDependency(String),
    #[error("Migration canceled")]
    Canceled,
    #[error("Invariant violated: {0}")]
    Invariant(String),
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<MigrationError>,
    },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for MigrationError {
    fn from(source: StoreError) -> Self {
        MigrationError::store("store operation failed")(source)
    }
}

impl MigrationError {
    /// Wraps store errors with what was being done, for use with `map_err`.
    /// Inconsistent stores surface as [`MigrationError::Invariant`].
    pub fn store(context: impl Into<String>) -> impl FnOnce(StoreError) -> MigrationError {
        let context = context.into();
        move |source| match source {
            StoreError::Invariant(reason) => MigrationError::Invariant(format!("{context}: {reason}")),
            source => MigrationError::Store { context, source },
        }
    }

    pub fn format(what: impl Into<String>) -> impl FnOnce(RLPDecodeError) -> MigrationError {
        let what = what.into();
        move |source| MigrationError::Format { what, source }
    }

    pub fn is_canceled(&self) -> bool {
        match self {
            MigrationError::Canceled => true,
            MigrationError::Stage { source, .. } => source.is_canceled(),
            _ => false,
        }
    }
}
