#[cfg(feature = "rocksdb")]
use std::path::Path;

use cel2_common::{
    H256,
    types::{BlockHeader, BlockNumber},
};
use cel2_rlp::decode::RLPDecode;
#[cfg(feature = "rocksdb")]
use tracing::debug;

#[cfg(feature = "rocksdb")]
use crate::backend::rocksdb::RocksDbStore;
use crate::{
    accessors,
    ancient::{Freezer, HASHES_TABLE, HEADERS_TABLE},
    api::KeyValueStore,
    error::StoreError,
};

/// A chain database: the live key/value store plus, optionally, the ancient
/// store holding the oldest blocks.
///
/// Header and canonical-hash reads fall back to the ancient store when the
/// key/value store has no entry.
pub struct ChainStore {
    kv: Box<dyn KeyValueStore>,
    ancients: Option<Freezer>,
}

impl std::fmt::Debug for ChainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStore")
            .field("ancients", &self.ancients.as_ref().map(Freezer::ancients))
            .finish_non_exhaustive()
    }
}

impl ChainStore {
    pub fn new(kv: impl KeyValueStore + 'static, ancients: Option<Freezer>) -> Self {
        Self {
            kv: Box::new(kv),
            ancients,
        }
    }

    /// Opens the database at `path`, with `path/ancient` as its (read-only)
    /// ancient store when present. A read-only open never modifies `path`.
    #[cfg(feature = "rocksdb")]
    pub fn open(path: &Path, read_only: bool) -> Result<Self, StoreError> {
        let kv = if read_only {
            RocksDbStore::open_read_only(path)?
        } else {
            RocksDbStore::open(path)?
        };
        let ancient_dir = path.join("ancient");
        let ancients = if ancient_dir.is_dir() {
            Some(Freezer::open(&ancient_dir, true)?)
        } else {
            None
        };
        debug!(
            path = %path.display(),
            read_only,
            ancients = ancients.as_ref().map(Freezer::ancients),
            "Opened chain store"
        );
        Ok(Self::new(kv, ancients))
    }

    pub fn kv(&self) -> &dyn KeyValueStore {
        self.kv.as_ref()
    }

    pub fn ancients(&self) -> Option<&Freezer> {
        self.ancients.as_ref()
    }

    pub fn read_head_header_hash(&self) -> Result<Option<H256>, StoreError> {
        accessors::read_head_header_hash(self.kv())
    }

    pub fn read_header_number(&self, hash: H256) -> Result<Option<BlockNumber>, StoreError> {
        accessors::read_header_number(self.kv(), hash)
    }

    pub fn read_canonical_hash(&self, number: BlockNumber) -> Result<Option<H256>, StoreError> {
        if let Some(hash) = accessors::read_canonical_hash(self.kv(), number)? {
            return Ok(Some(hash));
        }
        let Some(freezer) = &self.ancients else {
            return Ok(None);
        };
        match freezer.ancient(HASHES_TABLE, number)? {
            Some(hash) if hash.len() == 32 => Ok(Some(H256::from_slice(&hash))),
            Some(hash) => Err(StoreError::Invariant(format!(
                "ancient hash #{number} has unexpected length {}",
                hash.len()
            ))),
            None => Ok(None),
        }
    }

    pub fn read_header(
        &self,
        number: BlockNumber,
        hash: H256,
    ) -> Result<Option<BlockHeader>, StoreError> {
        if let Some(rlp) = accessors::read_header_rlp(self.kv(), number, hash)? {
            return Ok(Some(BlockHeader::decode(&rlp)?));
        }
        let Some(freezer) = &self.ancients else {
            return Ok(None);
        };
        // the ancient store only holds canonical headers
        if freezer.ancient(HASHES_TABLE, number)?.as_deref() != Some(hash.as_bytes()) {
            return Ok(None);
        }
        freezer
            .ancient(HEADERS_TABLE, number)?
            .map(|rlp| BlockHeader::decode(&rlp).map_err(StoreError::from))
            .transpose()
    }
}
