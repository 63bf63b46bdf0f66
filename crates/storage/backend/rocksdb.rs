use std::path::{Path, PathBuf};

use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch};
use tracing::debug;

use crate::{
    api::{BatchOp, KeyValueStore, KvBatch},
    error::StoreError,
};

/// Live chain data kept in a RocksDB directory.
pub struct RocksDbStore {
    db: DBWithThreadMode<MultiThreaded>,
    path: PathBuf,
    read_only: bool,
}

impl RocksDbStore {
    /// Opens the database at `path`, creating it if missing.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path)?;
        debug!(path = %path.display(), "Opened key/value store");
        Ok(Self {
            db,
            path: path.to_path_buf(),
            read_only: false,
        })
    }

    /// Opens an existing database without the ability to modify it.
    pub fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        let opts = Options::default();
        let db = DBWithThreadMode::<MultiThreaded>::open_for_read_only(&opts, path, false)?;
        debug!(path = %path.display(), "Opened key/value store read-only");
        Ok(Self {
            db,
            path: path.to_path_buf(),
            read_only: true,
        })
    }

    /// Whether `path` holds a database this backend can open.
    pub fn exists(path: &Path) -> bool {
        path.join("CURRENT").is_file()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(())
    }
}

impl KeyValueStore for RocksDbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(key)?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        Ok(self.db.put(key, value)?)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        Ok(self.db.delete(key)?)
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put(key, value) => batch.put(key, value),
                BatchOp::Delete(key) => batch.delete(key),
            }
        }
        Ok(self.db.write(batch)?)
    }

    fn for_each_with_prefix(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));
        for entry in iter {
            let (key, value) = entry?;
            if !key.starts_with(prefix) {
                break;
            }
            f(&key, &value)?;
        }
        Ok(())
    }

    fn new_batch(&self) -> KvBatch<'_> {
        KvBatch::new(self)
    }
}
