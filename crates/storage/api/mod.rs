pub mod tables;

use crate::error::StoreError;

/// A single write queued in a [`KvBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Ordered byte-keyed store holding the live (non-ancient) chain data.
pub trait KeyValueStore: Send + Sync {
    /// Reads a value for the given key
    ///
    /// # Returns
    /// - `Ok(Some(value))` if the key exists
    /// - `Ok(None)` if the key does not exist
    /// - `Err(_)` on I/O or database errors
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    fn delete(&self, key: &[u8]) -> Result<(), StoreError>;

    /// Applies every operation or none of them.
    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError>;

    /// Calls `f` on every entry whose key starts with `prefix`, in key order.
    /// `f` must not access the store.
    fn for_each_with_prefix(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;

    fn new_batch(&self) -> KvBatch<'_>;

    /// Checks if a key exists in the database
    fn contains(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

/// Writes accumulated in memory and applied atomically by [`KvBatch::write`].
pub struct KvBatch<'a> {
    store: &'a dyn KeyValueStore,
    ops: Vec<BatchOp>,
}

impl<'a> KvBatch<'a> {
    pub fn new(store: &'a dyn KeyValueStore) -> Self {
        Self {
            store,
            ops: Vec::new(),
        }
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn write(self) -> Result<(), StoreError> {
        if self.ops.is_empty() {
            return Ok(());
        }
        self.store.write_batch(self.ops)
    }
}
