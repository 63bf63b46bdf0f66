use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    api::{BatchOp, KeyValueStore, KvBatch},
    error::StoreError,
};

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

/// Key/value store kept entirely in memory. Clones share the same data.
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore(Arc<Mutex<Entries>>);

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, Entries>, StoreError> {
        self.0
            .lock()
            .map_err(|_| StoreError::Custom("Failed to lock the store".to_string()))
    }

    /// Copy of every entry, for comparing store contents.
    pub fn snapshot(&self) -> Result<Entries, StoreError> {
        Ok(self.inner()?.clone())
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner()?.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.inner()?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.inner()?.remove(key);
        Ok(())
    }

    fn write_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let mut entries = self.inner()?;
        for op in ops {
            match op {
                BatchOp::Put(key, value) => {
                    entries.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn for_each_with_prefix(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let entries = self.inner()?;
        for (key, value) in entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
        {
            f(key, value)?;
        }
        Ok(())
    }

    fn new_batch(&self) -> KvBatch<'_> {
        KvBatch::new(self)
    }
}
