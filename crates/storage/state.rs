//! Account state on top of geth's flat snapshot layout.
//!
//! The snapshot holds every account under `"a" + keccak(address)` and every
//! storage slot under `"o" + keccak(address) + keccak(slot)`; the state root
//! is the Merkle-Patricia root over those entries. Accounts are stored in
//! the slim encoding, with empty storage roots and code hashes elided.
//! Committing also writes the trie nodes under their hashes.

use std::collections::{BTreeMap, btree_map::Entry};

use cel2_common::{
    Address, Bytes, H256, U256,
    constants::EMPTY_CODE_HASH,
    types::{AccountState, BlockNumber},
    utils::{h256_to_u256, keccak},
};
use cel2_rlp::encode::RLPEncode;
use cel2_trie::{TrieNodes, trie_root, trie_root_with_nodes};
use tracing::debug;

use crate::{
    api::{KeyValueStore, KvBatch, tables::SNAPSHOT_ACCOUNT_PREFIX},
    error::StoreError,
    schema::{
        account_snapshot_key, code_key, preimage_key, storage_snapshot_key,
        storage_snapshot_prefix, trie_node_key,
    },
};

/// Mutable view of the world state used to apply genesis allocations.
pub trait StateDb {
    fn exist(&self, address: Address) -> Result<bool, StoreError>;

    fn get_balance(&self, address: Address) -> Result<U256, StoreError>;

    fn get_code(&self, address: Address) -> Result<Bytes, StoreError>;

    /// Replaces the account at `address` with an empty one, keeping only its
    /// balance.
    fn create_account(&mut self, address: Address) -> Result<(), StoreError>;

    fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), StoreError>;

    fn set_balance(&mut self, address: Address, balance: U256) -> Result<(), StoreError>;

    fn set_code(&mut self, address: Address, code: Bytes) -> Result<(), StoreError>;

    /// Replaces the whole storage of `address`.
    fn set_storage(
        &mut self,
        address: Address,
        storage: BTreeMap<H256, H256>,
    ) -> Result<(), StoreError>;

    /// Computes the state root including every pending change. Nothing is
    /// written.
    fn commit(&mut self, block: BlockNumber) -> Result<H256, StoreError>;

    /// Persists the changes committed as `root`.
    fn commit_trie(&mut self, root: H256) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct DirtyAccount {
    info: AccountState,
    /// New code, if it was replaced.
    code: Option<Bytes>,
    /// New storage, if it was replaced.
    storage: Option<BTreeMap<H256, H256>>,
}

impl DirtyAccount {
    fn untouched(info: AccountState) -> Self {
        Self {
            info,
            code: None,
            storage: None,
        }
    }
}

fn encode_storage_value(value: &H256) -> Vec<u8> {
    h256_to_u256(*value).encode_to_vec()
}

fn storage_leaves(storage: &BTreeMap<H256, H256>) -> impl Iterator<Item = (H256, Vec<u8>)> + '_ {
    storage
        .iter()
        .filter(|(_, value)| !value.is_zero())
        .map(|(slot, value)| (keccak(slot), encode_storage_value(value)))
}

fn storage_root(storage: &BTreeMap<H256, H256>) -> H256 {
    trie_root(storage_leaves(storage))
}

fn account_leaves<'s>(
    accounts: impl Iterator<Item = (&'s H256, &'s AccountState)>,
) -> impl Iterator<Item = (H256, Vec<u8>)> {
    accounts.map(|(hash, account)| (*hash, account.encode_to_vec()))
}

fn put_nodes(batch: &mut KvBatch<'_>, nodes: TrieNodes) -> usize {
    let count = nodes.len();
    for (hash, node) in nodes {
        batch.put(trie_node_key(hash), node);
    }
    count
}

/// [`StateDb`] over a snapshot in a [`KeyValueStore`]. Changes stay in memory
/// until [`commit_trie`](StateDb::commit_trie).
pub struct SnapshotStateDb<'a> {
    kv: &'a dyn KeyValueStore,
    root: H256,
    /// Accounts as of `root`, by address hash.
    accounts: BTreeMap<H256, AccountState>,
    dirty: BTreeMap<Address, DirtyAccount>,
    /// Root and account updates of the last `commit`.
    pending: Option<(H256, BTreeMap<H256, AccountState>)>,
}

impl<'a> SnapshotStateDb<'a> {
    /// Loads the snapshot and checks that it hashes to `root`.
    pub fn open(kv: &'a dyn KeyValueStore, root: H256) -> Result<Self, StoreError> {
        let mut accounts = BTreeMap::new();
        kv.for_each_with_prefix(&[SNAPSHOT_ACCOUNT_PREFIX], &mut |key, value| {
            if key.len() == 33 {
                let account = AccountState::decode_slim(value)?;
                accounts.insert(H256::from_slice(&key[1..]), account);
            }
            Ok(())
        })?;

        let computed = trie_root(account_leaves(accounts.iter()));
        if computed != root {
            return Err(StoreError::StateRootMismatch {
                expected: root,
                computed,
            });
        }
        debug!(%root, accounts = accounts.len(), "Opened snapshot state");
        Ok(Self {
            kv,
            root,
            accounts,
            dirty: BTreeMap::new(),
            pending: None,
        })
    }

    pub fn root(&self) -> H256 {
        self.root
    }

    fn account(&self, address: Address) -> Result<Option<AccountState>, StoreError> {
        match self.dirty.get(&address) {
            Some(dirty) => Ok(Some(dirty.info)),
            None => Ok(self.accounts.get(&keccak(address)).copied()),
        }
    }

    fn account_mut(&mut self, address: Address) -> Result<&mut DirtyAccount, StoreError> {
        self.pending = None;
        match self.dirty.entry(address) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let info = self
                    .accounts
                    .get(&keccak(address))
                    .copied()
                    .unwrap_or_default();
                Ok(entry.insert(DirtyAccount::untouched(info)))
            }
        }
    }
}

impl StateDb for SnapshotStateDb<'_> {
    fn exist(&self, address: Address) -> Result<bool, StoreError> {
        Ok(self.account(address)?.is_some())
    }

    fn get_balance(&self, address: Address) -> Result<U256, StoreError> {
        Ok(self
            .account(address)?
            .map(|account| account.balance)
            .unwrap_or_default())
    }

    fn get_code(&self, address: Address) -> Result<Bytes, StoreError> {
        if let Some(code) = self.dirty.get(&address).and_then(|dirty| dirty.code.as_ref()) {
            return Ok(code.clone());
        }
        let code_hash = match self.account(address)? {
            Some(account) if account.code_hash != EMPTY_CODE_HASH => account.code_hash,
            _ => return Ok(Bytes::new()),
        };
        let key = code_key(code_hash);
        self.kv
            .get(&key)?
            .map(Bytes::from)
            .ok_or_else(|| StoreError::InvalidValue {
                key: format!("{code_hash:#x}"),
                reason: format!("missing code of account {address:#x}"),
            })
    }

    fn create_account(&mut self, address: Address) -> Result<(), StoreError> {
        let balance = self.get_balance(address)?;
        self.pending = None;
        self.dirty.insert(
            address,
            DirtyAccount {
                info: AccountState {
                    balance,
                    ..Default::default()
                },
                code: Some(Bytes::new()),
                storage: Some(BTreeMap::new()),
            },
        );
        Ok(())
    }

    fn set_nonce(&mut self, address: Address, nonce: u64) -> Result<(), StoreError> {
        self.account_mut(address)?.info.nonce = nonce;
        Ok(())
    }

    fn set_balance(&mut self, address: Address, balance: U256) -> Result<(), StoreError> {
        self.account_mut(address)?.info.balance = balance;
        Ok(())
    }

    fn set_code(&mut self, address: Address, code: Bytes) -> Result<(), StoreError> {
        let account = self.account_mut(address)?;
        account.info.code_hash = keccak(&code);
        account.code = Some(code);
        Ok(())
    }

    fn set_storage(
        &mut self,
        address: Address,
        storage: BTreeMap<H256, H256>,
    ) -> Result<(), StoreError> {
        let account = self.account_mut(address)?;
        account.info.storage_root = storage_root(&storage);
        account.storage = Some(storage);
        Ok(())
    }

    fn commit(&mut self, block: BlockNumber) -> Result<H256, StoreError> {
        let updates: BTreeMap<H256, AccountState> = self
            .dirty
            .iter()
            .map(|(address, account)| (keccak(address), account.info))
            .collect();
        // later entries win, so updates shadow committed accounts
        let root = trie_root(account_leaves(self.accounts.iter().chain(updates.iter())));
        debug!(block, %root, updated = updates.len(), "Computed state root");
        self.pending = Some((root, updates));
        Ok(root)
    }

    fn commit_trie(&mut self, root: H256) -> Result<(), StoreError> {
        let Some((computed, updates)) = self.pending.take() else {
            return Err(StoreError::Custom(
                "state changes must be committed before writing the trie".to_string(),
            ));
        };
        if computed != root {
            return Err(StoreError::StateRootMismatch {
                expected: root,
                computed,
            });
        }

        let (_, account_nodes) =
            trie_root_with_nodes(account_leaves(self.accounts.iter().chain(updates.iter())));
        let mut batch = self.kv.new_batch();
        let mut nodes = put_nodes(&mut batch, account_nodes);
        for (address, account) in &self.dirty {
            let hash = keccak(address);
            batch.put(account_snapshot_key(hash), account.info.encode_slim());
            batch.put(preimage_key(hash), address.as_bytes());
            if let Some(code) = account.code.as_ref().filter(|code| !code.is_empty()) {
                batch.put(code_key(account.info.code_hash), code.to_vec());
            }
            let Some(storage) = &account.storage else {
                continue;
            };
            let (_, storage_nodes) = trie_root_with_nodes(storage_leaves(storage));
            nodes += put_nodes(&mut batch, storage_nodes);
            let mut stale = Vec::new();
            self.kv
                .for_each_with_prefix(&storage_snapshot_prefix(hash), &mut |key, _| {
                    stale.push(key.to_vec());
                    Ok(())
                })?;
            for key in stale {
                batch.delete(key);
            }
            for (slot, value) in storage {
                let slot_hash = keccak(slot);
                batch.put(preimage_key(slot_hash), slot.as_bytes());
                if !value.is_zero() {
                    batch.put(
                        storage_snapshot_key(hash, slot_hash),
                        encode_storage_value(value),
                    );
                }
            }
        }
        let writes = batch.len();
        batch.write()?;

        self.accounts.extend(updates);
        self.dirty.clear();
        self.root = root;
        debug!(%root, writes, nodes, "Wrote state changes");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::in_memory::InMemoryStore;
    use cel2_common::constants::EMPTY_TRIE_HASH;
    use cel2_trie::secure_trie_root;

    fn address(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn slot(n: u64) -> H256 {
        H256::from_low_u64_be(n)
    }

    #[test]
    fn empty_snapshot_has_empty_root() {
        let kv = InMemoryStore::default();
        let state = SnapshotStateDb::open(&kv, EMPTY_TRIE_HASH).unwrap();
        assert_eq!(state.root(), EMPTY_TRIE_HASH);

        let err = SnapshotStateDb::open(&kv, H256::repeat_byte(1)).err().unwrap();
        assert!(matches!(err, StoreError::StateRootMismatch { .. }), "{err}");
    }

    #[test]
    fn commit_matches_secure_trie_root() {
        let kv = InMemoryStore::default();
        let mut state = SnapshotStateDb::open(&kv, EMPTY_TRIE_HASH).unwrap();
        let storage = BTreeMap::from([(slot(1), slot(42)), (slot(2), H256::zero())]);

        state.create_account(address(1)).unwrap();
        state.set_balance(address(1), U256::from(1000)).unwrap();
        state.set_nonce(address(1), 7).unwrap();
        state.create_account(address(2)).unwrap();
        state.set_code(address(2), Bytes::from_static(&[0x60, 0x00])).unwrap();
        state.set_storage(address(2), storage).unwrap();
        let root = state.commit(1).unwrap();

        let storage_root = secure_trie_root([(slot(1), U256::from(42).encode_to_vec())]);
        let expected = secure_trie_root([
            (
                address(1),
                AccountState {
                    nonce: 7,
                    balance: U256::from(1000),
                    ..Default::default()
                }
                .encode_to_vec(),
            ),
            (
                address(2),
                AccountState {
                    storage_root,
                    code_hash: keccak([0x60u8, 0x00]),
                    ..Default::default()
                }
                .encode_to_vec(),
            ),
        ]);
        assert_eq!(root, expected);
    }

    #[test]
    fn commit_trie_persists_changes() {
        let kv = InMemoryStore::default();
        let mut state = SnapshotStateDb::open(&kv, EMPTY_TRIE_HASH).unwrap();
        state.create_account(address(1)).unwrap();
        state.set_code(address(1), Bytes::from_static(b"code")).unwrap();
        state
            .set_storage(address(1), BTreeMap::from([(slot(1), slot(5)), (slot(9), H256::zero())]))
            .unwrap();
        let root = state.commit(1).unwrap();
        state.commit_trie(root).unwrap();

        let account_hash = keccak(address(1));
        assert!(kv.get(&storage_snapshot_key(account_hash, keccak(slot(1)))).unwrap().is_some());
        assert!(kv.get(&storage_snapshot_key(account_hash, keccak(slot(9)))).unwrap().is_none());
        assert_eq!(
            kv.get(&preimage_key(account_hash)).unwrap(),
            Some(address(1).as_bytes().to_vec())
        );

        let reopened = SnapshotStateDb::open(&kv, root).unwrap();
        assert!(reopened.exist(address(1)).unwrap());
        assert!(!reopened.exist(address(2)).unwrap());
        assert_eq!(reopened.get_code(address(1)).unwrap(), Bytes::from_static(b"code"));
    }

    #[test]
    fn create_account_keeps_only_balance() {
        let kv = InMemoryStore::default();
        let mut state = SnapshotStateDb::open(&kv, EMPTY_TRIE_HASH).unwrap();
        state.create_account(address(1)).unwrap();
        state.set_balance(address(1), U256::from(5)).unwrap();
        state.set_nonce(address(1), 3).unwrap();
        state.set_code(address(1), Bytes::from_static(b"old")).unwrap();
        state
            .set_storage(address(1), BTreeMap::from([(slot(1), slot(1))]))
            .unwrap();
        let root = state.commit(1).unwrap();
        state.commit_trie(root).unwrap();

        let mut state = SnapshotStateDb::open(&kv, root).unwrap();
        state.create_account(address(1)).unwrap();
        assert_eq!(state.get_balance(address(1)).unwrap(), U256::from(5));
        assert!(state.get_code(address(1)).unwrap().is_empty());
        let root = state.commit(2).unwrap();
        state.commit_trie(root).unwrap();

        let account_hash = keccak(address(1));
        assert!(kv.get(&storage_snapshot_key(account_hash, keccak(slot(1)))).unwrap().is_none());
        let expected = secure_trie_root([(
            address(1),
            AccountState {
                balance: U256::from(5),
                ..Default::default()
            }
            .encode_to_vec(),
        )]);
        assert_eq!(root, expected);
    }

    #[test]
    fn commit_trie_requires_matching_root() {
        let kv = InMemoryStore::default();
        let mut state = SnapshotStateDb::open(&kv, EMPTY_TRIE_HASH).unwrap();
        assert!(state.commit_trie(EMPTY_TRIE_HASH).is_err());

        state.create_account(address(1)).unwrap();
        state.commit(1).unwrap();
        let err = state.commit_trie(H256::repeat_byte(9)).unwrap_err();
        assert!(matches!(err, StoreError::StateRootMismatch { .. }), "{err}");
        assert!(kv.snapshot().unwrap().is_empty());
    }

    #[test]
    fn opens_slim_snapshot_accounts() {
        let kv = InMemoryStore::default();
        let account_hash = keccak(address(1));
        kv.put(&account_snapshot_key(account_hash), &[0xc4, 0x01, 0x64, 0x80, 0x80])
            .unwrap();
        let full = AccountState {
            nonce: 1,
            balance: U256::from(100),
            ..Default::default()
        };
        let root = secure_trie_root([(address(1), full.encode_to_vec())]);

        let state = SnapshotStateDb::open(&kv, root).unwrap();
        assert!(state.exist(address(1)).unwrap());
        assert_eq!(state.get_balance(address(1)).unwrap(), U256::from(100));
        assert!(state.get_code(address(1)).unwrap().is_empty());
    }

    #[test]
    fn commit_trie_writes_slim_accounts_and_nodes() {
        let kv = InMemoryStore::default();
        let mut state = SnapshotStateDb::open(&kv, EMPTY_TRIE_HASH).unwrap();
        let storage: BTreeMap<H256, H256> = (1..=20).map(|n| (slot(n), slot(n * 1000))).collect();
        state.create_account(address(1)).unwrap();
        state.set_balance(address(1), U256::from(100)).unwrap();
        state.set_nonce(address(1), 1).unwrap();
        state.create_account(address(2)).unwrap();
        state.set_storage(address(2), storage.clone()).unwrap();
        let root = state.commit(1).unwrap();
        state.commit_trie(root).unwrap();

        assert_eq!(
            kv.get(&account_snapshot_key(keccak(address(1)))).unwrap(),
            Some(vec![0xc4, 0x01, 0x64, 0x80, 0x80])
        );

        let root_node = kv.get(&trie_node_key(root)).unwrap().unwrap();
        assert_eq!(keccak(&root_node), root);
        let (storage_root, storage_nodes) = trie_root_with_nodes(storage_leaves(&storage));
        assert_eq!(storage_root, storage_root_of(&kv, address(2)));
        for (hash, node) in storage_nodes {
            assert_eq!(kv.get(&trie_node_key(hash)).unwrap(), Some(node));
        }
    }

    fn storage_root_of(kv: &InMemoryStore, address: Address) -> H256 {
        let slim = kv.get(&account_snapshot_key(keccak(address))).unwrap().unwrap();
        AccountState::decode_slim(&slim).unwrap().storage_root
    }
}
