//! Turns the tip of the migrated chain into the first L2 block.
//!
//! The L2 allocations are written over the tip's state, and a transition
//! block carrying the new state root is appended as the new head. The chain
//! config is moved to the L2 fork schedule from that block onward.

use std::path::Path;

use cel2_common::{
    Bloom, Bytes, H64, H256, U256,
    constants::{EMPTY_ROOT_HASH, EMPTY_UNCLE_HASH, MIGRATION_EXTRA_DATA, SEQUENCER_FEE_VAULT},
    types::{BlockBody, BlockHeader, Genesis, GenesisAlloc},
};
use cel2_rlp::{constants::RLP_EMPTY_LIST, encode::RLPEncode};
use cel2_storage::{
    ChainStore,
    accessors::{
        read_chain_config, write_body, write_canonical_hash, write_chain_config,
        write_finalized_block_hash, write_head_block_hash, write_head_fast_block_hash,
        write_head_header_hash, write_header, write_header_number, write_receipts, write_td,
    },
    state::{SnapshotStateDb, StateDb},
};
use tracing::{info, warn};

use crate::{chain_config::rewrite_chain_config, error::MigrationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeOptions {
    /// Write the changes. Without it nothing is written and no header is
    /// returned.
    pub commit: bool,
    /// Timestamp of the transition block.
    pub transition_time: u64,
}

/// Opens the chain database at `db` (read-only unless committing) and applies
/// the state transition to it.
pub fn finalize_state(
    db: &Path,
    genesis: &Genesis,
    options: FinalizeOptions,
) -> Result<Option<BlockHeader>, MigrationError> {
    let store = ChainStore::open(db, !options.commit)
        .map_err(MigrationError::store(format!("opening {}", db.display())))?;
    apply_state_transition(&store, genesis, options)
}

/// Writes the allocations of `genesis` over the state of the head block of
/// `store` and appends the transition block. Returns the transition header,
/// or `None` on a dry run.
pub fn apply_state_transition(
    store: &ChainStore,
    genesis: &Genesis,
    options: FinalizeOptions,
) -> Result<Option<BlockHeader>, MigrationError> {
    let genesis_hash = store
        .read_canonical_hash(0)
        .map_err(MigrationError::store("reading genesis hash"))?
        .ok_or_else(|| MigrationError::NotFound("genesis block hash".to_string()))?;
    let head_hash = store
        .read_head_header_hash()
        .map_err(MigrationError::store("reading head header hash"))?
        .ok_or_else(|| MigrationError::NotFound("head header hash".to_string()))?;
    let head_number = store
        .read_header_number(head_hash)
        .map_err(MigrationError::store("reading head header number"))?
        .ok_or_else(|| MigrationError::NotFound(format!("number of head header {head_hash:#x}")))?;
    let tip = store
        .read_header(head_number, head_hash)
        .map_err(MigrationError::store("reading head header"))?
        .ok_or_else(|| MigrationError::NotFound(format!("head header #{head_number}")))?;
    info!(number = head_number, hash = %head_hash, root = %tip.state_root, "Migrating state at chain tip");

    let mut config = read_chain_config(store.kv(), genesis_hash)
        .map_err(MigrationError::store("reading chain config"))?;
    if config.is_none() {
        return Err(MigrationError::NotFound(format!(
            "chain config for genesis {genesis_hash:#x}"
        )));
    }
    if let Some(chain_id) = config.as_ref().and_then(|config| config.chain_id) {
        if chain_id != genesis.chain_id {
            warn!(stored = chain_id, l2 = genesis.chain_id, "Chain id differs from the L2 chain id");
        }
    }

    let mut state = SnapshotStateDb::open(store.kv(), tip.state_root)
        .map_err(MigrationError::store("opening state at chain tip"))?;
    let overwritten = apply_allocs(&mut state, &genesis.alloc)?;
    let root = state
        .commit(head_number + 1)
        .map_err(MigrationError::store("committing state"))?;
    info!(
        accounts = genesis.alloc.len(),
        overwritten,
        %root,
        "Applied L2 allocations"
    );

    let header = transition_header(head_hash, &tip, root, options.transition_time);
    let hash = header.hash();
    info!(number = header.number, %hash, root = %root, "Built transition block");

    if !options.commit {
        info!("Dry run, leaving the database untouched");
        return Ok(None);
    }

    state
        .commit_trie(root)
        .map_err(MigrationError::store("writing state"))?;

    let number = header.number;
    let mut batch = store.kv().new_batch();
    write_td(&mut batch, number, hash, U256::zero());
    write_header(&mut batch, number, hash, &header.encode_to_vec());
    write_header_number(&mut batch, hash, number);
    write_body(&mut batch, number, hash, &BlockBody::empty().encode_to_vec());
    write_receipts(&mut batch, number, hash, &[RLP_EMPTY_LIST]);
    write_canonical_hash(&mut batch, number, hash);
    write_head_block_hash(&mut batch, hash);
    write_head_fast_block_hash(&mut batch, hash);
    write_head_header_hash(&mut batch, hash);
    write_finalized_block_hash(&mut batch, hash);
    batch
        .write()
        .map_err(MigrationError::store("writing transition block"))?;

    rewrite_chain_config(config.as_mut(), number, header.timestamp)?;
    let mut batch = store.kv().new_batch();
    if let Some(config) = &config {
        write_chain_config(&mut batch, genesis_hash, config)
            .map_err(MigrationError::store("encoding chain config"))?;
    }
    batch
        .write()
        .map_err(MigrationError::store("writing chain config"))?;

    info!(number, %hash, "Wrote transition block");
    Ok(Some(header))
}

/// Writes every allocation over `state`, in address order. Returns how many
/// accounts already existed.
pub fn apply_allocs<S: StateDb>(state: &mut S, alloc: &GenesisAlloc) -> Result<usize, MigrationError> {
    let mut overwritten = 0;
    for (address, account) in alloc {
        let address = *address;
        if state
            .exist(address)
            .map_err(MigrationError::store("reading account"))?
        {
            let equal_code = state
                .get_code(address)
                .map_err(MigrationError::store("reading account code"))?
                == account.code;
            warn!(account = %address, equal_code, "Operating on existing state");
            overwritten += 1;
        }

        state
            .create_account(address)
            .map_err(MigrationError::store("creating account"))?;
        let balance = state
            .get_balance(address)
            .map_err(MigrationError::store("reading balance"))?;
        if balance != account.balance {
            warn!(
                account = %address,
                old = %balance,
                new = %account.balance,
                "Account balance changes"
            );
        }

        let write = |state: &mut S| -> Result<(), cel2_storage::StoreError> {
            state.set_nonce(address, account.nonce)?;
            state.set_balance(address, account.balance)?;
            state.set_code(address, account.code.clone())?;
            state.set_storage(address, account.storage.clone())
        };
        write(state).map_err(MigrationError::store(format!("writing account {address:#x}")))?;
    }
    Ok(overwritten)
}

/// The first L2 block, on top of `tip`.
pub fn transition_header(
    tip_hash: H256,
    tip: &BlockHeader,
    state_root: H256,
    timestamp: u64,
) -> BlockHeader {
    BlockHeader {
        parent_hash: tip_hash,
        ommers_hash: EMPTY_UNCLE_HASH,
        coinbase: SEQUENCER_FEE_VAULT,
        state_root,
        transactions_root: EMPTY_ROOT_HASH,
        receipts_root: EMPTY_ROOT_HASH,
        logs_bloom: Bloom::zero(),
        difficulty: U256::zero(),
        number: tip.number + 1,
        gas_limit: tip.gas_limit,
        gas_used: 0,
        timestamp,
        extra_data: Bytes::from_static(MIGRATION_EXTRA_DATA),
        prev_randao: H256::zero(),
        nonce: H64::zero(),
        base_fee_per_gas: tip.base_fee_per_gas,
        withdrawals_root: None,
        blob_gas_used: None,
        excess_blob_gas: None,
        parent_beacon_block_root: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cel2_common::{
        Address,
        types::{ChainConfig, GenesisAccount},
    };
    use cel2_storage::{
        KeyValueStore,
        accessors::{
            read_canonical_hash, read_head_block_hash, read_head_header_hash, read_header,
        },
        backend::in_memory::InMemoryStore,
    };
    use std::collections::BTreeMap;

    fn alloc() -> GenesisAlloc {
        GenesisAlloc::from([
            (
                Address::from_low_u64_be(1),
                GenesisAccount {
                    balance: U256::from(1_000),
                    ..Default::default()
                },
            ),
            (
                SEQUENCER_FEE_VAULT,
                GenesisAccount {
                    code: Bytes::from_static(&[0x60, 0x80]),
                    storage: BTreeMap::from([(H256::from_low_u64_be(1), H256::from_low_u64_be(2))]),
                    nonce: 1,
                    ..Default::default()
                },
            ),
        ])
    }

    /// A chain of a genesis and a tip at #10, with an empty state.
    fn chain() -> (InMemoryStore, BlockHeader) {
        let kv = InMemoryStore::default();
        let genesis = BlockHeader {
            state_root: EMPTY_ROOT_HASH,
            ..Default::default()
        };
        let tip = BlockHeader {
            parent_hash: H256::repeat_byte(9),
            number: 10,
            gas_limit: 30_000_000,
            timestamp: 1_000,
            state_root: EMPTY_ROOT_HASH,
            base_fee_per_gas: Some(7),
            ..Default::default()
        };
        let mut batch = kv.new_batch();
        for header in [&genesis, &tip] {
            let hash = header.hash();
            write_header(&mut batch, header.number, hash, &header.encode_to_vec());
            write_header_number(&mut batch, hash, header.number);
            write_canonical_hash(&mut batch, header.number, hash);
        }
        write_head_header_hash(&mut batch, tip.hash());
        let config = ChainConfig {
            chain_id: Some(42220),
            ..Default::default()
        };
        write_chain_config(&mut batch, genesis.hash(), &config).unwrap();
        batch.write().unwrap();
        (kv, tip)
    }

    fn genesis() -> Genesis {
        Genesis {
            chain_id: 42220,
            alloc: alloc(),
        }
    }

    #[test]
    fn transition_header_links_to_tip() {
        let tip = BlockHeader {
            number: 41,
            gas_limit: 1,
            base_fee_per_gas: Some(2),
            ..Default::default()
        };
        let header = transition_header(H256::repeat_byte(1), &tip, H256::repeat_byte(2), 99);
        assert_eq!(header.parent_hash, H256::repeat_byte(1));
        assert_eq!(header.number, 42);
        assert_eq!(header.state_root, H256::repeat_byte(2));
        assert_eq!(header.timestamp, 99);
        assert_eq!(header.base_fee_per_gas, Some(2));
        assert_eq!(header.extra_data.as_ref(), b"CeL2 migration");
        assert_eq!(header.coinbase, SEQUENCER_FEE_VAULT);
    }

    #[test]
    fn commits_transition_block() {
        let (kv, tip) = chain();
        let store = ChainStore::new(kv, None);
        let options = FinalizeOptions {
            commit: true,
            transition_time: 5_000,
        };

        let header = apply_state_transition(&store, &genesis(), options)
            .unwrap()
            .unwrap();
        let hash = header.hash();
        let kv = store.kv();

        assert_eq!(header.parent_hash, tip.hash());
        assert_eq!(read_head_header_hash(kv).unwrap(), Some(hash));
        assert_eq!(read_head_block_hash(kv).unwrap(), Some(hash));
        assert_eq!(read_canonical_hash(kv, 11).unwrap(), Some(hash));
        assert_eq!(read_header(kv, 11, hash).unwrap(), Some(header.clone()));

        let state = SnapshotStateDb::open(kv, header.state_root).unwrap();
        assert_eq!(state.get_balance(Address::from_low_u64_be(1)).unwrap(), U256::from(1_000));
        assert_eq!(state.get_code(SEQUENCER_FEE_VAULT).unwrap(), Bytes::from_static(&[0x60, 0x80]));

        let genesis_hash = read_canonical_hash(kv, 0).unwrap().unwrap();
        let config = read_chain_config(kv, genesis_hash).unwrap().unwrap();
        assert_eq!(config.cel2_time, Some(5_000));
        assert_eq!(config.bedrock_block, Some(11));
        assert_eq!(config.chain_id, Some(42220));
    }

    #[test]
    fn dry_run_writes_nothing() {
        let (kv, _) = chain();
        // clones share their contents
        let observer = kv.clone();
        let before = observer.snapshot().unwrap();
        let store = ChainStore::new(kv, None);
        let options = FinalizeOptions {
            commit: false,
            transition_time: 5_000,
        };
        assert_eq!(apply_state_transition(&store, &genesis(), options).unwrap(), None);
        assert_eq!(observer.snapshot().unwrap(), before);
    }

    #[test]
    fn missing_chain_config() {
        let kv = InMemoryStore::default();
        let header = BlockHeader::default();
        let mut batch = kv.new_batch();
        write_header(&mut batch, 0, header.hash(), &header.encode_to_vec());
        write_header_number(&mut batch, header.hash(), 0);
        write_canonical_hash(&mut batch, 0, header.hash());
        write_head_header_hash(&mut batch, header.hash());
        batch.write().unwrap();

        let store = ChainStore::new(kv, None);
        let options = FinalizeOptions {
            commit: true,
            transition_time: 0,
        };
        let err = apply_state_transition(&store, &genesis(), options).unwrap_err();
        assert!(matches!(err, MigrationError::NotFound(ref what) if what.contains("chain config")), "{err}");
    }

    #[test]
    fn allocs_count_existing_accounts() {
        let kv = InMemoryStore::default();
        let mut state = SnapshotStateDb::open(&kv, EMPTY_ROOT_HASH).unwrap();
        assert_eq!(apply_allocs(&mut state, &alloc()).unwrap(), 0);
        let root = state.commit(1).unwrap();
        state.commit_trie(root).unwrap();

        let mut state = SnapshotStateDb::open(&kv, root).unwrap();
        assert_eq!(apply_allocs(&mut state, &alloc()).unwrap(), 2);
        assert_eq!(state.commit(2).unwrap(), root);
    }
}
