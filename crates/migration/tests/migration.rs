mod common;

use cel2_common::{
    Bytes, U256,
    constants::MIGRATION_EXTRA_DATA,
    types::BlockHeader,
    utils::keccak,
};
use cel2_migration::{
    BlocksOptions, MigrationError, Stage, StateOptions,
    ancients::{AncientsOptions, migrate_ancients},
    copy::{NativeCopy, TreeCopier},
    migrate_blocks, migrate_state,
    non_ancients::{NonAncientsOptions, migrate_non_ancients},
    rollup::RollupConfig,
};
use cel2_rlp::decode::RLPDecode;
use cel2_storage::{
    Freezer, KeyValueStore,
    accessors::{
        read_body_rlp, read_canonical_hash, read_chain_config, read_head_header_hash,
        read_header_number, read_header_rlp, read_last_migrated_block, read_receipts_rlp,
        write_body, write_header, write_last_migrated_block,
    },
    ancient::{BODIES_TABLE, DIFFICULTIES_TABLE, HASHES_TABLE, HEADERS_TABLE, RECEIPTS_TABLE},
    backend::rocksdb::RocksDbStore,
    state::{SnapshotStateDb, StateDb},
};
use common::{FakeL1, NEW_BODY, OLD_BODY, OldChain, dump, existing_account, new_account};
use tokio_util::sync::CancellationToken;

fn blocks_options(old: &OldChain, new_db: &std::path::Path) -> BlocksOptions {
    BlocksOptions {
        old_db: old.path().to_path_buf(),
        new_db: new_db.to_path_buf(),
        batch_size: 3,
        buffer_size: 2,
        memory_limit_mib: 0,
        clear_all: false,
        keep_non_ancients: false,
        only_ancients: false,
    }
}

fn ancients_options() -> AncientsOptions {
    AncientsOptions {
        batch_size: 3,
        buffer_depth: 2,
        memory_limit_mib: 0,
    }
}

fn assert_ancients_migrated(old: &OldChain, new_db: &std::path::Path) {
    let freezer = Freezer::open(new_db.join("ancient"), true).unwrap();
    assert_eq!(freezer.ancients(), old.ancients);
    for block in &old.blocks[..old.ancients as usize] {
        let n = block.number;
        let header = freezer.ancient(HEADERS_TABLE, n).unwrap().unwrap();
        assert_eq!(header, block.new_header, "header #{n}");
        assert_eq!(keccak(&header), block.hash, "hash of #{n}");
        assert_eq!(
            freezer.ancient(HASHES_TABLE, n).unwrap().unwrap(),
            block.hash.as_bytes()
        );
        assert_eq!(freezer.ancient(BODIES_TABLE, n).unwrap().unwrap(), NEW_BODY);
        assert_eq!(freezer.ancient(RECEIPTS_TABLE, n).unwrap().unwrap(), block.receipts);
        assert_eq!(
            U256::decode(&freezer.ancient(DIFFICULTIES_TABLE, n).unwrap().unwrap()).unwrap(),
            block.td
        );
    }
}

fn assert_live_migrated(old: &OldChain, new_db: &std::path::Path) {
    let kv = RocksDbStore::open_read_only(new_db).unwrap();
    let last_ancient = old.ancients - 1;
    for block in &old.blocks {
        let (n, hash) = (block.number, block.hash);
        if (1..=last_ancient).contains(&n) {
            assert_eq!(read_header_rlp(&kv, n, hash).unwrap(), None, "#{n} not pruned");
            assert_eq!(read_body_rlp(&kv, n, hash).unwrap(), None);
            assert_eq!(read_canonical_hash(&kv, n).unwrap(), None);
            continue;
        }
        assert_eq!(read_canonical_hash(&kv, n).unwrap(), Some(hash));
        assert_eq!(read_receipts_rlp(&kv, n, hash).unwrap(), Some(block.receipts.clone()));
        if n == 0 {
            // genesis is never rewritten in the live store
            assert_eq!(read_body_rlp(&kv, n, hash).unwrap().unwrap(), OLD_BODY);
            continue;
        }
        assert_eq!(read_header_rlp(&kv, n, hash).unwrap().unwrap(), block.new_header, "#{n}");
        assert_eq!(read_body_rlp(&kv, n, hash).unwrap().unwrap(), NEW_BODY);
    }
    assert_eq!(read_last_migrated_block(&kv).unwrap(), None);
}

#[test]
fn migrates_ancient_and_live_blocks() {
    let old = OldChain::new(10, 14);
    let new = tempfile::tempdir().unwrap();
    let new_db = new.path().join("cel2");

    let summary =
        migrate_blocks(&blocks_options(&old, &new_db), &NativeCopy, &CancellationToken::new())
            .unwrap();
    assert_eq!(summary.ancients_before, 0);
    assert_eq!(summary.ancients_after, 10);
    assert_eq!(summary.non_ancients, Some(5));

    assert_ancients_migrated(&old, &new_db);
    assert_live_migrated(&old, &new_db);

    // the source is left as it was
    let source = Freezer::open(old.path().join("ancient"), true).unwrap();
    assert_eq!(
        source.ancient(HEADERS_TABLE, 3).unwrap().unwrap(),
        old.blocks[3].old_header
    );
    let source_kv = RocksDbStore::open_read_only(old.path()).unwrap();
    let head = old.head();
    assert_eq!(
        read_header_rlp(&source_kv, head.number, head.hash).unwrap().unwrap(),
        head.old_header
    );
}

#[test]
fn block_migration_is_idempotent() {
    let old = OldChain::new(10, 14);
    let new = tempfile::tempdir().unwrap();
    let options = blocks_options(&old, new.path());
    let cancel = CancellationToken::new();

    migrate_blocks(&options, &NativeCopy, &cancel).unwrap();
    let first = dump(&RocksDbStore::open_read_only(new.path()).unwrap());

    let summary = migrate_blocks(&options, &NativeCopy, &cancel).unwrap();
    assert_eq!(summary.ancients_before, 10);
    assert_eq!(summary.ancients_after, 10);
    assert_eq!(summary.non_ancients, Some(5));

    assert_ancients_migrated(&old, new.path());
    assert_live_migrated(&old, new.path());
    assert_eq!(dump(&RocksDbStore::open_read_only(new.path()).unwrap()), first);
}

#[test]
fn only_ancients_skips_live_store() {
    let old = OldChain::new(10, 14);
    let new = tempfile::tempdir().unwrap();
    let options = BlocksOptions {
        only_ancients: true,
        ..blocks_options(&old, new.path())
    };

    let summary = migrate_blocks(&options, &NativeCopy, &CancellationToken::new()).unwrap();
    assert_eq!(summary.ancients_after, 10);
    assert_eq!(summary.non_ancients, None);
    assert_ancients_migrated(&old, new.path());
    assert!(!RocksDbStore::exists(new.path()));
}

#[test]
fn resumes_partially_migrated_ancients() {
    let old = OldChain::new(10, 12);
    let new = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();

    migrate_ancients(old.path(), new.path(), ancients_options(), &cancel).unwrap();
    // simulate a run interrupted after block 4
    let mut freezer = Freezer::open(new.path().join("ancient"), false).unwrap();
    freezer.truncate_head(5).unwrap();
    drop(freezer);

    let (before, after) =
        migrate_ancients(old.path(), new.path(), ancients_options(), &cancel).unwrap();
    assert_eq!((before, after), (5, 10));
    assert_ancients_migrated(&old, new.path());
}

#[test]
fn hash_mismatch_stops_pipeline() {
    let old = OldChain::with_bad_hash(10, 12, 7);
    let new = tempfile::tempdir().unwrap();

    let err = migrate_ancients(old.path(), new.path(), ancients_options(), &CancellationToken::new())
        .unwrap_err();
    let MigrationError::Stage { stage, source } = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(*stage, Stage::Transformer);
    assert!(
        matches!(**source, MigrationError::HashMismatch { number: 7, .. }),
        "{source}"
    );

    // only whole batches before the bad block made it to disk
    let freezer = Freezer::open(new.path().join("ancient"), false).unwrap();
    let written = freezer.ancients();
    assert!(written <= 6 && written % 3 == 0, "{written} blocks written");
}

#[test]
fn canceled_run_reports_cancellation() {
    let old = OldChain::new(10, 12);
    let new = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = migrate_blocks(&blocks_options(&old, new.path()), &NativeCopy, &cancel).unwrap_err();
    assert!(err.is_canceled(), "{err}");
}

#[test]
fn non_ancient_migration_resumes_after_cursor() {
    let old = OldChain::new(51, 200);
    let new = tempfile::tempdir().unwrap();
    migrate_ancients(old.path(), new.path(), ancients_options(), &CancellationToken::new())
        .unwrap();

    // a previous run copied the store and got through block 100
    NativeCopy.copy(old.path(), new.path()).unwrap();
    {
        let kv = RocksDbStore::open(new.path()).unwrap();
        let mut batch = kv.new_batch();
        for block in &old.blocks[51..=100] {
            write_header(&mut batch, block.number, block.hash, &block.new_header);
            write_body(&mut batch, block.number, block.hash, &NEW_BODY);
        }
        write_last_migrated_block(&mut batch, 100);
        batch.put(b"resume-marker".to_vec(), b"kept".to_vec());
        batch.write().unwrap();
    }

    let transformed = migrate_non_ancients(
        old.path(),
        new.path(),
        Some(50),
        NonAncientsOptions {
            batch_size: 16,
            keep_non_ancients: false,
        },
        &NativeCopy,
    )
    .unwrap();
    assert_eq!(transformed, 100);

    let kv = RocksDbStore::open_read_only(new.path()).unwrap();
    // a resumed run does not copy the tree again
    assert_eq!(kv.get(b"resume-marker").unwrap(), Some(b"kept".to_vec()));
    drop(kv);
    assert_live_migrated(&old, new.path());
}

#[test]
fn state_migration_appends_transition_block() {
    let old = OldChain::new(10, 14);
    let new = tempfile::tempdir().unwrap();
    migrate_blocks(&blocks_options(&old, new.path()), &NativeCopy, &CancellationToken::new())
        .unwrap();
    let inputs_dir = tempfile::tempdir().unwrap();
    let inputs = common::write_state_inputs(inputs_dir.path());
    let options = StateOptions {
        new_db: new.path().to_path_buf(),
        deploy_config: inputs.deploy_config,
        l1_deployments: inputs.l1_deployments,
        l2_allocs: inputs.l2_allocs,
        outfile_rollup_config: inputs.rollup_config.clone(),
        dry_run: false,
        transition_time: 1_700_000_100,
    };

    let rollup = migrate_state(&options, &FakeL1::new()).unwrap().unwrap();

    let tip = old.head();
    let kv = RocksDbStore::open_read_only(new.path()).unwrap();
    let head_hash = read_head_header_hash(&kv).unwrap().unwrap();
    assert_eq!(read_header_number(&kv, head_hash).unwrap(), Some(tip.number + 1));
    let header = BlockHeader::decode(
        &read_header_rlp(&kv, tip.number + 1, head_hash).unwrap().unwrap(),
    )
    .unwrap();
    assert_eq!(header.parent_hash, tip.hash);
    assert_eq!(header.timestamp, 1_700_000_100);
    assert_eq!(header.extra_data.as_ref(), MIGRATION_EXTRA_DATA);
    assert_ne!(header.state_root, old.state_root);

    let state = SnapshotStateDb::open(&kv, header.state_root).unwrap();
    assert_eq!(
        state.get_balance(new_account()).unwrap(),
        U256::from(10).pow(U256::from(18))
    );
    assert_eq!(state.get_code(new_account()).unwrap(), Bytes::from_static(&[0x60, 0x00]));
    assert_eq!(state.get_balance(existing_account()).unwrap(), U256::from(42));

    let config = read_chain_config(&kv, old.blocks[0].hash).unwrap().unwrap();
    assert_eq!(config.bedrock_block, Some(tip.number + 1));
    assert_eq!(config.regolith_time, Some(0));
    assert_eq!(config.cel2_time, Some(1_700_000_100));

    assert_eq!(rollup.genesis.l2.hash, head_hash);
    assert_eq!(rollup.genesis.l2.number, tip.number + 1);
    assert_eq!(rollup.genesis.l1.number, 1_000);
    let written: RollupConfig =
        serde_json::from_slice(&std::fs::read(&inputs.rollup_config).unwrap()).unwrap();
    assert_eq!(written, rollup);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&inputs.rollup_config).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o440);
    }
}

#[test]
fn dry_run_leaves_database_untouched() {
    let old = OldChain::new(10, 14);
    let new = tempfile::tempdir().unwrap();
    migrate_blocks(&blocks_options(&old, new.path()), &NativeCopy, &CancellationToken::new())
        .unwrap();
    let before = dump(&RocksDbStore::open_read_only(new.path()).unwrap());
    let inputs_dir = tempfile::tempdir().unwrap();
    let inputs = common::write_state_inputs(inputs_dir.path());
    let options = StateOptions {
        new_db: new.path().to_path_buf(),
        deploy_config: inputs.deploy_config,
        l1_deployments: inputs.l1_deployments,
        l2_allocs: inputs.l2_allocs,
        outfile_rollup_config: inputs.rollup_config.clone(),
        dry_run: true,
        transition_time: 1_700_000_100,
    };

    assert_eq!(migrate_state(&options, &FakeL1::new()).unwrap(), None);
    assert_eq!(dump(&RocksDbStore::open_read_only(new.path()).unwrap()), before);
    assert!(!inputs.rollup_config.exists());
}
