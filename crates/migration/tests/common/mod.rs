#![allow(dead_code)]

use std::path::{Path, PathBuf};

use cel2_common::{
    Address, Bytes, H256, U256,
    constants::{EMPTY_ROOT_HASH, ISTANBUL_EXTRA_VANITY},
    types::{BlockHeader, BlockNumber, ChainConfig, IstanbulAggregatedSeal, IstanbulExtra},
};
use cel2_migration::l1::{BlockSource, L1Block, RpcError};
use cel2_rlp::encode::RLPEncode;
use cel2_storage::{
    Freezer, KeyValueStore, StoreError,
    accessors::{
        write_body, write_canonical_hash, write_chain_config, write_head_block_hash,
        write_head_header_hash, write_header, write_header_number, write_receipts, write_td,
    },
    ancient::{BODIES_TABLE, DIFFICULTIES_TABLE, HASHES_TABLE, HEADERS_TABLE, RECEIPTS_TABLE},
    backend::rocksdb::RocksDbStore,
    state::{SnapshotStateDb, StateDb},
};
use tempfile::TempDir;

pub const OLD_BODY: [u8; 4] = [0xc3, 0xc0, 0xc0, 0xc0];
pub const NEW_BODY: [u8; 3] = [0xc2, 0xc0, 0xc0];
pub const CHAIN_ID: u64 = 44787;
pub const EXISTING_BALANCE: u64 = 7;

/// Account present in the state of every fixture chain.
pub fn existing_account() -> Address {
    Address::repeat_byte(0xbb)
}

fn istanbul_extra(number: BlockNumber, sealed: bool) -> Bytes {
    let seal = |bitmap: u64| {
        if sealed {
            IstanbulAggregatedSeal {
                bitmap: U256::from(bitmap),
                signature: Bytes::from(vec![number as u8; 48]),
                round: U256::from(1),
            }
        } else {
            IstanbulAggregatedSeal::default()
        }
    };
    IstanbulExtra {
        added_validators: Vec::<Address>::new().encode_to_vec().into(),
        added_validators_public_keys: Vec::<Bytes>::new().encode_to_vec().into(),
        removed_validators: 0u64.encode_to_vec().into(),
        seal: Bytes::from_static(&[0x99; 65]).encode_to_vec().into(),
        aggregated_seal: seal(0b101),
        parent_aggregated_seal: seal(0b011),
    }
    .to_extra_data(&[0x00; ISTANBUL_EXTRA_VANITY])
}

/// One block of a fixture chain, in both encodings.
#[derive(Debug, Clone)]
pub struct Block {
    pub number: BlockNumber,
    pub hash: H256,
    pub old_header: Vec<u8>,
    pub new_header: Vec<u8>,
    pub receipts: Vec<u8>,
    pub td: U256,
}

/// A legacy chain database: blocks `[0, ancients)` in the ancient store and
/// every block up to the head in the live store.
pub struct OldChain {
    pub dir: TempDir,
    pub blocks: Vec<Block>,
    pub ancients: u64,
    pub state_root: H256,
}

impl OldChain {
    pub fn new(ancients: u64, head: BlockNumber) -> Self {
        Self::build(ancients, head, None)
    }

    /// Like [`OldChain::new`], with a wrong hash recorded in the ancient
    /// store for block `bad`.
    pub fn with_bad_hash(ancients: u64, head: BlockNumber, bad: BlockNumber) -> Self {
        Self::build(ancients, head, Some(bad))
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn head(&self) -> &Block {
        &self.blocks[self.blocks.len() - 1]
    }

    fn build(ancients: u64, head: BlockNumber, bad_hash: Option<BlockNumber>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let kv = RocksDbStore::open(dir.path()).unwrap();

        let mut state = SnapshotStateDb::open(&kv, EMPTY_ROOT_HASH).unwrap();
        state.create_account(existing_account()).unwrap();
        state
            .set_balance(existing_account(), U256::from(EXISTING_BALANCE))
            .unwrap();
        let state_root = state.commit(head).unwrap();
        state.commit_trie(state_root).unwrap();

        let mut blocks: Vec<Block> = Vec::new();
        for number in 0..=head {
            let parent_hash = blocks.last().map(|b| b.hash).unwrap_or_default();
            let header = |extra_data: Bytes| BlockHeader {
                parent_hash,
                number,
                gas_limit: 20_000_000,
                timestamp: 1_600_000_000 + 5 * number,
                state_root,
                base_fee_per_gas: Some(1_000_000_000),
                extra_data,
                ..Default::default()
            };
            let (old, new) = if number == 0 {
                let genesis = header(Bytes::from_static(b"celo genesis"));
                (genesis.clone(), genesis)
            } else {
                (
                    header(istanbul_extra(number, true)),
                    header(istanbul_extra(number, false)),
                )
            };
            blocks.push(Block {
                number,
                hash: new.hash(),
                old_header: old.encode_to_vec(),
                new_header: new.encode_to_vec(),
                receipts: Bytes::from(format!("receipts of {number}")).encode_to_vec(),
                td: U256::from(number + 1),
            });
        }

        let mut freezer = Freezer::open(dir.path().join("ancient"), false).unwrap();
        freezer
            .modify_ancients(|op| {
                for block in &blocks[..ancients as usize] {
                    let n = block.number;
                    let hash = if bad_hash == Some(n) {
                        H256::repeat_byte(0xee)
                    } else {
                        block.hash
                    };
                    op.append_raw(HASHES_TABLE, n, hash.as_bytes())?;
                    op.append_raw(HEADERS_TABLE, n, &block.old_header)?;
                    op.append_raw(BODIES_TABLE, n, &OLD_BODY)?;
                    op.append_raw(RECEIPTS_TABLE, n, &block.receipts)?;
                    op.append_raw(DIFFICULTIES_TABLE, n, &block.td.encode_to_vec())?;
                }
                Ok::<(), StoreError>(())
            })
            .unwrap();
        freezer.sync().unwrap();

        let mut batch = kv.new_batch();
        for block in &blocks {
            let (n, hash) = (block.number, block.hash);
            write_header(&mut batch, n, hash, &block.old_header);
            write_header_number(&mut batch, hash, n);
            write_body(&mut batch, n, hash, &OLD_BODY);
            write_receipts(&mut batch, n, hash, &block.receipts);
            write_td(&mut batch, n, hash, block.td);
            write_canonical_hash(&mut batch, n, hash);
        }
        let tip = blocks[blocks.len() - 1].hash;
        write_head_header_hash(&mut batch, tip);
        write_head_block_hash(&mut batch, tip);
        let config = ChainConfig {
            chain_id: Some(CHAIN_ID),
            london_block: Some(0),
            ..Default::default()
        };
        write_chain_config(&mut batch, blocks[0].hash, &config).unwrap();
        batch.write().unwrap();

        Self {
            dir,
            blocks,
            ancients,
            state_root,
        }
    }
}

/// Every live key/value pair of `kv`, in key order.
pub fn dump(kv: &dyn KeyValueStore) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut entries = Vec::new();
    kv.for_each_with_prefix(&[], &mut |key, value| {
        entries.push((key.to_vec(), value.to_vec()));
        Ok(())
    })
    .unwrap();
    entries
}

/// Always returns the same block.
pub struct FakeL1(pub L1Block);

impl FakeL1 {
    pub fn new() -> Self {
        Self(L1Block {
            hash: H256::repeat_byte(0x11),
            number: 1_000,
            timestamp: 1_700_000_000,
        })
    }
}

impl BlockSource for FakeL1 {
    fn block_by_number(&self, _: Option<BlockNumber>) -> Result<L1Block, RpcError> {
        Ok(self.0)
    }

    fn block_by_hash(&self, _: H256) -> Result<L1Block, RpcError> {
        Ok(self.0)
    }
}

/// Input files of the state phase, written to `dir`.
pub struct StateInputs {
    pub deploy_config: PathBuf,
    pub l1_deployments: PathBuf,
    pub l2_allocs: PathBuf,
    pub rollup_config: PathBuf,
}

/// Account created by the L2 allocations.
pub fn new_account() -> Address {
    Address::repeat_byte(0xaa)
}

pub fn write_state_inputs(dir: &Path) -> StateInputs {
    let deploy_config = dir.join("deploy-config.json");
    std::fs::write(
        &deploy_config,
        serde_json::json!({
            "l1ChainID": 17000,
            "l2ChainID": CHAIN_ID,
            "l1BlockTime": 12,
            "l2BlockTime": 1,
            "maxSequencerDrift": 600,
            "sequencerWindowSize": 3600,
            "channelTimeout": 300,
            "batchInboxAddress": "0xff00000000000000000000000000000000044787",
            "batchSenderAddress": "0x0000000000000000000000000000000000000bad",
            "l2GenesisBlockGasLimit": "0x1c9c380",
            "l2GenesisRegolithTimeOffset": "0x0",
            "gasPriceOracleBaseFeeScalar": 1368,
            "gasPriceOracleBlobBaseFeeScalar": 810949,
            "eip1559Elasticity": 10,
            "eip1559Denominator": 50,
            "eip1559DenominatorCanyon": 250
        })
        .to_string(),
    )
    .unwrap();

    let l1_deployments = dir.join("l1-deployments.json");
    std::fs::write(
        &l1_deployments,
        serde_json::json!({
            "OptimismPortalProxy": "0x0000000000000000000000000000000000000001",
            "SystemConfigProxy": "0x0000000000000000000000000000000000000002",
            "ProtocolVersionsProxy": "0x0000000000000000000000000000000000000003"
        })
        .to_string(),
    )
    .unwrap();

    let l2_allocs = dir.join("l2-allocs.json");
    std::fs::write(
        &l2_allocs,
        serde_json::json!({
            format!("{:#x}", new_account()): {
                "balance": "1000000000000000000",
                "code": "0x6000"
            },
            format!("{:#x}", existing_account()): {
                "balance": "42"
            }
        })
        .to_string(),
    )
    .unwrap();

    StateInputs {
        deploy_config,
        l1_deployments,
        l2_allocs,
        rollup_config: dir.join("rollup.json"),
    }
}
