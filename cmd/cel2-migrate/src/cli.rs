use std::{
    fmt::Display,
    path::PathBuf,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use cel2_migration::{
    BlocksOptions, StateOptions,
    ancients::{DEFAULT_BATCH_SIZE, DEFAULT_BUFFER_DEPTH},
    copy::{NativeCopy, Rsync, TreeCopier},
    l1::RpcBlockSource,
    migrate_blocks, migrate_state,
};
use clap::{Args as ClapArgs, Parser as ClapParser, Subcommand as ClapSubcommand, ValueEnum};
use eyre::{Result, WrapErr};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};

#[allow(clippy::upper_case_acronyms)]
#[derive(ClapParser)]
#[command(
    name = "cel2-migrate",
    version,
    about = "Migrates a legacy Celo L1 database into a Cel2 L2 database"
)]
pub struct CLI {
    #[command(flatten)]
    pub log: LogOptions,
    #[command(subcommand)]
    pub command: Subcommand,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct LogOptions {
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        env = "CEL2_LOG_LEVEL",
        global = true,
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error"
    )]
    pub log_level: Level,
    #[arg(
        long = "log.color",
        default_value_t = LogColor::Auto,
        env = "CEL2_LOG_COLOR",
        global = true,
        help = "Output logs with ANSI color codes.",
        long_help = "Possible values: auto, always, never"
    )]
    pub log_color: LogColor,
}

#[derive(ClapSubcommand)]
pub enum Subcommand {
    #[command(about = "Migrate the ancient and non-ancient block data")]
    Blocks(BlocksArgs),
    #[command(about = "Apply the L2 allocations and write the rollup config")]
    State {
        #[arg(long = "new-db", value_name = "PATH", env = "CEL2_NEW_DB")]
        /// Path to the migrated database
        new_db: PathBuf,
        #[command(flatten)]
        state: StateArgs,
    },
    #[command(about = "Run the block migration followed by the state migration")]
    Full {
        #[command(flatten)]
        blocks: BlocksArgs,
        #[command(flatten)]
        state: StateArgs,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct BlocksArgs {
    #[arg(long = "old-db", value_name = "PATH", env = "CEL2_OLD_DB")]
    /// Path to the legacy database
    pub old_db: PathBuf,
    #[arg(long = "new-db", value_name = "PATH", env = "CEL2_NEW_DB")]
    /// Path for the migrated database, created if missing
    pub new_db: PathBuf,
    #[arg(long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE, env = "CEL2_BATCH_SIZE", value_parser = clap::value_parser!(u64).range(1..))]
    /// Blocks per read, transform and write batch
    pub batch_size: u64,
    #[arg(long = "buffer-size", default_value_t = DEFAULT_BUFFER_DEPTH, env = "CEL2_BUFFER_SIZE")]
    /// Batches queued between two pipeline stages
    pub buffer_size: usize,
    #[arg(long = "memory-limit", default_value_t = 0, value_name = "MIB", env = "CEL2_MEMORY_LIMIT")]
    /// Upper bound for the batches held in memory, in MiB (0 disables it)
    pub memory_limit: u64,
    #[arg(long = "clear-all", env = "CEL2_CLEAR_ALL")]
    /// Delete the new database before migrating
    pub clear_all: bool,
    #[arg(long = "keep-non-ancients", env = "CEL2_KEEP_NON_ANCIENTS")]
    /// Keep the non-ancient data already in the new database
    pub keep_non_ancients: bool,
    #[arg(long = "only-ancients", env = "CEL2_ONLY_ANCIENTS")]
    /// Stop after migrating the ancient store
    pub only_ancients: bool,
    #[arg(long = "copy-tool", value_enum, default_value_t = CopyTool::Rsync, env = "CEL2_COPY_TOOL")]
    /// Tool used to copy the non-ancient data
    pub copy_tool: CopyTool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StateArgs {
    #[arg(long = "deploy-config", value_name = "PATH", env = "CEL2_DEPLOY_CONFIG")]
    /// Path to the L2 deploy config
    pub deploy_config: PathBuf,
    #[arg(long = "l1-deployments", value_name = "PATH", env = "CEL2_L1_DEPLOYMENTS")]
    /// Path to the addresses of the L1 contracts
    pub l1_deployments: PathBuf,
    #[arg(long = "l1-rpc", value_name = "URL", env = "CEL2_L1_RPC")]
    /// JSON-RPC endpoint of the L1 node
    pub l1_rpc: String,
    #[arg(long = "l2-allocs", value_name = "PATH", env = "CEL2_L2_ALLOCS")]
    /// Path to the L2 allocations
    pub l2_allocs: PathBuf,
    #[arg(long = "outfile.rollup-config", value_name = "PATH", env = "CEL2_OUTFILE_ROLLUP_CONFIG")]
    /// Where to write the rollup config
    pub outfile_rollup_config: PathBuf,
    #[arg(long = "dry-run", env = "CEL2_DRY_RUN")]
    /// Compute the transition without writing anything
    pub dry_run: bool,
    #[arg(long = "transition-time", value_name = "UNIX_SECONDS", env = "CEL2_TRANSITION_TIME")]
    /// Timestamp of the transition block, the current time if unset
    pub transition_time: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CopyTool {
    #[default]
    Rsync,
    Native,
}

impl CopyTool {
    fn copier(self) -> Box<dyn TreeCopier> {
        match self {
            CopyTool::Rsync => Box::new(Rsync::default()),
            CopyTool::Native => Box::new(NativeCopy),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum LogColor {
    #[default]
    Auto,
    Always,
    Never,
}

impl Display for LogColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogColor::Auto => write!(f, "auto"),
            LogColor::Always => write!(f, "always"),
            LogColor::Never => write!(f, "never"),
        }
    }
}

impl FromStr for LogColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(LogColor::Auto),
            "always" => Ok(LogColor::Always),
            "never" => Ok(LogColor::Never),
            _ => Err(format!(
                "Invalid log color '{s}'. Expected: auto, always, or never"
            )),
        }
    }
}

impl Subcommand {
    pub fn run(self, cancel: &CancellationToken) -> Result<()> {
        match self {
            Subcommand::Blocks(blocks) => run_blocks(&blocks, cancel),
            Subcommand::State { new_db, state } => run_state(new_db, &state),
            Subcommand::Full { blocks, state } => {
                run_blocks(&blocks, cancel)?;
                run_state(blocks.new_db, &state)
            }
        }
    }
}

fn run_blocks(args: &BlocksArgs, cancel: &CancellationToken) -> Result<()> {
    let options = BlocksOptions {
        old_db: args.old_db.clone(),
        new_db: args.new_db.clone(),
        batch_size: args.batch_size,
        buffer_size: args.buffer_size,
        memory_limit_mib: args.memory_limit,
        clear_all: args.clear_all,
        keep_non_ancients: args.keep_non_ancients,
        only_ancients: args.only_ancients,
    };
    let copier = args.copy_tool.copier();
    let summary = migrate_blocks(&options, copier.as_ref(), cancel).wrap_err_with(|| {
        format!(
            "failed to migrate blocks from {} to {}",
            args.old_db.display(),
            args.new_db.display()
        )
    })?;
    info!(
        ancients = summary.ancients_after,
        migrated_ancients = summary.ancients_after - summary.ancients_before,
        non_ancients = ?summary.non_ancients,
        "Blocks migrated"
    );
    Ok(())
}

fn run_state(new_db: PathBuf, args: &StateArgs) -> Result<()> {
    let l1 = RpcBlockSource::new(&args.l1_rpc)
        .wrap_err_with(|| format!("invalid L1 RPC endpoint {}", args.l1_rpc))?;
    let options = StateOptions {
        new_db,
        deploy_config: args.deploy_config.clone(),
        l1_deployments: args.l1_deployments.clone(),
        l2_allocs: args.l2_allocs.clone(),
        outfile_rollup_config: args.outfile_rollup_config.clone(),
        dry_run: args.dry_run,
        transition_time: args.transition_time.unwrap_or_else(now),
    };
    let rollup_config = migrate_state(&options, &l1).wrap_err("failed to migrate state")?;
    match rollup_config {
        Some(config) => info!(
            l2_genesis = %config.genesis.l2.hash,
            number = config.genesis.l2.number,
            l1_start = config.genesis.l1.number,
            "State migrated"
        ),
        None => info!("Dry run finished, nothing was written"),
    }
    Ok(())
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
