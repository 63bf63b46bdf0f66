//! Migration of a legacy chain database into an L2 one.
//!
//! The block phase ([`blocks`]) copies and rewrites every block, the state
//! phase ([`state`]) appends the transition block and writes the rollup
//! config. The two share nothing but the destination directory.

pub mod ancients;
pub mod blocks;
pub mod chain_config;
pub mod copy;
pub mod error;
pub mod finalize;
pub mod l1;
pub mod non_ancients;
pub mod rollup;
pub mod state;
pub mod transform;

pub use blocks::{BlocksOptions, BlocksSummary, migrate_blocks};
pub use error::{MigrationError, Stage};
pub use state::{StateOptions, migrate_state};
