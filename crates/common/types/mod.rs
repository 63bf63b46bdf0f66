mod account;
mod block;
mod chain_config;
mod genesis;
mod istanbul;

pub use account::*;
pub use block::*;
pub use chain_config::*;
pub use genesis::*;
pub use istanbul::*;
