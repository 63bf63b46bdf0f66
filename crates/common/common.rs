pub use ethereum_types::{Address, Bloom, H64, H160, H256, U256};

pub mod constants;
pub mod serde_utils;
pub mod types;
pub mod utils;

pub use bytes::Bytes;
