//! Storage adapters for geth-style chain databases: the live key/value store,
//! the append-only ancient store, and a flat state database on top of them.

pub mod accessors;
pub mod ancient;
pub mod api;
pub mod backend;
pub mod error;
pub mod schema;
pub mod state;
mod store;

pub use ancient::{Freezer, FreezerTable};
pub use api::{KeyValueStore, KvBatch};
pub use error::StoreError;
pub use store::ChainStore;
