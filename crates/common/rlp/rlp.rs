//! Recursive Length Prefix encoding, as used by the block and state formats
//! the migration reads and writes.

pub mod constants;
pub mod decode;
pub mod encode;
pub mod error;
pub mod structs;
