//! cairn-core — key material, record codec, retransmission tracking,
//! and configuration. All other Cairn crates depend on this one.

pub mod config;
pub mod keys;
pub mod record;
pub mod retransmit;

pub use keys::SessionKey;
pub use record::{Record, RecordBody};
