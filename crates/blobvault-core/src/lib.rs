//! # Blobvault Core
//!
//! Core types and errors shared by the blobvault crates.
//!
//! ## Key Types
//!
//! - [`Digest`]: Validated BLAKE3 content identifier, hex encoded on disk and on the wire
//! - [`ShardId`]: Identity of one physical shard of a blob table
//! - [`ShardRouting`]: Routing information handed over by the shard management layer
//!
//! Nothing in this crate performs I/O.

pub mod digest;
pub mod error;
pub mod shard;

// Re-export main types
pub use digest::*;
pub use error::*;
pub use shard::*;
