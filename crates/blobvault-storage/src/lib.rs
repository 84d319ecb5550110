//! # Blobvault Storage
//!
//! Content-addressed blob storage bound to the shards of a distributed
//! table store.
//!
//! Blobs are named by the BLAKE3 digest of their content and stored one
//! file per blob:
//!
//! ```text
//! <base>/indices/<table>/<shard>/blobs/<bb>/<digest>
//! ```
//!
//! ## Features
//!
//! - **BlobContainer**: Atomic writes, reads, idempotent deletes, per-bucket listing and cleanup
//! - **BlobShard**: Lifecycle of one shard's container, usage stats, best-effort directory removal
//! - **PathResolver**: Default or per-table base paths, shared between tables with reference counting
//! - **BlobIndices**: Node-local registry creating and dropping blob tables
//! - **BlobFs**: Filesystem capability with a local disk and an in-memory implementation
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use blobvault_core::ShardRouting;
//! use blobvault_storage::{BlobIndices, BlobsConfig, LocalFs, TableBlobSettings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = BlobsConfig::with_data_dir("/var/lib/blobvault");
//!     let indices = BlobIndices::new(&config, Arc::new(LocalFs::new()));
//!
//!     indices
//!         .create_table("images", TableBlobSettings::default(), &[(0, ShardRouting::primary("n1"))])
//!         .await
//!         .unwrap();
//!
//!     let shard = indices.shard("images", 0).unwrap();
//!     let digest = shard.put(b"hello").await.unwrap();
//!     let data = shard.get_bytes(&digest).await.unwrap();
//!     assert_eq!(&data[..], b"hello");
//!
//!     // Never fails because of leftover directories
//!     let report = indices.drop_table("images").await.unwrap();
//!     println!("{report:?}");
//! }
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod fs;
pub mod indices;
pub mod path;
pub mod shard;
pub mod stats;

// Re-exports
pub use config::{BlobsConfig, TableBlobSettings};
pub use container::{BlobContainer, BlobFile, bucket_name};
pub use error::{CleanupOutcome, RetainReason, StorageError, StorageResult};
pub use fs::{BlobFs, BlobReader, DirEntry, EntryKind, LocalFs, MemoryFs};
pub use indices::{BlobIndices, DropReport};
pub use path::PathResolver;
pub use shard::{BLOBS_SUB_PATH, BlobShard, ShardState, open_shard};
pub use stats::{BlobStats, StatsAggregator};

// Re-export core types for convenience
pub use blobvault_core::{Digest, ShardId, ShardRouting};
