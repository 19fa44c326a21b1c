//! Content-addressed blob store: digests, path locking, the upstream
//! backend interface, and the persistent file-layer blob cache.
//!
//! This crate implements the bottom tier of the two-tier cache: blobs
//! identified by a SHA-256 digest, hardlinked or copied from a
//! persistent on-disk cache. The top tier — directory trees keyed by a
//! structural checksum — lives in `re-tree-cache`, which depends on
//! this crate for digests, locking, and the blob cache itself.

#![warn(missing_docs)]

mod backend;
mod blob_cache;
mod digest;
mod dir_blob_cache;
mod error;
mod lock;

pub mod testing;

pub use backend::{partition_into_batches, BlobStoreBackend, HttpBackend, DEFAULT_BATCH_BYTES_LIMIT};
pub use blob_cache::{BlobCache, LinkMode};
pub use digest::{Directory, DirectoryNode, FileNode};
pub use dir_blob_cache::{Bound, DirectoryBlobCache};
pub use error::Error;
pub use lock::LockRegistry;

pub use digest::Digest;
