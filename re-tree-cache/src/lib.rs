//! Directory tree cache: the top tier of the two-tier content-addressed
//! cache.
//!
//! Resolves Bazel action input roots (referenced by wire digest) into
//! [`data::DirectoryData`], keyed by a structural checksum, and
//! materializes them on disk by publishing and linking cached subtrees.
//! Individual file blobs are delegated to `re_content_store`'s
//! [`re_content_store::BlobCache`].

#![warn(missing_docs)]

mod data;
mod error;
mod materializer;
mod resolve;
mod tree_cache;

pub use data::{DirectoryData, FileEntry};
pub use error::Error;
pub use materializer::{Materializer, MissingBlob, PreconditionFailure};
pub use resolve::resolve;
pub use tree_cache::TreeCache;
