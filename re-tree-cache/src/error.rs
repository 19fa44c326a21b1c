//! Error taxonomy for the tree cache and materializer (spec §7).

use re_content_store::Digest;

/// Errors produced while resolving, building, or publishing cached
/// subtrees.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blob fetch failed (propagated from the blob cache).
    #[error(transparent)]
    ContentStore(#[from] re_content_store::Error),

    /// One or more directory blobs referenced by the input root could
    /// not be fetched from the upstream store (spec §4.5 step 1,
    /// §4.6's translation to precondition-failed).
    #[error("{} directory blob(s) missing from upstream store", .digests.len())]
    BatchReadBlobsMissing {
        /// The wire digests the upstream store could not find.
        digests: Vec<Digest>,
    },

    /// A reservation could not be satisfied even after evicting every
    /// eligible candidate (spec §7: MaxSizeReached).
    #[error("tree cache size bound exceeded: cannot reserve {needed} bytes (bound {bound} bytes)")]
    MaxSizeReached {
        /// Bytes the caller needed to reserve.
        needed: u64,
        /// The configured bound that could not be met.
        bound: u64,
    },

    /// A published cache entry's on-disk structural checksum did not
    /// match its name at startup verification time (spec §4.5
    /// "Discrepancies -> delete"; surfaced here if encountered outside
    /// startup as well).
    #[error("cache entry {name} is corrupted on disk")]
    FileSystemCorruption {
        /// The `"{hash}_{size}"` on-disk name of the corrupted entry.
        name: String,
    },

    /// A requested top-level name is still absent from the target
    /// directory after materialization (spec §4.5 step 9).
    #[error("{0} does not exist after build")]
    MissingOutput(String),
}
