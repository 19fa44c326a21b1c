//! Error taxonomy for the content store (spec §7).

use crate::Digest;

/// Errors produced by digest parsing, the backend, and the blob cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Filesystem or network I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Upstream RPC failed outright (spec §7: TransportFailure).
    #[error("upstream transport failure: {0}")]
    Transport(String),

    /// A single-blob read found the upstream store reachable but the
    /// digest genuinely absent (e.g. an HTTP 404), as distinct from
    /// [`Error::Transport`] (spec §7: the two must not be conflated —
    /// a transport failure must propagate, not be read as a
    /// precondition-failed).
    #[error("{digest} not found upstream")]
    NotFound {
        /// The digest the upstream store does not have.
        digest: Digest,
    },

    /// The upstream store reported one or more digests as absent from a
    /// batch read (spec §7: BatchReadBlobsMissing).
    #[error("{} blob(s) missing from upstream store", .digests.len())]
    BatchReadBlobsMissing {
        /// The digests the upstream store could not find.
        digests: Vec<Digest>,
    },

    /// A reservation could not be satisfied even after evicting every
    /// eligible candidate (spec §7: MaxSizeReached).
    #[error("cache size bound exceeded: cannot reserve {needed} bytes (bound {bound} bytes)")]
    MaxSizeReached {
        /// Bytes the caller needed to reserve.
        needed: u64,
        /// The configured bound that could not be met.
        bound: u64,
    },

    /// Downloaded bytes failed the size or hash check (spec §7:
    /// IntegrityFailure).
    #[error("integrity check failed for {digest}")]
    IntegrityFailure {
        /// The digest whose bytes failed verification.
        digest: Digest,
    },

    /// A cache entry was found tampered with at link time (spec §7:
    /// FileSystemCorruption).
    #[error("cache entry for {digest} is corrupted on disk")]
    FileSystemCorruption {
        /// The digest of the corrupted entry.
        digest: Digest,
    },

    /// A requested name was not found in the on-disk cache after the
    /// normal fetch/build path completed (spec §4.4 step 4).
    #[error("{0} does not exist after fetch")]
    MissingOutput(String),

    /// A digest string, or an encoded message, was malformed.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// A canonical message failed to decode.
    #[error("decode error: {0}")]
    Decode(String),
}
