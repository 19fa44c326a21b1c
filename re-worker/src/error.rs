//! Error taxonomy for the worker binary (spec §7, configuration and
//! scheduler failures).

/// Errors that can cause `re-worker` to exit non-zero.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The config file couldn't be read.
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        /// Path that was read.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The config file's contents didn't parse as the expected shape.
    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        /// Path that was parsed.
        path: String,
        /// Underlying TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },

    /// A size string (`filesystem.max_cache_size_bytes` and friends)
    /// wasn't a plain integer or a `K`/`M`/`G`[`b`/`B`]-suffixed one.
    #[error("invalid size string {0:?}")]
    InvalidSize(String),

    /// Failed to install the SIGINT/SIGTERM handler.
    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[from] ctrlc::Error),

    /// The blob cache or tree cache failed to initialize or run.
    #[error(transparent)]
    ContentStore(#[from] re_content_store::Error),

    /// The tree cache or materializer failed.
    #[error(transparent)]
    TreeCache(#[from] re_tree_cache::Error),

    /// Filesystem failure outside of the caches themselves (build root
    /// creation, log file open).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
