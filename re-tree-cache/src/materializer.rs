//! Input-root materializer: the thin coordinator in front of the tree
//! cache (spec §4.6).

use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use re_content_store::{BlobCache, BlobStoreBackend, Digest, DirectoryBlobCache};

use crate::error::Error;
use crate::tree_cache::TreeCache;

/// A missing blob reference surfaced when the input root can't be
/// resolved, shaped the way an action-level precondition-failed
/// outcome names it (spec §4.6: subject `"blobs/{hash}/{size}"`, type
/// `"MISSING"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingBlob {
    /// `"blobs/{hash}/{size}"`.
    pub subject: String,
    /// Always `"MISSING"`.
    pub violation_type: &'static str,
}

/// The outcome of [`Materializer::materialize`] once a
/// [`Error::BatchReadBlobsMissing`] has been translated (spec §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreconditionFailure {
    /// Every blob the input root referenced that upstream doesn't have.
    pub missing: Vec<MissingBlob>,
}

/// Given an input-root digest, drives the directory tree cache to
/// produce a build directory.
///
/// Grounded on
/// `examples/original_source/worker/runner.py`'s action-execution glue
/// (`get_action_detail` then `IDirectoryBuilder.build`), reduced to the
/// "thin coordinator" spec §4.6 describes: its only policy beyond
/// delegation is timing the call and translating a missing-blob error
/// into a structured precondition failure (the original instead prints
/// and continues — this translation has no direct grounding source and
/// is a supplemented behavior the spec requires).
pub struct Materializer<'a> {
    tree_cache: &'a TreeCache,
    backend: &'a dyn BlobStoreBackend,
    dir_blob_cache: &'a Mutex<DirectoryBlobCache>,
    blob_cache: &'a BlobCache,
}

impl<'a> Materializer<'a> {
    /// Wire up a materializer over its collaborators; none are owned.
    #[must_use]
    pub fn new(
        tree_cache: &'a TreeCache,
        backend: &'a dyn BlobStoreBackend,
        dir_blob_cache: &'a Mutex<DirectoryBlobCache>,
        blob_cache: &'a BlobCache,
    ) -> Self {
        Self {
            tree_cache,
            backend,
            dir_blob_cache,
            blob_cache,
        }
    }

    /// Materialize `input_root_digest` into `target_dir`. Returns
    /// `Ok(None)` on success, `Ok(Some(precondition_failure))` if the
    /// input root references blobs the upstream store doesn't have,
    /// and `Err` for every other failure.
    ///
    /// # Errors
    ///
    /// Propagates any [`Error`] other than
    /// [`Error::BatchReadBlobsMissing`], which is translated instead of
    /// returned.
    pub fn materialize(
        &self,
        input_root_digest: &Digest,
        target_dir: &Path,
    ) -> Result<Option<PreconditionFailure>, Error> {
        let started = Instant::now();
        let result = self.tree_cache.build(
            self.backend,
            self.dir_blob_cache,
            self.blob_cache,
            input_root_digest,
            target_dir,
        );
        let elapsed = started.elapsed();
        tracing::info!(
            input_root = %input_root_digest,
            duration_ms = elapsed.as_millis() as u64,
            "input root materialization finished"
        );

        match result {
            Ok(()) => Ok(None),
            Err(Error::BatchReadBlobsMissing { digests }) => {
                tracing::warn!(
                    input_root = %input_root_digest,
                    missing_count = digests.len(),
                    "input root references blobs missing from upstream store"
                );
                Ok(Some(PreconditionFailure {
                    missing: digests
                        .into_iter()
                        .map(|digest| MissingBlob {
                            subject: digest.read_resource_name(),
                            violation_type: "MISSING",
                        })
                        .collect(),
                }))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use re_content_store::testing::InMemoryBackend;
    use re_content_store::{Bound, Directory, LinkMode};
    use tempfile::tempdir;

    #[test]
    fn materialize_translates_missing_blob_to_precondition_failure() {
        let backend = InMemoryBackend::new();
        let ghost_root = Digest::from_bytes(b"never uploaded root");
        let dir_blob_cache = Mutex::new(DirectoryBlobCache::new(Bound::Entries(10)));
        let blob_root = tempdir().unwrap();
        let blob_cache = BlobCache::new(blob_root.into_path(), 0);
        blob_cache.init().unwrap();
        let tree_root = tempdir().unwrap();
        let tree_cache = TreeCache::new(tree_root.path(), 0, LinkMode::Copy);
        tree_cache.init().unwrap();

        let materializer = Materializer::new(&tree_cache, &backend, &dir_blob_cache, &blob_cache);
        let target = tempdir().unwrap();
        let outcome = materializer.materialize(&ghost_root, target.path()).unwrap();
        let failure = outcome.expect("expected a precondition failure");
        assert_eq!(failure.missing.len(), 1);
        assert_eq!(failure.missing[0].violation_type, "MISSING");
        assert_eq!(failure.missing[0].subject, ghost_root.read_resource_name());
    }

    #[test]
    fn materialize_succeeds_for_an_empty_directory_root() {
        let backend = InMemoryBackend::new();
        let empty = Directory::default();
        let root_digest = backend.put(empty.encode());
        let dir_blob_cache = Mutex::new(DirectoryBlobCache::new(Bound::Entries(10)));
        let blob_root = tempdir().unwrap();
        let blob_cache = BlobCache::new(blob_root.into_path(), 0);
        blob_cache.init().unwrap();
        let tree_root = tempdir().unwrap();
        let tree_cache = TreeCache::new(tree_root.path(), 0, LinkMode::Copy);
        tree_cache.init().unwrap();

        let materializer = Materializer::new(&tree_cache, &backend, &dir_blob_cache, &blob_cache);
        let target = tempdir().unwrap();
        let outcome = materializer.materialize(&root_digest, target.path()).unwrap();
        assert!(outcome.is_none());
    }
}
