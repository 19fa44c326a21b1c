//! Test-only backend fake (spec §8's test tooling, SPEC_FULL §E).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::{BlobStoreBackend, Digest, Error};

/// An upstream store backed by a `HashMap`, for use in unit and
/// integration tests that exercise the blob/tree caches without a
/// network dependency.
///
/// Grounded on the pattern of `convenient-bitbake`'s in-memory test
/// doubles and on `BlobStoreBackend` itself — this is simply the
/// trait's simplest possible implementation.
#[derive(Default)]
pub struct InMemoryBackend {
    blobs: Mutex<HashMap<Digest, Vec<u8>>>,
    /// Digests that should be reported missing on the next batch read,
    /// to exercise `Error::BatchReadBlobsMissing` handling.
    missing: Mutex<Vec<Digest>>,
}

impl InMemoryBackend {
    /// An empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the backend with `bytes` under their own digest, returning
    /// that digest for convenience.
    pub fn put(&self, bytes: Vec<u8>) -> Digest {
        let digest = Digest::from_bytes(&bytes);
        self.blobs.lock().unwrap_or_else(|e| e.into_inner()).insert(digest.clone(), bytes);
        digest
    }

    /// Make subsequent reads of `digest` behave as if upstream doesn't
    /// have it.
    pub fn mark_missing(&self, digest: Digest) {
        self.missing.lock().unwrap_or_else(|e| e.into_inner()).push(digest);
    }

    fn is_missing(&self, digest: &Digest) -> bool {
        self.missing.lock().unwrap_or_else(|e| e.into_inner()).contains(digest)
    }
}

impl BlobStoreBackend for InMemoryBackend {
    fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>, Error> {
        if self.is_missing(digest) {
            return Err(Error::NotFound {
                digest: digest.clone(),
            });
        }
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(digest)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                digest: digest.clone(),
            })
    }

    fn batch_read_blobs_raw(&self, digests: &[Digest]) -> Result<HashMap<Digest, Vec<u8>>, Error> {
        let blobs = self.blobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(digests
            .iter()
            .filter(|d| !self.is_missing(d))
            .filter_map(|d| blobs.get(d).map(|bytes| (d.clone(), bytes.clone())))
            .collect())
    }

    fn write_blob(&self, digest: &Digest, bytes: &[u8]) -> Result<(), Error> {
        self.blobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(digest.clone(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_read_round_trips() {
        let backend = InMemoryBackend::new();
        let digest = backend.put(b"hello".to_vec());
        assert_eq!(backend.read_blob(&digest).unwrap(), b"hello");
    }

    #[test]
    fn marked_missing_fails_read() {
        let backend = InMemoryBackend::new();
        let digest = backend.put(b"hello".to_vec());
        backend.mark_missing(digest.clone());
        assert!(backend.read_blob(&digest).is_err());
    }

    #[test]
    fn batch_read_omits_unknown_digests() {
        let backend = InMemoryBackend::new();
        let present = backend.put(b"a".to_vec());
        let absent = Digest::from_bytes(b"not-stored");
        let result = backend.batch_read_blobs(&[present.clone(), absent]).unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.contains_key(&present));
    }
}
