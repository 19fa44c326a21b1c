//! Upstream blob store access (spec §4.2, §6).
//!
//! gRPC transport wiring is out of scope; the cache only ever talks to
//! the upstream store through [`BlobStoreBackend`]. The HTTP
//! implementation here is one concrete backend; [`InMemoryBackend`] in
//! [`crate::testing`] is another, used throughout the test suite.

use std::collections::HashMap;
use std::time::Duration;

use crate::{Digest, Error};

/// Default per-request batch size cap, matching
/// `examples/original_source/worker/cas.py::CASHelper`'s
/// `msg_size_bytes_limit` default.
pub const DEFAULT_BATCH_BYTES_LIMIT: u64 = 10 * 1024 * 1024;

/// How the content store reaches the upstream store.
///
/// Implementations only need to honor the digest/bytes contract; batching,
/// large-blob fallback, and retries around transport failures are the
/// caller's concern (see [`partition_into_batches`] and
/// [`blob_cache`](crate::blob_cache)).
pub trait BlobStoreBackend: Send + Sync {
    /// Fetch the raw bytes for a single digest.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the upstream store is reachable
    /// but does not have `digest`, [`Error::Transport`] on any other
    /// transport failure, or [`Error::IntegrityFailure`] if the fetched
    /// bytes don't match `digest`.
    fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>, Error>;

    /// Fetch raw bytes for many digests in one logical call.
    ///
    /// The default implementation partitions `digests` into batches
    /// under [`DEFAULT_BATCH_BYTES_LIMIT`] and large-blob singletons,
    /// then calls [`BlobStoreBackend::batch_read_blobs_raw`] per batch.
    /// A digest the backend could not find is simply absent from the
    /// returned map; the caller is responsible for turning that into
    /// [`Error::BatchReadBlobsMissing`] (spec §7).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on a transport failure.
    fn batch_read_blobs(&self, digests: &[Digest]) -> Result<HashMap<Digest, Vec<u8>>, Error> {
        let mut out = HashMap::with_capacity(digests.len());
        for batch in partition_into_batches(digests, DEFAULT_BATCH_BYTES_LIMIT) {
            for (digest, bytes) in self.batch_read_blobs_raw(&batch)? {
                out.insert(digest, bytes);
            }
        }
        Ok(out)
    }

    /// Backend-specific implementation of a single batch read call.
    /// Digests not found upstream are simply omitted from the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on a transport failure.
    fn batch_read_blobs_raw(&self, digests: &[Digest]) -> Result<HashMap<Digest, Vec<u8>>, Error>;

    /// Upload a single blob's bytes to the upstream store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] on a transport failure.
    fn write_blob(&self, digest: &Digest, bytes: &[u8]) -> Result<(), Error>;
}

/// Split `digests` into upload/download batches under `bytes_limit`,
/// putting any single digest at or above the limit into its own batch.
///
/// Mirrors `CASHelper.fetch_all`'s batching loop in
/// `examples/original_source/worker/cas.py`: accumulate into the current
/// batch while doing so stays under the limit, otherwise start a new
/// one; a blob that alone meets or exceeds the limit gets a batch of
/// one (the Python original instead streams such blobs individually
/// over `ByteStream.Read`, which this trait models as an ordinary
/// single-element batch since the HTTP backend has no streaming read).
#[must_use]
pub fn partition_into_batches(digests: &[Digest], bytes_limit: u64) -> Vec<Vec<Digest>> {
    let mut batches: Vec<Vec<Digest>> = Vec::new();
    let mut current: Vec<Digest> = Vec::new();
    let mut current_bytes: u64 = 0;

    for digest in digests {
        let size = digest.size_bytes();
        if size >= bytes_limit {
            batches.push(vec![digest.clone()]);
            continue;
        }
        if current_bytes + size >= bytes_limit && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(digest.clone());
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// HTTP-based [`BlobStoreBackend`] speaking a REST-style byte protocol
/// against a Bazel Remote Execution-compatible cache server.
///
/// Grounded on `examples/avrabe-graph-git-rs/convenient-cache`'s client
/// method surface (`find_missing_blobs`/`upload_blobs`/`download_blobs`),
/// adapted from the teacher's async `tonic` gRPC stubs to a synchronous
/// `reqwest::blocking` client per spec §9's preference for a blocking
/// cache API.
pub struct HttpBackend {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl HttpBackend {
    /// Build a backend that talks to `base_url` (e.g.
    /// `http://localhost:8080`), with a 30 second per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl BlobStoreBackend for HttpBackend {
    fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>, Error> {
        let url = format!("{}/{}", self.base_url, digest.read_resource_name());
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Error::Transport(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound {
                digest: digest.clone(),
            });
        }
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "GET {url} returned {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .map_err(|e| Error::Transport(e.to_string()))?
            .to_vec();
        if Digest::from_bytes(&bytes) != *digest {
            return Err(Error::IntegrityFailure {
                digest: digest.clone(),
            });
        }
        Ok(bytes)
    }

    fn batch_read_blobs_raw(&self, digests: &[Digest]) -> Result<HashMap<Digest, Vec<u8>>, Error> {
        #[derive(serde::Serialize)]
        struct BatchReadRequest<'a> {
            digests: &'a [Digest],
        }
        #[derive(serde::Deserialize)]
        struct BatchReadResponseEntry {
            digest: Digest,
            #[serde(with = "hex_bytes")]
            data: Vec<u8>,
        }

        let url = format!("{}/v2/blobs:batchRead", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&BatchReadRequest { digests })
            .send()
            .map_err(|e| Error::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "POST {url} returned {}",
                response.status()
            )));
        }
        let entries: Vec<BatchReadResponseEntry> = response
            .json()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(entries
            .into_iter()
            .map(|e| (e.digest, e.data))
            .collect())
    }

    fn write_blob(&self, digest: &Digest, bytes: &[u8]) -> Result<(), Error> {
        let url = format!("{}/{}", self.base_url, digest.read_resource_name());
        let response = self
            .client
            .put(&url)
            .body(bytes.to_vec())
            .send()
            .map_err(|e| Error::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "PUT {url} returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest_of_size(size: u64) -> Digest {
        Digest::new("a".repeat(64), size).unwrap()
    }

    #[test]
    fn partitions_stay_under_limit() {
        let digests = vec![digest_of_size(40), digest_of_size(40), digest_of_size(40)];
        let batches = partition_into_batches(&digests, 100);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn oversized_digest_gets_its_own_batch() {
        let digests = vec![digest_of_size(5), digest_of_size(200), digest_of_size(5)];
        let batches = partition_into_batches(&digests, 100);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1], vec![digest_of_size(200)]);
    }

    #[test]
    fn empty_input_yields_no_batches() {
        assert!(partition_into_batches(&[], 100).is_empty());
    }
}
