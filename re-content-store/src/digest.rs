//! Content digests and the wire shapes that reference them.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

use crate::Error;

/// A SHA-256 hash paired with the byte length of the content it names.
///
/// Equality is pairwise on `(hash, size_bytes)`, matching spec §3: two
/// digests are equal only if both fields match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    hash: String,
    size_bytes: u64,
}

impl Digest {
    /// Build a digest from an already-known hash and size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDigest`] if `hash` is not 64 lowercase hex
    /// characters.
    pub fn new(hash: impl Into<String>, size_bytes: u64) -> Result<Self, Error> {
        let hash = hash.into();
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(Error::InvalidDigest(hash));
        }
        Ok(Self { hash, size_bytes })
    }

    /// Compute the digest of a byte slice.
    #[must_use]
    pub fn from_bytes(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        let hash = hex::encode(hasher.finalize());
        Self {
            hash,
            size_bytes: content.len() as u64,
        }
    }

    /// The lowercase hex SHA-256 hash.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The declared size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// The on-disk cache file name for this digest: `"{hash}_{size}"`.
    #[must_use]
    pub fn cache_name(&self) -> String {
        format!("{}_{}", self.hash, self.size_bytes)
    }

    /// The `blobs/{hash}/{size}` resource name used for reads (spec §6).
    #[must_use]
    pub fn read_resource_name(&self) -> String {
        format!("blobs/{}/{}", self.hash, self.size_bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.hash, self.size_bytes)
    }
}

/// A single file entry inside a directory: name, digest, executable bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    /// Path component; never empty, never contains a separator.
    pub name: String,
    /// Digest of the file's content.
    pub digest: Digest,
    /// Whether the materialized file should be executable.
    pub is_executable: bool,
}

/// A reference to a child directory inside a directory's wire message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryNode {
    /// Path component of the child directory.
    pub name: String,
    /// The child's *wire* digest (the upstream store's identity for it).
    pub digest: Digest,
}

/// The serialized form of a directory as the upstream store represents it:
/// a name-sorted file list and a name-sorted list of child references.
///
/// This is distinct from [`crate::DirectoryData`] in `re-tree-cache`, which
/// is the recursively *resolved* form keyed by a structural checksum
/// instead of this type's wire digest (spec §3, §9).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    /// Files directly in this directory, sorted by name.
    pub files: Vec<FileNode>,
    /// Child directories, sorted by name, referenced by wire digest.
    pub directories: Vec<DirectoryNode>,
}

impl Directory {
    /// Deserialize a directory message from canonical encoded bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`]-wrapped decode failure if `bytes` is not a
    /// canonical encoding produced by [`Directory::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Decode(format!("malformed directory message: {e}")))
    }

    /// Encode this directory to its canonical byte representation.
    ///
    /// # Panics
    ///
    /// Never: `Directory` contains no types that fail to serialize.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        #[allow(clippy::unwrap_used)]
        serde_json::to_vec(self).unwrap()
    }

    /// The wire digest of this directory's canonical encoding.
    #[must_use]
    pub fn wire_digest(&self) -> Digest {
        Digest::from_bytes(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_from_bytes_round_trips_len_and_hex() {
        let d = Digest::from_bytes(b"hello");
        assert_eq!(d.hash().len(), 64);
        assert_eq!(d.size_bytes(), 5);
        assert!(d.hash().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn digest_rejects_bad_hash() {
        assert!(Digest::new("x".repeat(64), 0).is_err());
        assert!(Digest::new("a".repeat(63), 0).is_err());
        assert!(Digest::new("A".repeat(64), 0).is_err());
    }

    #[test]
    fn digest_equality_is_pairwise() {
        let a = Digest::new("a".repeat(64), 4).unwrap();
        let b = Digest::new("a".repeat(64), 5).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn cache_name_matches_hash_underscore_size() {
        let d = Digest::new("b".repeat(64), 123).unwrap();
        assert_eq!(d.cache_name(), format!("{}_123", "b".repeat(64)));
    }

    #[test]
    fn directory_encode_decode_round_trip() {
        let dir = Directory {
            files: vec![FileNode {
                name: "a".into(),
                digest: Digest::from_bytes(b"a"),
                is_executable: false,
            }],
            directories: vec![],
        };
        let bytes = dir.encode();
        let decoded = Directory::decode(&bytes).unwrap();
        assert_eq!(dir, decoded);
    }
}
