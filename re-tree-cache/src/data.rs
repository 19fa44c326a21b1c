//! The recursively-resolved directory shape and its structural checksum
//! (spec §3).

use std::collections::BTreeMap;

use re_content_store::Digest;

/// A single file as it appears inside a resolved directory: its blob
/// digest and executable bit. Distinct from
/// [`re_content_store::FileNode`] only in that it's keyed by name in
/// its parent's map rather than carrying its own name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Digest of the file's content in the blob cache.
    pub digest: Digest,
    /// Whether the materialized file should be executable.
    pub is_executable: bool,
}

/// The recursively resolved form of a directory subtree: its files and
/// its subdirectories, plus the structural checksum that identifies it
/// in the tree cache.
///
/// Grounded on `convenient-graph::DAG::content_hash`'s recursive
/// node-then-sorted-dependencies hashing scheme, generalized from a
/// graph over `N: Hash` to a tree keyed by name, with a canonical byte
/// encoding standing in for `content_hash`'s `DefaultHasher` (whose
/// output is not stable across processes and so cannot key a
/// persistent on-disk cache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryData {
    files: BTreeMap<String, FileEntry>,
    subdirectories: BTreeMap<String, DirectoryData>,
}

impl DirectoryData {
    /// Build a resolved directory from its already-resolved files and
    /// subdirectories.
    #[must_use]
    pub fn new(
        files: BTreeMap<String, FileEntry>,
        subdirectories: BTreeMap<String, DirectoryData>,
    ) -> Self {
        Self {
            files,
            subdirectories,
        }
    }

    /// Files directly inside this directory, in name order.
    #[must_use]
    pub fn files(&self) -> &BTreeMap<String, FileEntry> {
        &self.files
    }

    /// Subdirectories, in name order.
    #[must_use]
    pub fn subdirectories(&self) -> &BTreeMap<String, DirectoryData> {
        &self.subdirectories
    }

    /// The canonical byte encoding hashed to produce the structural
    /// checksum: files in name order (name, hash, size, executable),
    /// then subdirectories in name order (name, child structural
    /// checksum) — never the wire digest of a child.
    #[must_use]
    pub fn canonical_encoding(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (name, entry) in &self.files {
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
            buf.extend_from_slice(entry.digest.hash().as_bytes());
            buf.extend_from_slice(&entry.digest.size_bytes().to_le_bytes());
            buf.push(u8::from(entry.is_executable));
            buf.push(0xff);
        }
        buf.push(0xfe);
        for (name, child) in &self.subdirectories {
            let child_checksum = child.structural_checksum();
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
            buf.extend_from_slice(child_checksum.hash().as_bytes());
            buf.extend_from_slice(&child_checksum.size_bytes().to_le_bytes());
            buf.push(0xff);
        }
        buf
    }

    /// Structural checksum digest: SHA-256 of
    /// [`DirectoryData::canonical_encoding`], reported as `(hash, len)`
    /// per spec §3.
    #[must_use]
    pub fn structural_checksum(&self) -> Digest {
        Digest::from_bytes(&self.canonical_encoding())
    }

    /// The `"{hash}_{size}"` on-disk name this subtree publishes under.
    #[must_use]
    pub fn name_in_cache(&self) -> String {
        self.structural_checksum().cache_name()
    }

    /// Total bytes this subtree would cost in copy mode: the sum of
    /// every file's size, recursively (spec §4.5 `file_count` note: in
    /// copy mode every file is charged at its size).
    #[must_use]
    pub fn copy_size_bytes(&self) -> u64 {
        let own: u64 = self.files.values().map(|f| f.digest.size_bytes()).sum();
        let nested: u64 = self.subdirectories.values().map(DirectoryData::copy_size_bytes).sum();
        own + nested
    }

    /// Every blob cache name (`"{hash}_{size}"`) referenced anywhere in
    /// this subtree, used to maintain hardlink-mode `file_count`
    /// reference counts.
    pub fn referenced_blob_names(&self, out: &mut Vec<String>) {
        for entry in self.files.values() {
            out.push(entry.digest.cache_name());
        }
        for child in self.subdirectories.values() {
            child.referenced_blob_names(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(content: &[u8]) -> DirectoryData {
        DirectoryData::new(
            BTreeMap::from([(
                "f".to_string(),
                FileEntry {
                    digest: Digest::from_bytes(content),
                    is_executable: false,
                },
            )]),
            BTreeMap::new(),
        )
    }

    #[test]
    fn identical_trees_produce_identical_checksums() {
        assert_eq!(leaf(b"x").structural_checksum(), leaf(b"x").structural_checksum());
    }

    #[test]
    fn executable_bit_changes_checksum() {
        let mut files = BTreeMap::new();
        let _ = files.insert(
            "f".to_string(),
            FileEntry {
                digest: Digest::from_bytes(b"x"),
                is_executable: true,
            },
        );
        let executable = DirectoryData::new(files, BTreeMap::new());
        assert_ne!(executable.structural_checksum(), leaf(b"x").structural_checksum());
    }

    #[test]
    fn structural_checksum_recurses_through_children_not_wire_digest() {
        let mut subdirs = BTreeMap::new();
        let _ = subdirs.insert("child".to_string(), leaf(b"inner"));
        let parent_a = DirectoryData::new(BTreeMap::new(), subdirs.clone());
        // A different child with the same structural checksum collapses
        // to the same parent checksum even if its own representation
        // differs in memory (same data, new instance).
        let parent_b = DirectoryData::new(BTreeMap::new(), subdirs);
        assert_eq!(parent_a.structural_checksum(), parent_b.structural_checksum());
    }

    #[test]
    fn copy_size_bytes_sums_recursively() {
        let mut subdirs = BTreeMap::new();
        let _ = subdirs.insert("child".to_string(), leaf(b"ab"));
        let parent = DirectoryData::new(BTreeMap::new(), subdirs);
        assert_eq!(parent.copy_size_bytes(), 2);
    }
}
