//! In-memory LRU cache of deserialized directory nodes (spec §4.3).

use std::collections::HashMap;
use std::collections::VecDeque;

use crate::{Digest, Directory};

/// The bound a [`DirectoryBlobCache`] enforces.
#[derive(Debug, Clone, Copy)]
pub enum Bound {
    /// Evict to keep total decoded bytes under this cap.
    Bytes(u64),
    /// Evict to keep the entry count under this cap.
    Entries(usize),
}

struct Entry {
    directory: Directory,
    encoded_len: u64,
}

/// Advisory LRU over directory messages already fetched from upstream.
///
/// Correctness never depends on this cache (spec §4.3): a miss simply
/// costs a backend round trip. Grounded on
/// `examples/original_source/worker/cas.py::CASCache`, which keeps an
/// `OrderedDict` and treats re-insertion-on-hit as the touch operation,
/// and on `convenient-bitbake::lru_cache::LruCache`'s
/// `HashMap` + `VecDeque` shape, generalized here to support either a
/// byte-count or an entry-count bound.
pub struct DirectoryBlobCache {
    bound: Bound,
    entries: HashMap<Digest, Entry>,
    order: VecDeque<Digest>,
    total_bytes: u64,
}

impl DirectoryBlobCache {
    /// Create an empty cache enforcing `bound`.
    #[must_use]
    pub fn new(bound: Bound) -> Self {
        Self {
            bound,
            entries: HashMap::new(),
            order: VecDeque::new(),
            total_bytes: 0,
        }
    }

    /// Look up `digest`, touching it to most-recently-used on a hit.
    #[must_use]
    pub fn get(&mut self, digest: &Digest) -> Option<Directory> {
        if !self.entries.contains_key(digest) {
            return None;
        }
        self.touch(digest);
        self.entries.get(digest).map(|e| e.directory.clone())
    }

    /// Insert a freshly-fetched directory, evicting oldest entries as
    /// needed to respect the configured bound.
    pub fn insert(&mut self, digest: Digest, directory: Directory) {
        if self.entries.contains_key(&digest) {
            self.touch(&digest);
            return;
        }
        let encoded_len = directory.encode().len() as u64;
        self.order.push_back(digest.clone());
        self.total_bytes += encoded_len;
        self.entries.insert(digest, Entry { directory, encoded_len });
        self.evict_to_bound();
    }

    fn touch(&mut self, digest: &Digest) {
        self.order.retain(|k| k != digest);
        self.order.push_back(digest.clone());
    }

    fn evict_to_bound(&mut self) {
        loop {
            let over = match self.bound {
                Bound::Bytes(max) => self.total_bytes > max,
                Bound::Entries(max) => self.entries.len() > max,
            };
            if !over {
                break;
            }
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&oldest) {
                self.total_bytes -= entry.encoded_len;
            }
        }
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileNode;

    fn dir_with_file(name: &str, content: &[u8]) -> Directory {
        Directory {
            files: vec![FileNode {
                name: name.to_string(),
                digest: Digest::from_bytes(content),
                is_executable: false,
            }],
            directories: vec![],
        }
    }

    #[test]
    fn hit_touches_entry_to_mru() {
        let mut cache = DirectoryBlobCache::new(Bound::Entries(2));
        let a = Digest::from_bytes(b"a");
        let b = Digest::from_bytes(b"b");
        let c = Digest::from_bytes(b"c");
        cache.insert(a.clone(), dir_with_file("a", b"a"));
        cache.insert(b.clone(), dir_with_file("b", b"b"));
        // touch a so it's MRU; evicting now should drop b, not a.
        assert!(cache.get(&a).is_some());
        cache.insert(c.clone(), dir_with_file("c", b"c"));
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_some());
    }

    #[test]
    fn byte_bound_evicts_oldest_first() {
        let mut cache = DirectoryBlobCache::new(Bound::Bytes(1));
        let a = Digest::from_bytes(b"a");
        let b = Digest::from_bytes(b"b");
        cache.insert(a.clone(), dir_with_file("a", b"a"));
        cache.insert(b.clone(), dir_with_file("b", b"b"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&b).is_some());
    }
}
