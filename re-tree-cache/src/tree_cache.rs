//! Persistent directory tree cache: the tree layer (spec §4.5).

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use re_content_store::{BlobCache, BlobStoreBackend, Digest, DirectoryBlobCache, LinkMode, LockRegistry};

use crate::data::DirectoryData;
use crate::error::Error;
use crate::resolve::resolve;

fn default_large_directory_names() -> HashSet<String> {
    ["engine", "external"].into_iter().map(String::from).collect()
}

fn default_skip_cache_names() -> HashSet<String> {
    ["bazel-out"].into_iter().map(String::from).collect()
}

struct Pending {
    done: Mutex<Option<Result<DirectoryData, String>>>,
    cond: Condvar,
}

impl Pending {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            done: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    fn resolve(&self, result: Result<DirectoryData, String>) {
        let mut guard = self.done.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(result);
        self.cond.notify_all();
    }

    fn wait(&self) -> Result<DirectoryData, Error> {
        let mut guard = self.done.lock().unwrap_or_else(|e| e.into_inner());
        while guard.is_none() {
            guard = self.cond.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
        #[allow(clippy::unwrap_used)]
        guard.clone().unwrap().map_err(|msg| Error::MissingOutput(msg))
    }
}

struct Shared {
    cached: HashMap<String, DirectoryData>,
    cached_order: Vec<String>,
    pending: HashMap<String, Arc<Pending>>,
    /// `Some` in hardlink mode: reference count of published subtrees
    /// using each blob cache name. `None` in copy mode, where every
    /// file is charged at its own size regardless of sharing.
    file_count: Option<HashMap<String, u64>>,
    current_size_bytes: u64,
}

/// Persistent cache of materialized directory subtrees, keyed by
/// structural checksum.
///
/// Grounded on
/// `examples/original_source/worker/directorybuilder.py`'s diff-based
/// `_build_directory` (scrub-then-rebuild target directory shape,
/// per-top-level-name dispatch), generalized per spec §4.5/§9 to
/// publish/evict/link cached subtrees keyed by the structural checksum
/// rather than diffing against a previously-materialized wire-digest
/// tree.
pub struct TreeCache {
    cache_dir_root: PathBuf,
    max_cache_size_bytes: u64,
    link_mode: LinkMode,
    large_directory_names: HashSet<String>,
    skip_cache_names: HashSet<String>,
    locks: LockRegistry<String>,
    shared: Mutex<Shared>,
}

impl TreeCache {
    /// Open (without verifying) a tree cache rooted at
    /// `cache_dir_root`. `link_mode` selects hardlink-mode file-count
    /// accounting (`LinkMode::Hardlink`) or per-file copy accounting
    /// (`LinkMode::Copy`).
    #[must_use]
    pub fn new(cache_dir_root: impl Into<PathBuf>, max_cache_size_bytes: u64, link_mode: LinkMode) -> Self {
        Self {
            cache_dir_root: cache_dir_root.into(),
            max_cache_size_bytes,
            link_mode,
            large_directory_names: default_large_directory_names(),
            skip_cache_names: default_skip_cache_names(),
            locks: LockRegistry::new(),
            shared: Mutex::new(Shared {
                cached: HashMap::new(),
                cached_order: Vec::new(),
                pending: HashMap::new(),
                file_count: matches!(link_mode, LinkMode::Hardlink).then(HashMap::new),
                current_size_bytes: 0,
            }),
        }
    }

    /// Override the top-level names treated as "large" (spec §4.5:
    /// materialized in place, children cached individually rather than
    /// the directory itself).
    #[must_use]
    pub fn with_large_directory_names(mut self, names: HashSet<String>) -> Self {
        self.large_directory_names = names;
        self
    }

    /// Override the top-level names treated as "skip cache" (spec
    /// §4.5: materialized in place, writable, never cached).
    #[must_use]
    pub fn with_skip_cache_names(mut self, names: HashSet<String>) -> Self {
        self.skip_cache_names = names;
        self
    }

    /// Verify every entry already on disk, registering the survivors in
    /// `cached` (spec §4.5 "Verification at startup").
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on a filesystem failure.
    pub fn init(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.cache_dir_root)?;

        let mut survivors: Vec<(String, DirectoryData)> = Vec::new();
        for entry in fs::read_dir(&self.cache_dir_root)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".tmp") || !entry.metadata()?.is_dir() {
                remove_any(&path)?;
                continue;
            }
            let Some(expected) = parse_cache_name(&name) else {
                remove_any(&path)?;
                continue;
            };
            match verify_subtree(&path) {
                Ok(data) if data.structural_checksum() == expected => {
                    survivors.push((name, data));
                }
                _ => {
                    remove_any(&path)?;
                }
            }
        }

        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        for (name, data) in survivors {
            let cost = self.charge(&mut shared, &data);
            shared.current_size_bytes += cost;
            shared.cached_order.push(name.clone());
            let _ = shared.cached.insert(name, data);
        }
        Ok(())
    }

    fn charge(&self, shared: &mut Shared, data: &DirectoryData) -> u64 {
        match &mut shared.file_count {
            None => data.copy_size_bytes(),
            Some(counts) => {
                let mut names = Vec::new();
                data.referenced_blob_names(&mut names);
                let mut added = 0u64;
                for name in names {
                    let count = counts.entry(name.clone()).or_insert(0);
                    if *count == 0 {
                        added += parse_cache_name(&name).map_or(0, |d| d.size_bytes());
                    }
                    *count += 1;
                }
                added
            }
        }
    }

    /// Resolve `input_root_digest` against `backend`/`dir_blob_cache`
    /// and materialize it into `target_dir`, using `blob_cache` for
    /// individual files (spec §4.5 `build`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchReadBlobsMissing`] if resolving the input
    /// root hits an absent directory blob, [`Error::MaxSizeReached`] if
    /// eviction cannot free enough space, or [`Error::Io`] /
    /// [`Error::ContentStore`] on a filesystem or blob-cache failure.
    pub fn build(
        &self,
        backend: &dyn BlobStoreBackend,
        dir_blob_cache: &Mutex<DirectoryBlobCache>,
        blob_cache: &BlobCache,
        input_root_digest: &Digest,
        target_dir: &Path,
    ) -> Result<(), Error> {
        let root = resolve(input_root_digest, backend, dir_blob_cache)?;
        self.scrub(target_dir)?;
        self.materialize_toplevel(&root, target_dir, backend, blob_cache)?;

        for name in root.files().keys().chain(root.subdirectories().keys()) {
            if !target_dir.join(name).exists() {
                return Err(Error::MissingOutput(target_dir.join(name).display().to_string()));
            }
        }
        Ok(())
    }

    fn scrub(&self, target_dir: &Path) -> Result<(), Error> {
        fs::create_dir_all(target_dir)?;
        for entry in fs::read_dir(target_dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry.metadata()?;
            if meta.is_symlink() {
                fs::remove_file(&path)?;
            } else if meta.is_dir() {
                if self.large_directory_names.contains(&name) || self.skip_cache_names.contains(&name) {
                    make_tree_writable(&path)?;
                    fs::remove_dir_all(&path)?;
                } else {
                    // Ordinary cached entry: a link to the cache root.
                    fs::remove_dir_all(&path).or_else(|_| fs::remove_file(&path))?;
                }
            } else {
                make_writable(&path)?;
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Materialize `data`'s files and subdirectories into `target_dir`
    /// (spec §4.5 steps 3-9, reused for both the root and each `large`
    /// subdirectory's children per step 4).
    fn materialize_toplevel(
        &self,
        data: &DirectoryData,
        target_dir: &Path,
        backend: &dyn BlobStoreBackend,
        blob_cache: &BlobCache,
    ) -> Result<(), Error> {
        fs::create_dir_all(target_dir)?;

        if !data.files().is_empty() {
            let files: Vec<_> = data
                .files()
                .iter()
                .map(|(name, entry)| re_content_store::FileNode {
                    name: name.clone(),
                    digest: entry.digest.clone(),
                    is_executable: entry.is_executable,
                })
                .collect();
            blob_cache.fetch_to(backend, &files, target_dir, self.link_mode)?;
        }

        let mut large = Vec::new();
        let mut skip_cache = Vec::new();
        let mut cached = Vec::new();
        for (name, child) in data.subdirectories() {
            if self.large_directory_names.contains(name) {
                large.push((name, child));
            } else if self.skip_cache_names.contains(name) {
                skip_cache.push((name, child));
            } else {
                cached.push((name, child));
            }
        }

        for (name, child) in large {
            self.materialize_toplevel(child, &target_dir.join(name), backend, blob_cache)?;
        }
        for (name, child) in skip_cache {
            let dir = target_dir.join(name);
            self.build_native(child, &dir, backend, blob_cache, true)?;
        }
        for (name, child) in cached {
            self.build_and_link_cached(child, &target_dir.join(name), backend, blob_cache)?;
        }

        Ok(())
    }

    /// Build `data` natively into `dir` without touching the tree
    /// cache (used for `skip_cache` subtrees, which stay writable and
    /// are never published).
    fn build_native(
        &self,
        data: &DirectoryData,
        dir: &Path,
        backend: &dyn BlobStoreBackend,
        blob_cache: &BlobCache,
        writable: bool,
    ) -> Result<(), Error> {
        fs::create_dir_all(dir)?;
        if !data.files().is_empty() {
            let files: Vec<_> = data
                .files()
                .iter()
                .map(|(name, entry)| re_content_store::FileNode {
                    name: name.clone(),
                    digest: entry.digest.clone(),
                    is_executable: entry.is_executable,
                })
                .collect();
            blob_cache.fetch_to(backend, &files, dir, LinkMode::Copy)?;
        }
        for (name, child) in data.subdirectories() {
            self.build_native(child, &dir.join(name), backend, blob_cache, writable)?;
        }
        Ok(())
    }

    /// Publish-or-reuse `data` as a cached subtree and link it into
    /// `link_path` (spec §4.5 steps 5-8).
    fn build_and_link_cached(
        &self,
        data: &DirectoryData,
        link_path: &Path,
        backend: &dyn BlobStoreBackend,
        blob_cache: &BlobCache,
    ) -> Result<(), Error> {
        let name_in_cache = data.name_in_cache();

        enum Step {
            AlreadyCached,
            WaitFor(Arc<Pending>),
            BuildAs(Arc<Pending>),
        }

        let step = {
            let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
            if shared.cached.contains_key(&name_in_cache) {
                shared.cached_order.retain(|k| k != &name_in_cache);
                shared.cached_order.push(name_in_cache.clone());
                Step::AlreadyCached
            } else if let Some(pending) = shared.pending.get(&name_in_cache) {
                Step::WaitFor(Arc::clone(pending))
            } else {
                self.reserve_for_build(&mut shared, data, &name_in_cache)?;
                let pending = Pending::new();
                let _ = shared.pending.insert(name_in_cache.clone(), Arc::clone(&pending));
                Step::BuildAs(pending)
            }
        };

        match step {
            Step::AlreadyCached => {}
            Step::WaitFor(pending) => {
                let _ = pending.wait()?;
            }
            Step::BuildAs(pending) => {
                let result = self.build_and_publish(data, &name_in_cache, backend, blob_cache);
                match result {
                    Ok(()) => pending.resolve(Ok(data.clone())),
                    Err(e) => {
                        pending.resolve(Err(e.to_string()));
                        self.abandon(&name_in_cache, data);
                        return Err(e);
                    }
                }
            }
        }

        self.link(&name_in_cache, link_path)
    }

    fn reserve_for_build(
        &self,
        shared: &mut Shared,
        data: &DirectoryData,
        name_in_cache: &str,
    ) -> Result<(), Error> {
        if self.max_cache_size_bytes == 0 {
            return Ok(());
        }
        let needed = self.additional_bytes_needed(shared, data);
        if data.copy_size_bytes() > self.max_cache_size_bytes {
            return Err(Error::MaxSizeReached {
                needed: data.copy_size_bytes(),
                bound: self.max_cache_size_bytes,
            });
        }
        let free = self.max_cache_size_bytes.saturating_sub(shared.current_size_bytes);
        if needed > free {
            let mut deficit = needed - free;
            let mut evicted = Vec::new();
            for name in shared.cached_order.clone() {
                if deficit == 0 {
                    break;
                }
                if name == name_in_cache {
                    continue;
                }
                if let Some(entry) = shared.cached.get(&name) {
                    let freed = self.would_free(shared, entry);
                    deficit = deficit.saturating_sub(freed);
                    evicted.push(name);
                }
            }
            if deficit > 0 {
                return Err(Error::MaxSizeReached {
                    needed,
                    bound: self.max_cache_size_bytes,
                });
            }
            for name in evicted {
                self.evict(shared, &name);
            }
        }
        shared.current_size_bytes += needed;
        Ok(())
    }

    fn additional_bytes_needed(&self, shared: &Shared, data: &DirectoryData) -> u64 {
        match &shared.file_count {
            None => data.copy_size_bytes(),
            Some(counts) => {
                let mut names = Vec::new();
                data.referenced_blob_names(&mut names);
                names
                    .into_iter()
                    .filter(|n| !counts.contains_key(n))
                    .filter_map(|n| parse_cache_name(&n).map(|d| d.size_bytes()))
                    .sum()
            }
        }
    }

    fn would_free(&self, shared: &Shared, data: &DirectoryData) -> u64 {
        match &shared.file_count {
            None => data.copy_size_bytes(),
            Some(counts) => {
                let mut names = Vec::new();
                data.referenced_blob_names(&mut names);
                names
                    .into_iter()
                    .filter(|n| counts.get(n).copied().unwrap_or(0) <= 1)
                    .filter_map(|n| parse_cache_name(&n).map(|d| d.size_bytes()))
                    .sum()
            }
        }
    }

    fn evict(&self, shared: &mut Shared, name: &str) {
        if let Some(data) = shared.cached.remove(name) {
            shared.cached_order.retain(|k| k != name);
            let freed = self.would_free(shared, &data);
            shared.current_size_bytes = shared.current_size_bytes.saturating_sub(freed);
            if let Some(counts) = &mut shared.file_count {
                let mut names = Vec::new();
                data.referenced_blob_names(&mut names);
                for blob_name in names {
                    if let Some(count) = counts.get_mut(&blob_name) {
                        *count -= 1;
                        if *count == 0 {
                            let _ = counts.remove(&blob_name);
                        }
                    }
                }
            }
            let path = self.cache_dir_root.join(name);
            let _ = make_tree_writable(&path);
            let _ = fs::remove_dir_all(path);
        }
    }

    fn abandon(&self, name_in_cache: &str, data: &DirectoryData) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if shared.pending.remove(name_in_cache).is_some() {
            let freed = self.additional_bytes_needed(&shared, data);
            shared.current_size_bytes = shared.current_size_bytes.saturating_sub(freed);
        }
    }

    fn build_and_publish(
        &self,
        data: &DirectoryData,
        name_in_cache: &str,
        backend: &dyn BlobStoreBackend,
        blob_cache: &BlobCache,
    ) -> Result<(), Error> {
        let tmp_path = self.cache_dir_root.join(format!("{name_in_cache}.tmp"));
        if tmp_path.exists() {
            fs::remove_dir_all(&tmp_path)?;
        }
        self.build_native(data, &tmp_path, backend, blob_cache, false)?;
        make_tree_readonly(&tmp_path)?;

        let _lock = self.locks.acquire(&name_in_cache.to_string());
        let final_path = self.cache_dir_root.join(name_in_cache);
        if final_path.exists() {
            make_tree_writable(&final_path)?;
            fs::remove_dir_all(&final_path)?;
        }
        fs::rename(&tmp_path, &final_path)?;

        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        let _ = shared.pending.remove(name_in_cache);
        if let Some(counts) = &mut shared.file_count {
            let mut names = Vec::new();
            data.referenced_blob_names(&mut names);
            for blob_name in names {
                *counts.entry(blob_name).or_insert(0) += 1;
            }
        }
        let _ = shared.cached.insert(name_in_cache.to_string(), data.clone());
        shared.cached_order.push(name_in_cache.to_string());
        Ok(())
    }

    fn link(&self, name_in_cache: &str, link_path: &Path) -> Result<(), Error> {
        let _lock = self.locks.acquire(&name_in_cache.to_string());
        if link_path.exists() || link_path.is_symlink() {
            if link_path.is_symlink() || link_path.metadata()?.is_file() {
                fs::remove_file(link_path)?;
            } else {
                make_tree_writable(link_path)?;
                fs::remove_dir_all(link_path)?;
            }
        }
        let target = self.cache_dir_root.join(name_in_cache);
        symlink_dir(&target, link_path)?;
        Ok(())
    }

    /// Sum of the tree cache's currently-charged bytes.
    #[must_use]
    pub fn current_size_bytes(&self) -> u64 {
        self.shared.lock().unwrap_or_else(|e| e.into_inner()).current_size_bytes
    }

    /// Number of subtrees currently published.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.shared.lock().unwrap_or_else(|e| e.into_inner()).cached.len()
    }
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    // Directory junctions are the Windows analogue; POSIX symlinks are
    // the only variant this crate implements (see DESIGN.md).
    std::os::windows::fs::symlink_dir(target, link)
}

fn remove_any(path: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.is_dir() {
        make_tree_writable(path)?;
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(unix)]
fn make_writable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn make_writable(path: &Path) -> std::io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(false);
    fs::set_permissions(path, perms)
}

fn make_tree_writable(root: &Path) -> std::io::Result<()> {
    make_writable(root)?;
    if root.is_dir() {
        for entry in fs::read_dir(root)? {
            make_tree_writable(&entry?.path())?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn make_tree_readonly(root: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if root.is_dir() {
        for entry in fs::read_dir(root)? {
            make_tree_readonly(&entry?.path())?;
        }
        fs::set_permissions(root, fs::Permissions::from_mode(0o500))
    } else {
        let executable = fs::metadata(root)?.permissions().mode() & 0o100 != 0;
        let mode = if executable { 0o500 } else { 0o400 };
        fs::set_permissions(root, fs::Permissions::from_mode(mode))
    }
}

#[cfg(not(unix))]
fn make_tree_readonly(root: &Path) -> std::io::Result<()> {
    if root.is_dir() {
        for entry in fs::read_dir(root)? {
            make_tree_readonly(&entry?.path())?;
        }
    }
    let mut perms = fs::metadata(root)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(root, perms)
}

fn parse_cache_name(name: &str) -> Option<Digest> {
    let (hash, size_str) = name.split_once('_')?;
    let size = size_str.parse::<u64>().ok()?;
    Digest::new(hash, size).ok()
}

/// Recompute a [`DirectoryData`] from an on-disk subtree for startup
/// verification, rejecting (returning `Err`) if any node is writable.
fn verify_subtree(path: &Path) -> Result<DirectoryData, Error> {
    let mut files = std::collections::BTreeMap::new();
    let mut subdirectories = std::collections::BTreeMap::new();

    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_writable(&meta) {
            return Err(Error::FileSystemCorruption {
                name: path.display().to_string(),
            });
        }
        if meta.is_dir() {
            let child = verify_subtree(&entry.path())?;
            let _ = subdirectories.insert(name, child);
        } else {
            let bytes = fs::read(entry.path())?;
            let digest = Digest::from_bytes(&bytes);
            let is_executable = is_executable_mode(&meta);
            let _ = files.insert(
                name,
                crate::data::FileEntry {
                    digest,
                    is_executable,
                },
            );
        }
    }

    Ok(DirectoryData::new(files, subdirectories))
}

#[cfg(unix)]
fn is_writable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o200 != 0
}

#[cfg(not(unix))]
fn is_writable(meta: &fs::Metadata) -> bool {
    !meta.permissions().readonly()
}

#[cfg(unix)]
fn is_executable_mode(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable_mode(_meta: &fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use re_content_store::testing::InMemoryBackend;
    use re_content_store::{Bound, Directory, DirectoryNode, FileNode};
    use tempfile::tempdir;

    fn setup() -> (InMemoryBackend, Mutex<DirectoryBlobCache>, BlobCache) {
        let backend = InMemoryBackend::new();
        let dir_blob_cache = Mutex::new(DirectoryBlobCache::new(Bound::Entries(100)));
        let blob_root = tempdir().unwrap();
        let blob_cache = BlobCache::new(blob_root.into_path(), 0);
        blob_cache.init().unwrap();
        (backend, dir_blob_cache, blob_cache)
    }

    #[test]
    fn build_materializes_files_and_subdirectories() {
        let (backend, dir_blob_cache, blob_cache) = setup();

        let child = Directory {
            files: vec![FileNode {
                name: "nested.txt".into(),
                digest: backend.put(b"nested".to_vec()),
                is_executable: false,
            }],
            directories: vec![],
        };
        let child_digest = backend.put(child.encode());

        let root = Directory {
            files: vec![FileNode {
                name: "top.txt".into(),
                digest: backend.put(b"top".to_vec()),
                is_executable: false,
            }],
            directories: vec![DirectoryNode {
                name: "sub".into(),
                digest: child_digest,
            }],
        };
        let root_digest = backend.put(root.encode());

        let cache_root = tempdir().unwrap();
        let target = tempdir().unwrap();
        let tree_cache = TreeCache::new(cache_root.path(), 0, LinkMode::Copy);
        tree_cache.init().unwrap();

        tree_cache
            .build(&backend, &dir_blob_cache, &blob_cache, &root_digest, target.path())
            .unwrap();

        assert_eq!(fs::read(target.path().join("top.txt")).unwrap(), b"top");
        assert_eq!(
            fs::read(target.path().join("sub").join("nested.txt")).unwrap(),
            b"nested"
        );
        assert_eq!(tree_cache.cached_len(), 1);
    }

    #[test]
    fn second_build_reuses_cached_subtree_via_link() {
        let (backend, dir_blob_cache, blob_cache) = setup();

        let child = Directory {
            files: vec![FileNode {
                name: "f.txt".into(),
                digest: backend.put(b"shared".to_vec()),
                is_executable: false,
            }],
            directories: vec![],
        };
        let child_digest = backend.put(child.encode());
        let root = Directory {
            files: vec![],
            directories: vec![DirectoryNode {
                name: "sub".into(),
                digest: child_digest,
            }],
        };
        let root_digest = backend.put(root.encode());

        let cache_root = tempdir().unwrap();
        let tree_cache = TreeCache::new(cache_root.path(), 0, LinkMode::Copy);
        tree_cache.init().unwrap();

        let target_a = tempdir().unwrap();
        tree_cache
            .build(&backend, &dir_blob_cache, &blob_cache, &root_digest, target_a.path())
            .unwrap();
        assert_eq!(tree_cache.cached_len(), 1);

        let target_b = tempdir().unwrap();
        tree_cache
            .build(&backend, &dir_blob_cache, &blob_cache, &root_digest, target_b.path())
            .unwrap();
        // Still one published subtree; the second build linked to it.
        assert_eq!(tree_cache.cached_len(), 1);
        assert_eq!(
            fs::read(target_b.path().join("sub").join("f.txt")).unwrap(),
            b"shared"
        );
    }
}
