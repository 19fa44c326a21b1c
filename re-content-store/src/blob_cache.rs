//! Persistent hardlink/copy blob cache: the file layer (spec §4.4).

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::SystemTime;

use crate::backend::BlobStoreBackend;
use crate::{Digest, Error, FileNode, LockRegistry};

/// A stat snapshot recorded for a tracked on-disk blob, used both to
/// detect tampering (spec §4.4 link phase) and, at startup, to order
/// eviction by last access.
#[derive(Debug, Clone)]
struct FileCacheInfo {
    size_bytes: u64,
    modified: SystemTime,
    accessed: SystemTime,
    is_executable: bool,
}

impl FileCacheInfo {
    fn from_metadata(meta: &fs::Metadata) -> Self {
        Self {
            size_bytes: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            accessed: meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            is_executable: is_executable(meta),
        }
    }

    fn matches(&self, meta: &fs::Metadata) -> bool {
        self.size_bytes == meta.len()
            && self.modified == meta.modified().unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn set_readonly_mode(path: &Path, executable: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o500 } else { 0o400 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_readonly_mode(path: &Path, _executable: bool) -> std::io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms)
}

/// How materialized copies of cached blobs are placed into a target
/// directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    /// `link()` the cached file directly (POSIX hardlink).
    Hardlink,
    /// Copy the bytes; used where hardlinks aren't viable (spec §4.4
    /// `copy_file` parameter). Windows junction/symlink variants are
    /// out of scope; this is the portable fallback.
    Copy,
}

/// An in-flight or completed download, shared by every caller waiting
/// on the same digest (spec §4.4 step 2 "attach to its completion
/// future").
struct Pending {
    done: Mutex<Option<Result<(), String>>>,
    cond: Condvar,
}

impl Pending {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            done: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    fn resolve(&self, result: Result<(), String>) {
        let mut guard = self.done.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(result);
        self.cond.notify_all();
    }

    fn wait(&self) -> Result<(), Error> {
        let mut guard = self.done.lock().unwrap_or_else(|e| e.into_inner());
        while guard.is_none() {
            guard = self.cond.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
        #[allow(clippy::unwrap_used)]
        guard.clone().unwrap().map_err(Error::Transport)
    }
}

struct Shared {
    tracked: HashMap<String, FileCacheInfo>,
    tracked_order: Vec<String>,
    pending: HashMap<String, Arc<Pending>>,
    current_size_bytes: u64,
}

/// Persistent hardlink/copy cache of individual file blobs.
///
/// Grounded on `examples/original_source/worker/filesystem.py`'s
/// `LocalHardlinkFilesystem`: the link/download/re-link phases and the
/// `_acquire_file_lock`/`_remove_file_lock` get-or-insert dance are
/// carried over directly (the latter via [`crate::lock::LockRegistry`],
/// which already handles the concurrent-create race that file.py
/// retries around). `max_cache_size_bytes == 0` disables the bound, as
/// in the original.
pub struct BlobCache {
    cache_root_dir: PathBuf,
    max_cache_size_bytes: u64,
    locks: LockRegistry<String>,
    shared: Mutex<Shared>,
}

impl BlobCache {
    /// Open (without yet verifying) a blob cache rooted at
    /// `cache_root_dir`. Call [`BlobCache::init`] before first use.
    #[must_use]
    pub fn new(cache_root_dir: impl Into<PathBuf>, max_cache_size_bytes: u64) -> Self {
        Self {
            cache_root_dir: cache_root_dir.into(),
            max_cache_size_bytes,
            locks: LockRegistry::new(),
            shared: Mutex::new(Shared {
                tracked: HashMap::new(),
                tracked_order: Vec::new(),
                pending: HashMap::new(),
                current_size_bytes: 0,
            }),
        }
    }

    /// Create the cache root if absent and verify every entry already
    /// on disk (spec §4.4 "Verification at startup").
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on a filesystem failure.
    pub fn init(&self) -> Result<(), Error> {
        fs::create_dir_all(&self.cache_root_dir)?;

        let mut infos: Vec<(String, FileCacheInfo)> = Vec::new();
        for entry in fs::read_dir(&self.cache_root_dir)? {
            let entry = entry?;
            let path = entry.path();
            let meta = entry.metadata()?;
            if !meta.is_file() {
                if meta.is_dir() {
                    fs::remove_dir_all(&path)?;
                } else {
                    fs::remove_file(&path)?;
                }
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((hash, size_str)) = name.split_once('_') else {
                fs::remove_file(&path)?;
                continue;
            };
            let Ok(declared_size) = size_str.parse::<u64>() else {
                fs::remove_file(&path)?;
                continue;
            };
            // Snapshot first so eviction-by-atime below uses the
            // pre-verification access time, not one perturbed by the
            // hash read.
            let info = FileCacheInfo::from_metadata(&meta);
            let valid = !is_writable(&meta)
                && meta.len() == declared_size
                && hash_file(&path)? == hash;
            if valid {
                infos.push((name, info));
            } else {
                fs::remove_file(&path)?;
            }
        }

        if self.max_cache_size_bytes > 0 {
            infos.sort_by_key(|(_, info)| info.accessed);
            let mut total: u64 = infos.iter().map(|(_, i)| i.size_bytes).sum();
            while total > self.max_cache_size_bytes && !infos.is_empty() {
                let (name, info) = infos.remove(0);
                fs::remove_file(self.cache_root_dir.join(&name))?;
                total -= info.size_bytes;
            }
        }

        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        shared.current_size_bytes = infos.iter().map(|(_, i)| i.size_bytes).sum();
        for (name, info) in infos {
            shared.tracked_order.push(name.clone());
            shared.tracked.insert(name, info);
        }
        Ok(())
    }

    /// Link or copy every entry of `files` into `target_dir`, fetching
    /// from `backend` whatever is missing or corrupted (spec §4.4
    /// `fetch_to`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::MaxSizeReached`] if eviction cannot free enough
    /// space, [`Error::IntegrityFailure`] if downloaded bytes fail
    /// verification, [`Error::MissingOutput`] if a requested file is
    /// still absent from `target_dir` after the re-link phase, or
    /// [`Error::Io`] on a filesystem failure.
    pub fn fetch_to(
        &self,
        backend: &dyn BlobStoreBackend,
        files: &[FileNode],
        target_dir: &Path,
        link_mode: LinkMode,
    ) -> Result<(), Error> {
        fs::create_dir_all(target_dir)?;

        let missing = self.link_existing_files(files, target_dir, link_mode)?;
        if missing.is_empty() {
            return Ok(());
        }

        let (futures, created_executable) = self.plan_downloads(&missing)?;
        self.run_downloads(backend, &futures, &created_executable)?;
        for pending in futures.values() {
            pending.wait()?;
        }

        let still_missing = self.link_existing_files(&missing, target_dir, link_mode)?;
        if !still_missing.is_empty() {
            return Err(Error::MissingOutput(format!(
                "{} file(s) absent from {} after fetch",
                still_missing.len(),
                target_dir.display()
            )));
        }
        for file in files {
            if !target_dir.join(&file.name).exists() {
                return Err(Error::MissingOutput(
                    target_dir.join(&file.name).display().to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Link phase: for each file, either link/copy an already-valid
    /// cache entry into place, or report it missing/corrupted.
    fn link_existing_files(
        &self,
        files: &[FileNode],
        target_dir: &Path,
        link_mode: LinkMode,
    ) -> Result<Vec<FileNode>, Error> {
        let mut missing = Vec::new();
        for file in files {
            let name_in_cache = file.digest.cache_name();
            let _lock = self.locks.acquire(&name_in_cache);
            let path_in_cache = self.cache_root_dir.join(&name_in_cache);

            let tracked_info = {
                let shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
                shared.tracked.get(&name_in_cache).cloned()
            };

            match (path_in_cache.exists(), tracked_info) {
                (true, Some(info)) if info.matches(&fs::metadata(&path_in_cache)?) => {
                    place(&path_in_cache, &target_dir.join(&file.name), link_mode)?;
                }
                (true, _) => {
                    // Untracked or stat mismatch: corrupted. Drop it and
                    // queue for redownload.
                    fs::remove_file(&path_in_cache)?;
                    let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(info) = shared.tracked.remove(&name_in_cache) {
                        shared.tracked_order.retain(|k| k != &name_in_cache);
                        shared.current_size_bytes =
                            shared.current_size_bytes.saturating_sub(info.size_bytes);
                    }
                    missing.push(file.clone());
                }
                (false, _) => missing.push(file.clone()),
            }
        }
        Ok(missing)
    }

    /// Plan phase: decide eviction and register pending futures for
    /// every digest that still needs downloading.
    ///
    /// Returns every future the caller should wait on (both freshly
    /// reserved and ones already in flight from another caller) and,
    /// for each cache name *this call* reserved, whether any file node
    /// referencing that digest in `missing` wants the executable bit
    /// (spec §4.4 step 3: OR'd across every referencing file node).
    /// Only the latter set should ever be fetched/published — an
    /// in-flight digest is published by whichever caller created it.
    fn plan_downloads(
        &self,
        missing: &[FileNode],
    ) -> Result<(HashMap<String, Arc<Pending>>, HashMap<String, bool>), Error> {
        let mut executable_by_name: HashMap<String, bool> = HashMap::new();
        for file in missing {
            let entry = executable_by_name.entry(file.digest.cache_name()).or_insert(false);
            *entry |= file.is_executable;
        }

        let mut futures = HashMap::new();
        let mut to_reserve: Vec<(String, u64)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        for file in missing {
            let name_in_cache = file.digest.cache_name();
            if shared.tracked.contains_key(&name_in_cache) {
                shared.tracked_order.retain(|k| k != &name_in_cache);
                shared.tracked_order.push(name_in_cache);
                continue;
            }
            if let Some(pending) = shared.pending.get(&name_in_cache) {
                futures.insert(name_in_cache, Arc::clone(pending));
                continue;
            }
            if seen.insert(name_in_cache.clone()) {
                to_reserve.push((name_in_cache, file.digest.size_bytes()));
            }
        }

        if self.max_cache_size_bytes > 0 {
            let needed: u64 = to_reserve.iter().map(|(_, size)| *size).sum();
            if let Some(biggest) = to_reserve.iter().map(|(_, size)| *size).max() {
                if biggest > self.max_cache_size_bytes {
                    return Err(Error::MaxSizeReached {
                        needed: biggest,
                        bound: self.max_cache_size_bytes,
                    });
                }
            }
            let free = self
                .max_cache_size_bytes
                .saturating_sub(shared.current_size_bytes);
            if needed > free {
                let mut deficit = needed - free;
                let mut evicted = Vec::new();
                for name in shared.tracked_order.clone() {
                    if deficit == 0 {
                        break;
                    }
                    if let Some(info) = shared.tracked.get(&name) {
                        deficit = deficit.saturating_sub(info.size_bytes);
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
                    if let Some(info) = shared.tracked.remove(&name) {
                        shared.tracked_order.retain(|k| k != &name);
                        shared.current_size_bytes -= info.size_bytes;
                        let path = self.cache_root_dir.join(&name);
                        let _ = fs::remove_file(path);
                    }
                }
            }
        }

        let mut created_executable = HashMap::new();
        for (name_in_cache, size_bytes) in to_reserve {
            shared.current_size_bytes += size_bytes;
            let pending = Pending::new();
            shared.pending.insert(name_in_cache.clone(), Arc::clone(&pending));
            futures.insert(name_in_cache.clone(), pending);
            let is_executable = executable_by_name.get(&name_in_cache).copied().unwrap_or(false);
            created_executable.insert(name_in_cache, is_executable);
        }

        Ok((futures, created_executable))
    }

    /// I/O phase: fetch every digest `plan_downloads` reserved *for
    /// this call* and publish it, resolving the corresponding future.
    /// Digests this call merely attached to (present in `futures` but
    /// absent from `created_executable`) are someone else's in-flight
    /// download; that caller's thread fetches and publishes them.
    fn run_downloads(
        &self,
        backend: &dyn BlobStoreBackend,
        futures: &HashMap<String, Arc<Pending>>,
        created_executable: &HashMap<String, bool>,
    ) -> Result<(), Error> {
        let to_fetch: Vec<(String, Arc<Pending>)> = futures
            .iter()
            .filter(|(name, _)| created_executable.contains_key(*name))
            .map(|(name, pending)| (name.clone(), Arc::clone(pending)))
            .collect();
        if to_fetch.is_empty() {
            return Ok(());
        }

        let digests: Vec<Digest> = to_fetch
            .iter()
            .filter_map(|(name, _)| parse_cache_name(name))
            .collect();

        let fetched = backend.batch_read_blobs(&digests);
        let fetched = match fetched {
            Ok(map) => map,
            Err(e) => {
                for (name, pending) in &to_fetch {
                    pending.resolve(Err(e.to_string()));
                    self.abandon(name);
                }
                return Err(e);
            }
        };

        for (name, pending) in &to_fetch {
            let Some(digest) = parse_cache_name(name) else {
                pending.resolve(Err("malformed cache name".into()));
                self.abandon(name);
                continue;
            };
            let is_executable = created_executable.get(name).copied().unwrap_or(false);
            let result = match fetched.get(&digest) {
                Some(bytes) => self.publish(&digest, bytes, is_executable),
                None => Err(Error::BatchReadBlobsMissing {
                    digests: vec![digest.clone()],
                }),
            };
            match result {
                Ok(()) => pending.resolve(Ok(())),
                Err(e) => {
                    pending.resolve(Err(e.to_string()));
                    self.abandon(name);
                }
            }
        }
        Ok(())
    }

    fn abandon(&self, name_in_cache: &str) {
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        if shared.pending.remove(name_in_cache).is_some() {
            if let Some(digest) = parse_cache_name(name_in_cache) {
                shared.current_size_bytes =
                    shared.current_size_bytes.saturating_sub(digest.size_bytes());
            }
        }
    }

    fn publish(&self, digest: &Digest, bytes: &[u8], is_executable: bool) -> Result<(), Error> {
        if Digest::from_bytes(bytes) != *digest {
            return Err(Error::IntegrityFailure {
                digest: digest.clone(),
            });
        }
        let name_in_cache = digest.cache_name();
        let _lock = self.locks.acquire(&name_in_cache);
        let tmp_path = self.cache_root_dir.join(format!("{name_in_cache}.tmp"));
        let final_path = self.cache_root_dir.join(&name_in_cache);

        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(bytes)?;
        }
        set_readonly_mode(&tmp_path, is_executable)?;
        if final_path.exists() {
            fs::remove_file(&final_path)?;
        }
        fs::rename(&tmp_path, &final_path)?;

        let meta = fs::metadata(&final_path)?;
        let mut shared = self.shared.lock().unwrap_or_else(|e| e.into_inner());
        let _ = shared.pending.remove(&name_in_cache);
        let _ = shared
            .tracked
            .insert(name_in_cache.clone(), FileCacheInfo::from_metadata(&meta));
        shared.tracked_order.push(name_in_cache);
        Ok(())
    }

    /// Sum of sizes of tracked and pending entries.
    #[must_use]
    pub fn current_size_bytes(&self) -> u64 {
        self.shared.lock().unwrap_or_else(|e| e.into_inner()).current_size_bytes
    }
}

fn place(src: &Path, dst: &Path, link_mode: LinkMode) -> Result<(), Error> {
    if dst.exists() {
        fs::remove_file(dst)?;
    }
    match link_mode {
        LinkMode::Hardlink => fs::hard_link(src, dst)?,
        LinkMode::Copy => {
            fs::copy(src, dst)?;
        }
    }
    Ok(())
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

fn hash_file(path: &Path) -> Result<String, Error> {
    let bytes = fs::read(path)?;
    Ok(Digest::from_bytes(&bytes).hash().to_string())
}

fn parse_cache_name(name: &str) -> Option<Digest> {
    let (hash, size_str) = name.split_once('_')?;
    let size = size_str.parse::<u64>().ok()?;
    Digest::new(hash, size).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryBackend;
    use tempfile::tempdir;

    #[test]
    fn fetch_to_downloads_and_links_missing_file() {
        let cache_dir = tempdir().unwrap();
        let target_dir = tempdir().unwrap();
        let cache = BlobCache::new(cache_dir.path(), 0);
        cache.init().unwrap();

        let backend = InMemoryBackend::new();
        let digest = backend.put(b"hello world".to_vec());
        let file = FileNode {
            name: "greeting.txt".into(),
            digest,
            is_executable: false,
        };

        cache
            .fetch_to(&backend, &[file.clone()], target_dir.path(), LinkMode::Copy)
            .unwrap();

        let contents = fs::read(target_dir.path().join("greeting.txt")).unwrap();
        assert_eq!(contents, b"hello world");
    }

    #[test]
    fn fetch_to_second_call_hits_cache_without_backend() {
        let cache_dir = tempdir().unwrap();
        let target_a = tempdir().unwrap();
        let target_b = tempdir().unwrap();
        let cache = BlobCache::new(cache_dir.path(), 0);
        cache.init().unwrap();

        let backend = InMemoryBackend::new();
        let digest = backend.put(b"cached bytes".to_vec());
        let file = FileNode {
            name: "f.bin".into(),
            digest: digest.clone(),
            is_executable: false,
        };
        cache
            .fetch_to(&backend, &[file.clone()], target_a.path(), LinkMode::Copy)
            .unwrap();

        backend.mark_missing(digest);
        // Should succeed purely from the on-disk cache; backend is now
        // unreachable for this digest.
        cache
            .fetch_to(&backend, &[file], target_b.path(), LinkMode::Copy)
            .unwrap();
        assert_eq!(
            fs::read(target_b.path().join("f.bin")).unwrap(),
            b"cached bytes"
        );
    }

    #[test]
    fn fetch_to_reports_missing_output_on_backend_gap() {
        let cache_dir = tempdir().unwrap();
        let target_dir = tempdir().unwrap();
        let cache = BlobCache::new(cache_dir.path(), 0);
        cache.init().unwrap();

        let backend = InMemoryBackend::new();
        let digest = Digest::from_bytes(b"never uploaded");
        let file = FileNode {
            name: "ghost.bin".into(),
            digest,
            is_executable: false,
        };
        let result = cache.fetch_to(&backend, &[file], target_dir.path(), LinkMode::Copy);
        assert!(result.is_err());
    }

    #[test]
    fn single_blob_over_bound_fails_max_size_reached() {
        let cache_dir = tempdir().unwrap();
        let target_dir = tempdir().unwrap();
        let cache = BlobCache::new(cache_dir.path(), 4);
        cache.init().unwrap();

        let backend = InMemoryBackend::new();
        let digest = backend.put(b"way too big".to_vec());
        let file = FileNode {
            name: "big.bin".into(),
            digest,
            is_executable: false,
        };
        let err = cache
            .fetch_to(&backend, &[file], target_dir.path(), LinkMode::Copy)
            .unwrap_err();
        assert!(matches!(err, Error::MaxSizeReached { .. }));
    }

    #[test]
    #[cfg(unix)]
    fn fetch_to_materializes_executable_bit() {
        use std::os::unix::fs::PermissionsExt;

        let cache_dir = tempdir().unwrap();
        let target_dir = tempdir().unwrap();
        let cache = BlobCache::new(cache_dir.path(), 0);
        cache.init().unwrap();

        let backend = InMemoryBackend::new();
        let digest = backend.put(b"#!/bin/sh\necho hi\n".to_vec());
        let file = FileNode {
            name: "run.sh".into(),
            digest,
            is_executable: true,
        };
        cache
            .fetch_to(&backend, &[file], target_dir.path(), LinkMode::Copy)
            .unwrap();

        let mode = fs::metadata(target_dir.path().join("run.sh"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o500);
    }

    /// Wraps [`InMemoryBackend`] with a call counter and an artificial
    /// delay, widening the window in which a second concurrent
    /// `fetch_to` for the same digest can attach to the first call's
    /// pending download instead of starting its own.
    struct CountingBackend {
        inner: InMemoryBackend,
        batch_calls: Mutex<usize>,
    }

    impl BlobStoreBackend for CountingBackend {
        fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>, Error> {
            self.inner.read_blob(digest)
        }

        fn batch_read_blobs_raw(&self, digests: &[Digest]) -> Result<HashMap<Digest, Vec<u8>>, Error> {
            *self.batch_calls.lock().unwrap_or_else(|e| e.into_inner()) += 1;
            std::thread::sleep(std::time::Duration::from_millis(50));
            self.inner.batch_read_blobs_raw(digests)
        }

        fn write_blob(&self, digest: &Digest, bytes: &[u8]) -> Result<(), Error> {
            self.inner.write_blob(digest, bytes)
        }
    }

    #[test]
    fn concurrent_fetch_to_downloads_digest_exactly_once() {
        let cache_dir = tempdir().unwrap();
        let cache = Arc::new({
            let cache = BlobCache::new(cache_dir.path(), 0);
            cache.init().unwrap();
            cache
        });

        let backend = Arc::new(CountingBackend {
            inner: InMemoryBackend::new(),
            batch_calls: Mutex::new(0),
        });
        let digest = backend.inner.put(b"shared payload".to_vec());
        let file = FileNode {
            name: "shared.bin".into(),
            digest,
            is_executable: false,
        };

        let target_a = tempdir().unwrap();
        let target_b = tempdir().unwrap();

        let threads: Vec<_> = [target_a.path().to_path_buf(), target_b.path().to_path_buf()]
            .into_iter()
            .map(|target_dir| {
                let cache = Arc::clone(&cache);
                let backend = Arc::clone(&backend);
                let file = file.clone();
                std::thread::spawn(move || {
                    cache
                        .fetch_to(backend.as_ref(), &[file], &target_dir, LinkMode::Copy)
                        .unwrap();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(*backend.batch_calls.lock().unwrap(), 1);
        assert_eq!(
            fs::read(target_a.path().join("shared.bin")).unwrap(),
            b"shared payload"
        );
        assert_eq!(
            fs::read(target_b.path().join("shared.bin")).unwrap(),
            b"shared payload"
        );
    }

    #[test]
    fn startup_verification_drops_tampered_entry() {
        let cache_dir = tempdir().unwrap();
        let name = format!("{}_{}", "a".repeat(64), 3);
        fs::write(cache_dir.path().join(&name), b"xyz").unwrap();
        set_readonly_mode(&cache_dir.path().join(&name), false).unwrap();

        let cache = BlobCache::new(cache_dir.path(), 0);
        cache.init().unwrap();
        assert_eq!(cache.current_size_bytes(), 0);
        assert!(!cache_dir.path().join(&name).exists());
    }
}
