//! Resolving a wire-digest directory tree into [`DirectoryData`] (spec
//! §4.5 step 1).

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use re_content_store::{BlobStoreBackend, Digest, Directory, DirectoryBlobCache};

use crate::data::{DirectoryData, FileEntry};
use crate::error::Error;

/// Recursively resolve `root_digest` into a [`DirectoryData`], fetching
/// any directory blob not already present in `dir_blob_cache` from
/// `backend` and memoizing by wire digest so a subtree referenced from
/// two places is only resolved once per call.
///
/// # Errors
///
/// Returns [`Error::BatchReadBlobsMissing`] if a referenced directory
/// blob does not exist upstream, or [`Error::ContentStore`] on a
/// transport failure.
pub fn resolve(
    root_digest: &Digest,
    backend: &dyn BlobStoreBackend,
    dir_blob_cache: &Mutex<DirectoryBlobCache>,
) -> Result<DirectoryData, Error> {
    let mut memo = HashMap::new();
    resolve_memoized(root_digest, backend, dir_blob_cache, &mut memo)
}

fn resolve_memoized(
    digest: &Digest,
    backend: &dyn BlobStoreBackend,
    dir_blob_cache: &Mutex<DirectoryBlobCache>,
    memo: &mut HashMap<Digest, DirectoryData>,
) -> Result<DirectoryData, Error> {
    if let Some(resolved) = memo.get(digest) {
        return Ok(resolved.clone());
    }

    let directory = fetch_directory(digest, backend, dir_blob_cache)?;

    let mut files = BTreeMap::new();
    for file in &directory.files {
        let _ = files.insert(
            file.name.clone(),
            FileEntry {
                digest: file.digest.clone(),
                is_executable: file.is_executable,
            },
        );
    }

    let mut subdirectories = BTreeMap::new();
    for child in &directory.directories {
        let resolved = resolve_memoized(&child.digest, backend, dir_blob_cache, memo)?;
        let _ = subdirectories.insert(child.name.clone(), resolved);
    }

    let data = DirectoryData::new(files, subdirectories);
    let _ = memo.insert(digest.clone(), data.clone());
    Ok(data)
}

fn fetch_directory(
    digest: &Digest,
    backend: &dyn BlobStoreBackend,
    dir_blob_cache: &Mutex<DirectoryBlobCache>,
) -> Result<Directory, Error> {
    {
        let mut cache = dir_blob_cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(directory) = cache.get(digest) {
            return Ok(directory);
        }
    }

    let bytes = match backend.read_blob(digest) {
        Ok(bytes) => bytes,
        Err(re_content_store::Error::NotFound { .. }) => {
            return Err(Error::BatchReadBlobsMissing {
                digests: vec![digest.clone()],
            })
        }
        Err(e) => return Err(Error::ContentStore(e)),
    };
    let directory = Directory::decode(&bytes).map_err(Error::ContentStore)?;

    let mut cache = dir_blob_cache.lock().unwrap_or_else(|e| e.into_inner());
    let _ = cache.insert(digest.clone(), directory.clone());
    Ok(directory)
}
