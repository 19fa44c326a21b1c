//! Scheduler poll loop (SPEC_FULL §G; supplements the distillation).
//!
//! `examples/original_source/worker/runner.py` and `worker/state.py`
//! show the original's exchange: a loop that posts the worker's
//! current state and receives back a desired next state, executing
//! when the desired state names an action digest. [`SchedulerClient`]
//! is the synchronous trait that exchange is written against; no gRPC
//! implementation exists here (wire transport is out of scope), only
//! the loop and a scripted fake for tests. The "running a command"
//! half of `runner.py`'s `execute_command` is the stubbed executor
//! (out of scope per spec §1); this loop only drives materialization
//! and reports its outcome.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use re_content_store::{BlobCache, BlobStoreBackend, Digest, DirectoryBlobCache};
use re_tree_cache::{Materializer, MissingBlob, TreeCache};

use crate::error::Error;
use crate::shutdown;

/// The worker's current execution state, reported to the scheduler on
/// the next poll (mirrors `runner.py`'s three-way `CurrentState`:
/// idle, executing, completed/failed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentState {
    /// Not running an action.
    Idle,
    /// Materializing the input root for `action_digest`.
    Executing {
        /// The action being prepared.
        action_digest: Digest,
    },
    /// `action_digest` materialized successfully.
    Completed {
        /// The action that finished.
        action_digest: Digest,
    },
    /// `action_digest`'s input root referenced blobs missing upstream.
    PreconditionFailure {
        /// The action that failed precondition.
        action_digest: Digest,
        /// Every blob reference that upstream didn't have.
        missing: Vec<MissingBlob>,
    },
}

/// The scheduler's desired next state for this worker (mirrors
/// `remoteworker.DesiredState`'s `idle` / `executing` oneof).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesiredState {
    /// Nothing to do.
    Idle,
    /// Prepare and (eventually) run this action.
    Executing {
        /// Identifies the action for reporting.
        action_digest: Digest,
        /// The action's input root, to materialize.
        input_root_digest: Digest,
    },
}

/// A synchronous scheduler RPC: exchange the worker's current state for
/// a desired next state (spec §6 "Scheduler (consumed)").
pub trait SchedulerClient {
    /// Perform one synchronize exchange.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure.
    fn poll(&self, current_state: &CurrentState) -> Result<DesiredState, Error>;
}

/// Run the poll loop until `shutting_down` is set, materializing each
/// action's input root under `build_root` and reporting the outcome
/// back to the scheduler on the following poll.
///
/// # Errors
///
/// Returns an error if the scheduler client or materializer fails in a
/// way that isn't a translated precondition failure.
#[allow(clippy::too_many_arguments)]
pub fn run(
    client: &dyn SchedulerClient,
    tree_cache: &TreeCache,
    backend: &dyn BlobStoreBackend,
    dir_blob_cache: &Mutex<DirectoryBlobCache>,
    blob_cache: &BlobCache,
    build_root: &Path,
    shutting_down: &AtomicBool,
) -> Result<(), Error> {
    let materializer = Materializer::new(tree_cache, backend, dir_blob_cache, blob_cache);
    let mut current_state = CurrentState::Idle;

    loop {
        if shutdown::requested(shutting_down) {
            tracing::info!("shutdown requested, exiting poll loop");
            return Ok(());
        }

        let desired_state = client.poll(&current_state)?;
        current_state = match desired_state {
            DesiredState::Idle => CurrentState::Idle,
            DesiredState::Executing {
                action_digest,
                input_root_digest,
            } => {
                tracing::info!(action = %action_digest, "action started");
                let target_dir = action_build_dir(build_root, &action_digest);
                match materializer.materialize(&input_root_digest, &target_dir) {
                    Ok(None) => {
                        tracing::info!(action = %action_digest, "input root materialized");
                        CurrentState::Completed { action_digest }
                    }
                    Ok(Some(failure)) => {
                        tracing::warn!(
                            action = %action_digest,
                            missing = failure.missing.len(),
                            "action failed precondition"
                        );
                        CurrentState::PreconditionFailure {
                            action_digest,
                            missing: failure.missing,
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        };
    }
}

fn action_build_dir(build_root: &Path, action_digest: &Digest) -> PathBuf {
    build_root.join(action_digest.hash())
}

#[cfg(test)]
mod tests {
    use super::*;
    use re_content_store::testing::InMemoryBackend;
    use re_content_store::{Bound, Directory, LinkMode};
    use std::sync::atomic::Ordering;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct ScriptedClient {
        states: StdMutex<Vec<DesiredState>>,
        shutting_down: std::sync::Arc<AtomicBool>,
    }

    impl SchedulerClient for ScriptedClient {
        fn poll(&self, _current_state: &CurrentState) -> Result<DesiredState, Error> {
            let mut states = self.states.lock().unwrap();
            match states.pop() {
                Some(state) => Ok(state),
                None => {
                    self.shutting_down.store(true, Ordering::SeqCst);
                    Ok(DesiredState::Idle)
                }
            }
        }
    }

    #[test]
    fn loop_translates_missing_blob_into_precondition_failure_state() {
        let backend = InMemoryBackend::new();
        let ghost_root = Digest::from_bytes(b"never uploaded");
        let action_digest = Digest::from_bytes(b"action-1");

        let dir_blob_cache = Mutex::new(DirectoryBlobCache::new(Bound::Entries(10)));
        let blob_root = tempdir().unwrap();
        let blob_cache = BlobCache::new(blob_root.into_path(), 0);
        blob_cache.init().unwrap();
        let tree_root = tempdir().unwrap();
        let tree_cache = TreeCache::new(tree_root.path(), 0, LinkMode::Copy);
        tree_cache.init().unwrap();
        let build_root = tempdir().unwrap();

        let shutting_down = std::sync::Arc::new(AtomicBool::new(false));
        let client = ScriptedClient {
            states: StdMutex::new(vec![DesiredState::Executing {
                action_digest: action_digest.clone(),
                input_root_digest: ghost_root,
            }]),
            shutting_down: std::sync::Arc::clone(&shutting_down),
        };

        run(
            &client,
            &tree_cache,
            &backend,
            &dir_blob_cache,
            &blob_cache,
            build_root.path(),
            &shutting_down,
        )
        .unwrap();
    }

    #[test]
    fn loop_exits_as_soon_as_shutdown_is_requested() {
        let backend = InMemoryBackend::new();
        let dir_blob_cache = Mutex::new(DirectoryBlobCache::new(Bound::Entries(10)));
        let blob_root = tempdir().unwrap();
        let blob_cache = BlobCache::new(blob_root.into_path(), 0);
        blob_cache.init().unwrap();
        let tree_root = tempdir().unwrap();
        let tree_cache = TreeCache::new(tree_root.path(), 0, LinkMode::Copy);
        tree_cache.init().unwrap();
        let build_root = tempdir().unwrap();

        let shutting_down = std::sync::Arc::new(AtomicBool::new(true));
        let client = ScriptedClient {
            states: StdMutex::new(Vec::new()),
            shutting_down: std::sync::Arc::clone(&shutting_down),
        };

        run(
            &client,
            &tree_cache,
            &backend,
            &dir_blob_cache,
            &blob_cache,
            build_root.path(),
            &shutting_down,
        )
        .unwrap();
    }

    #[test]
    fn loop_completes_an_action_with_an_empty_input_root() {
        let backend = InMemoryBackend::new();
        let empty = Directory::default();
        let root_digest = backend.put(empty.encode());
        let action_digest = Digest::from_bytes(b"action-2");

        let dir_blob_cache = Mutex::new(DirectoryBlobCache::new(Bound::Entries(10)));
        let blob_root = tempdir().unwrap();
        let blob_cache = BlobCache::new(blob_root.into_path(), 0);
        blob_cache.init().unwrap();
        let tree_root = tempdir().unwrap();
        let tree_cache = TreeCache::new(tree_root.path(), 0, LinkMode::Copy);
        tree_cache.init().unwrap();
        let build_root = tempdir().unwrap();

        let shutting_down = std::sync::Arc::new(AtomicBool::new(false));
        let client = ScriptedClient {
            states: StdMutex::new(vec![DesiredState::Executing {
                action_digest: action_digest.clone(),
                input_root_digest: root_digest,
            }]),
            shutting_down: std::sync::Arc::clone(&shutting_down),
        };

        run(
            &client,
            &tree_cache,
            &backend,
            &dir_blob_cache,
            &blob_cache,
            build_root.path(),
            &shutting_down,
        )
        .unwrap();
    }
}
