//! Cooperative graceful shutdown (spec §6 CLI surface; supplemented by
//! `examples/original_source/winservice/winservice.py` and `worker.py`,
//! which show the original's "stop, let in-flight work finish, exit"
//! path without a process-global panic hook).
//!
//! Grounded on `thicclatka-nefaxer`'s `engine::tools::setup_ctrlc_handler`:
//! an `Arc<AtomicBool>` flipped by the `ctrlc` crate's combined
//! SIGINT/SIGTERM handler, polled cooperatively rather than used to
//! interrupt anything mid-flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Error;

/// Install a combined SIGINT/SIGTERM handler and return the flag it
/// sets. The scheduler poll loop checks this flag between actions
/// (spec §6: "stop accepting new actions, let in-flight actions
/// complete, exit").
///
/// # Errors
///
/// Returns [`Error::SignalHandler`] if a handler is already installed
/// for this process (`ctrlc::set_handler` may only be called once).
pub fn install() -> Result<Arc<AtomicBool>, Error> {
    let shutting_down = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutting_down);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;
    Ok(shutting_down)
}

/// Whether shutdown has been requested.
#[must_use]
pub fn requested(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_clear() {
        let flag = AtomicBool::new(false);
        assert!(!requested(&flag));
        flag.store(true, Ordering::SeqCst);
        assert!(requested(&flag));
    }
}
