// Signal handling outside the blocking read loop. The grounding crate's
// own read loop runs under an async executor and stops on a future being
// dropped; a blocking `std::net::UdpSocket` has no such hook, so Ctrl-C
// is instead turned into a flag the read loop checks after every receive
// timeout, per spec.md §9's redesign note (a named collaborator, not a
// bare static).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("failed to install Ctrl-C handler: {0}")]
    HandlerInstall(#[from] ctrlc::Error),
}

/// A cloneable flag set once, from the Ctrl-C signal thread, when the
/// operator asks the server to stop. The read loop polls `requested()`
/// between blocking receives.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Installs a process-wide Ctrl-C handler and returns a handle to
    /// observe it. Call once, near the start of `main`.
    pub fn install() -> Result<Self, ShutdownError> {
        let requested = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&requested);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })?;
        Ok(ShutdownHandle { requested })
    }

    pub fn requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        ShutdownHandle { requested: Arc::new(AtomicBool::new(false)) }
    }

    #[cfg(test)]
    pub fn trigger_for_test(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }
}
