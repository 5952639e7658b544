use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::CoreError;
use crate::protocol::SharedListener;

/// Shutdown bookkeeping shared by service implementations.
///
/// A service attaches its listener when `serve` starts; `shutdown` marks the
/// service as stopping and closes that listener, which unblocks `serve`.
/// Errors seen by `serve` afterwards are expected and filtered out.
#[derive(Default)]
pub struct ServiceLifecycle {
    shutting_down: AtomicBool,
    listener: Mutex<Option<SharedListener>>,
}

impl ServiceLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the listener being served. Returns `false` when shutdown
    /// already began, in which case the caller should not serve at all.
    pub fn attach(&self, listener: SharedListener) -> bool {
        let mut slot = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_shutting_down() {
            return false;
        }
        *slot = Some(listener);
        true
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Drop `err` if the service is shutting down.
    pub fn filter<E>(&self, err: E) -> Option<E> {
        if self.is_shutting_down() {
            None
        } else {
            Some(err)
        }
    }

    /// Mark the service as stopping and close the attached listener.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        self.shutting_down.store(true, Ordering::SeqCst);
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match listener {
            Some(l) => l.close().await.map_err(CoreError::from),
            None => Ok(()),
        }
    }
}
