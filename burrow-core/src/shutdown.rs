//! Broadcast shutdown signal shared by every long-lived loop.
//!
//! Closing a listener or a transport wakes whatever is blocked on it with an
//! error. Once shutdown has been triggered those errors are expected, so
//! callers run them through [`Shutdown::suppress`] before reporting.

use std::io;

use tokio_util::sync::CancellationToken;

const LISTENER_CLOSED: &str = "use of closed listener";

/// Cloneable shutdown signal. All clones observe the same trigger.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Non-blocking check.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal fires.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    /// A child signal: fires with this one, but can also be fired on its own.
    pub fn child(&self) -> Shutdown {
        Shutdown {
            token: self.token.child_token(),
        }
    }

    /// Drop `err` if it was observed after shutdown began.
    pub fn suppress<E>(&self, err: E) -> Option<E> {
        if self.is_triggered() {
            None
        } else {
            Some(err)
        }
    }
}

/// The error every closable listener returns from `accept` once closed.
pub fn listener_closed() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, LISTENER_CLOSED)
}

/// Whether `err` is the error produced by [`listener_closed`].
pub fn is_listener_closed(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::ConnectionAborted && err.to_string() == LISTENER_CLOSED
}
