use std::fmt;

use libp2p::PeerId;
use thiserror::Error;

use crate::protocol::ProtocolId;

/// Which half of the protocol registry an operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryKind {
    Listener,
    Service,
}

impl fmt::Display for FactoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactoryKind::Listener => f.write_str("listener"),
            FactoryKind::Service => f.write_str("service"),
        }
    }
}

/// Errors that can occur in the routing and dispatch core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A factory was registered twice for the same protocol.
    #[error("duplicate registration, {kind} factory for protocol [{protocol}] already registered")]
    DuplicateRegistration {
        kind: FactoryKind,
        protocol: ProtocolId,
    },

    /// Nothing at all was registered: the process was wired incorrectly.
    #[error("no {kind} factory registered, register protocol plugins before starting")]
    EmptyRegistry { kind: FactoryKind },

    /// The protocol was never registered.
    #[error("unsupported protocol [{protocol}]")]
    UnsupportedProtocol { protocol: ProtocolId },

    /// A factory produced an object labelled with another protocol.
    #[error("mismatched protocol, expected [{expected}], got [{actual}]")]
    ProtocolMismatch {
        expected: ProtocolId,
        actual: ProtocolId,
    },

    /// A balancer factory was registered twice under the same name.
    #[error("duplicate registration, balancer [{name}] already registered")]
    DuplicateBalancer { name: String },

    /// No balancer factory is registered under the requested name.
    #[error("unsupported balancer [{name}]")]
    UnsupportedBalancer { name: String },

    /// The candidate set for a protocol is empty.
    #[error("not enough proxies for protocol [{protocol}]")]
    NotEnoughProxies { protocol: ProtocolId },

    /// Opening an overlay stream to a peer failed.
    #[error("open stream to {peer} for [{protocol}]: {reason}")]
    Dial {
        peer: PeerId,
        protocol: ProtocolId,
        reason: String,
    },

    /// Peer discovery failed.
    #[error("discovery error: {reason}")]
    Discovery { reason: String },

    /// The overlay transport failed outside of a dial.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// A listener or service factory could not build its object.
    #[error("factory for [{protocol}] failed: {reason}")]
    Factory {
        protocol: ProtocolId,
        reason: String,
    },

    /// `start` was called on a router or dispatcher that is already running.
    #[error("{component} already started")]
    AlreadyStarted { component: &'static str },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether this is a [`CoreError::NotEnoughProxies`].
    pub fn is_not_enough_proxies(&self) -> bool {
        matches!(self, CoreError::NotEnoughProxies { .. })
    }

    /// Whether the lookup failed because the protocol is unknown, either
    /// because it was never registered or because nothing was.
    pub fn is_unsupported_protocol(&self) -> bool {
        matches!(
            self,
            CoreError::UnsupportedProtocol { .. } | CoreError::EmptyRegistry { .. }
        )
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Several errors combined into one, in the order they were observed.
///
/// Used wherever more than one resource is torn down at once (relay
/// endpoints, listeners, services, the transport handle) and every failure
/// must be reported.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<BoxError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error.
    pub fn push<E>(&mut self, err: E)
    where
        E: Into<BoxError>,
    {
        self.errors.push(err.into());
    }

    /// Record the error of `result`, if any, and hand back the success value.
    pub fn check<T, E>(&mut self, result: Result<T, E>) -> Option<T>
    where
        E: Into<BoxError>,
    {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    /// Combine a batch of results, keeping every error.
    pub fn combine<I, E>(results: I) -> Result<(), MultiError>
    where
        I: IntoIterator<Item = Result<(), E>>,
        E: Into<BoxError>,
    {
        let mut errs = MultiError::new();
        for r in results {
            errs.check(r);
        }
        errs.into_result()
    }

    /// Fold another multi-error into this one.
    pub fn extend(&mut self, other: MultiError) {
        self.errors.extend(other.errors);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(dyn std::error::Error + Send + Sync + 'static)> {
        self.errors.iter().map(|e| e.as_ref())
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), MultiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("no errors"),
            [only] => write!(f, "{}", only),
            all => {
                write!(f, "{} errors occurred: ", all.len())?;
                for (i, e) in all.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MultiError {}
