//! Protocol registry: maps a protocol id to the factory that builds its
//! listener (endpoint side) or its service (proxy side).
//!
//! Plugins register explicitly while the process is being wired; lookups
//! happen once per configured protocol when the router or dispatcher starts.

use std::collections::HashMap;

use tracing::Span;

use crate::error::{CoreError, FactoryKind};
use crate::protocol::{ProtocolId, ServiceConfig, SharedListener, SharedService};

/// Builds a listener bound to `listen`. The span is scoped to the
/// protocol's short name.
pub type ListenerFactory =
    Box<dyn Fn(Span, &str) -> Result<SharedListener, CoreError> + Send + Sync>;

/// Builds a service from its per-protocol config.
pub type ServiceFactory =
    Box<dyn Fn(Span, &ServiceConfig) -> Result<SharedService, CoreError> + Send + Sync>;

struct Entry<F> {
    short: String,
    factory: F,
}

/// Explicit registry object built at process start.
#[derive(Default)]
pub struct ProtocolRegistry {
    listeners: HashMap<ProtocolId, Entry<ListenerFactory>>,
    services: HashMap<ProtocolId, Entry<ServiceFactory>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the endpoint-side listener factory for `protocol`.
    /// The first registration wins; a second one is a wiring error.
    pub fn register_listener_factory(
        &mut self,
        protocol: impl Into<ProtocolId>,
        short: &str,
        factory: ListenerFactory,
    ) -> Result<(), CoreError> {
        let protocol = protocol.into();
        if self.listeners.contains_key(&protocol) {
            return Err(CoreError::DuplicateRegistration {
                kind: FactoryKind::Listener,
                protocol,
            });
        }
        tracing::debug!(%protocol, short, "registered listener factory");
        self.listeners.insert(
            protocol,
            Entry {
                short: short.to_string(),
                factory,
            },
        );
        Ok(())
    }

    /// Register the proxy-side service factory for `protocol`.
    pub fn register_service_factory(
        &mut self,
        protocol: impl Into<ProtocolId>,
        short: &str,
        factory: ServiceFactory,
    ) -> Result<(), CoreError> {
        let protocol = protocol.into();
        if self.services.contains_key(&protocol) {
            return Err(CoreError::DuplicateRegistration {
                kind: FactoryKind::Service,
                protocol,
            });
        }
        tracing::debug!(%protocol, short, "registered service factory");
        self.services.insert(
            protocol,
            Entry {
                short: short.to_string(),
                factory,
            },
        );
        Ok(())
    }

    /// Build a listener for `protocol` bound to `listen`.
    pub fn new_listener(
        &self,
        protocol: &ProtocolId,
        listen: &str,
    ) -> Result<SharedListener, CoreError> {
        let entry = lookup(&self.listeners, protocol, FactoryKind::Listener)?;
        let span = tracing::info_span!("listener", name = %entry.short);
        let listener = (entry.factory)(span, listen)?;
        check_protocol(protocol, listener.protocol())?;
        Ok(listener)
    }

    /// Build a service for `protocol` from its config.
    pub fn new_service(
        &self,
        protocol: &ProtocolId,
        config: &ServiceConfig,
    ) -> Result<SharedService, CoreError> {
        let entry = lookup(&self.services, protocol, FactoryKind::Service)?;
        let span = tracing::info_span!("service", name = %entry.short);
        let service = (entry.factory)(span, config)?;
        check_protocol(protocol, service.protocol())?;
        Ok(service)
    }

    /// Short name registered for `protocol`, listener side first.
    pub fn short_name(&self, protocol: &ProtocolId) -> Option<&str> {
        self.listeners
            .get(protocol)
            .map(|e| e.short.as_str())
            .or_else(|| self.services.get(protocol).map(|e| e.short.as_str()))
    }

    pub fn has_listener(&self, protocol: &ProtocolId) -> bool {
        self.listeners.contains_key(protocol)
    }

    pub fn has_service(&self, protocol: &ProtocolId) -> bool {
        self.services.contains_key(protocol)
    }
}

fn lookup<'a, F>(
    map: &'a HashMap<ProtocolId, Entry<F>>,
    protocol: &ProtocolId,
    kind: FactoryKind,
) -> Result<&'a Entry<F>, CoreError> {
    match map.get(protocol) {
        Some(entry) => Ok(entry),
        None if map.is_empty() => Err(CoreError::EmptyRegistry { kind }),
        None => Err(CoreError::UnsupportedProtocol {
            protocol: protocol.clone(),
        }),
    }
}

fn check_protocol(expected: &ProtocolId, actual: &ProtocolId) -> Result<(), CoreError> {
    if expected != actual {
        return Err(CoreError::ProtocolMismatch {
            expected: expected.clone(),
            actual: actual.clone(),
        });
    }
    Ok(())
}
