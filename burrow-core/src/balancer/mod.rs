//! Peer selection strategies.
//!
//! A balancer picks one peer out of the current candidate set for a protocol.
//! Strategies are looked up by name, so the configured strategy is a plain
//! string in the node config.

mod round_robin;

use std::collections::HashMap;
use std::sync::Arc;

use libp2p::PeerId;

use crate::error::CoreError;
use crate::protocol::ProtocolId;

pub use round_robin::{RoundRobin, ROUND_ROBIN};

/// Source of candidate peers. Every call returns a fresh snapshot.
pub trait Getter: Send + Sync {
    fn get_proxies(&self, protocol: &ProtocolId) -> Vec<PeerId>;
}

/// A peer selection strategy.
pub trait Balancer: Send + Sync {
    fn name(&self) -> &str;

    /// Pick a peer for `protocol`. Never blocks; an empty candidate set is
    /// reported as [`CoreError::NotEnoughProxies`].
    fn next(&self, protocol: &ProtocolId) -> Result<PeerId, CoreError>;
}

pub type SharedBalancer = Arc<dyn Balancer>;

/// Builds a balancer reading candidates from the given getter.
pub type BalancerFactory = Box<dyn Fn(Arc<dyn Getter>) -> SharedBalancer + Send + Sync>;

/// Name → factory table for balancing strategies.
#[derive(Default)]
pub struct BalancerRegistry {
    factories: HashMap<String, BalancerFactory>,
}

impl BalancerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every built-in strategy registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        // The table is empty, so this cannot collide.
        let _ = registry.register_balancer_factory(
            ROUND_ROBIN,
            Box::new(|getter| Arc::new(RoundRobin::new(getter)) as SharedBalancer),
        );
        registry
    }

    pub fn register_balancer_factory(
        &mut self,
        name: &str,
        factory: BalancerFactory,
    ) -> Result<(), CoreError> {
        if self.factories.contains_key(name) {
            return Err(CoreError::DuplicateBalancer {
                name: name.to_string(),
            });
        }
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn new_balancer(
        &self,
        name: &str,
        getter: Arc<dyn Getter>,
    ) -> Result<SharedBalancer, CoreError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| CoreError::UnsupportedBalancer {
                name: name.to_string(),
            })?;
        Ok(factory(getter))
    }

    /// Registered strategy names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::CandidateSet;

    struct First(Arc<dyn Getter>);

    impl Balancer for First {
        fn name(&self) -> &str {
            "first"
        }

        fn next(&self, protocol: &ProtocolId) -> Result<PeerId, CoreError> {
            self.0
                .get_proxies(protocol)
                .first()
                .copied()
                .ok_or_else(|| CoreError::NotEnoughProxies {
                    protocol: protocol.clone(),
                })
        }
    }

    #[test]
    fn test_defaults_include_round_robin() {
        let registry = BalancerRegistry::with_defaults();
        assert_eq!(registry.names(), vec![ROUND_ROBIN]);
        let balancer = registry
            .new_balancer(ROUND_ROBIN, Arc::new(CandidateSet::new()))
            .unwrap();
        assert_eq!(balancer.name(), ROUND_ROBIN);
    }

    #[test]
    fn test_unknown_balancer() {
        let registry = BalancerRegistry::with_defaults();
        let err = registry
            .new_balancer("least_conn", Arc::new(CandidateSet::new()))
            .err()
            .unwrap();
        match err {
            CoreError::UnsupportedBalancer { name } => assert_eq!(name, "least_conn"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_balancer() {
        let mut registry = BalancerRegistry::with_defaults();
        let err = registry
            .register_balancer_factory(
                ROUND_ROBIN,
                Box::new(|g| Arc::new(First(g)) as SharedBalancer),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateBalancer { .. }));
    }

    #[test]
    fn test_custom_strategy() {
        let mut registry = BalancerRegistry::new();
        registry
            .register_balancer_factory("first", Box::new(|g| Arc::new(First(g)) as SharedBalancer))
            .unwrap();

        let set = Arc::new(CandidateSet::new());
        let a = PeerId::random();
        let b = PeerId::random();
        set.merge([a, b]);

        let balancer = registry.new_balancer("first", set).unwrap();
        let proto = ProtocolId::from("/echo");
        assert_eq!(balancer.next(&proto).unwrap(), a);
        assert_eq!(balancer.next(&proto).unwrap(), a);
    }
}
