use std::sync::Arc;

use dashmap::DashMap;

use eclosion_core::Subdomain;
use eclosion_state::StateStore;

use crate::broker::TenantBroker;
use crate::limits::BrokerLimits;

/// Hands out the per-tenant broker instances, creating them on first use.
///
/// Brokers are cheap handles over the shared store; the registry keeps one
/// per subdomain so concurrent requests for the same tenant share one write
/// lock.
pub struct BrokerRegistry {
    store: Arc<dyn StateStore>,
    limits: BrokerLimits,
    brokers: DashMap<Subdomain, Arc<TenantBroker>>,
}

impl BrokerRegistry {
    /// Create a registry over the shared state store.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, limits: BrokerLimits) -> Self {
        Self {
            store,
            limits,
            brokers: DashMap::new(),
        }
    }

    /// The broker for one subdomain, created on first access.
    #[must_use]
    pub fn broker(&self, subdomain: &Subdomain) -> Arc<TenantBroker> {
        if let Some(existing) = self.brokers.get(subdomain) {
            return Arc::clone(existing.value());
        }
        let entry = self.brokers.entry(subdomain.clone()).or_insert_with(|| {
            Arc::new(TenantBroker::new(
                subdomain.clone(),
                Arc::clone(&self.store),
                self.limits.clone(),
            ))
        });
        Arc::clone(entry.value())
    }

    /// The configured limits (shared by every broker).
    #[must_use]
    pub fn limits(&self) -> &BrokerLimits {
        &self.limits
    }

    /// Snapshot of every live broker, for the compaction sweeper.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<TenantBroker>> {
        self.brokers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use eclosion_state_memory::MemoryStateStore;

    use super::*;

    #[test]
    fn broker_instances_are_shared_per_subdomain() {
        let registry = BrokerRegistry::new(
            Arc::new(MemoryStateStore::new()),
            BrokerLimits::default(),
        );

        let a = registry.broker(&Subdomain::from("acme"));
        let b = registry.broker(&Subdomain::from("acme"));
        let other = registry.broker(&Subdomain::from("other"));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.all().len(), 2);
    }
}
