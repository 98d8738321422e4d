//! Periodic compaction sweeper.
//!
//! Stands in for a per-tenant alarm timer: one process-wide interval task
//! walks every live broker and purges whatever has aged out.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::registry::BrokerRegistry;

/// Run the sweeper until a shutdown signal arrives.
///
/// Spawned once at startup; the interval comes from
/// [`BrokerLimits::compaction_interval`](crate::BrokerLimits).
pub async fn run(registry: Arc<BrokerRegistry>, mut shutdown: mpsc::Receiver<()>) {
    let mut ticker = interval(registry.limits().compaction_interval);
    // The first tick fires immediately; skip it so startup stays quiet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweep(&registry).await;
            }
            _ = shutdown.recv() => {
                debug!("compaction sweeper shutting down");
                return;
            }
        }
    }
}

async fn sweep(registry: &BrokerRegistry) {
    let brokers = registry.all();
    debug!(brokers = brokers.len(), "running compaction sweep");
    for broker in brokers {
        if let Err(error) = broker.compact().await {
            warn!(subdomain = %broker.subdomain(), %error, "compaction failed for tenant");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use eclosion_core::{QueuedAction, Subdomain};
    use eclosion_state::{KeyKind, StateStore};
    use eclosion_state_memory::MemoryStateStore;

    use crate::limits::BrokerLimits;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sweeper_compacts_live_brokers() {
        let store = Arc::new(MemoryStateStore::new());
        let registry = Arc::new(BrokerRegistry::new(
            Arc::clone(&store) as Arc<dyn StateStore>,
            BrokerLimits {
                compaction_interval: Duration::from_secs(60),
                ..BrokerLimits::default()
            },
        ));

        let acme = Subdomain::from("acme");
        let broker = registry.broker(&acme);
        // Well past the 7-day queue TTL.
        let stale = QueuedAction::new("budget_to", HashMap::new(), 0, "R-old");
        broker.queue_push(stale).await.unwrap();
        assert_eq!(store.scan(&acme, KeyKind::Queue, None).await.unwrap().len(), 1);

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(run(Arc::clone(&registry), shutdown_rx));

        tokio::time::advance(Duration::from_secs(61)).await;
        // Let the sweeper task run.
        tokio::task::yield_now().await;

        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();

        // Observed at the storage layer, so the read-path purge can't mask
        // a sweeper that never ran.
        assert!(store.scan(&acme, KeyKind::Queue, None).await.unwrap().is_empty());
    }
}
