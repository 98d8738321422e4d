use std::time::Duration;

/// Capacity caps and retention windows for one tenant's broker.
///
/// The defaults are the service-wide values; tests shrink them to exercise
/// eviction without bulk data.
#[derive(Debug, Clone)]
pub struct BrokerLimits {
    /// Maximum queued offline actions; the oldest is evicted beyond this.
    pub queue_cap: usize,
    /// Maximum stored events per trigger slug.
    pub events_per_slug: usize,
    /// Maximum action-history entries.
    pub history_cap: usize,
    /// Queued actions older than this are purged.
    pub queue_ttl: Duration,
    /// Trigger events older than this are purged.
    pub event_ttl: Duration,
    /// History entries older than this are purged.
    pub history_ttl: Duration,
    /// Maximum actions per rate-limit window.
    pub rate_limit_max: usize,
    /// Rolling rate-limit window length.
    pub rate_limit_window: Duration,
    /// How often the compaction sweeper runs.
    pub compaction_interval: Duration,
}

impl Default for BrokerLimits {
    fn default() -> Self {
        Self {
            queue_cap: 100,
            events_per_slug: 200,
            history_cap: 50,
            queue_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            event_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            history_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            rate_limit_max: 15,
            rate_limit_window: Duration::from_secs(60),
            compaction_interval: Duration::from_secs(6 * 60 * 60),
        }
    }
}
