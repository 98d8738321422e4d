use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use eclosion_core::{
    ActionHistoryEntry, CachedFieldOptions, FieldOption, FieldSlug, QueuedAction, Subdomain,
    TriggerEvent, TriggerIdentity, TriggerSlug, TriggerSubscription,
};
use eclosion_state::{KeyKind, StateKey, StateStore};

use crate::error::BrokerError;
use crate::limits::BrokerLimits;

/// How many events `event_history` returns across all slugs.
const EVENT_HISTORY_LIMIT: usize = 100;

fn now_ms() -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    ms
}

fn now_s() -> i64 {
    now_ms() / 1000
}

/// Arrival stamp used to break timestamp ties in favor of insertion order.
fn arrival_seq() -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64;
    nanos
}

/// Stored wrapper around a [`TriggerEvent`] carrying its arrival order.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEvent {
    seq: i64,
    event: TriggerEvent,
}

/// Outcome of `queue_push`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueuePush {
    /// The action was newly enqueued.
    Queued { id: String },
    /// An entry with the same `ifttt_request_id` already exists.
    Deduplicated { id: String },
}

impl QueuePush {
    /// The queue-entry id either way.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Queued { id } | Self::Deduplicated { id } => id,
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Actions counted in the current window (including this one when
    /// allowed).
    pub current: usize,
    pub limit: usize,
    /// Present only when denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<i64>,
}

/// Single-writer broker for one tenant.
///
/// Every operation takes the write lock, so concurrent requests against the
/// same subdomain are linearized here. Reads that purge expired records are
/// writes too.
pub struct TenantBroker {
    subdomain: Subdomain,
    store: Arc<dyn StateStore>,
    limits: BrokerLimits,
    write_lock: Mutex<()>,
}

impl TenantBroker {
    pub(crate) fn new(
        subdomain: Subdomain,
        store: Arc<dyn StateStore>,
        limits: BrokerLimits,
    ) -> Self {
        Self {
            subdomain,
            store,
            limits,
            write_lock: Mutex::new(()),
        }
    }

    /// The tenant this broker serves.
    #[must_use]
    pub fn subdomain(&self) -> &Subdomain {
        &self.subdomain
    }

    fn key(&self, kind: KeyKind, id: impl Into<String>) -> StateKey {
        StateKey::new(self.subdomain.clone(), kind, id)
    }

    // -- Offline action queue ---------------------------------------------

    /// Enqueue an action for later replay, deduplicating on
    /// `ifttt_request_id` and evicting the oldest entry beyond the cap.
    pub async fn queue_push(&self, action: QueuedAction) -> Result<QueuePush, BrokerError> {
        let _guard = self.write_lock.lock().await;

        let mut pending = self.load_queue().await?;
        if let Some(existing) = pending
            .iter()
            .find(|entry| entry.ifttt_request_id == action.ifttt_request_id)
        {
            return Ok(QueuePush::Deduplicated {
                id: existing.id.clone(),
            });
        }

        let id = action.id.clone();
        self.store
            .set(
                &self.key(KeyKind::Queue, &action.id),
                &serde_json::to_string(&action)?,
                None,
            )
            .await?;

        pending.push(action);
        pending.sort_by_key(|entry| entry.queued_at);
        while pending.len() > self.limits.queue_cap {
            let evicted = pending.remove(0);
            debug!(subdomain = %self.subdomain, id = %evicted.id, "queue at capacity, evicting oldest");
            self.store.delete(&self.key(KeyKind::Queue, &evicted.id)).await?;
        }

        Ok(QueuePush::Queued { id })
    }

    /// Pending actions, FIFO by `queued_at`. Entries past the queue TTL are
    /// purged in the same call.
    pub async fn queue_pending(&self) -> Result<Vec<QueuedAction>, BrokerError> {
        let _guard = self.write_lock.lock().await;

        let mut pending = self.load_queue().await?;
        #[allow(clippy::cast_possible_wrap)]
        let cutoff = now_ms() - self.limits.queue_ttl.as_millis() as i64;

        let mut live = Vec::with_capacity(pending.len());
        for entry in pending.drain(..) {
            if entry.queued_at < cutoff {
                self.store.delete(&self.key(KeyKind::Queue, &entry.id)).await?;
            } else {
                live.push(entry);
            }
        }

        live.sort_by_key(|entry| entry.queued_at);
        Ok(live)
    }

    /// Acknowledge (delete) a queued action. Unknown ids are a no-op.
    pub async fn queue_ack(&self, id: &str) -> Result<(), BrokerError> {
        let _guard = self.write_lock.lock().await;
        self.store.delete(&self.key(KeyKind::Queue, id)).await?;
        Ok(())
    }

    async fn load_queue(&self) -> Result<Vec<QueuedAction>, BrokerError> {
        let raw = self.store.scan(&self.subdomain, KeyKind::Queue, None).await?;
        let mut entries = Vec::with_capacity(raw.len());
        for (_, value) in raw {
            entries.push(serde_json::from_str(&value)?);
        }
        Ok(entries)
    }

    // -- Trigger events ----------------------------------------------------

    /// Store one event, then enforce the per-slug cap by evicting the
    /// oldest events.
    pub async fn push_event(&self, event: TriggerEvent) -> Result<(), BrokerError> {
        let _guard = self.write_lock.lock().await;

        let slug = event.trigger_slug.clone();
        let stored = StoredEvent {
            seq: arrival_seq(),
            event,
        };
        self.store
            .set(
                &self.key(
                    KeyKind::Event,
                    format!("{}:{}", slug, stored.event.id),
                ),
                &serde_json::to_string(&stored)?,
                None,
            )
            .await?;

        let mut all = self.load_events(Some(&slug)).await?;
        if all.len() > self.limits.events_per_slug {
            // Oldest first.
            all.sort_by_key(|stored| (stored.event.timestamp, stored.seq));
            let excess = all.len() - self.limits.events_per_slug;
            for stored in all.into_iter().take(excess) {
                self.store
                    .delete(&self.key(
                        KeyKind::Event,
                        format!("{}:{}", stored.event.trigger_slug, stored.event.id),
                    ))
                    .await?;
            }
        }

        Ok(())
    }

    /// Events for one slug, strictly descending by timestamp (ties resolved
    /// by insertion order). Events past the event TTL are purged in the
    /// same call.
    pub async fn events(
        &self,
        slug: &TriggerSlug,
        limit: usize,
    ) -> Result<Vec<TriggerEvent>, BrokerError> {
        let _guard = self.write_lock.lock().await;
        let mut live = self.purge_expired_events(Some(slug)).await?;
        live.sort_by_key(|stored| (std::cmp::Reverse(stored.event.timestamp), stored.seq));
        Ok(live.into_iter().take(limit).map(|s| s.event).collect())
    }

    /// The newest events across all slugs, for tenant-side diagnostics.
    pub async fn event_history(&self) -> Result<Vec<TriggerEvent>, BrokerError> {
        let _guard = self.write_lock.lock().await;
        let mut live = self.purge_expired_events(None).await?;
        live.sort_by_key(|stored| (std::cmp::Reverse(stored.event.timestamp), stored.seq));
        Ok(live
            .into_iter()
            .take(EVENT_HISTORY_LIMIT)
            .map(|s| s.event)
            .collect())
    }

    async fn load_events(
        &self,
        slug: Option<&TriggerSlug>,
    ) -> Result<Vec<StoredEvent>, BrokerError> {
        let prefix = slug.map(|s| format!("{s}:"));
        let raw = self
            .store
            .scan(&self.subdomain, KeyKind::Event, prefix.as_deref())
            .await?;
        let mut events = Vec::with_capacity(raw.len());
        for (_, value) in raw {
            events.push(serde_json::from_str(&value)?);
        }
        Ok(events)
    }

    async fn purge_expired_events(
        &self,
        slug: Option<&TriggerSlug>,
    ) -> Result<Vec<StoredEvent>, BrokerError> {
        #[allow(clippy::cast_possible_wrap)]
        let cutoff = now_s() - self.limits.event_ttl.as_secs() as i64;
        let mut live = Vec::new();
        for stored in self.load_events(slug).await? {
            if stored.event.timestamp < cutoff {
                self.store
                    .delete(&self.key(
                        KeyKind::Event,
                        format!("{}:{}", stored.event.trigger_slug, stored.event.id),
                    ))
                    .await?;
            } else {
                live.push(stored);
            }
        }
        Ok(live)
    }

    // -- Field-option cache ------------------------------------------------

    /// Overwrite the cached options for one field slug.
    pub async fn set_field_options(
        &self,
        field: &FieldSlug,
        options: Vec<FieldOption>,
    ) -> Result<(), BrokerError> {
        let _guard = self.write_lock.lock().await;
        let cached = CachedFieldOptions {
            data: options,
            updated_at: now_ms(),
        };
        self.store
            .set(
                &self.key(KeyKind::FieldOptions, field.as_str()),
                &serde_json::to_string(&cached)?,
                None,
            )
            .await?;
        Ok(())
    }

    /// The cached options for one field slug; empty when never cached.
    pub async fn field_options(&self, field: &FieldSlug) -> Result<Vec<FieldOption>, BrokerError> {
        let raw = self
            .store
            .get(&self.key(KeyKind::FieldOptions, field.as_str()))
            .await?;
        match raw {
            Some(value) => {
                let cached: CachedFieldOptions = serde_json::from_str(&value)?;
                Ok(cached.data)
            }
            None => Ok(Vec::new()),
        }
    }

    // -- Action history ----------------------------------------------------

    /// Record one history entry, evicting the oldest beyond the cap.
    pub async fn push_history(&self, entry: ActionHistoryEntry) -> Result<(), BrokerError> {
        let _guard = self.write_lock.lock().await;

        self.store
            .set(
                &self.key(KeyKind::History, &entry.id),
                &serde_json::to_string(&entry)?,
                None,
            )
            .await?;

        let mut all = self.load_history().await?;
        if all.len() > self.limits.history_cap {
            all.sort_by_key(|entry| entry.executed_at);
            let excess = all.len() - self.limits.history_cap;
            for entry in all.into_iter().take(excess) {
                self.store.delete(&self.key(KeyKind::History, &entry.id)).await?;
            }
        }

        Ok(())
    }

    /// History entries, newest first. Entries past the history TTL are
    /// purged in the same call.
    pub async fn history(&self) -> Result<Vec<ActionHistoryEntry>, BrokerError> {
        let _guard = self.write_lock.lock().await;

        #[allow(clippy::cast_possible_wrap)]
        let cutoff = now_ms() - self.limits.history_ttl.as_millis() as i64;
        let mut live = Vec::new();
        for entry in self.load_history().await? {
            if entry.executed_at < cutoff {
                self.store.delete(&self.key(KeyKind::History, &entry.id)).await?;
            } else {
                live.push(entry);
            }
        }

        live.sort_by_key(|entry| std::cmp::Reverse(entry.executed_at));
        Ok(live)
    }

    async fn load_history(&self) -> Result<Vec<ActionHistoryEntry>, BrokerError> {
        let raw = self.store.scan(&self.subdomain, KeyKind::History, None).await?;
        let mut entries = Vec::with_capacity(raw.len());
        for (_, value) in raw {
            entries.push(serde_json::from_str(&value)?);
        }
        Ok(entries)
    }

    // -- Trigger subscriptions ---------------------------------------------

    /// Upsert a subscription keyed by `(trigger_slug, trigger_identity)`.
    pub async fn upsert_subscription(
        &self,
        subscription: TriggerSubscription,
    ) -> Result<(), BrokerError> {
        let _guard = self.write_lock.lock().await;
        self.store
            .set(
                &self.key(
                    KeyKind::Subscription,
                    format!(
                        "{}:{}",
                        subscription.trigger_slug, subscription.trigger_identity
                    ),
                ),
                &serde_json::to_string(&subscription)?,
                None,
            )
            .await?;
        Ok(())
    }

    /// All current subscriptions for this tenant.
    pub async fn subscriptions(&self) -> Result<Vec<TriggerSubscription>, BrokerError> {
        let raw = self
            .store
            .scan(&self.subdomain, KeyKind::Subscription, None)
            .await?;
        let mut subs: Vec<TriggerSubscription> = Vec::with_capacity(raw.len());
        for (_, value) in raw {
            subs.push(serde_json::from_str(&value)?);
        }
        subs.sort_by_key(|sub| std::cmp::Reverse(sub.subscribed_at));
        Ok(subs)
    }

    /// Remove a subscription. Unknown keys are a no-op.
    pub async fn delete_subscription(
        &self,
        slug: &TriggerSlug,
        identity: &TriggerIdentity,
    ) -> Result<(), BrokerError> {
        let _guard = self.write_lock.lock().await;
        self.store
            .delete(&self.key(KeyKind::Subscription, format!("{slug}:{identity}")))
            .await?;
        Ok(())
    }

    // -- Rate limiting -----------------------------------------------------

    /// Check and record one action against the sliding window.
    ///
    /// Read-then-append happens under the write lock, so a successful check
    /// and its recording are one atomic step.
    pub async fn check_rate_limit(&self) -> Result<RateLimitDecision, BrokerError> {
        let _guard = self.write_lock.lock().await;

        let now = now_ms();
        #[allow(clippy::cast_possible_wrap)]
        let window_ms = self.limits.rate_limit_window.as_millis() as i64;

        let mut window = self.load_rate_window().await?;
        window.retain(|&stamp| stamp > now - window_ms);

        if window.len() >= self.limits.rate_limit_max {
            let oldest = window.iter().copied().min().unwrap_or(now);
            let retry_after_ms = (oldest + window_ms - now).max(0);
            self.save_rate_window(&window).await?;
            return Ok(RateLimitDecision {
                allowed: false,
                current: window.len(),
                limit: self.limits.rate_limit_max,
                retry_after_ms: Some(retry_after_ms),
            });
        }

        window.push(now);
        self.save_rate_window(&window).await?;
        Ok(RateLimitDecision {
            allowed: true,
            current: window.len(),
            limit: self.limits.rate_limit_max,
            retry_after_ms: None,
        })
    }

    async fn load_rate_window(&self) -> Result<Vec<i64>, BrokerError> {
        let raw = self
            .store
            .get(&self.key(KeyKind::RateLimit, "window"))
            .await?;
        match raw {
            Some(value) => Ok(serde_json::from_str(&value)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save_rate_window(&self, window: &[i64]) -> Result<(), BrokerError> {
        self.store
            .set(
                &self.key(KeyKind::RateLimit, "window"),
                &serde_json::to_string(window)?,
                None,
            )
            .await?;
        Ok(())
    }

    // -- Compaction --------------------------------------------------------

    /// Purge everything past its retention window and trim the rate-limit
    /// window. Run periodically by the sweeper.
    pub async fn compact(&self) -> Result<(), BrokerError> {
        {
            let _guard = self.write_lock.lock().await;

            #[allow(clippy::cast_possible_wrap)]
            let queue_cutoff = now_ms() - self.limits.queue_ttl.as_millis() as i64;
            for entry in self.load_queue().await? {
                if entry.queued_at < queue_cutoff {
                    self.store.delete(&self.key(KeyKind::Queue, &entry.id)).await?;
                }
            }

            #[allow(clippy::cast_possible_wrap)]
            let window_ms = self.limits.rate_limit_window.as_millis() as i64;
            let mut window = self.load_rate_window().await?;
            let before = window.len();
            window.retain(|&stamp| stamp > now_ms() - window_ms);
            if window.len() != before {
                self.save_rate_window(&window).await?;
            }
        }

        // These take the lock themselves and purge as a side effect.
        self.purge_events_locked().await?;
        self.history().await?;
        Ok(())
    }

    async fn purge_events_locked(&self) -> Result<(), BrokerError> {
        let _guard = self.write_lock.lock().await;
        self.purge_expired_events(None).await?;
        Ok(())
    }
}
