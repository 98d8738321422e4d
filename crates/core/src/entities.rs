use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ActionSlug, EventId, Subdomain, TriggerIdentity, TriggerSlug};

/// An action accepted while the tenant's origin was unreachable, held for
/// later replay by the tenant's desktop client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Unique queue-entry identifier.
    pub id: String,

    /// Which action to replay.
    pub action_slug: ActionSlug,

    /// The validated `actionFields` as submitted by IFTTT.
    pub fields: HashMap<String, String>,

    /// Enqueue time, unix milliseconds.
    pub queued_at: i64,

    /// Deduplication key: IFTTT's `X-Request-ID` when present, otherwise a
    /// synthesized UUID.
    pub ifttt_request_id: String,
}

impl QueuedAction {
    /// Create a queue entry with a fresh id.
    #[must_use]
    pub fn new(
        action_slug: impl Into<ActionSlug>,
        fields: HashMap<String, String>,
        queued_at: i64,
        ifttt_request_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action_slug: action_slug.into(),
            fields,
            queued_at,
            ifttt_request_id: ifttt_request_id.into(),
        }
    }
}

/// One event pushed by the tenant's desktop client for a trigger slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Unique event identifier.
    pub id: EventId,

    /// Trigger slug this event belongs to.
    pub trigger_slug: TriggerSlug,

    /// Event time, unix seconds. Events are returned to IFTTT strictly
    /// descending by this field.
    pub timestamp: i64,

    /// Flat string ingredients (e.g. `goal_name`, `balance`, `is_pending`).
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl TriggerEvent {
    /// Create an event with a fresh id.
    #[must_use]
    pub fn new(
        trigger_slug: impl Into<TriggerSlug>,
        timestamp: i64,
        data: HashMap<String, String>,
    ) -> Self {
        Self {
            id: EventId::new(Uuid::new_v4().to_string()),
            trigger_slug: trigger_slug.into(),
            timestamp,
            data,
        }
    }
}

/// A `{label, value}` pair for an IFTTT dropdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    pub label: String,
    pub value: String,
}

impl FieldOption {
    #[must_use]
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Cached option list for one field slug, refreshed whenever the tenant
/// pushes or a live proxy read succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedFieldOptions {
    pub data: Vec<FieldOption>,
    /// Last refresh, unix milliseconds.
    pub updated_at: i64,
}

/// Journal entry for an executed (or failed, or queued-then-executed) action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionHistoryEntry {
    pub id: String,
    pub action_slug: ActionSlug,
    pub fields: HashMap<String, String>,
    /// Set when the action went through the offline queue first.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<i64>,
    /// Execution time, unix milliseconds.
    pub executed_at: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_error: Option<String>,
    pub was_queued: bool,
}

impl ActionHistoryEntry {
    /// Entry for an action executed live through the tunnel.
    #[must_use]
    pub fn executed(
        action_slug: impl Into<ActionSlug>,
        fields: HashMap<String, String>,
        executed_at: i64,
        success: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action_slug: action_slug.into(),
            fields,
            queued_at: None,
            executed_at,
            success,
            error: None,
            proxy_error: None,
            was_queued: false,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    #[must_use]
    pub fn with_proxy_error(mut self, proxy_error: impl Into<String>) -> Self {
        self.proxy_error = Some(proxy_error.into());
        self
    }
}

/// Subscription record telling the tenant's desktop which events to push.
///
/// Keyed by `(trigger_slug, trigger_identity)`; upserted on every trigger
/// poll that carries an identity, removed when IFTTT deletes the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSubscription {
    pub trigger_identity: TriggerIdentity,
    pub trigger_slug: TriggerSlug,
    #[serde(default)]
    pub fields: HashMap<String, String>,
    /// Last upsert, unix milliseconds.
    pub subscribed_at: i64,
}

/// Connection flag for a tenant's IFTTT account, read on the bearer-auth
/// hot path. Tolerates staleness; only an explicit `connected=false`
/// rejects a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IftttUser {
    pub subdomain: Subdomain,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_action_ids_are_unique() {
        let a = QueuedAction::new("budget_to", HashMap::new(), 1, "r1");
        let b = QueuedAction::new("budget_to", HashMap::new(), 1, "r1");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn history_entry_roundtrip() {
        let entry = ActionHistoryEntry::executed("move_funds", HashMap::new(), 42, false)
            .with_error("origin said no")
            .with_proxy_error("522");
        let json = serde_json::to_string(&entry).unwrap();
        let back: ActionHistoryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.executed_at, 42);
        assert_eq!(back.error.as_deref(), Some("origin said no"));
        assert_eq!(back.proxy_error.as_deref(), Some("522"));
        assert!(!back.was_queued);
    }

    #[test]
    fn queued_at_omitted_when_absent() {
        let entry = ActionHistoryEntry::executed("budget_to", HashMap::new(), 1, true);
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("queued_at").is_none());
    }
}
