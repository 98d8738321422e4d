use serde::{Deserialize, Serialize};

use eclosion_core::Subdomain;

/// The kind of record being stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    /// Queued offline action, one entry per queued action id.
    Queue,
    /// Trigger event; ids are `{trigger_slug}:{event_id}` so a per-slug
    /// prefix scan finds the ring buffer.
    Event,
    /// Cached dropdown options, one entry per field slug.
    FieldOptions,
    /// Action-history journal entry.
    History,
    /// Trigger subscription; ids are `{trigger_slug}:{trigger_identity}`.
    Subscription,
    /// The tenant's rate-limit sliding window.
    RateLimit,
    /// IFTTT connection flag for the tenant.
    User,
    /// The tenant's current action secret.
    ActionSecret,
    /// One-time OAuth authorization code.
    AuthCode,
    /// One-time link token coupling approval to code issuance.
    LinkToken,
    /// Tenant registry record (read-only; written by provisioning).
    Tenant,
    /// OTP mailbox marker for the tenant (read-only; presence only).
    OtpEmail,
    /// Registry-side copy of the action secret, read by the origin's gate.
    OriginSecret,
}

impl KeyKind {
    /// Return a string representation of the key kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Queue => "queue",
            Self::Event => "event",
            Self::FieldOptions => "field_options",
            Self::History => "history",
            Self::Subscription => "subscription",
            Self::RateLimit => "rate_limit",
            Self::User => "user",
            Self::ActionSecret => "action_secret",
            Self::AuthCode => "auth_code",
            Self::LinkToken => "link_token",
            Self::Tenant => "tenant",
            Self::OtpEmail => "otp_email",
            Self::OriginSecret => "origin_secret",
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key addressing one record in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateKey {
    pub subdomain: Subdomain,
    pub kind: KeyKind,
    pub id: String,
}

impl StateKey {
    /// Create a new state key.
    #[must_use]
    pub fn new(subdomain: impl Into<Subdomain>, kind: KeyKind, id: impl Into<String>) -> Self {
        Self {
            subdomain: subdomain.into(),
            kind,
            id: id.into(),
        }
    }

    /// Canonical string representation: `subdomain:kind:id`.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}:{}:{}", self.subdomain, self.kind, self.id)
    }
}

impl std::fmt::Display for StateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}
