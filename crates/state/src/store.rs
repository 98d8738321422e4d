use std::time::Duration;

use async_trait::async_trait;

use eclosion_core::Subdomain;

use crate::error::StateError;
use crate::key::{KeyKind, StateKey};

/// Trait for tenant-scoped key-value storage.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// The broker layers its own per-tenant serialization on top; the store
/// itself only guarantees that individual operations are atomic.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get the value for a key. Returns `None` if not found or expired.
    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError>;

    /// Set a value with an optional TTL, overwriting any previous value.
    async fn set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StateError>;

    /// Delete a key. Returns `true` if a live entry existed.
    async fn delete(&self, key: &StateKey) -> Result<bool, StateError>;

    /// Atomically read and delete a key.
    ///
    /// Returns the live value, or `None` if absent or expired. Two
    /// concurrent takes of the same key yield the value to at most one
    /// caller; this is the one-time-consumption primitive behind auth codes
    /// and link tokens.
    async fn take(&self, key: &StateKey) -> Result<Option<String>, StateError>;

    /// Scan live entries of one kind within one subdomain.
    ///
    /// Returns `(id, value)` pairs where `id` is the key's id segment,
    /// optionally filtered to ids starting with `prefix`. Ordering is
    /// unspecified; callers sort.
    async fn scan(
        &self,
        subdomain: &Subdomain,
        kind: KeyKind,
        prefix: Option<&str>,
    ) -> Result<Vec<(String, String)>, StateError>;
}
