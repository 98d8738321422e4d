//! Read-only view over the tunnel-provisioning registry.
//!
//! Provisioning writes the tenant record and OTP marker out of band; the
//! only key this service writes is the per-tenant origin-secret copy the
//! origin's gate verifies proxied calls against.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use eclosion_core::Subdomain;
use eclosion_state::{KeyKind, StateKey, StateStore};

use crate::auth::constant_time_eq;
use crate::error::ServerError;

/// A provisioned tenant, as the registry records it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub tunnel_id: String,
    /// Provisioning time, unix milliseconds.
    pub created_at: i64,
    /// SHA-256 (hex) of the tenant's management key.
    pub management_key_hash: String,
}

/// Lookups against the registry keyspace.
pub struct TenantDirectory {
    store: Arc<dyn StateStore>,
}

impl TenantDirectory {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    fn record_key(subdomain: &Subdomain) -> StateKey {
        StateKey::new(subdomain.clone(), KeyKind::Tenant, "record")
    }

    fn otp_key(subdomain: &Subdomain) -> StateKey {
        StateKey::new(subdomain.clone(), KeyKind::OtpEmail, "record")
    }

    fn origin_secret_key(subdomain: &Subdomain) -> StateKey {
        StateKey::new(subdomain.clone(), KeyKind::OriginSecret, "secret")
    }

    /// The registry record for a subdomain, if provisioned.
    pub async fn tenant(
        &self,
        subdomain: &Subdomain,
    ) -> Result<Option<TenantRecord>, ServerError> {
        let raw = self.store.get(&Self::record_key(subdomain)).await?;
        match raw {
            Some(value) => Ok(Some(
                serde_json::from_str(&value).map_err(ServerError::internal)?,
            )),
            None => Ok(None),
        }
    }

    /// Whether the tenant has a configured OTP mailbox. Presence-only.
    pub async fn otp_configured(&self, subdomain: &Subdomain) -> Result<bool, ServerError> {
        Ok(self.store.get(&Self::otp_key(subdomain)).await?.is_some())
    }

    /// Verify a management key against the registry's stored hash.
    ///
    /// The comparison is over hex digests and constant-time, so neither the
    /// key nor its length leaks through timing.
    pub async fn verify_management_key(
        &self,
        subdomain: &Subdomain,
        presented_key: &str,
    ) -> Result<bool, ServerError> {
        let Some(record) = self.tenant(subdomain).await? else {
            return Ok(false);
        };
        let digest = hex::encode(Sha256::digest(presented_key.as_bytes()));
        Ok(constant_time_eq(&digest, &record.management_key_hash))
    }

    /// Write the registry-side copy of the action secret.
    pub async fn set_origin_secret(
        &self,
        subdomain: &Subdomain,
        secret: &str,
    ) -> Result<(), ServerError> {
        self.store
            .set(&Self::origin_secret_key(subdomain), secret, None)
            .await?;
        Ok(())
    }

    /// Remove the registry-side copy of the action secret.
    pub async fn clear_origin_secret(&self, subdomain: &Subdomain) -> Result<(), ServerError> {
        self.store.delete(&Self::origin_secret_key(subdomain)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use eclosion_state_memory::MemoryStateStore;

    use super::*;

    async fn seeded_directory() -> (TenantDirectory, Arc<MemoryStateStore>) {
        let store = Arc::new(MemoryStateStore::new());
        let record = TenantRecord {
            tunnel_id: "tun-1".to_owned(),
            created_at: 0,
            management_key_hash: hex::encode(Sha256::digest(b"mgmt-key")),
        };
        store
            .set(
                &StateKey::new("acme", KeyKind::Tenant, "record"),
                &serde_json::to_string(&record).unwrap(),
                None,
            )
            .await
            .unwrap();
        (
            TenantDirectory::new(Arc::clone(&store) as Arc<dyn StateStore>),
            store,
        )
    }

    #[tokio::test]
    async fn unknown_tenants_are_absent() {
        let (directory, _) = seeded_directory().await;
        assert!(directory
            .tenant(&Subdomain::from("nope"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn management_key_verifies_by_hash() {
        let (directory, _) = seeded_directory().await;
        let acme = Subdomain::from("acme");
        assert!(directory.verify_management_key(&acme, "mgmt-key").await.unwrap());
        assert!(!directory.verify_management_key(&acme, "wrong").await.unwrap());
        assert!(!directory
            .verify_management_key(&Subdomain::from("nope"), "mgmt-key")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn origin_secret_roundtrip() {
        let (directory, store) = seeded_directory().await;
        let acme = Subdomain::from("acme");

        directory.set_origin_secret(&acme, "s3cret").await.unwrap();
        let stored = store
            .get(&StateKey::new("acme", KeyKind::OriginSecret, "secret"))
            .await
            .unwrap();
        assert_eq!(stored.as_deref(), Some("s3cret"));

        directory.clear_origin_secret(&acme).await.unwrap();
        assert!(store
            .get(&StateKey::new("acme", KeyKind::OriginSecret, "secret"))
            .await
            .unwrap()
            .is_none());
    }
}
