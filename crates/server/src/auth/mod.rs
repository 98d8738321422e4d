//! Bearer authentication and the OAuth2 authorization-code flow.

pub mod oauth;
pub mod pkce;
pub mod token;

use axum::http::header;
use axum::http::HeaderMap;

use eclosion_core::{IftttUser, Subdomain};
use eclosion_state::{KeyKind, StateKey, StateStore};

use crate::api::AppState;
use crate::error::ServerError;

pub use token::{constant_time_eq, Claims, TokenService};

fn user_key(subdomain: &Subdomain) -> StateKey {
    StateKey::new(subdomain.clone(), KeyKind::User, "ifttt")
}

fn action_secret_key(subdomain: &Subdomain) -> StateKey {
    StateKey::new(subdomain.clone(), KeyKind::ActionSecret, "current")
}

/// Authenticate a bearer request and return the tenant it belongs to.
///
/// Signature verification is pure; the only store read is the connection
/// flag, which tolerates staleness. A missing user record does not reject:
/// the token could only have been minted by a completed token exchange.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Subdomain, ServerError> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ServerError::AuthMissing)?;

    let claims = state
        .tokens
        .verify(bearer)
        .map_err(|_| ServerError::AuthRejected)?;
    let subdomain = Subdomain::from(claims.sub);

    if let Some(user) = load_user(state.store.as_ref(), &subdomain).await?
        && !user.connected
    {
        return Err(ServerError::AuthRejected);
    }

    Ok(subdomain)
}

/// Read the tenant's IFTTT connection record.
pub async fn load_user(
    store: &dyn StateStore,
    subdomain: &Subdomain,
) -> Result<Option<IftttUser>, ServerError> {
    let raw = store.get(&user_key(subdomain)).await?;
    match raw {
        Some(value) => Ok(Some(
            serde_json::from_str(&value).map_err(ServerError::internal)?,
        )),
        None => Ok(None),
    }
}

/// Mark the tenant connected as of now.
pub async fn mark_connected(
    store: &dyn StateStore,
    subdomain: &Subdomain,
    connected_at: i64,
) -> Result<(), ServerError> {
    let user = IftttUser {
        subdomain: subdomain.clone(),
        connected: true,
        connected_at: Some(connected_at),
    };
    let value = serde_json::to_string(&user).map_err(ServerError::internal)?;
    store.set(&user_key(subdomain), &value, None).await?;
    Ok(())
}

/// Mark the tenant disconnected; every outstanding token now fails auth.
pub async fn mark_disconnected(
    store: &dyn StateStore,
    subdomain: &Subdomain,
) -> Result<(), ServerError> {
    let user = IftttUser {
        subdomain: subdomain.clone(),
        connected: false,
        connected_at: None,
    };
    let value = serde_json::to_string(&user).map_err(ServerError::internal)?;
    store.set(&user_key(subdomain), &value, None).await?;
    Ok(())
}

/// The tenant's current action secret, if connected.
pub async fn load_action_secret(
    store: &dyn StateStore,
    subdomain: &Subdomain,
) -> Result<Option<String>, ServerError> {
    Ok(store.get(&action_secret_key(subdomain)).await?)
}

/// Store a freshly generated action secret for the tenant.
pub async fn store_action_secret(
    store: &dyn StateStore,
    subdomain: &Subdomain,
    secret: &str,
) -> Result<(), ServerError> {
    store.set(&action_secret_key(subdomain), secret, None).await?;
    Ok(())
}

/// Delete the tenant's action secret.
pub async fn delete_action_secret(
    store: &dyn StateStore,
    subdomain: &Subdomain,
) -> Result<(), ServerError> {
    store.delete(&action_secret_key(subdomain)).await?;
    Ok(())
}
