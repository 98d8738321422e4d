//! Tenant admin API: the surface the tenant's desktop client drives.
//!
//! Authenticated per request by `X-Subdomain` plus `X-Management-Key`,
//! verified against the registry's SHA-256 hash.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use eclosion_core::{catalog, ActionHistoryEntry, FieldOption, FieldSlug, Subdomain, TriggerEvent};

use crate::auth;
use crate::error::ServerError;

use super::AppState;

fn now_ms() -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    ms
}

/// Resolve and verify the calling tenant from the management headers.
async fn authenticate_management(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Subdomain, ServerError> {
    let subdomain = headers
        .get("X-Subdomain")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or(ServerError::AuthMissing)?;
    let key = headers
        .get("X-Management-Key")
        .and_then(|value| value.to_str().ok())
        .ok_or(ServerError::AuthMissing)?;

    let subdomain = Subdomain::from(subdomain);
    if state
        .directory
        .verify_management_key(&subdomain, key)
        .await?
    {
        Ok(subdomain)
    } else {
        Err(ServerError::AuthRejected)
    }
}

#[derive(Debug, Deserialize)]
pub struct PushEventRequest {
    trigger_slug: String,
    /// Unix seconds; defaults to now.
    timestamp: Option<i64>,
    #[serde(default)]
    data: HashMap<String, String>,
}

/// `POST /api/events/push` — store an event, then nudge IFTTT realtime.
pub async fn push_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PushEventRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = authenticate_management(&state, &headers).await?;

    if catalog::trigger(&request.trigger_slug).is_none() {
        return Err(ServerError::Validation(format!(
            "unknown trigger slug: {}",
            request.trigger_slug
        )));
    }

    let timestamp = request.timestamp.unwrap_or_else(|| now_ms() / 1000);
    let event = TriggerEvent::new(request.trigger_slug.as_str(), timestamp, request.data);
    let id = event.id.clone();

    state.brokers.broker(&subdomain).push_event(event).await?;
    state.realtime.notify(&subdomain);

    Ok(Json(serde_json::json!({ "id": id, "stored": true })))
}

/// `GET /api/queue/pending`
pub async fn queue_pending(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = authenticate_management(&state, &headers).await?;
    let actions = state.brokers.broker(&subdomain).queue_pending().await?;
    Ok(Json(serde_json::json!({ "actions": actions })))
}

#[derive(Debug, Deserialize)]
pub struct QueueAckRequest {
    id: String,
}

/// `POST /api/queue/ack` — idempotent; unknown ids still succeed.
pub async fn queue_ack(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueueAckRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = authenticate_management(&state, &headers).await?;
    state.brokers.broker(&subdomain).queue_ack(&request.id).await?;
    Ok(Json(serde_json::json!({ "acknowledged": true })))
}

#[derive(Debug, Deserialize)]
pub struct PushFieldOptionsRequest {
    fields: HashMap<String, Vec<FieldOption>>,
}

/// `POST /api/field-options/push` — bulk cache refresh from the desktop.
pub async fn push_field_options(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PushFieldOptionsRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = authenticate_management(&state, &headers).await?;
    let broker = state.brokers.broker(&subdomain);

    let writes = request.fields.into_iter().map(|(field, options)| {
        let broker = std::sync::Arc::clone(&broker);
        async move {
            broker
                .set_field_options(&FieldSlug::from(field), options)
                .await
        }
    });
    for result in futures::future::join_all(writes).await {
        result?;
    }

    Ok(Json(serde_json::json!({ "stored": true })))
}

/// `GET /api/ifttt-status`
pub async fn ifttt_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = authenticate_management(&state, &headers).await?;
    let user = auth::load_user(state.store.as_ref(), &subdomain).await?;
    let (connected, connected_at) = match user {
        Some(user) => (user.connected, user.connected_at),
        None => (false, None),
    };
    Ok(Json(serde_json::json!({
        "connected": connected,
        "connected_at": connected_at,
    })))
}

/// `POST /api/ifttt-disconnect` — flips the connection flag and drops the
/// tenant-side action secret. The registry copy is the caller's to clear,
/// since it owns registry access.
pub async fn disconnect(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = authenticate_management(&state, &headers).await?;
    auth::mark_disconnected(state.store.as_ref(), &subdomain).await?;
    auth::delete_action_secret(state.store.as_ref(), &subdomain).await?;
    Ok(Json(serde_json::json!({ "disconnected": true })))
}

/// `GET /api/action-secret` — on-disk recovery for the desktop client.
pub async fn action_secret(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = authenticate_management(&state, &headers).await?;
    let secret = auth::load_action_secret(state.store.as_ref(), &subdomain)
        .await?
        .ok_or_else(|| ServerError::NotFound("no action secret for this tenant".to_owned()))?;
    Ok(Json(serde_json::json!({ "secret": secret })))
}

/// `GET /api/action-history`
pub async fn action_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = authenticate_management(&state, &headers).await?;
    let history = state.brokers.broker(&subdomain).history().await?;
    Ok(Json(serde_json::json!({ "history": history })))
}

#[derive(Debug, Deserialize)]
pub struct PushHistoryRequest {
    action_slug: String,
    #[serde(default)]
    fields: HashMap<String, String>,
    queued_at: Option<i64>,
    /// Unix milliseconds; defaults to now.
    executed_at: Option<i64>,
    success: bool,
    error: Option<String>,
    proxy_error: Option<String>,
    #[serde(default)]
    was_queued: bool,
}

/// `POST /api/action-history` — the desktop journals replayed actions here.
pub async fn push_action_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PushHistoryRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = authenticate_management(&state, &headers).await?;

    let entry = ActionHistoryEntry {
        id: Uuid::new_v4().to_string(),
        action_slug: request.action_slug.into(),
        fields: request.fields,
        queued_at: request.queued_at,
        executed_at: request.executed_at.unwrap_or_else(now_ms),
        success: request.success,
        error: request.error,
        proxy_error: request.proxy_error,
        was_queued: request.was_queued,
    };
    state.brokers.broker(&subdomain).push_history(entry).await?;

    Ok(Json(serde_json::json!({ "stored": true })))
}

/// `GET /api/trigger-history` — recent events across every slug.
pub async fn trigger_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = authenticate_management(&state, &headers).await?;
    let events = state.brokers.broker(&subdomain).event_history().await?;
    Ok(Json(serde_json::json!({ "events": events })))
}

/// `GET /api/subscriptions`
pub async fn subscriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = authenticate_management(&state, &headers).await?;
    let subscriptions = state.brokers.broker(&subdomain).subscriptions().await?;
    Ok(Json(serde_json::json!({ "subscriptions": subscriptions })))
}

/// `GET /api/tunnel-test` — live probe of the tenant's origin.
pub async fn tunnel_test(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = authenticate_management(&state, &headers).await?;
    let secret = auth::load_action_secret(state.store.as_ref(), &subdomain)
        .await?
        .ok_or(ServerError::NotConfigured)?;
    let report = state.tunnel.ping(subdomain.as_str(), &secret).await;
    Ok(Json(serde_json::to_value(report).map_err(ServerError::internal)?))
}
