//! Dropdown option resolution (static table, origin read-through with cache
//! spill) and trigger-field validation.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use tracing::{debug, warn};

use eclosion_core::{catalog, FieldOption, FieldSlug, Subdomain};

use crate::auth;
use crate::error::ServerError;
use crate::tunnel::TunnelOutcome;

use super::schemas::ValidateRequest;
use super::{is_test_mode, AppState};

fn options_response(options: &[FieldOption]) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "data": options }))
}

/// `POST /ifttt/v1/triggers/{slug}/fields/{field}/options`
pub async fn trigger_options(
    State(state): State<AppState>,
    Path((slug, field)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    if catalog::trigger(&slug).is_none() {
        return Err(ServerError::NotFound(format!("unknown trigger: {slug}")));
    }
    serve_options(&state, &headers, &slug, &field).await
}

/// `POST /ifttt/v1/actions/{slug}/fields/{field}/options`
pub async fn action_options(
    State(state): State<AppState>,
    Path((slug, field)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    if catalog::action(&slug).is_none() {
        return Err(ServerError::NotFound(format!("unknown action: {slug}")));
    }
    serve_options(&state, &headers, &slug, &field).await
}

async fn serve_options(
    state: &AppState,
    headers: &HeaderMap,
    owner: &str,
    field: &str,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = auth::authenticate(state, headers).await?;

    if is_test_mode(headers) {
        return Ok(options_response(&[
            FieldOption::new("Sample Option A", "sample-a"),
            FieldOption::new("Sample Option B", "sample-b"),
        ]));
    }

    if let Some(options) = catalog::static_field_options(field) {
        return Ok(options_response(&options));
    }

    let source = catalog::field_option_source(owner, field).ok_or_else(|| {
        ServerError::NotFound(format!("no options available for field: {field}"))
    })?;
    let field_slug = FieldSlug::from(source.field_slug);

    // Without a secret the origin would reject the call anyway; serve the
    // cache, same as offline.
    let Some(secret) = auth::load_action_secret(state.store.as_ref(), &subdomain).await? else {
        return cached_options(state, &subdomain, &field_slug).await;
    };

    let outcome = state
        .tunnel
        .post_empty(subdomain.as_str(), source.origin_path, &secret)
        .await;

    match outcome {
        TunnelOutcome::Online { status, body }
            if (200..300).contains(&status)
                && body.get("success").and_then(serde_json::Value::as_bool) == Some(true) =>
        {
            let data = body
                .get("data")
                .cloned()
                .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));

            // Refresh the cache off the response path.
            if let Ok(options) = serde_json::from_value::<Vec<FieldOption>>(data.clone()) {
                let broker = state.brokers.broker(&subdomain);
                let cache_slug = field_slug.clone();
                tokio::spawn(async move {
                    if let Err(error) = broker.set_field_options(&cache_slug, options).await {
                        warn!(%error, field = %cache_slug, "field-option cache write failed");
                    }
                });
            }

            Ok(Json(serde_json::json!({ "data": data })))
        }
        TunnelOutcome::Online { body, .. } => {
            let error = body
                .get("error")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("origin rejected the field-option request")
                .to_owned();
            Err(ServerError::OriginFailed(error))
        }
        TunnelOutcome::Offline { proxy_error } => {
            debug!(%subdomain, %field, %proxy_error, "origin offline, serving cached options");
            cached_options(state, &subdomain, &field_slug).await
        }
    }
}

async fn cached_options(
    state: &AppState,
    subdomain: &Subdomain,
    field_slug: &FieldSlug,
) -> Result<Json<serde_json::Value>, ServerError> {
    let options = state
        .brokers
        .broker(subdomain)
        .field_options(field_slug)
        .await?;
    Ok(options_response(&options))
}

/// `POST /ifttt/v1/triggers/{slug}/fields/{field}/validate` — always 200;
/// the verdict lives in the body.
pub async fn validate(
    State(state): State<AppState>,
    Path((slug, field)): Path<(String, String)>,
    headers: HeaderMap,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if catalog::trigger(&slug).is_none() {
        return Err(ServerError::NotFound(format!("unknown trigger: {slug}")));
    }
    auth::authenticate(&state, &headers).await?;

    let value = request.value.unwrap_or_default();
    let body = match catalog::validate_trigger_field(&field, &value) {
        Ok(()) => serde_json::json!({ "data": {"valid": true} }),
        Err(message) => serde_json::json!({ "data": {"valid": false, "message": message} }),
    };
    Ok(Json(body))
}
