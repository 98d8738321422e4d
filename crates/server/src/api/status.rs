//! Service health, IFTTT status/test-setup gates, and user info.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;

use eclosion_core::{catalog, Subdomain};

use crate::auth::{self, constant_time_eq};
use crate::error::ServerError;

use super::AppState;

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Reject unless the request carries the configured `IFTTT-Service-Key`.
fn require_service_key(state: &AppState, headers: &HeaderMap) -> Result<(), ServerError> {
    let presented = headers
        .get("IFTTT-Service-Key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if state.config.ifttt.service_key.is_empty()
        || !constant_time_eq(presented, &state.config.ifttt.service_key)
    {
        return Err(ServerError::ServiceKeyRejected);
    }
    Ok(())
}

/// `GET /ifttt/v1/status` — 200 empty body when the service key matches.
pub async fn service_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServerError> {
    require_service_key(&state, &headers)?;
    Ok(())
}

/// `GET /ifttt/v1/test/setup` — mint a bearer for the reserved test tenant
/// and enumerate samples for every trigger, action, query and validated
/// trigger field.
pub async fn test_setup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    require_service_key(&state, &headers)?;

    let access_token = state.tokens.issue(&Subdomain::from(Subdomain::IFTTT_TEST));

    let mut triggers = serde_json::Map::new();
    let mut validations = serde_json::Map::new();
    for spec in catalog::triggers() {
        let fields: serde_json::Map<String, serde_json::Value> = spec
            .sample_fields
            .iter()
            .map(|(field, value)| ((*field).to_owned(), serde_json::json!(value)))
            .collect();
        triggers.insert(spec.slug.to_owned(), fields.into());

        let mut ruled = serde_json::Map::new();
        for field in spec.fields {
            if let Some(rule) = catalog::field_rule(field) {
                let (valid, invalid) = rule.examples();
                ruled.insert(
                    (*field).to_owned(),
                    serde_json::json!({"valid": valid, "invalid": invalid}),
                );
            }
        }
        if !ruled.is_empty() {
            validations.insert(spec.slug.to_owned(), ruled.into());
        }
    }

    let mut actions = serde_json::Map::new();
    for spec in catalog::actions() {
        let fields: serde_json::Map<String, serde_json::Value> = spec
            .sample_fields
            .iter()
            .map(|(field, value)| ((*field).to_owned(), serde_json::json!(value)))
            .collect();
        actions.insert(spec.slug.to_owned(), fields.into());
    }

    let mut queries = serde_json::Map::new();
    for spec in catalog::queries() {
        queries.insert(spec.slug.to_owned(), serde_json::json!({}));
    }

    Ok(Json(serde_json::json!({
        "data": {
            "accessToken": access_token,
            "samples": {
                "triggers": triggers,
                "actions": actions,
                "queries": queries,
                "triggerFieldValidations": validations,
            },
        }
    })))
}

/// `GET /ifttt/v1/user/info`
pub async fn user_info(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = auth::authenticate(&state, &headers).await?;
    let url = format!(
        "{}://{subdomain}.{}",
        state.config.origin.scheme, state.config.origin.host_suffix
    );
    Ok(Json(serde_json::json!({
        "data": {
            "name": format!("Eclosion ({subdomain})"),
            "id": subdomain,
            "url": url,
        }
    })))
}
