//! IFTTT action execution: validate, rate-limit, proxy, and spill to the
//! offline queue when the tunnel is down.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use tracing::{info, warn};
use uuid::Uuid;

use eclosion_core::{catalog, ActionHistoryEntry, QueuedAction};

use crate::auth;
use crate::error::ServerError;
use crate::tunnel::TunnelOutcome;

use super::schemas::ActionRequest;
use super::{is_test_mode, request_id, AppState};

fn now_ms() -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    ms
}

fn action_response(id: String) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "data": [{"id": id}] }))
}

/// `POST /ifttt/v1/actions/{slug}`
pub async fn execute(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ActionRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let spec = catalog::action(&slug)
        .ok_or_else(|| ServerError::NotFound(format!("unknown action: {slug}")))?;

    let subdomain = auth::authenticate(&state, &headers).await?;

    let fields = request
        .action_fields
        .ok_or_else(|| ServerError::Validation("actionFields is required".to_owned()))?;
    catalog::validate_action_fields(spec, &fields).map_err(ServerError::Validation)?;

    // Test mode short-circuits after validation so invalid fields still 400.
    if is_test_mode(&headers) {
        return Ok(action_response(format!("test-{slug}-{}", now_ms())));
    }

    let secret = auth::load_action_secret(state.store.as_ref(), &subdomain)
        .await?
        .ok_or(ServerError::NotConfigured)?;

    if subdomain.is_demo() {
        return Ok(action_response(format!("demo-{slug}-{}", now_ms())));
    }

    let broker = state.brokers.broker(&subdomain);
    let decision = broker.check_rate_limit().await?;
    if !decision.allowed {
        return Err(ServerError::RateLimited {
            retry_after_ms: decision.retry_after_ms.unwrap_or(0),
            current: decision.current,
            limit: decision.limit,
        });
    }

    let body = serde_json::json!({ "fields": fields });
    let outcome = state
        .tunnel
        .post(subdomain.as_str(), spec.origin_path, &secret, &body)
        .await;

    if outcome.is_success() {
        broker
            .push_history(ActionHistoryEntry::executed(
                slug.as_str(),
                fields,
                now_ms(),
                true,
            ))
            .await?;
        return Ok(action_response(format!("{slug}-{}", now_ms())));
    }

    match outcome {
        TunnelOutcome::Online { status, body } => {
            let error = body
                .get("error")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("origin rejected the action")
                .to_owned();
            warn!(%subdomain, %slug, status, %error, "origin failed action");
            broker
                .push_history(
                    ActionHistoryEntry::executed(slug.as_str(), fields, now_ms(), false)
                        .with_error(error.as_str())
                        .with_proxy_error(status.to_string()),
                )
                .await?;
            Err(ServerError::OriginFailed(error))
        }
        TunnelOutcome::Offline { proxy_error } => {
            // Spill to the queue so the applet run still succeeds; the
            // desktop replays it when the tunnel comes back.
            let dedup_key =
                request_id(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());
            let queued = QueuedAction::new(slug.as_str(), fields, now_ms(), dedup_key);
            let push = broker.queue_push(queued).await?;
            info!(%subdomain, %slug, %proxy_error, queued_id = push.id(), "origin offline, action queued");
            Ok(action_response(format!("queued-{}", push.id())))
        }
    }
}
