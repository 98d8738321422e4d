//! IFTTT trigger polling, subscription upkeep and test-mode synthesis.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use eclosion_core::{catalog, TriggerEvent, TriggerIdentity, TriggerSlug, TriggerSubscription};

use crate::auth;
use crate::error::ServerError;

use super::schemas::{event_to_item, paginate, TriggerPollRequest};
use super::{is_test_mode, AppState};

/// IFTTT never asks for more than this many items per poll.
const MAX_PAGE: usize = 50;

/// How many items test mode synthesizes on an empty broker.
const TEST_MODE_SAMPLES: i64 = 3;

fn now_ms() -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    ms
}

/// `POST /ifttt/v1/triggers/{slug}`
pub async fn poll(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(request): Json<TriggerPollRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let spec = catalog::trigger(&slug)
        .ok_or_else(|| ServerError::NotFound(format!("unknown trigger: {slug}")))?;

    let subdomain = auth::authenticate(&state, &headers).await?;
    let test_mode = is_test_mode(&headers);

    let fields = request
        .trigger_fields
        .ok_or_else(|| ServerError::Validation("triggerFields is required".to_owned()))?;
    match fields.get(spec.required_field) {
        Some(value) if !value.is_empty() => {}
        _ => {
            return Err(ServerError::Validation(format!(
                "missing required trigger field: {}",
                spec.required_field
            )));
        }
    }

    // Real polls keep the tenant's desktop informed of what to push.
    if !test_mode && let Some(identity) = request.trigger_identity.filter(|i| !i.is_empty()) {
        state
            .brokers
            .broker(&subdomain)
            .upsert_subscription(TriggerSubscription {
                trigger_identity: TriggerIdentity::from(identity),
                trigger_slug: TriggerSlug::from(slug.clone()),
                fields: fields.clone(),
                subscribed_at: now_ms(),
            })
            .await?;
    }

    let limit = request.limit.unwrap_or(MAX_PAGE).min(MAX_PAGE);

    // Fetch the whole ring buffer: filtering and cursor resume both need
    // to see past the first page.
    let broker = state.brokers.broker(&subdomain);
    let slug_typed = TriggerSlug::from(slug.clone());
    let mut events = broker
        .events(&slug_typed, state.brokers.limits().events_per_slug)
        .await?;

    if let Some(filter) = spec.filter {
        events = filter(events, &fields);
    }

    if test_mode && events.is_empty() {
        events = synthesized_samples(spec);
    }

    let (page, cursor) = paginate(events, request.cursor.as_deref(), limit);
    let items: Vec<serde_json::Value> = page.iter().map(event_to_item).collect();

    let mut body = serde_json::json!({ "data": items });
    if let Some(cursor) = cursor {
        body["cursor"] = serde_json::json!(cursor);
    }
    Ok(Json(body))
}

/// Well-formed sample events so IFTTT's endpoint tests pass against an
/// empty broker. Timestamps descend so the pagination contract holds.
fn synthesized_samples(spec: &catalog::TriggerSpec) -> Vec<TriggerEvent> {
    let now = now_ms() / 1000;
    (0..TEST_MODE_SAMPLES)
        .map(|index| {
            let data: HashMap<String, String> = spec
                .sample_data
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect();
            TriggerEvent::new(spec.slug, now - index * 60, data)
        })
        .collect()
}

/// `DELETE /ifttt/v1/triggers/{slug}/trigger_identity/{identity}` — remove
/// the subscription; 200 whether or not it existed.
pub async fn delete_identity(
    State(state): State<AppState>,
    Path((slug, identity)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = auth::authenticate(&state, &headers).await?;
    state
        .brokers
        .broker(&subdomain)
        .delete_subscription(
            &TriggerSlug::from(slug),
            &TriggerIdentity::from(identity),
        )
        .await?;
    Ok(Json(serde_json::json!({})))
}
