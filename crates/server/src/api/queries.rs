//! IFTTT query handlers: broker-backed history and origin passthroughs.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use tracing::debug;

use eclosion_core::{catalog, TriggerSlug};

use crate::auth;
use crate::error::ServerError;
use crate::tunnel::TunnelOutcome;

use super::schemas::{event_to_item, paginate, QueryRequest};
use super::{is_test_mode, AppState};

const MAX_PAGE: usize = 50;

/// `POST /ifttt/v1/queries/{slug}`
pub async fn run(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let spec = catalog::query(&slug)
        .ok_or_else(|| ServerError::NotFound(format!("unknown query: {slug}")))?;

    let subdomain = auth::authenticate(&state, &headers).await?;

    if is_test_mode(&headers) {
        return Ok(Json(serde_json::json!({ "data": sample_rows(&slug) })));
    }

    match spec.backing {
        catalog::QueryBacking::Events { trigger_slug } => {
            let limit = request.limit.unwrap_or(MAX_PAGE).min(MAX_PAGE);
            let events = state
                .brokers
                .broker(&subdomain)
                .events(
                    &TriggerSlug::from(trigger_slug),
                    state.brokers.limits().events_per_slug,
                )
                .await?;
            let (page, cursor) = paginate(events, request.cursor.as_deref(), limit);
            let rows: Vec<serde_json::Value> = page.iter().map(event_to_item).collect();

            let mut body = serde_json::json!({ "data": rows });
            if let Some(cursor) = cursor {
                body["cursor"] = serde_json::json!(cursor);
            }
            Ok(Json(body))
        }
        catalog::QueryBacking::Origin { path } => {
            let secret = auth::load_action_secret(state.store.as_ref(), &subdomain)
                .await?
                .ok_or(ServerError::NotConfigured)?;

            let outcome = state.tunnel.post_empty(subdomain.as_str(), path, &secret).await;
            match outcome {
                TunnelOutcome::Online { status, body }
                    if (200..300).contains(&status)
                        && body.get("success").and_then(serde_json::Value::as_bool)
                            == Some(true) =>
                {
                    let rows = body
                        .get("data")
                        .cloned()
                        .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));
                    Ok(Json(serde_json::json!({ "data": rows })))
                }
                TunnelOutcome::Online { body, .. } => {
                    let error = body
                        .get("error")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("origin rejected the query")
                        .to_owned();
                    Err(ServerError::OriginFailed(error))
                }
                TunnelOutcome::Offline { proxy_error } => {
                    // Queries are read-through only: offline means no rows,
                    // never a queue entry.
                    debug!(%subdomain, %slug, %proxy_error, "origin offline, empty query result");
                    Ok(Json(serde_json::json!({ "data": [] })))
                }
            }
        }
    }
}

/// Static rows for IFTTT's endpoint tests.
fn sample_rows(slug: &str) -> serde_json::Value {
    match slug {
        "list_achieved_goals" => serde_json::json!([
            {"goal_name": "Emergency Fund", "goal_id": "goal-1", "amount": "5000.00",
             "meta": {"id": "sample-goal-1", "timestamp": 1_700_000_000}},
            {"goal_name": "Vacation", "goal_id": "goal-2", "amount": "1800.00",
             "meta": {"id": "sample-goal-2", "timestamp": 1_699_900_000}},
        ]),
        "list_category_budgets" => serde_json::json!([
            {"category": "cat-groceries", "category_name": "Groceries", "budgeted": "400.00", "spent": "212.55"},
            {"category": "cat-dining", "category_name": "Dining", "budgeted": "150.00", "spent": "163.20"},
        ]),
        "list_under_budget_categories" => serde_json::json!([
            {"category": "cat-groceries", "category_name": "Groceries", "remaining": "187.45"},
        ]),
        "budget_summary" => serde_json::json!([
            {"total_budgeted": "1200.00", "total_spent": "864.10", "remaining": "335.90"},
        ]),
        _ => serde_json::Value::Array(Vec::new()),
    }
}
