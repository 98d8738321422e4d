pub mod actions;
pub mod admin;
pub mod field_options;
pub mod queries;
pub mod schemas;
pub mod status;
pub mod triggers;

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use eclosion_broker::BrokerRegistry;
use eclosion_state::StateStore;

use crate::auth::{oauth, TokenService};
use crate::config::EclosionConfig;
use crate::directory::TenantDirectory;
use crate::realtime::RealtimeNotifier;
use crate::tunnel::TunnelProxy;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Global key-value store: tokens-and-codes metadata, registry keys,
    /// and the substrate under every tenant broker.
    pub store: Arc<dyn StateStore>,
    /// Per-tenant broker instances.
    pub brokers: Arc<BrokerRegistry>,
    /// Read-only registry view.
    pub directory: Arc<TenantDirectory>,
    /// Bearer-token signer/verifier.
    pub tokens: Arc<TokenService>,
    /// Outbound proxy to tenant origins.
    pub tunnel: Arc<TunnelProxy>,
    /// Fire-and-forget IFTTT realtime notifications.
    pub realtime: Arc<RealtimeNotifier>,
    pub config: Arc<EclosionConfig>,
}

/// Whether IFTTT's endpoint tests are driving this request.
#[must_use]
pub fn is_test_mode(headers: &HeaderMap) -> bool {
    headers
        .get("IFTTT-Test-Mode")
        .and_then(|value| value.to_str().ok())
        == Some("1")
}

/// IFTTT's request id, the system-wide deduplication key.
#[must_use]
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("X-Request-ID")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Build the router with every route, CORS, tracing and the anti-indexing
/// header. Preflights are answered by the CORS layer.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(status::health))
        // IFTTT service API
        .route("/ifttt/v1/status", get(status::service_status))
        .route("/ifttt/v1/test/setup", get(status::test_setup))
        .route("/ifttt/v1/user/info", get(status::user_info))
        .route("/ifttt/v1/triggers/{slug}", post(triggers::poll))
        .route(
            "/ifttt/v1/triggers/{slug}/trigger_identity/{identity}",
            delete(triggers::delete_identity),
        )
        .route(
            "/ifttt/v1/triggers/{slug}/fields/{field}/options",
            post(field_options::trigger_options),
        )
        .route(
            "/ifttt/v1/triggers/{slug}/fields/{field}/validate",
            post(field_options::validate),
        )
        .route("/ifttt/v1/actions/{slug}", post(actions::execute))
        .route(
            "/ifttt/v1/actions/{slug}/fields/{field}/options",
            post(field_options::action_options),
        )
        .route("/ifttt/v1/queries/{slug}", post(queries::run))
        // OAuth
        .route("/oauth/authorize", post(oauth::authorize))
        .route("/oauth/approve", post(oauth::approve))
        .route("/oauth/demo", post(oauth::demo_login))
        .route("/oauth/token", post(oauth::token))
        // Tenant admin API (management-key auth)
        .route("/api/events/push", post(admin::push_event))
        .route("/api/queue/pending", get(admin::queue_pending))
        .route("/api/queue/ack", post(admin::queue_ack))
        .route("/api/field-options/push", post(admin::push_field_options))
        .route("/api/ifttt-status", get(admin::ifttt_status))
        .route("/api/ifttt-disconnect", post(admin::disconnect))
        .route("/api/action-secret", get(admin::action_secret))
        .route(
            "/api/action-history",
            get(admin::action_history).post(admin::push_action_history),
        )
        .route("/api/trigger-history", get(admin::trigger_history))
        .route("/api/subscriptions", get(admin::subscriptions))
        .route("/api/tunnel-test", get(admin::tunnel_test))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-robots-tag"),
            HeaderValue::from_static("noindex, nofollow, noarchive"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
