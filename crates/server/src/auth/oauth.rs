//! OAuth2 authorization-code flow with optional PKCE.
//!
//! The browser-facing forms are static collaborator pages; these endpoints
//! are the JSON surface behind them plus the token exchange IFTTT calls
//! directly. Link tokens and auth codes are one-time: consumption is an
//! atomic `take` on the store.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use eclosion_core::{FieldOption, FieldSlug, Subdomain, TriggerEvent};
use eclosion_state::{KeyKind, StateKey};

use crate::api::AppState;
use crate::auth::{self, constant_time_eq, pkce};
use crate::error::ServerError;

/// One-time credentials live this long.
const CODE_TTL: Duration = Duration::from_secs(10 * 60);

/// Scope under which one-time codes are stored; the code value is the only
/// lookup key the redeeming caller has.
const OAUTH_SCOPE: &str = "_oauth";

fn now_ms() -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    ms
}

/// 256 bits of CSPRNG output as lowercase hex.
fn random_hex() -> String {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).expect("OS RNG unavailable");
    hex::encode(bytes)
}

/// Pending approval, bound to the authorize request that created it.
#[derive(Debug, Serialize, Deserialize)]
struct LinkTokenRecord {
    subdomain: Subdomain,
    redirect_uri: String,
    state: Option<String>,
    created_at: i64,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

/// Issued authorization code, bound to subdomain + redirect URI (+ PKCE).
#[derive(Debug, Serialize, Deserialize)]
struct AuthCodeRecord {
    subdomain: Subdomain,
    redirect_uri: String,
    created_at: i64,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

fn link_token_key(token: &str) -> StateKey {
    StateKey::new(OAUTH_SCOPE, KeyKind::LinkToken, token)
}

fn auth_code_key(code: &str) -> StateKey {
    StateKey::new(OAUTH_SCOPE, KeyKind::AuthCode, code)
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    subdomain: Option<String>,
    state: Option<String>,
    redirect_uri: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

/// `POST /oauth/authorize` — validate the subdomain and hand back the
/// approval redirect for the static form to follow.
pub async fn authorize(
    State(state): State<AppState>,
    Json(request): Json<AuthorizeRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let subdomain = request
        .subdomain
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServerError::Validation("subdomain is required".to_owned()))?;
    let redirect_uri = request
        .redirect_uri
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ServerError::Validation("redirect_uri is required".to_owned()))?;

    if let Some(ref method) = request.code_challenge_method
        && method.as_str() != pkce::METHOD_S256
    {
        return Err(ServerError::Validation(format!(
            "unsupported code_challenge_method: {method}"
        )));
    }

    let subdomain = Subdomain::from(subdomain);

    if !subdomain.is_demo() {
        if state.directory.tenant(&subdomain).await?.is_none() {
            return Err(ServerError::NotFound("unknown subdomain".to_owned()));
        }
        if let Some(user) = auth::load_user(state.store.as_ref(), &subdomain).await?
            && user.connected
        {
            return Err(ServerError::Conflict(
                "this subdomain is already connected to IFTTT".to_owned(),
            ));
        }
        if !state.directory.otp_configured(&subdomain).await? {
            return Err(ServerError::Validation(
                "no OTP email is configured for this subdomain".to_owned(),
            ));
        }
    }

    let token = random_hex();
    let record = LinkTokenRecord {
        subdomain: subdomain.clone(),
        redirect_uri,
        state: request.state,
        created_at: now_ms(),
        code_challenge: request.code_challenge,
        code_challenge_method: request.code_challenge_method,
    };
    state
        .store
        .set(
            &link_token_key(&token),
            &serde_json::to_string(&record).map_err(ServerError::internal)?,
            Some(CODE_TTL),
        )
        .await?;

    let redirect_url = if subdomain.is_demo() {
        format!(
            "{}/demo/login?link_token={token}",
            state.config.server.external_url()
        )
    } else {
        format!(
            "{}://{subdomain}.{}/ifttt/authorize?link_token={token}",
            state.config.origin.scheme, state.config.origin.host_suffix
        )
    };

    Ok(Json(serde_json::json!({ "redirect_url": redirect_url })))
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    link_token: Option<String>,
    approved: Option<bool>,
}

/// `POST /oauth/approve` — called by the tenant's origin gate after the
/// out-of-band OTP check. Consumes the link token either way.
pub async fn approve(
    State(state): State<AppState>,
    Json(request): Json<ApproveRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let token = request
        .link_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ServerError::Validation("link_token is required".to_owned()))?;

    let record = consume_link_token(&state, &token).await?;

    if request.approved != Some(true) {
        info!(subdomain = %record.subdomain, "authorization denied by tenant");
        let redirect_url = denial_redirect(&record);
        return Ok(Json(serde_json::json!({ "redirect_url": redirect_url })));
    }

    let redirect_url = finish_approval(&state, record).await?;
    Ok(Json(serde_json::json!({ "redirect_url": redirect_url })))
}

#[derive(Debug, Deserialize)]
pub struct DemoLoginRequest {
    link_token: Option<String>,
    password: Option<String>,
}

/// `POST /oauth/demo` — the demo tenant's approval: a password check
/// against configuration, then the normal approval path plus sample-data
/// seeding so IFTTT's review flow sees plausible data.
pub async fn demo_login(
    State(state): State<AppState>,
    Json(request): Json<DemoLoginRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let token = request
        .link_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ServerError::Validation("link_token is required".to_owned()))?;
    let password = request.password.unwrap_or_default();

    let record = consume_link_token(&state, &token).await?;
    if !record.subdomain.is_demo() {
        return Err(ServerError::Validation(
            "link token is not for the demo tenant".to_owned(),
        ));
    }

    if state.config.auth.demo_password.is_empty()
        || !constant_time_eq(&password, &state.config.auth.demo_password)
    {
        return Err(ServerError::AuthRejected);
    }

    seed_demo_data(&state).await?;

    let redirect_url = finish_approval(&state, record).await?;
    Ok(Json(serde_json::json!({ "redirect_url": redirect_url })))
}

async fn consume_link_token(
    state: &AppState,
    token: &str,
) -> Result<LinkTokenRecord, ServerError> {
    let raw = state
        .store
        .take(&link_token_key(token))
        .await?
        .ok_or_else(|| {
            ServerError::NotFound("link token not found or already used".to_owned())
        })?;
    serde_json::from_str(&raw).map_err(ServerError::internal)
}

fn denial_redirect(record: &LinkTokenRecord) -> String {
    let mut params = vec![("error", "access_denied".to_owned())];
    if let Some(ref s) = record.state {
        params.push(("state", s.clone()));
    }
    let query = serde_urlencoded::to_string(params).unwrap_or_default();
    format!("{}?{query}", record.redirect_uri)
}

/// Issue the auth code and a fresh action secret, then build the IFTTT
/// redirect. The secret lands in both the tenant scope and the registry so
/// the origin's gate can verify later proxied calls.
async fn finish_approval(
    state: &AppState,
    record: LinkTokenRecord,
) -> Result<String, ServerError> {
    let code = random_hex();
    let code_record = AuthCodeRecord {
        subdomain: record.subdomain.clone(),
        redirect_uri: record.redirect_uri.clone(),
        created_at: now_ms(),
        code_challenge: record.code_challenge.clone(),
        code_challenge_method: record.code_challenge_method.clone(),
    };
    state
        .store
        .set(
            &auth_code_key(&code),
            &serde_json::to_string(&code_record).map_err(ServerError::internal)?,
            Some(CODE_TTL),
        )
        .await?;

    let secret = random_hex();
    auth::store_action_secret(state.store.as_ref(), &record.subdomain, &secret).await?;
    state
        .directory
        .set_origin_secret(&record.subdomain, &secret)
        .await?;

    info!(subdomain = %record.subdomain, "authorization approved, code issued");

    let mut params = vec![("code", code)];
    if let Some(state_param) = record.state {
        params.push(("state", state_param));
    }
    let query = serde_urlencoded::to_string(params).unwrap_or_default();
    Ok(format!("{}?{query}", record.redirect_uri))
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    grant_type: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    code: Option<String>,
    redirect_uri: Option<String>,
    code_verifier: Option<String>,
}

fn oauth_error(status: StatusCode, code: &str, description: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": code,
            "error_description": description,
        })),
    )
        .into_response()
}

/// `POST /oauth/token` — redeem an authorization code for a bearer token.
///
/// Accepts `application/x-www-form-urlencoded` (the OAuth default) or JSON.
/// Client credentials and PKCE digests are compared in constant time. The
/// code is consumed whether or not the exchange then succeeds.
pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"));

    let request: TokenRequest = if is_json {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(_) => {
                return oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    "malformed JSON body",
                );
            }
        }
    } else {
        match serde_urlencoded::from_bytes(&body) {
            Ok(request) => request,
            Err(_) => {
                return oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    "malformed form body",
                );
            }
        }
    };

    if request.grant_type.as_deref() != Some("authorization_code") {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "only authorization_code is supported",
        );
    }

    let client_id = request.client_id.unwrap_or_default();
    let client_secret = request.client_secret.unwrap_or_default();
    let id_ok = constant_time_eq(&client_id, &state.config.ifttt.client_id);
    let secret_ok = constant_time_eq(&client_secret, &state.config.ifttt.client_secret);
    if !(id_ok && secret_ok) {
        return oauth_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "client authentication failed",
        );
    }

    let Some(code) = request.code.filter(|c| !c.is_empty()) else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "code is required");
    };

    let record: AuthCodeRecord = match state.store.take(&auth_code_key(&code)).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(error) => return ServerError::internal(error).into_response(),
        },
        Ok(None) => {
            return oauth_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "authorization code is invalid or expired",
            );
        }
        Err(error) => return ServerError::internal(error).into_response(),
    };

    if let Some(redirect_uri) = request.redirect_uri
        && redirect_uri != record.redirect_uri
    {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "redirect_uri does not match the authorization request",
        );
    }

    if let Some(ref challenge) = record.code_challenge {
        let verified = request
            .code_verifier
            .as_deref()
            .is_some_and(|verifier| pkce::verify(verifier, challenge));
        if !verified {
            return oauth_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "PKCE verification failed",
            );
        }
    }

    if let Err(error) =
        auth::mark_connected(state.store.as_ref(), &record.subdomain, now_ms()).await
    {
        return error.into_response();
    }

    let access_token = state.tokens.issue(&record.subdomain);
    info!(subdomain = %record.subdomain, "bearer token issued");

    Json(serde_json::json!({
        "token_type": "Bearer",
        "access_token": access_token,
    }))
    .into_response()
}

/// Seed the demo broker with enough events and options that every trigger
/// and dropdown shows data during IFTTT's review.
async fn seed_demo_data(state: &AppState) -> Result<(), ServerError> {
    let demo = Subdomain::from(Subdomain::DEMO);
    let broker = state.brokers.broker(&demo);
    let now = now_ms() / 1000;

    for spec in eclosion_core::catalog::triggers() {
        for (index, minutes_ago) in [0_i64, 90, 240].iter().enumerate() {
            let mut data: std::collections::HashMap<String, String> = spec
                .sample_data
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect();
            data.insert("sample_index".to_owned(), index.to_string());
            broker
                .push_event(TriggerEvent::new(spec.slug, now - minutes_ago * 60, data))
                .await?;
        }
    }

    let option_sets: [(&str, &[(&str, &str)]); 3] = [
        (
            "category",
            &[
                ("Groceries", "cat-groceries"),
                ("Dining", "cat-dining"),
                ("Utilities", "cat-utilities"),
            ],
        ),
        (
            "category_all",
            &[
                ("Groceries", "cat-groceries"),
                ("Dining", "cat-dining"),
                ("Utilities", "cat-utilities"),
                ("Savings", "cat-savings"),
            ],
        ),
        ("goal", &[("Emergency Fund", "goal-1"), ("Vacation", "goal-2")]),
    ];
    for (field, options) in option_sets {
        broker
            .set_field_options(
                &FieldSlug::from(field),
                options
                    .iter()
                    .map(|(label, value)| FieldOption::new(*label, *value))
                    .collect(),
            )
            .await?;
    }

    Ok(())
}
