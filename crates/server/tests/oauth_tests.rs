//! OAuth2 authorization-code flow, PKCE, demo login, disconnect semantics
//! and management-key auth.

mod common;

use axum::http::StatusCode;

use eclosion_core::Subdomain;
use eclosion_server::auth::pkce;
use eclosion_state::StateStore;

use common::{
    bearer, get, offline_harness, post_form, post_json, query_param, Harness, CLIENT_ID,
    CLIENT_SECRET, DEMO_PASSWORD, MANAGEMENT_KEY,
};

const REDIRECT_URI: &str = "https://ifttt.com/channels/eclosion/authorize";

fn mgmt_headers() -> Vec<(&'static str, &'static str)> {
    vec![("X-Subdomain", "acme"), ("X-Management-Key", MANAGEMENT_KEY)]
}

/// Drive authorize → approve and hand back the authorization code.
async fn authorize_and_approve(harness: &Harness, verifier: Option<&str>) -> String {
    let mut authorize_body = serde_json::json!({
        "subdomain": "acme",
        "state": "st-1",
        "redirect_uri": REDIRECT_URI,
    });
    if let Some(verifier) = verifier {
        authorize_body["code_challenge"] = serde_json::json!(pkce::challenge(verifier));
        authorize_body["code_challenge_method"] = serde_json::json!("S256");
    }

    let (status, body) = harness
        .send(post_json("/oauth/authorize", &[], &authorize_body))
        .await;
    assert_eq!(status, StatusCode::OK);
    let redirect_url = body["redirect_url"].as_str().unwrap();
    assert!(redirect_url.contains("/ifttt/authorize?link_token="));
    let link_token = query_param(redirect_url, "link_token").unwrap();

    let (status, body) = harness
        .send(post_json(
            "/oauth/approve",
            &[],
            &serde_json::json!({"link_token": link_token, "approved": true}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let redirect_url = body["redirect_url"].as_str().unwrap();
    assert!(redirect_url.starts_with(REDIRECT_URI));
    assert_eq!(query_param(redirect_url, "state").as_deref(), Some("st-1"));
    query_param(redirect_url, "code").unwrap()
}

fn token_form(code: &str, verifier: Option<&str>) -> String {
    let mut form = format!(
        "grant_type=authorization_code&client_id={CLIENT_ID}&client_secret={CLIENT_SECRET}&code={code}&redirect_uri={}",
        urlencode(REDIRECT_URI)
    );
    if let Some(verifier) = verifier {
        form.push_str(&format!("&code_verifier={verifier}"));
    }
    form
}

fn urlencode(value: &str) -> String {
    serde_urlencoded::to_string([("k", value)])
        .unwrap()
        .split_once('=')
        .map(|(_, v)| v.to_owned())
        .unwrap_or_default()
}

#[tokio::test]
async fn pkce_flow_end_to_end() {
    let harness = offline_harness();
    harness.seed_tenant("acme").await;

    let code = authorize_and_approve(&harness, Some("verifier")).await;
    let (status, body) = harness
        .send(post_form("/oauth/token", &token_form(&code, Some("verifier"))))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "Bearer");
    let access_token = body["access_token"].as_str().unwrap();

    // The token works against the service API.
    let (status, body) = harness
        .send(get(
            "/ifttt/v1/user/info",
            &[("Authorization", &bearer(access_token))],
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "acme");

    // Approval minted an action secret in both scopes.
    let (status, body) = harness.send(get("/api/action-secret", &mgmt_headers())).await;
    assert_eq!(status, StatusCode::OK);
    let secret = body["secret"].as_str().unwrap();
    assert_eq!(secret.len(), 64);
    let registry_copy = harness
        .store
        .get(&eclosion_state::StateKey::new(
            "acme",
            eclosion_state::KeyKind::OriginSecret,
            "secret",
        ))
        .await
        .unwrap();
    assert_eq!(registry_copy.as_deref(), Some(secret));
}

#[tokio::test]
async fn wrong_pkce_verifier_is_invalid_grant() {
    let harness = offline_harness();
    harness.seed_tenant("acme").await;

    let code = authorize_and_approve(&harness, Some("verifier")).await;
    let (status, body) = harness
        .send(post_form("/oauth/token", &token_form(&code, Some("other"))))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn auth_codes_are_single_use() {
    let harness = offline_harness();
    harness.seed_tenant("acme").await;

    let code = authorize_and_approve(&harness, None).await;
    let (status, _) = harness
        .send(post_form("/oauth/token", &token_form(&code, None)))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = harness
        .send(post_form("/oauth/token", &token_form(&code, None)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn link_tokens_are_single_use() {
    let harness = offline_harness();
    harness.seed_tenant("acme").await;

    let (_, body) = harness
        .send(post_json(
            "/oauth/authorize",
            &[],
            &serde_json::json!({"subdomain": "acme", "redirect_uri": REDIRECT_URI}),
        ))
        .await;
    let link_token = query_param(body["redirect_url"].as_str().unwrap(), "link_token").unwrap();

    let approve = serde_json::json!({"link_token": link_token, "approved": true});
    let (status, _) = harness.send(post_json("/oauth/approve", &[], &approve)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = harness.send(post_json("/oauth/approve", &[], &approve)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn token_endpoint_accepts_json_and_checks_credentials() {
    let harness = offline_harness();
    harness.seed_tenant("acme").await;
    let code = authorize_and_approve(&harness, None).await;

    // Wrong client secret first; the code survives because the client
    // never authenticated.
    let (status, body) = harness
        .send(post_json(
            "/oauth/token",
            &[],
            &serde_json::json!({
                "grant_type": "authorization_code",
                "client_id": CLIENT_ID,
                "client_secret": "wrong",
                "code": code,
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_client");

    let (status, body) = harness
        .send(post_json(
            "/oauth/token",
            &[],
            &serde_json::json!({
                "grant_type": "authorization_code",
                "client_id": CLIENT_ID,
                "client_secret": CLIENT_SECRET,
                "code": code,
                "redirect_uri": REDIRECT_URI,
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["access_token"].is_string());
}

#[tokio::test]
async fn unsupported_grant_type_is_rejected() {
    let harness = offline_harness();
    let (status, body) = harness
        .send(post_form("/oauth/token", "grant_type=client_credentials"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn authorize_validates_subdomain_and_state() {
    let harness = offline_harness();
    harness.seed_tenant("acme").await;

    // Unknown subdomain.
    let (status, _) = harness
        .send(post_json(
            "/oauth/authorize",
            &[],
            &serde_json::json!({"subdomain": "ghost", "redirect_uri": REDIRECT_URI}),
        ))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Missing redirect_uri.
    let (status, _) = harness
        .send(post_json(
            "/oauth/authorize",
            &[],
            &serde_json::json!({"subdomain": "acme"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unsupported PKCE method.
    let (status, _) = harness
        .send(post_json(
            "/oauth/authorize",
            &[],
            &serde_json::json!({
                "subdomain": "acme",
                "redirect_uri": REDIRECT_URI,
                "code_challenge": "x",
                "code_challenge_method": "plain",
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Already connected is a conflict.
    harness.connect_tenant("acme").await;
    let (status, _) = harness
        .send(post_json(
            "/oauth/authorize",
            &[],
            &serde_json::json!({"subdomain": "acme", "redirect_uri": REDIRECT_URI}),
        ))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn authorize_requires_an_otp_mailbox() {
    let harness = offline_harness();
    // Tenant record without the OTP marker.
    let record = eclosion_server::directory::TenantRecord {
        tunnel_id: "tun-bare".to_owned(),
        created_at: 0,
        management_key_hash: String::new(),
    };
    harness
        .store
        .set(
            &eclosion_state::StateKey::new("bare", eclosion_state::KeyKind::Tenant, "record"),
            &serde_json::to_string(&record).unwrap(),
            None,
        )
        .await
        .unwrap();

    let (status, body) = harness
        .send(post_json(
            "/oauth/authorize",
            &[],
            &serde_json::json!({"subdomain": "bare", "redirect_uri": REDIRECT_URI}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"][0]["message"]
        .as_str()
        .unwrap()
        .contains("OTP"));
}

#[tokio::test]
async fn denied_approval_redirects_with_access_denied() {
    let harness = offline_harness();
    harness.seed_tenant("acme").await;

    let (_, body) = harness
        .send(post_json(
            "/oauth/authorize",
            &[],
            &serde_json::json!({
                "subdomain": "acme",
                "state": "st-2",
                "redirect_uri": REDIRECT_URI,
            }),
        ))
        .await;
    let link_token = query_param(body["redirect_url"].as_str().unwrap(), "link_token").unwrap();

    let (status, body) = harness
        .send(post_json(
            "/oauth/approve",
            &[],
            &serde_json::json!({"link_token": link_token, "approved": false}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let redirect_url = body["redirect_url"].as_str().unwrap();
    assert_eq!(
        query_param(redirect_url, "error").as_deref(),
        Some("access_denied")
    );
    assert_eq!(query_param(redirect_url, "state").as_deref(), Some("st-2"));
    assert!(query_param(redirect_url, "code").is_none());
}

// -- Demo tenant ----------------------------------------------------------

#[tokio::test]
async fn demo_login_checks_the_password_and_seeds_data() {
    let harness = offline_harness();

    let (status, body) = harness
        .send(post_json(
            "/oauth/authorize",
            &[],
            &serde_json::json!({
                "subdomain": "demo",
                "state": "st-d",
                "redirect_uri": REDIRECT_URI,
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let redirect_url = body["redirect_url"].as_str().unwrap();
    assert!(redirect_url.contains("/demo/login?link_token="));
    let link_token = query_param(redirect_url, "link_token").unwrap();

    // Wrong password: rejected, and the link token was consumed.
    let (status, _) = harness
        .send(post_json(
            "/oauth/demo",
            &[],
            &serde_json::json!({"link_token": link_token, "password": "wrong"}),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Start over with a fresh link token and the right password.
    let (_, body) = harness
        .send(post_json(
            "/oauth/authorize",
            &[],
            &serde_json::json!({
                "subdomain": "demo",
                "state": "st-d",
                "redirect_uri": REDIRECT_URI,
            }),
        ))
        .await;
    let link_token = query_param(body["redirect_url"].as_str().unwrap(), "link_token").unwrap();

    let (status, body) = harness
        .send(post_json(
            "/oauth/demo",
            &[],
            &serde_json::json!({"link_token": link_token, "password": DEMO_PASSWORD}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let code = query_param(body["redirect_url"].as_str().unwrap(), "code").unwrap();

    let (status, body) = harness
        .send(post_form("/oauth/token", &token_form(&code, None)))
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["access_token"].as_str().unwrap().to_owned();

    // Seeded events show up on a normal poll.
    let (status, body) = harness
        .send(post_json(
            "/ifttt/v1/triggers/goal_achieved",
            &[("Authorization", &bearer(&token))],
            &serde_json::json!({"triggerFields": {"goal_name": "Emergency Fund"}}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    // Demo actions synthesize without touching any origin.
    let (status, body) = harness
        .send(post_json(
            "/ifttt/v1/actions/budget_to",
            &[("Authorization", &bearer(&token))],
            &serde_json::json!({"actionFields": {"category": "cat-groceries", "amount": "10"}}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"][0]["id"]
        .as_str()
        .unwrap()
        .starts_with("demo-budget_to-"));
}

// -- Disconnect -----------------------------------------------------------

#[tokio::test]
async fn disconnect_invalidates_tokens_and_secrets() {
    let harness = offline_harness();
    harness.seed_tenant("acme").await;
    let token = harness.connect_tenant("acme").await;
    let auth = bearer(&token);

    let (status, _) = harness
        .send(get("/ifttt/v1/user/info", &[("Authorization", &auth)]))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = harness
        .send(post_json(
            "/api/ifttt-disconnect",
            &mgmt_headers(),
            &serde_json::json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["disconnected"], true);

    // Prior bearer is now rejected.
    let (status, _) = harness
        .send(get("/ifttt/v1/user/info", &[("Authorization", &auth)]))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The action secret is gone too.
    let (status, _) = harness.send(get("/api/action-secret", &mgmt_headers())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = harness.send(get("/api/ifttt-status", &mgmt_headers())).await;
    assert_eq!(body["connected"], false);
}

#[tokio::test]
async fn reauthorization_works_after_disconnect() {
    let harness = offline_harness();
    harness.seed_tenant("acme").await;
    harness.connect_tenant("acme").await;

    harness
        .send(post_json(
            "/api/ifttt-disconnect",
            &mgmt_headers(),
            &serde_json::json!({}),
        ))
        .await;

    // No longer a conflict: the tenant can run the flow again.
    let code = authorize_and_approve(&harness, None).await;
    let (status, _) = harness
        .send(post_form("/oauth/token", &token_form(&code, None)))
        .await;
    assert_eq!(status, StatusCode::OK);
}

// -- Management-key auth --------------------------------------------------

#[tokio::test]
async fn admin_api_rejects_bad_management_keys() {
    let harness = offline_harness();
    harness.seed_tenant("acme").await;

    let (status, _) = harness
        .send(get(
            "/api/queue/pending",
            &[("X-Subdomain", "acme"), ("X-Management-Key", "wrong")],
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = harness.send(get("/api/queue/pending", &[])).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Unknown tenant: same 401, no information leak.
    let (status, _) = harness
        .send(get(
            "/api/queue/pending",
            &[("X-Subdomain", "ghost"), ("X-Management-Key", MANAGEMENT_KEY)],
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn field_option_bulk_push_lands_in_the_cache() {
    let harness = offline_harness();
    harness.seed_tenant("acme").await;

    let (status, body) = harness
        .send(post_json(
            "/api/field-options/push",
            &mgmt_headers(),
            &serde_json::json!({"fields": {
                "category": [{"label": "Groceries", "value": "cat-groceries"}],
                "goal": [{"label": "Vacation", "value": "goal-2"}],
            }}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stored"], true);

    let broker = harness.state.brokers.broker(&Subdomain::from("acme"));
    let categories = broker
        .field_options(&eclosion_core::FieldSlug::from("category"))
        .await
        .unwrap();
    assert_eq!(categories[0].value, "cat-groceries");
    let goals = broker
        .field_options(&eclosion_core::FieldSlug::from("goal"))
        .await
        .unwrap();
    assert_eq!(goals[0].value, "goal-2");
}

#[tokio::test]
async fn desktop_journaled_history_round_trips() {
    let harness = offline_harness();
    harness.seed_tenant("acme").await;

    let (status, _) = harness
        .send(post_json(
            "/api/action-history",
            &mgmt_headers(),
            &serde_json::json!({
                "action_slug": "budget_to",
                "fields": {"category": "cat-1", "amount": "25"},
                "queued_at": 1000,
                "success": true,
                "was_queued": true,
            }),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = harness
        .send(get("/api/action-history", &mgmt_headers()))
        .await;
    let entry = &body["history"][0];
    assert_eq!(entry["action_slug"], "budget_to");
    assert_eq!(entry["was_queued"], true);
    assert_eq!(entry["queued_at"], 1000);
}
