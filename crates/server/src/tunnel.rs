//! One-shot HTTPS proxy to a tenant's origin tunnel.
//!
//! No retries, no extra timeouts, no queueing: the caller decides what an
//! offline origin means. A gateway-style status from the tunnel edge counts
//! as offline just like a transport error does.

use std::time::Instant;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

/// Tunnel-edge statuses that mean "the origin is not reachable", as opposed
/// to the origin answering and failing.
const OFFLINE_STATUSES: [u16; 6] = [502, 504, 521, 522, 523, 530];

/// Header carrying the per-tenant shared secret to the origin's gate.
const ACTION_SECRET_HEADER: &str = "X-IFTTT-Action-Secret";

/// Result of one proxied call.
#[derive(Debug)]
pub enum TunnelOutcome {
    /// The origin answered; `body` is its parsed JSON (null when unparseable).
    Online { status: u16, body: Value },
    /// Transport error or a tunnel-edge status; the origin never saw this.
    Offline { proxy_error: String },
}

/// Diagnostic result of a `/ifttt/ping` probe.
#[derive(Debug, serde::Serialize)]
pub struct PingReport {
    pub online: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Safe subset of response headers.
    pub headers: std::collections::HashMap<String, String>,
    /// Response body, truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_error: Option<String>,
}

/// Proxies requests to `{scheme}://{subdomain}.{host_suffix}{path}`.
pub struct TunnelProxy {
    client: Client,
    scheme: String,
    host_suffix: String,
}

impl TunnelProxy {
    /// Create a proxy with a default client.
    #[must_use]
    pub fn new(scheme: impl Into<String>, host_suffix: impl Into<String>) -> Self {
        Self::with_client(
            scheme,
            host_suffix,
            Client::builder()
                .build()
                .expect("failed to build HTTP client"),
        )
    }

    /// Create a proxy with a custom client (shared pools, tests).
    #[must_use]
    pub fn with_client(
        scheme: impl Into<String>,
        host_suffix: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            client,
            scheme: scheme.into(),
            host_suffix: host_suffix.into(),
        }
    }

    fn origin_url(&self, subdomain: &str, path: &str) -> String {
        format!("{}://{subdomain}.{}{path}", self.scheme, self.host_suffix)
    }

    /// POST a JSON body to the origin.
    pub async fn post(
        &self,
        subdomain: &str,
        path: &str,
        action_secret: &str,
        body: &Value,
    ) -> TunnelOutcome {
        let url = self.origin_url(subdomain, path);
        debug!(%url, "proxying to origin");

        let result = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header(ACTION_SECRET_HEADER, action_secret)
            .json(body)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                if OFFLINE_STATUSES.contains(&status) {
                    return TunnelOutcome::Offline {
                        proxy_error: status.to_string(),
                    };
                }
                let body = response.bytes().await.ok().and_then(|bytes| {
                    serde_json::from_slice(&bytes).ok()
                });
                TunnelOutcome::Online {
                    status,
                    body: body.unwrap_or(Value::Null),
                }
            }
            Err(error) => TunnelOutcome::Offline {
                proxy_error: error.to_string(),
            },
        }
    }

    /// Read-only POST with an empty JSON body (field options, queries).
    pub async fn post_empty(
        &self,
        subdomain: &str,
        path: &str,
        action_secret: &str,
    ) -> TunnelOutcome {
        self.post(subdomain, path, action_secret, &Value::Object(serde_json::Map::new()))
            .await
    }

    /// GET `/ifttt/ping` and report latency, status, a safe header subset
    /// and a truncated body.
    pub async fn ping(&self, subdomain: &str, action_secret: &str) -> PingReport {
        let url = self.origin_url(subdomain, "/ifttt/ping");
        let started = Instant::now();

        let result = self
            .client
            .get(&url)
            .header(ACTION_SECRET_HEADER, action_secret)
            .send()
            .await;

        #[allow(clippy::cast_possible_truncation)]
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let mut headers = std::collections::HashMap::new();
                for name in ["content-type", "server", "cf-ray"] {
                    if let Some(value) = response.headers().get(name).and_then(|v| v.to_str().ok())
                    {
                        headers.insert(name.to_owned(), value.to_owned());
                    }
                }
                let body = response.text().await.ok().map(|mut text| {
                    text.truncate(512);
                    text
                });
                PingReport {
                    online: !OFFLINE_STATUSES.contains(&status),
                    latency_ms,
                    status: Some(status),
                    headers,
                    body,
                    proxy_error: OFFLINE_STATUSES
                        .contains(&status)
                        .then(|| status.to_string()),
                }
            }
            Err(error) => PingReport {
                online: false,
                latency_ms,
                status: None,
                headers: std::collections::HashMap::new(),
                body: None,
                proxy_error: Some(error.to_string()),
            },
        }
    }
}

impl TunnelOutcome {
    /// Whether the origin answered with 2xx and `{"success": true}`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            Self::Online { status, body } => {
                (200..300).contains(status)
                    && body.get("success").and_then(Value::as_bool) == Some(true)
            }
            Self::Offline { .. } => false,
        }
    }

    /// The origin's `error` string, when it reported one.
    #[must_use]
    pub fn origin_error(&self) -> Option<&str> {
        match self {
            Self::Online { body, .. } => body.get("error").and_then(Value::as_str),
            Self::Offline { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_urls_compose_from_subdomain() {
        let proxy = TunnelProxy::new("https", "eclosion.dev");
        assert_eq!(
            proxy.origin_url("acme", "/ifttt/ping"),
            "https://acme.eclosion.dev/ifttt/ping"
        );
    }

    #[test]
    fn success_requires_flag_and_2xx() {
        let ok = TunnelOutcome::Online {
            status: 200,
            body: serde_json::json!({"success": true}),
        };
        assert!(ok.is_success());

        let declined = TunnelOutcome::Online {
            status: 200,
            body: serde_json::json!({"success": false, "error": "nope"}),
        };
        assert!(!declined.is_success());
        assert_eq!(declined.origin_error(), Some("nope"));

        let server_error = TunnelOutcome::Online {
            status: 500,
            body: serde_json::json!({"success": true}),
        };
        assert!(!server_error.is_success());

        let offline = TunnelOutcome::Offline {
            proxy_error: "522".to_owned(),
        };
        assert!(!offline.is_success());
    }
}
