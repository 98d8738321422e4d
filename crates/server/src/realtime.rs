//! Fire-and-forget notifications to IFTTT's realtime endpoint.

use reqwest::Client;
use tracing::debug;

use eclosion_core::Subdomain;

/// Tells IFTTT a tenant has fresh trigger data so it can poll immediately
/// instead of waiting for the next interval.
pub struct RealtimeNotifier {
    client: Client,
    url: Option<String>,
    service_key: String,
}

impl RealtimeNotifier {
    /// `url = None` disables notifications entirely.
    #[must_use]
    pub fn new(url: Option<String>, service_key: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .build()
                .expect("failed to build HTTP client"),
            url,
            service_key: service_key.into(),
        }
    }

    /// Notify in the background. Never blocks the caller; failures are
    /// logged and swallowed.
    pub fn notify(&self, subdomain: &Subdomain) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let client = self.client.clone();
        let service_key = self.service_key.clone();
        let user_id = subdomain.to_string();

        tokio::spawn(async move {
            let body = serde_json::json!({"data": [{"user_id": user_id}]});
            let result = client
                .post(&url)
                .header("IFTTT-Service-Key", &service_key)
                .json(&body)
                .send()
                .await;
            match result {
                Ok(response) => {
                    debug!(status = %response.status(), %user_id, "realtime notification sent");
                }
                Err(error) => {
                    debug!(%error, %user_id, "realtime notification failed");
                }
            }
        });
    }
}
