use std::time::Duration;

use serde::Deserialize;

use eclosion_broker::BrokerLimits;

/// Top-level configuration for the Eclosion IFTTT server, loaded from a
/// TOML file. Secrets can be overridden from the environment so the file
/// itself can be checked in.
#[derive(Debug, Default, Deserialize)]
pub struct EclosionConfig {
    /// HTTP bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// IFTTT platform credentials and endpoints.
    #[serde(default)]
    pub ifttt: IftttConfig,
    /// Token signing and demo login.
    #[serde(default)]
    pub auth: AuthConfig,
    /// How to reach tenant origins.
    #[serde(default)]
    pub origin: OriginConfig,
    /// Broker caps and retention windows.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// HTTP server bind configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// External URL of this service, used to build the demo-login redirect.
    ///
    /// If not set, defaults to `http://localhost:{port}`.
    pub external_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            external_url: None,
        }
    }
}

impl ServerConfig {
    /// The externally visible base URL.
    #[must_use]
    pub fn external_url(&self) -> String {
        self.external_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }
}

/// IFTTT platform credentials and endpoints.
#[derive(Debug, Deserialize)]
pub struct IftttConfig {
    /// Shared service key gating `status` and `test/setup`, also sent on
    /// realtime notifications.
    #[serde(default)]
    pub service_key: String,
    /// OAuth client id IFTTT presents at the token endpoint.
    #[serde(default)]
    pub client_id: String,
    /// OAuth client secret IFTTT presents at the token endpoint.
    #[serde(default)]
    pub client_secret: String,
    /// IFTTT realtime notification endpoint. Unset disables notifications.
    pub realtime_url: Option<String>,
}

impl Default for IftttConfig {
    fn default() -> Self {
        Self {
            service_key: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            realtime_url: Some("https://realtime.ifttt.com/v1/notifications".to_owned()),
        }
    }
}

/// Token signing and demo login.
#[derive(Debug, Default, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for bearer tokens. Must be stable across restarts;
    /// rotating it invalidates every issued token.
    #[serde(default)]
    pub token_secret: String,
    /// Password for the reserved `demo` tenant's login form.
    #[serde(default)]
    pub demo_password: String,
}

/// How tenant origins are addressed: `{scheme}://{subdomain}.{host_suffix}`.
#[derive(Debug, Deserialize)]
pub struct OriginConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Domain suffix under which every tenant tunnel lives.
    #[serde(default = "default_host_suffix")]
    pub host_suffix: String,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host_suffix: default_host_suffix(),
        }
    }
}

/// Broker caps and retention, in plain numbers so they read naturally in
/// TOML. Converted to [`BrokerLimits`] at startup.
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_queue_cap")]
    pub queue_cap: usize,
    #[serde(default = "default_events_per_slug")]
    pub events_per_slug: usize,
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    #[serde(default = "default_queue_ttl_days")]
    pub queue_ttl_days: u64,
    #[serde(default = "default_event_ttl_days")]
    pub event_ttl_days: u64,
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: usize,
    #[serde(default = "default_rate_limit_window_seconds")]
    pub rate_limit_window_seconds: u64,
    #[serde(default = "default_compaction_interval_hours")]
    pub compaction_interval_hours: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            queue_cap: default_queue_cap(),
            events_per_slug: default_events_per_slug(),
            history_cap: default_history_cap(),
            queue_ttl_days: default_queue_ttl_days(),
            event_ttl_days: default_event_ttl_days(),
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_seconds: default_rate_limit_window_seconds(),
            compaction_interval_hours: default_compaction_interval_hours(),
        }
    }
}

impl LimitsConfig {
    /// Convert to the broker's limit struct.
    #[must_use]
    pub fn to_broker_limits(&self) -> BrokerLimits {
        BrokerLimits {
            queue_cap: self.queue_cap,
            events_per_slug: self.events_per_slug,
            history_cap: self.history_cap,
            queue_ttl: Duration::from_secs(self.queue_ttl_days * 24 * 60 * 60),
            event_ttl: Duration::from_secs(self.event_ttl_days * 24 * 60 * 60),
            history_ttl: Duration::from_secs(self.event_ttl_days * 24 * 60 * 60),
            rate_limit_max: self.rate_limit_max,
            rate_limit_window: Duration::from_secs(self.rate_limit_window_seconds),
            compaction_interval: Duration::from_secs(self.compaction_interval_hours * 60 * 60),
        }
    }
}

impl EclosionConfig {
    /// Apply environment overrides for the secrets that should not live in
    /// the config file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("ECLOSION_SERVICE_KEY") {
            self.ifttt.service_key = value;
        }
        if let Ok(value) = std::env::var("ECLOSION_CLIENT_ID") {
            self.ifttt.client_id = value;
        }
        if let Ok(value) = std::env::var("ECLOSION_CLIENT_SECRET") {
            self.ifttt.client_secret = value;
        }
        if let Ok(value) = std::env::var("ECLOSION_TOKEN_SECRET") {
            self.auth.token_secret = value;
        }
        if let Ok(value) = std::env::var("ECLOSION_DEMO_PASSWORD") {
            self.auth.demo_password = value;
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_scheme() -> String {
    "https".to_owned()
}

fn default_host_suffix() -> String {
    "eclosion.dev".to_owned()
}

fn default_queue_cap() -> usize {
    100
}

fn default_events_per_slug() -> usize {
    200
}

fn default_history_cap() -> usize {
    50
}

fn default_queue_ttl_days() -> u64 {
    7
}

fn default_event_ttl_days() -> u64 {
    30
}

fn default_rate_limit_max() -> usize {
    15
}

fn default_rate_limit_window_seconds() -> u64 {
    60
}

fn default_compaction_interval_hours() -> u64 {
    6
}
