use garde::Validate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Validate, Default)]
pub struct AppConfig {
    #[garde(dive)]
    #[serde(default)]
    pub server: ServerConfig,
    
    #[garde(dive)]
    #[serde(default)]
    pub logging: LoggingConfig,
    
    #[garde(dive)]
    #[serde(default)]
    pub health: HealthConfig,

    #[garde(dive)]
    #[serde(default)]
    pub graphql: GraphqlConfig,

    #[garde(skip)]
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[garde(range(min = 1024, max = 65535))]
    pub port: u16,
    
    #[garde(length(min = 1), custom(validate_bind_address))]
    #[serde(default = "default_bind")]
    pub bind: String,
    
    #[garde(range(min = 1, max = 300))]
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64, // seconds
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind: "0.0.0.0".to_string(),
            shutdown_timeout: 30,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct LoggingConfig {
    #[garde(length(min = 1))]
    #[serde(default = "default_log_level")]
    pub level: String,  // trace, debug, info, warn, error
    
    #[garde(pattern(r"^(json|pretty)$"))]
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct HealthConfig {
    #[garde(length(min = 1))]
    #[serde(default = "default_liveness_path")]
    pub liveness_path: String,
    
    #[garde(length(min = 1))]
    #[serde(default = "default_readiness_path")]
    pub readiness_path: String,
    
    #[garde(range(min = 1, max = 3600))]
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_seconds: u32,
}

fn default_liveness_path() -> String {
    "/health".to_string()
}

fn default_readiness_path() -> String {
    "/health/ready".to_string()
}

fn default_startup_timeout() -> u32 {
    300
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            liveness_path: "/health".to_string(),
            readiness_path: "/health/ready".to_string(),
            startup_timeout_seconds: 300,
        }
    }
}

/// Everything specific to the GraphQL transport/execution core: the JWT
/// verifier, the development auth bypasses, and the scheduler's tuning
/// knobs (worker pool size, notify debounce, GC grace period, subscription
/// rate limit).
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct GraphqlConfig {
    /// Path to the RSA public key used to verify bearer tokens. Falls back
    /// to `keys/jwtRS256.key.pub` next to the executable when absent.
    #[garde(skip)]
    #[serde(default)]
    pub jwt_public_key_path: Option<String>,

    #[garde(skip)]
    #[serde(default = "default_jwt_algorithm")]
    pub jwt_algorithm: String,

    /// Dev-only: grants every known permission to every token, regardless
    /// of what the verifier would say. Must be logged once at startup
    /// whenever enabled.
    #[garde(skip)]
    #[serde(default)]
    pub allow_all_authorizer: bool,

    /// Dev-only: skips `RequestState::validate` entirely.
    #[garde(skip)]
    #[serde(default)]
    pub disable_permissions: bool,

    #[garde(range(min = 1, max = 3600))]
    #[serde(default = "default_gc_grace_period_secs")]
    pub gc_grace_period_secs: u64,

    #[garde(range(min = 1, max = 60_000))]
    #[serde(default = "default_notify_debounce_ms")]
    pub notify_debounce_ms: u64,

    /// Default floor on the gap between two deliveries of a subscription,
    /// in effect until its resolver calls `RequestState::set_interval` to
    /// override it for that one subscription.
    #[garde(range(min = 1, max = 60_000))]
    #[serde(default = "default_min_subscription_interval_ms")]
    pub min_subscription_interval_ms: u64,

    #[garde(range(min = 1, max = 256))]
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
}

fn default_jwt_algorithm() -> String {
    "RS256".to_string()
}

fn default_gc_grace_period_secs() -> u64 {
    300
}

fn default_notify_debounce_ms() -> u64 {
    1
}

fn default_min_subscription_interval_ms() -> u64 {
    5_000
}

fn default_worker_pool_size() -> usize {
    16
}

impl Default for GraphqlConfig {
    fn default() -> Self {
        Self {
            jwt_public_key_path: None,
            jwt_algorithm: default_jwt_algorithm(),
            allow_all_authorizer: false,
            disable_permissions: false,
            gc_grace_period_secs: default_gc_grace_period_secs(),
            notify_debounce_ms: default_notify_debounce_ms(),
            min_subscription_interval_ms: default_min_subscription_interval_ms(),
            worker_pool_size: default_worker_pool_size(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub enum Environment {
    Development,
    Staging,
    #[default]
    Production,
}

// Custom validator example from configuration.md
fn validate_bind_address(value: &str, _: &()) -> garde::Result {
    value.parse::<std::net::IpAddr>()
        .map(|_| ())
        .map_err(|_| garde::Error::new("Invalid IP address"))
}