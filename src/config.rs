use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CART_TTL_SECS: u64 = 7 * 24 * 3600;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;

/// Application configuration, loaded from `config/*.toml` files layered with
/// `APP__`-prefixed environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Redis connection URL (session carts, queue backend)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// JWT signing secret for bearer tokens
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Session cart store backend: "in-memory" or "redis"
    #[serde(default = "default_backend")]
    pub cart_store_backend: String,

    /// Namespace prefix for cart keys in Redis
    #[serde(default = "default_cart_namespace")]
    pub cart_store_namespace: String,

    /// TTL for idle session carts (seconds)
    #[serde(default = "default_cart_ttl_secs")]
    pub cart_ttl_secs: u64,

    /// Background queue backend: "in-memory" or "redis"
    #[serde(default = "default_backend")]
    pub message_queue_backend: String,

    /// Namespace prefix for queue keys in Redis
    #[serde(default = "default_queue_namespace")]
    pub message_queue_namespace: String,

    /// Hosted checkout provider: API base URL
    #[serde(default = "default_checkout_api_base")]
    pub checkout_api_base: String,

    /// Hosted checkout provider: secret API key
    #[serde(default)]
    pub checkout_secret_key: String,

    /// Absolute URL the provider redirects to after payment.
    /// `{CHECKOUT_SESSION_ID}` is substituted by the provider.
    #[serde(default = "default_success_url")]
    pub checkout_success_url: String,

    /// Absolute URL the provider redirects to on cancel
    #[serde(default = "default_cancel_url")]
    pub checkout_cancel_url: String,

    /// Shared secret for webhook signature verification
    #[serde(default)]
    pub checkout_webhook_secret: Option<String>,

    /// Max allowed age of a signed webhook timestamp (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub checkout_webhook_tolerance_secs: u64,

    /// Timeout for calls to the hosted checkout provider (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub checkout_timeout_secs: u64,

    /// Operator address for order notifications
    #[serde(default)]
    pub operator_email: Option<String>,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_backend() -> String {
    "in-memory".to_string()
}
fn default_cart_namespace() -> String {
    "stationery:cart".to_string()
}
fn default_cart_ttl_secs() -> u64 {
    DEFAULT_CART_TTL_SECS
}
fn default_queue_namespace() -> String {
    "stationery:mq".to_string()
}
fn default_checkout_api_base() -> String {
    "https://api.checkout.example.com".to_string()
}
fn default_success_url() -> String {
    "http://localhost:8080/api/v1/checkout/return?session_id={CHECKOUT_SESSION_ID}".to_string()
}
fn default_cancel_url() -> String {
    "http://localhost:8080/api/v1/checkout/cancel".to_string()
}
fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}
fn default_gateway_timeout_secs() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read configuration: {0}")]
    Read(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl AppConfig {
    /// Minimal constructor used by tests and tooling.
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            redis_url: default_redis_url(),
            jwt_secret,
            host: default_host(),
            port: DEFAULT_PORT,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            cart_store_backend: default_backend(),
            cart_store_namespace: default_cart_namespace(),
            cart_ttl_secs: default_cart_ttl_secs(),
            message_queue_backend: default_backend(),
            message_queue_namespace: default_queue_namespace(),
            checkout_api_base: default_checkout_api_base(),
            checkout_secret_key: String::new(),
            checkout_success_url: default_success_url(),
            checkout_cancel_url: default_cancel_url(),
            checkout_webhook_secret: None,
            checkout_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            checkout_timeout_secs: default_gateway_timeout_secs(),
            operator_email: None,
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development" || self.environment == "test"
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Load configuration from `config/default.toml`, an optional
/// `config/{environment}.toml`, and `APP__`-prefixed environment variables
/// (e.g. `APP__DATABASE_URL`).
pub fn load_config() -> Result<AppConfig, ConfigLoadError> {
    let run_env = env::var("APP_ENV")
        .or_else(|_| env::var("ENVIRONMENT"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .add_source(File::from(Path::new(CONFIG_DIR).join("default")).required(false));

    let env_file = Path::new(CONFIG_DIR).join(&run_env);
    builder = builder.add_source(File::from(env_file).required(false));

    let cfg: AppConfig = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .set_default("environment", run_env.clone())?
        .build()?
        .try_deserialize()?;

    cfg.validate()?;
    info!(environment = %cfg.environment, "configuration loaded");
    Ok(cfg)
}

/// Initialize the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
