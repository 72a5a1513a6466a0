use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::gateways::GatewayId;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const MIN_INTERNAL_SECRET_LEN: usize = 32;

const DEFAULT_MERCADOPAGO_BASE_URL: &str = "https://api.mercadopago.com";
const DEFAULT_PUSHINPAY_BASE_URL: &str = "https://api.pushinpay.com.br";
const DEFAULT_ASAAS_BASE_URL: &str = "https://api.asaas.com/v3";

/// Storage backend selection
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    Database,
    InMemory,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Database
    }
}

/// MercadoPago credentials
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct MercadoPagoConfig {
    /// Bearer token used for payment creation and status queries
    #[serde(default)]
    pub access_token: Option<String>,

    /// Shared secret for `x-signature` HMAC verification
    #[serde(default)]
    pub webhook_secret: Option<String>,

    #[serde(default = "default_mercadopago_base_url")]
    pub base_url: String,
}

impl Default for MercadoPagoConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            webhook_secret: None,
            base_url: default_mercadopago_base_url(),
        }
    }
}

/// PushinPay credentials
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PushinPayConfig {
    #[serde(default)]
    pub api_token: Option<String>,

    /// Token expected in the `x-pushinpay-token` header of inbound webhooks
    #[serde(default)]
    pub webhook_token: Option<String>,

    #[serde(default = "default_pushinpay_base_url")]
    pub base_url: String,
}

impl Default for PushinPayConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            webhook_token: None,
            base_url: default_pushinpay_base_url(),
        }
    }
}

/// Asaas credentials
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AsaasConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    /// Token expected in the `asaas-access-token` header of inbound webhooks
    #[serde(default)]
    pub webhook_token: Option<String>,

    #[serde(default = "default_asaas_base_url")]
    pub base_url: String,
}

impl Default for AsaasConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            webhook_token: None,
            base_url: default_asaas_base_url(),
        }
    }
}

/// Gateway adapter configuration
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewaysConfig {
    #[serde(default)]
    pub mercadopago: MercadoPagoConfig,

    #[serde(default)]
    pub pushinpay: PushinPayConfig,

    #[serde(default)]
    pub asaas: AsaasConfig,

    /// Request timeout applied to every outbound gateway call
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,

    /// Consecutive failures before a gateway circuit opens
    #[serde(default = "default_circuit_breaker_failures")]
    pub circuit_breaker_failures: u32,

    /// Seconds an open circuit waits before letting a probe through
    #[serde(default = "default_circuit_breaker_timeout_secs")]
    pub circuit_breaker_timeout_secs: u64,
}

impl Default for GatewaysConfig {
    fn default() -> Self {
        Self {
            mercadopago: MercadoPagoConfig::default(),
            pushinpay: PushinPayConfig::default(),
            asaas: AsaasConfig::default(),
            timeout_secs: default_gateway_timeout_secs(),
            circuit_breaker_failures: default_circuit_breaker_failures(),
            circuit_breaker_timeout_secs: default_circuit_breaker_timeout_secs(),
        }
    }
}

/// Which gateway handles each payment method
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PaymentRoutingConfig {
    #[serde(default = "default_pix_gateway")]
    pub pix: String,

    #[serde(default = "default_card_gateway")]
    pub credit_card: String,

    #[serde(default = "default_boleto_gateway")]
    pub boleto: String,
}

impl Default for PaymentRoutingConfig {
    fn default() -> Self {
        Self {
            pix: default_pix_gateway(),
            credit_card: default_card_gateway(),
            boleto: default_boleto_gateway(),
        }
    }
}

/// Reconciliation sweep tuning
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ReconciliationConfig {
    /// Orders younger than this are left for the webhook path
    #[serde(default = "default_reconcile_min_age_secs")]
    pub min_age_secs: u64,

    /// Orders older than this are abandoned
    #[serde(default = "default_reconcile_max_age_secs")]
    pub max_age_secs: u64,

    #[serde(default = "default_reconcile_batch_size")]
    #[validate(range(min = 1, max = 10000))]
    pub batch_size: u64,

    /// Upper bound for the per-invocation override
    #[serde(default = "default_reconcile_max_batch_size")]
    #[validate(range(min = 1, max = 10000))]
    pub max_batch_size: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            min_age_secs: default_reconcile_min_age_secs(),
            max_age_secs: default_reconcile_max_age_secs(),
            batch_size: default_reconcile_batch_size(),
            max_batch_size: default_reconcile_max_batch_size(),
        }
    }
}

/// Merchant webhook delivery tuning
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct WebhookDeliveryConfig {
    #[serde(default = "default_webhook_max_retries")]
    #[validate(range(min = 1, max = 20))]
    pub max_retries: i32,

    #[serde(default = "default_webhook_retry_batch_size")]
    #[validate(range(min = 1, max = 1000))]
    pub retry_batch_size: u64,

    /// Minimum seconds between two attempts of the same delivery
    #[serde(default = "default_webhook_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    #[serde(default = "default_webhook_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub timeout_secs: u64,

    /// Stored response bodies are truncated to this many characters
    #[serde(default = "default_webhook_response_body_limit")]
    pub response_body_limit: usize,

    /// Freshness window for signed inbound gateway webhooks
    #[serde(default = "default_signature_tolerance_secs")]
    pub signature_tolerance_secs: i64,

    /// Accept http and private hosts as merchant URLs (local testing only)
    #[serde(default)]
    pub allow_insecure_urls: bool,
}

impl Default for WebhookDeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_webhook_max_retries(),
            retry_batch_size: default_webhook_retry_batch_size(),
            retry_backoff_secs: default_webhook_retry_backoff_secs(),
            timeout_secs: default_webhook_timeout_secs(),
            response_body_limit: default_webhook_response_body_limit(),
            signature_tolerance_secs: default_signature_tolerance_secs(),
            allow_insecure_urls: false,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
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

    #[serde(default)]
    pub storage_backend: StorageBackend,

    /// CORS: comma-separated list of allowed origins for the public API
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// DB idle timeout (seconds)
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// DB acquire timeout (seconds)
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Shared secret guarding the reconciliation and retry triggers
    #[serde(default)]
    pub internal_secret: Option<String>,

    /// Public base URL gateways call back into (`{base}/webhooks/{gateway}`)
    #[serde(default)]
    pub notification_base_url: Option<String>,

    #[serde(default)]
    #[validate]
    pub gateways: GatewaysConfig,

    #[serde(default)]
    #[validate]
    pub payment_methods: PaymentRoutingConfig,

    #[serde(default)]
    #[validate]
    pub reconciliation: ReconciliationConfig,

    #[serde(default)]
    #[validate]
    pub webhooks: WebhookDeliveryConfig,
}

impl AppConfig {
    /// Creates a new configuration with defaults for every tunable
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            storage_backend: StorageBackend::default(),
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            internal_secret: None,
            notification_base_url: None,
            gateways: GatewaysConfig::default(),
            payment_methods: PaymentRoutingConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            webhooks: WebhookDeliveryConfig::default(),
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateways.timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhooks.timeout_secs)
    }

    /// Callback URL handed to gateways at payment creation
    pub fn notification_url(&self, gateway: GatewayId) -> Option<String> {
        self.notification_base_url
            .as_ref()
            .map(|base| format!("{}/webhooks/{}", base.trim_end_matches('/'), gateway))
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let secret_len = self
            .internal_secret
            .as_deref()
            .map(|s| s.trim().len())
            .unwrap_or(0);
        if !self.is_development() && secret_len < MIN_INTERNAL_SECRET_LEN {
            let mut err = ValidationError::new("internal_secret_required");
            err.message = Some(
                "Set APP__INTERNAL_SECRET (at least 32 characters) for non-development environments"
                    .into(),
            );
            errors.add("internal_secret", err);
        }

        for (method, gateway) in [
            ("pix", &self.payment_methods.pix),
            ("credit_card", &self.payment_methods.credit_card),
            ("boleto", &self.payment_methods.boleto),
        ] {
            if GatewayId::parse(gateway).is_err() {
                let mut err = ValidationError::new("unknown_gateway");
                err.message = Some(format!("{method} is routed to unknown gateway '{gateway}'").into());
                errors.add("payment_methods", err);
            }
        }

        if self.reconciliation.min_age_secs >= self.reconciliation.max_age_secs {
            let mut err = ValidationError::new("reconciliation_window");
            err.message = Some("reconciliation.min_age_secs must be below max_age_secs".into());
            errors.add("reconciliation", err);
        }

        if self.reconciliation.batch_size > self.reconciliation.max_batch_size {
            let mut err = ValidationError::new("reconciliation_batch");
            err.message = Some("reconciliation.batch_size must not exceed max_batch_size".into());
            errors.add("reconciliation", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
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

fn default_mercadopago_base_url() -> String {
    DEFAULT_MERCADOPAGO_BASE_URL.to_string()
}
fn default_pushinpay_base_url() -> String {
    DEFAULT_PUSHINPAY_BASE_URL.to_string()
}
fn default_asaas_base_url() -> String {
    DEFAULT_ASAAS_BASE_URL.to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    15
}
fn default_circuit_breaker_failures() -> u32 {
    5
}
fn default_circuit_breaker_timeout_secs() -> u64 {
    30
}

fn default_pix_gateway() -> String {
    "mercadopago".to_string()
}
fn default_card_gateway() -> String {
    "mercadopago".to_string()
}
fn default_boleto_gateway() -> String {
    "asaas".to_string()
}

fn default_reconcile_min_age_secs() -> u64 {
    3 * 60
}
fn default_reconcile_max_age_secs() -> u64 {
    24 * 60 * 60
}
fn default_reconcile_batch_size() -> u64 {
    50
}
fn default_reconcile_max_batch_size() -> u64 {
    200
}

fn default_webhook_max_retries() -> i32 {
    3
}
fn default_webhook_retry_batch_size() -> u64 {
    50
}
fn default_webhook_retry_backoff_secs() -> u64 {
    60
}
fn default_webhook_timeout_secs() -> u64 {
    30
}
fn default_webhook_response_body_limit() -> usize {
    1000
}
fn default_signature_tolerance_secs() -> i64 {
    300
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("checkout_payments={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Same as [`load_config`] but reads TOML profiles from `config_dir`.
pub fn load_config_from(config_dir: &Path) -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://checkout.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
