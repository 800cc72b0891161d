//! Configuration types.
//!
//! Everything is read from the environment at startup. Unparseable numbers
//! fall back to the default with a warning; unknown enum values are errors.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default placeholder used when media content cannot be extracted.
pub const DEFAULT_MEDIA_FALLBACK: &str = "[Mídia recebida - conteúdo indisponível]";

/// Which deliveries share a rate-limit cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitScope {
    /// One cooldown for every conversation in the process.
    #[default]
    Global,
    /// Each counterparty has its own cooldown.
    PerCounterparty,
}

impl std::str::FromStr for RateLimitScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "per_counterparty" | "per-counterparty" => Ok(Self::PerCounterparty),
            other => Err(ConfigError::InvalidValue {
                key: "BROKER_ASSIST_RATE_LIMIT_SCOPE".into(),
                message: format!("unknown scope '{other}' (expected global or per_counterparty)"),
            }),
        }
    }
}

/// Queue worker configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Worker timer period.
    pub tick_interval: Duration,
    /// Minimum spacing between successful deliveries.
    pub rate_limit_interval: Duration,
    /// Cooldown scope.
    pub rate_limit_scope: RateLimitScope,
    /// Failed attempts allowed before a job is terminal is `max_retries + 1`.
    pub max_retries: u32,
    /// Upper bound on each collaborator call inside a tick. `None` waits forever.
    pub attempt_timeout: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            rate_limit_interval: Duration::from_secs(60),
            rate_limit_scope: RateLimitScope::Global,
            max_retries: 3,
            attempt_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let timeout_secs = env_parse(
            "BROKER_ASSIST_ATTEMPT_TIMEOUT_SECS",
            defaults.attempt_timeout.map(|d| d.as_secs()).unwrap_or(0),
        );
        let rate_limit_scope = match std::env::var("BROKER_ASSIST_RATE_LIMIT_SCOPE") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.rate_limit_scope,
        };

        Ok(Self {
            tick_interval: Duration::from_secs(
                env_parse("BROKER_ASSIST_TICK_SECS", defaults.tick_interval.as_secs()).max(1),
            ),
            rate_limit_interval: Duration::from_secs(env_parse(
                "BROKER_ASSIST_RATE_LIMIT_SECS",
                defaults.rate_limit_interval.as_secs(),
            )),
            rate_limit_scope,
            max_retries: env_parse("BROKER_ASSIST_MAX_RETRIES", defaults.max_retries),
            attempt_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        })
    }
}

/// Admission gate configuration.
#[derive(Debug, Clone, Default)]
pub struct AdmissionConfig {
    /// Addresses always admitted with full confidence (testing / ops).
    pub allowlist: Vec<String>,
}

impl AdmissionConfig {
    pub fn from_env() -> Self {
        Self {
            allowlist: env_list("BROKER_ASSIST_ALLOWLIST"),
        }
    }
}

/// Reply generator configuration.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GeneratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".into()))?;
        Ok(Self {
            api_key: secrecy::SecretString::from(api_key),
            model: std::env::var("BROKER_ASSIST_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
            base_url: std::env::var("BROKER_ASSIST_LLM_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com".to_string()),
            max_tokens: env_parse("BROKER_ASSIST_REPLY_MAX_TOKENS", 400),
            temperature: 0.4,
        })
    }
}

/// Outbound gateway configuration. Absent URL means dry-run.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub send_url: String,
    pub token: Option<secrecy::SecretString>,
}

impl GatewayConfig {
    pub fn from_env() -> Option<Self> {
        let send_url = std::env::var("BROKER_ASSIST_GATEWAY_URL").ok()?;
        Some(Self {
            send_url,
            token: std::env::var("BROKER_ASSIST_GATEWAY_TOKEN")
                .ok()
                .map(secrecy::SecretString::from),
        })
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub port: u16,
    pub media_fallback: String,
    pub extractor_url: Option<String>,
    pub queue: QueueConfig,
    pub admission: AdmissionConfig,
    pub gateway: Option<GatewayConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            db_path: std::env::var("BROKER_ASSIST_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/broker-assist.db")),
            port: env_parse("BROKER_ASSIST_PORT", 8080),
            media_fallback: std::env::var("BROKER_ASSIST_MEDIA_FALLBACK")
                .unwrap_or_else(|_| DEFAULT_MEDIA_FALLBACK.to_string()),
            extractor_url: std::env::var("BROKER_ASSIST_EXTRACTOR_URL").ok(),
            queue: QueueConfig::from_env()?,
            admission: AdmissionConfig::from_env(),
            gateway: GatewayConfig::from_env(),
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
