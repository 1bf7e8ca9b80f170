use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = LogFormat::from_str(
            &env::var("APP_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()),
        );

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            batch_limit: read_number("APP_ENGINE_BATCH_LIMIT", defaults.batch_limit)?,
            concurrency: read_number("APP_ENGINE_CONCURRENCY", defaults.concurrency)?.max(1),
            dispatch_timeout: read_seconds(
                "APP_ENGINE_DISPATCH_TIMEOUT_SECS",
                defaults.dispatch_timeout,
            )?,
            poll_deadline: read_seconds("APP_ENGINE_POLL_DEADLINE_SECS", defaults.poll_deadline)?,
            poll_interval: read_seconds("APP_ENGINE_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            retry: RetryPolicyConfig {
                max_attempts: read_number("APP_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?
                    .max(1),
                base_delay: read_seconds("APP_RETRY_BASE_DELAY_SECS", defaults.retry.base_delay)?,
                max_delay: read_seconds("APP_RETRY_MAX_DELAY_SECS", defaults.retry.max_delay)?,
            },
            tracking_base_url: env::var("APP_TRACKING_BASE_URL")
                .unwrap_or(defaults.tracking_base_url),
        };

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                log_format,
            },
            engine,
        })
    }
}

fn read_number<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { key }),
        Err(_) => Ok(default),
    }
}

fn read_seconds(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    read_number(key, default.as_secs()).map(Duration::from_secs)
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Output shape for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Compact,
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
}

/// Knobs for the scheduling engine and its poll cycles.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on executions claimed by a single poll.
    pub batch_limit: usize,
    /// Executions processed in parallel inside one poll.
    pub concurrency: usize,
    pub dispatch_timeout: Duration,
    pub poll_deadline: Duration,
    /// Background timer period; zero disables the timer.
    pub poll_interval: Duration,
    pub retry: RetryPolicyConfig,
    pub tracking_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            concurrency: 8,
            dispatch_timeout: Duration::from_secs(10),
            poll_deadline: Duration::from_secs(60),
            poll_interval: Duration::ZERO,
            retry: RetryPolicyConfig::default(),
            tracking_base_url: "http://127.0.0.1:3000".to_string(),
        }
    }
}

/// Bounded retry settings for transient channel failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicyConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(300),
            max_delay: Duration::from_secs(6 * 60 * 60),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { key } => {
                write!(f, "{key} must be a non-negative integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
