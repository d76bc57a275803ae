//! # Server Configuration
//!
//! [`ServerConfig`] is read from YAML and then adjusted from environment variables. Every
//! field has a default, so an empty file (or no file) is a valid configuration.
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 8080
//! api_prefix: /api/v1
//! environment: production
//! max_body_bytes: 1048576
//! cors:
//!   allowed_origins: ["https://app.example"]
//! logging:
//!   level: info
//!   format: json
//!   error_log_dir: /var/log/app
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `APP_PORT` | `port` |
//! | `APP_ENV` | `environment` (`production`/`prod`, anything else is development) |
//! | `API_PREFIX` | `api_prefix` |
//! | `ROUTEMARK_STACK_SIZE` | `stack_size`, decimal (`65536`) or hex (`0x10000`) |

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Default coroutine stack size (64 KB).
pub const DEFAULT_STACK_SIZE: usize = 0x10000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// `production` and `prod` (any case) select production.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
    /// When set, error events are also written to a daily rolling file in this directory.
    pub error_log_dir: Option<PathBuf>,
    pub error_log_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            error_log_dir: None,
            error_log_prefix: "routemark.error.log".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            allowed_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .into_iter()
                .map(String::from)
                .collect(),
            allow_credentials: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prepended to every route path.
    pub api_prefix: String,
    pub environment: Environment,
    /// Larger request bodies are rejected with 413.
    pub max_body_bytes: usize,
    /// CORS is enabled when this section is present.
    pub cors: Option<CorsConfig>,
    pub logging: LoggingConfig,
    /// Coroutine stack size in bytes.
    pub stack_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            api_prefix: "/api".to_string(),
            environment: Environment::Development,
            max_body_bytes: 1024 * 1024,
            cors: None,
            logging: LoggingConfig::default(),
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl ServerConfig {
    /// Read a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(port) = lookup("APP_PORT") {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("APP_PORT is not a valid port: {port:?}"))?;
        }
        if let Some(env) = lookup("APP_ENV") {
            self.environment = Environment::parse(&env);
        }
        if let Some(prefix) = lookup("API_PREFIX") {
            self.api_prefix = prefix;
        }
        if let Some(size) = lookup("ROUTEMARK_STACK_SIZE") {
            self.stack_size = parse_stack_size(&size)
                .with_context(|| format!("ROUTEMARK_STACK_SIZE is not a size: {size:?}"))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// `host:port`
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Decimal or `0x`-prefixed hexadecimal byte count.
pub fn parse_stack_size(value: &str) -> Result<usize, std::num::ParseIntError> {
    let value = value.trim();
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => value.parse(),
    }
}
