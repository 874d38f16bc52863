//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)
//!
//! Federation provider credentials come from the conventional variables
//! (`GITHUB_KEY`, `OAUTH2_SECRET`, `API_URL`, ...) and are folded into the
//! typed configuration at load time. Nothing reads the process environment
//! after `AppConfig::load` returns.

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    #[serde(default)]
    pub federation: FederationConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "links.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
    /// Environment: "dev" or "prod"
    pub environment: String,
}

impl ServerConfig {
    /// Get the base URL for the node
    ///
    /// # Returns
    /// Full URL like "https://links.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }

    pub fn is_dev(&self) -> bool {
        self.environment.eq_ignore_ascii_case("dev")
    }

    pub fn is_secure(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("https")
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Session cookie configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Whether account sessions are enabled at all
    #[serde(default = "default_sessions_enabled")]
    pub enabled: bool,
    /// HMAC secret for the signed session cookie (32+ bytes)
    pub secret: String,
    /// Session max age in seconds (default: 604800 = 7 days)
    pub max_age: i64,
}

fn default_sessions_enabled() -> bool {
    true
}

/// OAuth2 credentials for one federation provider
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub secret: String,
}

impl ProviderCredentials {
    pub fn is_configured(&self) -> bool {
        !self.key.is_empty()
    }
}

/// Federation and OAuth2 configuration
///
/// `api_url` points at the federation backend that owns the canonical
/// actor documents (`{api_url}/actors/...`) and the default OAuth2
/// endpoints (`{api_url}/oauth/...`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FederationConfig {
    #[serde(default)]
    pub api_url: String,
    /// Externally configured OAuth2 base URL, if any
    #[serde(default)]
    pub oauth2_url: Option<String>,
    /// Whether new local accounts may be created; downgraded at runtime
    /// when the service actor cannot be authenticated
    #[serde(default = "default_user_creating_enabled")]
    pub user_creating_enabled: bool,
    #[serde(default)]
    pub github: ProviderCredentials,
    #[serde(default)]
    pub gitlab: ProviderCredentials,
    #[serde(default)]
    pub facebook: ProviderCredentials,
    #[serde(default)]
    pub google: ProviderCredentials,
    /// Credentials for the node's own federation provider
    #[serde(default)]
    pub oauth2: ProviderCredentials,
}

fn default_user_creating_enabled() -> bool {
    true
}

impl FederationConfig {
    /// Fold the conventional provider environment variables into the
    /// typed configuration. File-based values survive unless the
    /// corresponding variable is set.
    fn overlay_env(&mut self) {
        let overlay = |target: &mut String, var: &str| {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    *target = value;
                }
            }
        };

        overlay(&mut self.github.key, "GITHUB_KEY");
        overlay(&mut self.github.secret, "GITHUB_SECRET");
        overlay(&mut self.gitlab.key, "GITLAB_KEY");
        overlay(&mut self.gitlab.secret, "GITLAB_SECRET");
        overlay(&mut self.facebook.key, "FACEBOOK_KEY");
        overlay(&mut self.facebook.secret, "FACEBOOK_SECRET");
        overlay(&mut self.google.key, "GOOGLE_KEY");
        overlay(&mut self.google.secret, "GOOGLE_SECRET");
        overlay(&mut self.oauth2.key, "OAUTH2_KEY");
        overlay(&mut self.oauth2.secret, "OAUTH2_SECRET");
        overlay(&mut self.api_url, "API_URL");

        if let Ok(value) = std::env::var("OAUTH2_URL") {
            if !value.is_empty() {
                self.oauth2_url = Some(value);
            }
        }
    }

    /// Providers that are configured and therefore offered to clients.
    pub fn enabled_providers(&self) -> Vec<&'static str> {
        let mut providers = Vec::new();
        if self.github.is_configured() {
            providers.push("github");
        }
        if self.gitlab.is_configured() {
            providers.push("gitlab");
        }
        if self.facebook.is_configured() {
            providers.push("facebook");
        }
        if self.google.is_configured() {
            providers.push("google");
        }
        if self.oauth2.is_configured() {
            providers.push("fedbox");
        }
        providers
    }

    /// Base IRI under which actor documents live.
    pub fn actors_url(&self) -> String {
        format!("{}/actors", self.api_url.trim_end_matches('/'))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (KINDLING_*)
    /// 5. Conventional provider variables (GITHUB_KEY, API_URL, ...)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.protocol", "http")?
            .set_default("server.environment", "dev")?
            .set_default("session.enabled", true)?
            .set_default("session.max_age", 604800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (KINDLING_*)
            .add_source(
                Environment::with_prefix("KINDLING")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let mut app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.federation.overlay_env();
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.session.enabled && self.session.secret.as_bytes().len() < MIN_SESSION_SECRET_BYTES
        {
            return Err(crate::error::AppError::Config(format!(
                "session.secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.session.max_age <= 0 {
            return Err(crate::error::AppError::Config(
                "session.max_age must be greater than 0".to_string(),
            ));
        }

        if self.federation.oauth2.is_configured() && self.federation.api_url.is_empty() {
            return Err(crate::error::AppError::Config(
                "federation.api_url is required when OAuth2 credentials are configured"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
