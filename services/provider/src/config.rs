//! Provider configuration.
//!
//! Settings come either from explicit values or from `PM_*` environment
//! variables.

use std::num::NonZeroUsize;
use std::time::Duration;

use thiserror::Error;

/// Default number of concurrent long-running operations.
pub const DEFAULT_PARALLEL: NonZeroUsize = match NonZeroUsize::new(4) {
    Some(n) => n,
    None => unreachable!(),
};

/// Default per-request HTTP timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {var}")]
    Missing { var: &'static str },

    #[error("{var} is invalid: {message}")]
    Invalid { var: &'static str, message: String },

    #[error("API URL cannot be empty")]
    EmptyUrl,

    #[error("invalid API URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("user cannot be empty")]
    EmptyUser,
}

/// Provider configuration.
#[derive(Clone)]
pub struct ProviderConfig {
    /// Hypervisor API base URL (example: https://pve.example:8006/api2/json).
    pub api_url: String,

    /// Login user, usually with a realm suffix (`root@pam`).
    pub user: String,

    password: String,

    /// Skip TLS certificate verification.
    pub tls_insecure: bool,

    /// Maximum concurrent long-running operations.
    pub parallel: NonZeroUsize,

    /// Per-request HTTP timeout.
    pub timeout: Duration,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl ProviderConfig {
    /// Create a configuration with defaults for everything but the connection.
    pub fn new(
        api_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            user: user.into(),
            password: password.into(),
            tls_insecure: false,
            parallel: DEFAULT_PARALLEL,
            timeout: DEFAULT_TIMEOUT,
            log_level: "info".to_string(),
        }
    }

    pub fn with_tls_insecure(mut self, tls_insecure: bool) -> Self {
        self.tls_insecure = tls_insecure;
        self
    }

    pub fn with_parallel(mut self, parallel: NonZeroUsize) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Login password. Never log this.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| lookup(var).ok_or(ConfigError::Missing { var });

        let api_url = required("PM_API_URL")?;
        let user = required("PM_USER")?;
        let password = required("PM_PASS")?;

        let tls_insecure = match lookup("PM_TLS_INSECURE") {
            Some(v) => parse_bool(&v).ok_or_else(|| ConfigError::Invalid {
                var: "PM_TLS_INSECURE",
                message: format!("expected true/false, got '{v}'"),
            })?,
            None => false,
        };

        let parallel = lookup("PM_PARALLEL")
            .map(|v| v.trim().parse::<NonZeroUsize>())
            .transpose()
            .map_err(|e| ConfigError::Invalid {
                var: "PM_PARALLEL",
                message: format!("must be a positive integer ({e})"),
            })?
            .unwrap_or(DEFAULT_PARALLEL);

        let timeout = lookup("PM_TIMEOUT_SECS")
            .map(|v| v.trim().parse::<u64>())
            .transpose()
            .map_err(|e| ConfigError::Invalid {
                var: "PM_TIMEOUT_SECS",
                message: format!("must be an integer number of seconds ({e})"),
            })?
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or(DEFAULT_TIMEOUT);

        let log_level = lookup("PM_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let config = Self {
            api_url,
            user,
            password,
            tls_insecure,
            parallel,
            timeout,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check connection settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }

        let url = reqwest::Url::parse(&self.api_url).map_err(|e| ConfigError::InvalidUrl {
            url: self.api_url.clone(),
            message: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: self.api_url.clone(),
                message: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        if self.user.trim().is_empty() {
            return Err(ConfigError::EmptyUser);
        }

        Ok(())
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_url", &self.api_url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("tls_insecure", &self.tls_insecure)
            .field("parallel", &self.parallel)
            .field("timeout", &self.timeout)
            .field("log_level", &self.log_level)
            .finish()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" | "" => Some(false),
        _ => None,
    }
}
