use std::time::Duration;

use crate::core::ComprobanteError;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Connection settings for [`super::HttpErpClient`].
///
/// Credentials are an API key/secret pair issued by the ERP; they are sent
/// as `Authorization: token key:secret` on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErpConfig {
    /// Site root, e.g. `https://erp.example.com`.
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    /// Applied to each request individually. There is no cross-call deadline.
    pub timeout: Duration,
}

impl Default for ErpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            api_key: String::new(),
            api_secret: String::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        }
    }
}

impl ErpConfig {
    /// Read `ERP_BASE_URL`, `ERP_API_KEY`, `ERP_API_SECRET` and
    /// `ERP_TIMEOUT_SECONDS` (default 30).
    pub fn from_env() -> Result<Self, ComprobanteError> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| ComprobanteError::Config(format!("{name} is not set")))
        };
        let timeout = match std::env::var("ERP_TIMEOUT_SECONDS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|_| {
                ComprobanteError::Config(format!("ERP_TIMEOUT_SECONDS: invalid value '{raw}'"))
            })?,
            Err(_) => DEFAULT_TIMEOUT_SECONDS,
        };

        let config = Self {
            base_url: var("ERP_BASE_URL")?,
            api_key: var("ERP_API_KEY")?,
            api_secret: var("ERP_API_SECRET")?,
            timeout: Duration::from_secs(timeout),
        };
        config.validate()?;
        tracing::info!(
            base_url = %config.base_url,
            timeout_seconds = timeout,
            "ERP client configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ComprobanteError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ComprobanteError::Config(format!(
                "base URL '{}' must start with http:// or https://",
                self.base_url
            )));
        }
        if self.timeout.is_zero() {
            return Err(ComprobanteError::Config("timeout must be positive".into()));
        }
        Ok(())
    }

    /// Value of the `Authorization` header, if credentials are configured.
    pub fn authorization(&self) -> Option<String> {
        if self.api_key.is_empty() {
            return None;
        }
        Some(format!("token {}:{}", self.api_key, self.api_secret))
    }
}

/// Builder for [`ErpConfig`].
pub struct ErpConfigBuilder {
    config: ErpConfig,
}

impl ErpConfigBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: ErpConfig {
                base_url: base_url.into(),
                ..Default::default()
            },
        }
    }

    /// API key and secret of the integration user.
    pub fn credentials(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self.config.api_secret = secret.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ErpConfig, ComprobanteError> {
        let mut config = self.config;
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        config.validate()?;
        Ok(config)
    }
}
