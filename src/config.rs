//! Application configuration module
//! Loads environment variables once at startup into an immutable `AppConfig`
//! that is handed to each component; request handlers never read the
//! environment themselves.

use std::env;
use std::time::Duration;

use crate::payments::signature::DEFAULT_TOLERANCE_SECS;
use crate::payments::utils::DEFAULT_TIMEOUT_MS;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub mpesa: MpesaConfig,
    pub database: Option<DatabaseConfig>,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Shared-secret settings for the signed storefront endpoints
#[derive(Clone)]
pub struct GatewayConfig {
    pub shared_secret: Option<String>,
    pub signature_tolerance_secs: i64,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "***"))
            .field("signature_tolerance_secs", &self.signature_tolerance_secs)
            .finish()
    }
}

/// Mobile-money provider settings
#[derive(Clone)]
pub struct MpesaConfig {
    pub base_url: Option<String>,
    pub status_url: Option<String>,
    pub reversal_url: Option<String>,
    pub api_key: Option<String>,
    pub public_key: Option<String>,
    pub c2b_path: String,
    pub status_path: String,
    pub reversal_path: String,
    pub origin: Option<String>,
    pub timeout_ms: u64,
    pub service_provider_code: Option<String>,
    pub security_credential: Option<String>,
    pub initiator_identifier: Option<String>,
    pub country_code: String,
}

impl std::fmt::Debug for MpesaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("MpesaConfig")
            .field("base_url", &self.base_url)
            .field("status_url", &self.status_url)
            .field("reversal_url", &self.reversal_url)
            .field("api_key", &masked(&self.api_key))
            .field("public_key", &masked(&self.public_key))
            .field("c2b_path", &self.c2b_path)
            .field("status_path", &self.status_path)
            .field("reversal_path", &self.reversal_path)
            .field("origin", &self.origin)
            .field("timeout_ms", &self.timeout_ms)
            .field("service_provider_code", &self.service_provider_code)
            .field("security_credential", &masked(&self.security_credential))
            .field("initiator_identifier", &self.initiator_identifier)
            .field("country_code", &self.country_code)
            .finish()
    }
}

/// Provider operations with distinct configuration requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpesaOperation {
    Initiate,
    Status,
    Reversal,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64, // seconds
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            mpesa: MpesaConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.logging.validate()?;
        self.gateway.validate()?;
        self.mpesa.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(GatewayConfig {
            shared_secret: optional_var("GATEWAY_SHARED_SECRET"),
            signature_tolerance_secs: env::var("GATEWAY_SIGNATURE_TOLERANCE_SECS")
                .unwrap_or_else(|_| DEFAULT_TOLERANCE_SECS.to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("GATEWAY_SIGNATURE_TOLERANCE_SECS".to_string())
                })?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signature_tolerance_secs <= 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_SIGNATURE_TOLERANCE_SECS must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for MpesaConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            status_url: None,
            reversal_url: None,
            api_key: None,
            public_key: None,
            c2b_path: "/ipg/v1x/c2bPayment/singleStage/".to_string(),
            status_path: "/ipg/v1x/queryTransactionStatus/".to_string(),
            reversal_path: "/ipg/v1x/reversal/".to_string(),
            origin: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            service_provider_code: None,
            security_credential: None,
            initiator_identifier: None,
            country_code: "258".to_string(),
        }
    }
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = MpesaConfig::default();
        Ok(MpesaConfig {
            base_url: optional_var("MPESA_BASE_URL"),
            status_url: optional_var("MPESA_STATUS_URL"),
            reversal_url: optional_var("MPESA_REVERSAL_URL"),
            api_key: optional_var("MPESA_API_KEY"),
            public_key: optional_var("MPESA_PUBLIC_KEY"),
            c2b_path: optional_var("MPESA_C2B_PATH").unwrap_or(defaults.c2b_path),
            status_path: optional_var("MPESA_STATUS_PATH").unwrap_or(defaults.status_path),
            reversal_path: optional_var("MPESA_REVERSAL_PATH").unwrap_or(defaults.reversal_path),
            origin: optional_var("MPESA_ORIGIN"),
            timeout_ms: env::var("MPESA_TIMEOUT_MS")
                .unwrap_or_else(|_| DEFAULT_TIMEOUT_MS.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MPESA_TIMEOUT_MS".to_string()))?,
            service_provider_code: optional_var("MPESA_SERVICE_PROVIDER_CODE"),
            security_credential: optional_var("MPESA_SECURITY_CREDENTIAL"),
            initiator_identifier: optional_var("MPESA_INITIATOR_IDENTIFIER"),
            country_code: optional_var("MPESA_COUNTRY_CODE").unwrap_or(defaults.country_code),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("MPESA_TIMEOUT_MS".to_string()));
        }

        for (name, url) in [
            ("MPESA_BASE_URL", &self.base_url),
            ("MPESA_STATUS_URL", &self.status_url),
            ("MPESA_REVERSAL_URL", &self.reversal_url),
        ] {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigError::InvalidValue(format!(
                        "{} must be a valid URL",
                        name
                    )));
                }
            }
        }

        if self.country_code.is_empty() || !self.country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ConfigError::InvalidValue("MPESA_COUNTRY_CODE".to_string()));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn status_base_url(&self) -> Option<&str> {
        self.status_url.as_deref().or(self.base_url.as_deref())
    }

    pub fn reversal_base_url(&self) -> Option<&str> {
        self.reversal_url.as_deref().or(self.base_url.as_deref())
    }

    /// Fails with the first setting `operation` cannot run without.
    pub fn require(&self, operation: MpesaOperation) -> Result<(), ConfigError> {
        let base = match operation {
            MpesaOperation::Initiate => ("MPESA_BASE_URL", self.base_url.as_deref()),
            MpesaOperation::Status => ("MPESA_STATUS_URL", self.status_base_url()),
            MpesaOperation::Reversal => ("MPESA_REVERSAL_URL", self.reversal_base_url()),
        };

        let mut required = vec![
            base,
            ("MPESA_API_KEY", self.api_key.as_deref()),
            ("MPESA_PUBLIC_KEY", self.public_key.as_deref()),
            (
                "MPESA_SERVICE_PROVIDER_CODE",
                self.service_provider_code.as_deref(),
            ),
        ];
        if operation == MpesaOperation::Reversal {
            required.push((
                "MPESA_SECURITY_CREDENTIAL",
                self.security_credential.as_deref(),
            ));
            required.push((
                "MPESA_INITIATOR_IDENTIFIER",
                self.initiator_identifier.as_deref(),
            ));
        }

        match required
            .into_iter()
            .find(|(_, value)| value.map_or(true, |v| v.trim().is_empty()))
        {
            Some((name, _)) => Err(ConfigError::MissingVariable(name.to_string())),
            None => Ok(()),
        }
    }
}

impl DatabaseConfig {
    /// `None` when `DATABASE_URL` is unset; the gateway then keeps orders in memory.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let url = match optional_var("DATABASE_URL") {
            Some(url) => url,
            None => return Ok(None),
        };

        Ok(Some(DatabaseConfig {
            url,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
        }))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}
