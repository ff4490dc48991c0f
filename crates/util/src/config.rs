use std::{env, fmt, net::SocketAddr};

use url::Url;

use super::bind_address;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://kora.db";
pub const DEFAULT_PLATFORM_URL: &str = "http://127.0.0.1:54321/";
pub const DEFAULT_STORAGE_BUCKET: &str = "product-images";
pub const DEFAULT_SHIPPING_FLAT_FEE: i64 = 2_000;
pub const DEFAULT_FREE_SHIPPING_THRESHOLD: i64 = 50_000;

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns `true` for production deployments.
    pub fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Connection settings for the hosted backend platform (auth + object storage).
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub base_url: Url,
    pub anon_key: String,
    pub service_key: String,
    pub jwt_secret: String,
    pub storage_bucket: String,
}

/// Shipping rules applied to carts and checkouts, in RWF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutConfig {
    pub shipping_flat_fee: i64,
    pub free_shipping_threshold: i64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            shipping_flat_fee: DEFAULT_SHIPPING_FLAT_FEE,
            free_shipping_threshold: DEFAULT_FREE_SHIPPING_THRESHOLD,
        }
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub database_url: String,
    pub platform: PlatformConfig,
    pub checkout: CheckoutConfig,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = bind_address().map_err(ConfigError::BindAddress)?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let platform = PlatformConfig::from_env(environment)?;
        let checkout = CheckoutConfig {
            shipping_flat_fee: read_amount("SHIPPING_FLAT_FEE", DEFAULT_SHIPPING_FLAT_FEE)?,
            free_shipping_threshold: read_amount(
                "FREE_SHIPPING_THRESHOLD",
                DEFAULT_FREE_SHIPPING_THRESHOLD,
            )?,
        };

        Ok(Self {
            bind_addr,
            environment,
            database_url,
            platform,
            checkout,
        })
    }
}

impl PlatformConfig {
    fn from_env(environment: Environment) -> Result<Self, ConfigError> {
        let raw_url = match env::var("PLATFORM_URL") {
            Ok(value) => value,
            Err(_) if !environment.is_production() => DEFAULT_PLATFORM_URL.to_string(),
            Err(_) => return Err(ConfigError::MissingVar("PLATFORM_URL")),
        };
        let base_url = parse_base_url(&raw_url)?;

        let jwt_secret = match env::var("PLATFORM_JWT_SECRET") {
            Ok(value) if !value.is_empty() => value,
            _ if !environment.is_production() => "local-development-jwt-secret".to_string(),
            _ => return Err(ConfigError::MissingVar("PLATFORM_JWT_SECRET")),
        };

        Ok(Self {
            base_url,
            anon_key: env::var("PLATFORM_ANON_KEY").unwrap_or_default(),
            service_key: env::var("PLATFORM_SERVICE_KEY").unwrap_or_default(),
            jwt_secret,
            storage_bucket: env::var("STORAGE_BUCKET")
                .unwrap_or_else(|_| DEFAULT_STORAGE_BUCKET.to_string()),
        })
    }
}

/// Parses the platform URL, forcing a trailing slash so `Url::join` keeps the full path.
fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut value = raw.trim().to_string();
    if !value.ends_with('/') {
        value.push('/');
    }
    Url::parse(&value).map_err(|err| ConfigError::InvalidUrl {
        var: "PLATFORM_URL",
        reason: err.to_string(),
    })
}

fn read_amount(var: &'static str, default: i64) -> Result<i64, ConfigError> {
    match env::var(var) {
        Ok(value) => match value.trim().parse::<i64>() {
            Ok(amount) if amount >= 0 => Ok(amount),
            _ => Err(ConfigError::InvalidNumber { var, value }),
        },
        Err(_) => Ok(default),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVar(&'static str),
    InvalidUrl { var: &'static str, reason: String },
    InvalidNumber { var: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVar(var) => write!(f, "{var} must be set in production"),
            Self::InvalidUrl { var, reason } => write!(f, "invalid {var} value: {reason}"),
            Self::InvalidNumber { var, value } => {
                write!(f, "{var} must be a non-negative integer amount (got {value})")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
