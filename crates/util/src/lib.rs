//! Environment handling shared by the KORA binaries.
pub mod config;

use std::{env, net::SocketAddr};

pub use config::{AppConfig, CheckoutConfig, ConfigError, Environment, PlatformConfig};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Reads `.env` into the process environment. A missing file is not an error.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}

/// `APP_BIND_ADDR`, or [`DEFAULT_BIND_ADDR`] when unset or blank.
pub fn bind_address() -> Result<SocketAddr, std::net::AddrParseError> {
    match env::var("APP_BIND_ADDR") {
        Ok(value) if !value.trim().is_empty() => value.trim().parse(),
        _ => DEFAULT_BIND_ADDR.parse(),
    }
}
