//! Environment-driven configuration.
//!
//! All knobs have sane defaults so a bare `cabio serve` works against a
//! local broker; production deployments override through environment
//! variables. Defaults and variable names live in their own modules so
//! they are defined exactly once.

use std::path::PathBuf;
use std::time::Duration;

/// Default values.
pub mod defaults {
    /// MQTT broker hostname (Adafruit-IO-compatible device cloud).
    pub const BROKER_HOST: &str = "io.adafruit.com";
    /// MQTT broker port (TLS).
    pub const BROKER_PORT: u16 = 8883;
    /// Whether to wrap the broker connection in TLS.
    pub const BROKER_TLS: bool = true;
    /// MQTT keep-alive interval in seconds.
    pub const KEEP_ALIVE_SECS: u64 = 60;
    /// Broker handshake deadline in seconds.
    pub const CONNECT_TIMEOUT_SECS: u64 = 15;
    /// Outbound publish deadline in seconds.
    pub const PUBLISH_TIMEOUT_SECS: u64 = 10;
    /// HTTP bind host.
    pub const HTTP_HOST: &str = "0.0.0.0";
    /// HTTP bind port.
    pub const HTTP_PORT: u16 = 9086;
    /// Data directory for the embedded stores.
    pub const DATA_DIR: &str = "data";
}

/// Environment variable names.
pub mod env_vars {
    pub const BROKER_HOST: &str = "CABIO_BROKER_HOST";
    pub const BROKER_PORT: &str = "CABIO_BROKER_PORT";
    pub const BROKER_TLS: &str = "CABIO_BROKER_TLS";
    pub const KEEP_ALIVE_SECS: &str = "CABIO_KEEP_ALIVE_SECS";
    pub const CONNECT_TIMEOUT_SECS: &str = "CABIO_CONNECT_TIMEOUT_SECS";
    pub const PUBLISH_TIMEOUT_SECS: &str = "CABIO_PUBLISH_TIMEOUT_SECS";
    pub const DATA_DIR: &str = "CABIO_DATA_DIR";
    pub const TOKEN_SECRET: &str = "CABIO_TOKEN_SECRET";
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Connection parameters for the device cloud broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker hostname.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Use TLS for the transport.
    pub tls: bool,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Deadline for the initial handshake.
    pub connect_timeout: Duration,
    /// Deadline for a single publish.
    pub publish_timeout: Duration,
}

impl BrokerConfig {
    /// Load broker settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            host: env_or(env_vars::BROKER_HOST, defaults::BROKER_HOST.to_string()),
            port: env_or(env_vars::BROKER_PORT, defaults::BROKER_PORT),
            tls: env_or(env_vars::BROKER_TLS, defaults::BROKER_TLS),
            keep_alive: Duration::from_secs(env_or(
                env_vars::KEEP_ALIVE_SECS,
                defaults::KEEP_ALIVE_SECS,
            )),
            connect_timeout: Duration::from_secs(env_or(
                env_vars::CONNECT_TIMEOUT_SECS,
                defaults::CONNECT_TIMEOUT_SECS,
            )),
            publish_timeout: Duration::from_secs(env_or(
                env_vars::PUBLISH_TIMEOUT_SECS,
                defaults::PUBLISH_TIMEOUT_SECS,
            )),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: defaults::BROKER_HOST.to_string(),
            port: defaults::BROKER_PORT,
            tls: defaults::BROKER_TLS,
            keep_alive: Duration::from_secs(defaults::KEEP_ALIVE_SECS),
            connect_timeout: Duration::from_secs(defaults::CONNECT_TIMEOUT_SECS),
            publish_timeout: Duration::from_secs(defaults::PUBLISH_TIMEOUT_SECS),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Broker connection parameters.
    pub broker: BrokerConfig,
    /// Directory holding the embedded databases.
    pub data_dir: PathBuf,
    /// Secret used to sign API bearer tokens.
    pub token_secret: String,
}

impl AppConfig {
    /// Load the full configuration from the environment.
    pub fn from_env() -> Self {
        let token_secret = match std::env::var(env_vars::TOKEN_SECRET) {
            Ok(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!(
                    "{} not set, using an insecure development secret",
                    env_vars::TOKEN_SECRET
                );
                "cabio-dev-secret".to_string()
            }
        };

        Self {
            broker: BrokerConfig::from_env(),
            data_dir: PathBuf::from(env_or(
                env_vars::DATA_DIR,
                defaults::DATA_DIR.to_string(),
            )),
            token_secret,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_defaults() {
        let config = BrokerConfig::default();
        assert_eq!(config.host, "io.adafruit.com");
        assert_eq!(config.port, 8883);
        assert!(config.tls);
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_env_or_parses() {
        std::env::set_var("CABIO_TEST_PORT", "1883");
        let port: u16 = env_or("CABIO_TEST_PORT", 8883);
        assert_eq!(port, 1883);
        std::env::remove_var("CABIO_TEST_PORT");

        let fallback: u16 = env_or("CABIO_TEST_PORT_MISSING", 8883);
        assert_eq!(fallback, 8883);
    }
}
