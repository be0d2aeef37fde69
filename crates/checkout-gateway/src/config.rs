//! Gateway configuration, read from `CHECKOUT_*` environment variables.
//!
//! The binary loads `.env` first and lets command-line flags override
//! individual values.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use checkout_common::helpers::{env_bool, env_millis, env_parse, env_secs};
use checkout_common::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local maps; lost on restart.
    Memory,
    /// SQLite database at the given sqlx URL.
    Sqlite(String),
}

/// Lifetime of each mailbox namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlConfig {
    pub offer: Duration,
    pub answer: Duration,
    pub ice: Duration,
    pub barcode: Duration,
    pub frame: Duration,
    pub peer_marker: Duration,
    pub closed_marker: Duration,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            offer: Duration::from_secs(300),
            answer: Duration::from_secs(300),
            ice: Duration::from_secs(300),
            barcode: Duration::from_secs(10),
            frame: Duration::from_secs(5),
            peer_marker: Duration::from_secs(300),
            closed_marker: Duration::from_secs(300),
        }
    }
}

impl TtlConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            offer: env_secs("CHECKOUT_OFFER_TTL_SECS", defaults.offer),
            answer: env_secs("CHECKOUT_ANSWER_TTL_SECS", defaults.answer),
            ice: env_secs("CHECKOUT_ICE_TTL_SECS", defaults.ice),
            barcode: env_secs("CHECKOUT_BARCODE_TTL_SECS", defaults.barcode),
            frame: env_secs("CHECKOUT_FRAME_TTL_SECS", defaults.frame),
            peer_marker: env_secs("CHECKOUT_PEER_TTL_SECS", defaults.peer_marker),
            closed_marker: env_secs("CHECKOUT_CLOSED_TTL_SECS", defaults.closed_marker),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub allow_public_bind: bool,
    pub store: StoreBackend,
    pub store_op_timeout: Duration,
    pub purge_interval: Duration,
    pub ttl: TtlConfig,
    pub catalog_path: Option<PathBuf>,
    pub detector_url: String,
    pub detector_timeout: Duration,
    /// Origin the phone opens; embedded in the QR join URL.
    pub public_base_url: String,
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub rate_max_keys: usize,
    pub trust_forwarded_for: bool,
    pub cors_allow_any: bool,
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            allow_public_bind: false,
            store: StoreBackend::Memory,
            store_op_timeout: Duration::from_secs(2),
            purge_interval: Duration::from_secs(30),
            ttl: TtlConfig::default(),
            catalog_path: None,
            detector_url: "http://localhost:8000/api/yolo/detect".to_string(),
            detector_timeout: Duration::from_secs(15),
            public_base_url: "http://localhost:3000".to_string(),
            rate_limit: 600,
            rate_window: Duration::from_secs(60),
            rate_max_keys: 50_000,
            trust_forwarded_for: false,
            cors_allow_any: false,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind_addr = match std::env::var("CHECKOUT_BIND_ADDR") {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|e| Error::config(format!("invalid CHECKOUT_BIND_ADDR '{raw}': {e}")))?,
            Err(_) => defaults.bind_addr,
        };

        let store = match std::env::var("CHECKOUT_STORE")
            .unwrap_or_else(|_| "sqlite".to_string())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "sqlite" => StoreBackend::Sqlite(
                std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:checkout.db".to_string()),
            ),
            other => {
                return Err(Error::config(format!(
                    "unknown CHECKOUT_STORE '{other}', expected 'memory' or 'sqlite'"
                )))
            }
        };

        let cors_origins = match std::env::var("CHECKOUT_CORS_ORIGINS") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            _ => defaults.cors_origins,
        };

        let config = Self {
            bind_addr,
            allow_public_bind: env_bool("CHECKOUT_ALLOW_PUBLIC_BIND", false),
            store,
            store_op_timeout: env_millis("CHECKOUT_STORE_TIMEOUT_MS", defaults.store_op_timeout),
            purge_interval: env_secs("CHECKOUT_PURGE_INTERVAL_SECS", defaults.purge_interval),
            ttl: TtlConfig::from_env(),
            catalog_path: std::env::var("CHECKOUT_CATALOG_PATH").ok().map(PathBuf::from),
            detector_url: std::env::var("CHECKOUT_DETECTOR_URL").unwrap_or(defaults.detector_url),
            detector_timeout: env_secs("CHECKOUT_DETECTOR_TIMEOUT_SECS", defaults.detector_timeout),
            public_base_url: std::env::var("CHECKOUT_PUBLIC_BASE_URL")
                .unwrap_or(defaults.public_base_url),
            rate_limit: env_parse("CHECKOUT_RATE_LIMIT", defaults.rate_limit),
            rate_window: env_secs("CHECKOUT_RATE_WINDOW_SECS", defaults.rate_window),
            rate_max_keys: env_parse("CHECKOUT_RATE_MAX_KEYS", defaults.rate_max_keys),
            trust_forwarded_for: env_bool("CHECKOUT_TRUST_FORWARDED_FOR", false),
            cors_allow_any: env_bool("CHECKOUT_CORS_ALLOW_ANY", false),
            cors_origins,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let ttls = [
            ("offer", self.ttl.offer),
            ("answer", self.ttl.answer),
            ("ice", self.ttl.ice),
            ("barcode", self.ttl.barcode),
            ("frame", self.ttl.frame),
        ];
        for (name, ttl) in ttls {
            if ttl.is_zero() {
                return Err(Error::config(format!("{name} TTL must be positive")));
            }
        }
        if self.store_op_timeout.is_zero() {
            return Err(Error::config("store operation timeout must be positive"));
        }
        if self.rate_window.is_zero() {
            return Err(Error::config("rate limit window must be positive"));
        }
        if !self.public_base_url.starts_with("http://") && !self.public_base_url.starts_with("https://") {
            return Err(Error::config(format!(
                "public base URL '{}' must start with http:// or https://",
                self.public_base_url
            )));
        }
        Ok(())
    }

    /// Refuse to listen beyond loopback unless explicitly allowed.
    pub fn check_public_bind_allowed(&self, addr: SocketAddr) -> anyhow::Result<()> {
        if addr.ip().is_loopback() || self.allow_public_bind {
            return Ok(());
        }
        Err(anyhow::anyhow!(
            "refusing non-loopback bind without CHECKOUT_ALLOW_PUBLIC_BIND=1"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttls_match_mailbox_contract() {
        let ttl = TtlConfig::default();
        assert_eq!(ttl.offer, Duration::from_secs(300));
        assert_eq!(ttl.answer, Duration::from_secs(300));
        assert_eq!(ttl.ice, Duration::from_secs(300));
        assert_eq!(ttl.barcode, Duration::from_secs(10));
        assert_eq!(ttl.frame, Duration::from_secs(5));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = GatewayConfig::default();
        config.ttl.frame = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let config = GatewayConfig {
            public_base_url: "localhost:3000".to_string(),
            ..GatewayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_public_bind_requires_opt_in() {
        let mut config = GatewayConfig::default();
        let public: SocketAddr = "0.0.0.0:3000".parse().unwrap();
        assert!(config.check_public_bind_allowed(config.bind_addr).is_ok());
        assert!(config.check_public_bind_allowed(public).is_err());
        config.allow_public_bind = true;
        assert!(config.check_public_bind_allowed(public).is_ok());
    }
}
