//! Configuration module for the lost & found service.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::AppError;

/// Which side of the relay this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Owns the authoritative post list and broadcasts it.
    Primary,
    /// Mirrors lost posts pushed by the primary.
    Companion,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Companion => "companion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Some(Role::Primary),
            "companion" => Some(Role::Companion),
            _ => None,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Process role
    pub role: Role,
    /// Pre-shared key guarding `/api` and `/relay` (open when unset)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Path to Tantivy search index directory
    pub index_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Base URL of the paired device
    pub peer_url: Option<String>,
    /// Key presented to the paired device
    pub peer_psk: Option<String>,
    /// How often the peer's reachability is probed
    pub probe_interval: Duration,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let role = match env::var("LOSTFOUND_ROLE") {
            Ok(value) => Role::parse(&value).ok_or_else(|| {
                AppError::Validation(format!("Invalid LOSTFOUND_ROLE: {}", value))
            })?,
            Err(_) => Role::Primary,
        };

        let api_psk = non_empty_var("LOSTFOUND_API_PSK");

        let db_path = env::var("LOSTFOUND_DB_PATH")
            .unwrap_or_else(|_| "./data/lostfound.sqlite".to_string())
            .into();

        let index_path = env::var("LOSTFOUND_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let bind_raw =
            env::var("LOSTFOUND_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let bind_addr = bind_raw.parse().map_err(|_| {
            AppError::Validation(format!("Invalid LOSTFOUND_BIND_ADDR format: {}", bind_raw))
        })?;

        let peer_url =
            non_empty_var("LOSTFOUND_PEER_URL").map(|url| url.trim_end_matches('/').to_string());
        let peer_psk = non_empty_var("LOSTFOUND_PEER_PSK");

        let probe_secs = match env::var("LOSTFOUND_PROBE_INTERVAL_SECS") {
            Ok(value) => value.parse::<u64>().ok().filter(|s| *s > 0).ok_or_else(|| {
                AppError::Validation(format!(
                    "Invalid LOSTFOUND_PROBE_INTERVAL_SECS: {}",
                    value
                ))
            })?,
            Err(_) => 5,
        };

        let log_level = env::var("LOSTFOUND_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            role,
            api_psk,
            db_path,
            index_path,
            bind_addr,
            peer_url,
            peer_psk,
            probe_interval: Duration::from_secs(probe_secs),
            log_level,
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        for var in [
            "LOSTFOUND_ROLE",
            "LOSTFOUND_API_PSK",
            "LOSTFOUND_DB_PATH",
            "LOSTFOUND_INDEX_PATH",
            "LOSTFOUND_BIND_ADDR",
            "LOSTFOUND_PEER_URL",
            "LOSTFOUND_PEER_PSK",
            "LOSTFOUND_PROBE_INTERVAL_SECS",
            "LOSTFOUND_LOG_LEVEL",
        ] {
            env::remove_var(var);
        }

        let config = Config::from_env().unwrap();

        assert_eq!(config.role, Role::Primary);
        assert!(config.api_psk.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/lostfound.sqlite"));
        assert_eq!(config.index_path, PathBuf::from("./data/index"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert!(config.peer_url.is_none());
        assert_eq!(config.probe_interval, Duration::from_secs(5));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("Companion"), Some(Role::Companion));
        assert_eq!(Role::parse(" primary "), Some(Role::Primary));
        assert_eq!(Role::parse("watch"), None);
    }
}
