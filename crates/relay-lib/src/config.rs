// ============================
// crates/relay-lib/src/config.rs
// ============================
//! Configuration management.
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Data directory for the flat-file persistence bridge
    pub data_dir: PathBuf,
    /// Default log level filter
    pub log_level: String,
    /// Token verification settings
    pub auth: AuthSettings,
    /// Relay tuning knobs
    pub relay: RelaySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// HS256 secret used to sign and verify bearer tokens
    pub jwt_secret: String,
    /// Lifetime of issued tokens in seconds
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Budget for a single outbound delivery; a member that does not
    /// accept a write within this window is treated as disconnected
    pub write_timeout_ms: u64,
    /// Maximum accepted message content length in bytes, after trimming
    pub max_content_len: usize,
    /// Interval between server keepalive pings
    pub ping_interval_secs: u64,
    /// Grace period for the matching pong before the connection is reaped
    pub pong_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4000".parse().unwrap(),
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            auth: AuthSettings::default(),
            relay: RelaySettings::default(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: "insecure-dev-secret".to_string(),
            token_ttl_secs: 60 * 60 * 24, // 1 day
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            write_timeout_ms: 5_000,
            max_content_len: 4_096,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl Settings {
    /// Load settings from `chatrelay.toml` and `CHATRELAY_*` environment
    /// variables, layered over the defaults. Nested fields use `__` in
    /// the environment, e.g. `CHATRELAY_AUTH__JWT_SECRET`.
    pub fn load() -> Result<Self> {
        Ok(Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("chatrelay.toml"))
            .merge(Env::prefixed("CHATRELAY_").split("__"))
            .extract()?)
    }
}
