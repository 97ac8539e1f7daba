//! Server configuration loaded from environment variables.
//!
//! Everything except the shared secret has a default, so a fresh install on
//! the host only needs `COURIER_SECRET` set.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use courier_shared::constants::DEFAULT_HTTP_PORT;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("COURIER_SECRET is not set")]
    MissingSecret,
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Shared secret for the auth gate and envelope key derivation.
    /// Env: `COURIER_SECRET` (required)
    pub secret: String,

    /// Socket address for the HTTP (axum) server.
    /// Env: `HTTP_ADDR`, with `PORT` overriding only the port.
    /// Default: `0.0.0.0:8787`
    pub http_addr: SocketAddr,

    /// Reject plaintext requests and streams.
    /// Env: `REQUIRE_ENCRYPTION` (true/false)
    /// Default: `false`
    pub require_encryption: bool,

    /// Host message store.
    /// Env: `STORE_PATH`
    /// Default: `~/Library/Messages/chat.db`
    pub store_path: PathBuf,

    /// The only directory attachments may be served from.
    /// Env: `ATTACHMENTS_ROOT`
    /// Default: `~/Library/Messages/Attachments`
    pub attachments_root: PathBuf,

    /// Interval of the fallback poller when the store cannot be watched.
    /// Env: `POLL_INTERVAL_MS`
    /// Default: `2000`
    pub poll_interval: Duration,

    /// Quiet window before a burst of file events triggers a diff.
    /// Env: `DEBOUNCE_MS`
    /// Default: `250`
    pub debounce: Duration,

    /// Program used for sending and marking conversations read.
    /// Env: `COURIER_HOST_COMMAND`
    /// Default: unset (those routes answer 503).
    pub host_command: Option<PathBuf>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("secret", &"[redacted]")
            .field("http_addr", &self.http_addr)
            .field("require_encryption", &self.require_encryption)
            .field("store_path", &self.store_path)
            .field("attachments_root", &self.attachments_root)
            .field("poll_interval", &self.poll_interval)
            .field("debounce", &self.debounce)
            .field("host_command", &self.host_command)
            .finish()
    }
}

impl ServerConfig {
    /// Defaults for everything but the secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        let messages = messages_dir();
        Self {
            secret: secret.into(),
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            require_encryption: false,
            store_path: messages.join("chat.db"),
            attachments_root: messages.join("Attachments"),
            poll_interval: Duration::from_millis(2000),
            debounce: Duration::from_millis(250),
            host_command: None,
        }
    }

    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let secret = var("COURIER_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret)?;
        let mut config = Self::with_secret(secret);

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(port) = var("PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.http_addr.set_port(port),
                Err(_) => tracing::warn!(value = %port, "Invalid PORT, ignoring"),
            }
        }

        if let Some(val) = var("REQUIRE_ENCRYPTION") {
            config.require_encryption = val == "true" || val == "1";
        }

        if let Some(path) = var("STORE_PATH") {
            config.store_path = PathBuf::from(path);
        }

        if let Some(path) = var("ATTACHMENTS_ROOT") {
            config.attachments_root = PathBuf::from(path);
        }

        if let Some(ms) = millis(&var, "POLL_INTERVAL_MS") {
            config.poll_interval = ms;
        }

        if let Some(ms) = millis(&var, "DEBOUNCE_MS") {
            config.debounce = ms;
        }

        if let Some(cmd) = var("COURIER_HOST_COMMAND") {
            if !cmd.is_empty() {
                config.host_command = Some(PathBuf::from(cmd));
            }
        }

        Ok(config)
    }
}

fn millis(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = var(key)?;
    match raw.parse::<u64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms)),
        _ => {
            tracing::warn!(key, value = %raw, "Invalid duration, using default");
            None
        }
    }
}

/// `~/Library/Messages`, or a relative fallback when no home is known.
fn messages_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join("Library").join("Messages"))
        .unwrap_or_else(|| PathBuf::from("Messages"))
}
