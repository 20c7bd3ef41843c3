use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_SESSION_PATH: &str = "parley-session.json";
const DEFAULT_RECONNECT_SECS: u64 = 5;
const DEFAULT_HEARTBEAT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a positive whole number of seconds, got {value:?}")]
    InvalidSeconds { var: &'static str, value: String },

    #[error("cannot derive a WebSocket URL from {0:?}; set PARLEY_WS_URL")]
    WsUrl(String),
}

/// Runtime settings, read from the environment (`.env` honoured).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub ws_url: String,
    pub session_path: PathBuf,
    pub reconnect_delay: Duration,
    pub heartbeat: Duration,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = lookup("PARLEY_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.into())
            .trim_end_matches('/')
            .to_string();
        let ws_url = match lookup("PARLEY_WS_URL") {
            Some(url) => url,
            None => derive_ws_url(&api_base_url)?,
        };
        let session_path = lookup("PARLEY_SESSION_PATH")
            .unwrap_or_else(|| DEFAULT_SESSION_PATH.into())
            .into();

        Ok(Self {
            ws_url,
            session_path,
            reconnect_delay: seconds(&lookup, "PARLEY_RECONNECT_SECS", DEFAULT_RECONNECT_SECS)?,
            heartbeat: seconds(&lookup, "PARLEY_HEARTBEAT_SECS", DEFAULT_HEARTBEAT_SECS)?,
            email: lookup("PARLEY_EMAIL").filter(|s| !s.is_empty()),
            password: lookup("PARLEY_PASSWORD").filter(|s| !s.is_empty()),
            api_base_url,
        })
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    match lookup(var) {
        None => Ok(Duration::from_secs(default)),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
            _ => Err(ConfigError::InvalidSeconds { var, value }),
        },
    }
}

/// The server exposes its STOMP endpoint at `/ws`; the raw WebSocket lives
/// under `/ws/websocket`.
fn derive_ws_url(api_base_url: &str) -> Result<String, ConfigError> {
    let base = if let Some(rest) = api_base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        return Err(ConfigError::WsUrl(api_base_url.to_string()));
    };
    Ok(format!("{}/ws/websocket", base))
}
