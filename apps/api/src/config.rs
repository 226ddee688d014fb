use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::stream::LineFraming;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream endpoint that streams cover letters in the writer line format.
    pub writer_upstream_url: String,
    pub writer_api_key: Option<String>,
    pub line_framing: LineFraming,
    pub connect_timeout: Duration,
    /// How long finished generations stay visible in the session status.
    pub session_retention: Duration,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("Required environment variable '{key}' is not set"))
        };

        Ok(Config {
            writer_upstream_url: require("WRITER_UPSTREAM_URL")?,
            writer_api_key: lookup("WRITER_API_KEY").filter(|v| !v.trim().is_empty()),
            line_framing: lookup("WRITER_LINE_FRAMING")
                .map(|v| v.parse::<LineFraming>())
                .transpose()
                .map_err(|e| anyhow!(e))
                .context("WRITER_LINE_FRAMING is invalid")?
                .unwrap_or_default(),
            connect_timeout: Duration::from_secs(
                lookup("WRITER_CONNECT_TIMEOUT_SECS")
                    .unwrap_or_else(|| "10".to_string())
                    .parse::<u64>()
                    .context("WRITER_CONNECT_TIMEOUT_SECS must be a whole number of seconds")?,
            ),
            session_retention: Duration::from_secs(
                lookup("WRITER_SESSION_TTL_SECS")
                    .unwrap_or_else(|| "1800".to_string())
                    .parse::<u64>()
                    .context("WRITER_SESSION_TTL_SECS must be a whole number of seconds")?,
            ),
            port: lookup("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        })
    }
}
