use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ChatError, Result};

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
pub const DEFAULT_HISTORY_WINDOW: usize = 20;
pub const DEFAULT_DOCUMENT_EXCERPT_CHARS: usize = 8000;

#[derive(Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub model: String,
    pub api_base: String,
    pub bind_addr: SocketAddr,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
    pub history_window: usize,
    pub document_excerpt_chars: usize,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("gemini_api_key", &"<redacted>")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("bind_addr", &self.bind_addr)
            .field("request_timeout", &self.request_timeout)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("history_window", &self.history_window)
            .field("document_excerpt_chars", &self.document_excerpt_chars)
            .finish()
    }
}

impl Config {
    /// Reads configuration from the environment, honouring a local `.env`.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let gemini_api_key = lookup("GEMINI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ChatError::Config("GEMINI_API_KEY environment variable not set".to_string())
            })?;

        let mut api_base = lookup("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        if !api_base.ends_with('/') {
            api_base.push('/');
        }

        let timeout_secs = parse_or(&lookup, "REQUEST_TIMEOUT_SECS", || {
            DEFAULT_REQUEST_TIMEOUT_SECS
        })?;
        if !(1..=MAX_REQUEST_TIMEOUT_SECS).contains(&timeout_secs) {
            return Err(ChatError::Config(format!(
                "REQUEST_TIMEOUT_SECS must be between 1 and {MAX_REQUEST_TIMEOUT_SECS}, got {timeout_secs}"
            )));
        }

        Ok(Self {
            gemini_api_key,
            model: lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base,
            bind_addr: parse_or(&lookup, "BIND_ADDR", || {
                SocketAddr::from(([0, 0, 0, 0], 3000))
            })?,
            request_timeout: Duration::from_secs(timeout_secs),
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", || DEFAULT_MAX_UPLOAD_BYTES)?,
            history_window: parse_or(&lookup, "HISTORY_WINDOW", || DEFAULT_HISTORY_WINDOW)?,
            document_excerpt_chars: parse_or(&lookup, "DOCUMENT_EXCERPT_CHARS", || {
                DEFAULT_DOCUMENT_EXCERPT_CHARS
            })?,
        })
    }
}

fn parse_or<F, T, D>(lookup: &F, key: &str, default: D) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
    D: FnOnce() -> T,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ChatError::Config(format!("{key}={raw:?} is invalid: {e}"))),
        None => Ok(default()),
    }
}
