//! Runtime configuration, read from the environment.
//!
//! A `.env` file (or the one named by `--env-file`) may seed the environment
//! first; variables already set in the process win.

use std::path::Path;
use std::time::Duration;

use crate::client::{BASE_URL, DEFAULT_TIMEOUT};
use crate::models::ariston::GatewayId;

pub const DEFAULT_POLL_SECS: u64 = 60;
pub const DEFAULT_ENERGY_POLL_SECS: u64 = 3600;
pub const DEFAULT_CULTURE: &str = "en-US";

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { name: &'static str, value: String, reason: String },
    EnvFile(String),
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::Missing(name) => write!(f, "missing required variable {}", name),
            ConfigError::Invalid { name, value, reason } => write!(f, "{}={:?}: {}", name, value, reason),
            ConfigError::EnvFile(s) => write!(f, "env file: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone)]
pub struct Config {
    pub username: String,
    pub password: String,
    /// Gateway to poll; the first discovered device when unset.
    pub gateway: Option<GatewayId>,
    pub api_url: String,
    /// Culture for localized option labels.
    pub culture: String,
    pub poll_interval: Duration,
    pub energy_poll_interval: Duration,
    pub extra_energy_features: bool,
    pub http_timeout: Duration,
}

impl core::fmt::Debug for Config {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("gateway", &self.gateway)
            .field("api_url", &self.api_url)
            .field("culture", &self.culture)
            .field("poll_interval", &self.poll_interval)
            .field("energy_poll_interval", &self.energy_poll_interval)
            .field("extra_energy_features", &self.extra_energy_features)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let username = var("ARISTON_USERNAME").ok_or(ConfigError::Missing("ARISTON_USERNAME"))?;
        // passwords keep their surrounding whitespace
        let password = lookup("ARISTON_PASSWORD")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("ARISTON_PASSWORD"))?;

        let mut api_url = var("ARISTON_API_URL").unwrap_or_else(|| BASE_URL.to_string());
        if !api_url.ends_with('/') {
            api_url.push('/');
        }

        Ok(Config {
            username,
            password,
            gateway: var("ARISTON_GATEWAY").map(GatewayId),
            api_url,
            culture: var("ARISTON_CULTURE").unwrap_or_else(|| DEFAULT_CULTURE.to_string()),
            poll_interval: seconds("POLL_INTERVAL_SECS", var("POLL_INTERVAL_SECS"), DEFAULT_POLL_SECS)?,
            energy_poll_interval: seconds(
                "ENERGY_POLL_INTERVAL_SECS",
                var("ENERGY_POLL_INTERVAL_SECS"),
                DEFAULT_ENERGY_POLL_SECS,
            )?,
            extra_energy_features: flag("EXTRA_ENERGY_FEATURES", var("EXTRA_ENERGY_FEATURES"))?,
            http_timeout: seconds("HTTP_TIMEOUT_SECS", var("HTTP_TIMEOUT_SECS"), DEFAULT_TIMEOUT.as_secs())?,
        })
    }
}

fn seconds(name: &'static str, value: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(Duration::from_secs(default));
    };
    match value.parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            name,
            value,
            reason: "must be greater than zero".into(),
        }),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(ConfigError::Invalid {
            name,
            value,
            reason: e.to_string(),
        }),
    }
}

fn flag(name: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    match value.as_deref() {
        None => Ok(false),
        Some("1" | "true" | "TRUE" | "yes") => Ok(true),
        Some("0" | "false" | "FALSE" | "no") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            name,
            value: other.to_string(),
            reason: "expected true or false".into(),
        }),
    }
}

// =====================
// .env files
// =====================

/// Reads `KEY=value` assignments from `path` into the process environment,
/// skipping keys that are already set. Returns how many were applied.
pub fn load_env_file(path: &Path) -> Result<usize, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::EnvFile(format!("failed to read {}: {}", path.display(), e)))?;
    let assignments = parse_env_file(&text).map_err(|e| ConfigError::EnvFile(format!("{}:{}", path.display(), e)))?;

    let mut applied = 0;
    for (key, value) in assignments {
        if std::env::var_os(&key).is_none() {
            // SAFETY: called from the binary before any other thread starts
            unsafe {
                std::env::set_var(key, value);
            }
            applied += 1;
        }
    }
    Ok(applied)
}

/// Parses a whole file; errors carry the 1-based line number.
pub fn parse_env_file(text: &str) -> Result<Vec<(String, String)>, String> {
    let mut out = Vec::new();
    for (index, line) in text.lines().enumerate() {
        match parse_assignment(line) {
            Ok(Some(pair)) => out.push(pair),
            Ok(None) => {}
            Err(e) => return Err(format!("{}: {}", index + 1, e)),
        }
    }
    Ok(out)
}

fn parse_assignment(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, raw) = line.split_once('=').ok_or("missing '=' in assignment")?;
    let key = key.trim();
    if key.is_empty() {
        return Err("variable name cannot be empty".into());
    }
    if key.contains(char::is_whitespace) {
        return Err(format!("variable name contains whitespace: {}", key));
    }
    Ok(Some((key.to_string(), parse_value(raw.trim())?)))
}

fn parse_value(raw: &str) -> Result<String, String> {
    if let Some(rest) = raw.strip_prefix('"') {
        let mut value = String::new();
        let mut chars = rest.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(other) => value.push(other),
                    None => return Err("unterminated escape sequence".into()),
                },
                '"' => return trailing(chars.as_str()).map(|_| value),
                other => value.push(other),
            }
        }
        Err("unterminated double-quoted value".into())
    } else if let Some(rest) = raw.strip_prefix('\'') {
        let (value, after) = rest.split_once('\'').ok_or("unterminated single-quoted value")?;
        trailing(after)?;
        Ok(value.to_string())
    } else {
        let value = raw.split_once(" #").map(|(v, _)| v).unwrap_or(raw);
        Ok(value.trim_end().to_string())
    }
}

fn trailing(rest: &str) -> Result<(), String> {
    let rest = rest.trim();
    if rest.is_empty() || rest.starts_with('#') {
        Ok(())
    } else {
        Err("unexpected characters after closing quote".into())
    }
}
