//! Pool configuration and bootstrap resolution
//!
//! This module owns the on-disk config file model (token entries plus
//! heartbeat settings) and the resolution order used to locate it at
//! startup, with env-var fallbacks for single-token deployments.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name probed in the working directory and next
/// to the executable.
pub const DEFAULT_CONFIG_FILE: &str = "token_pool_config.json";

/// Env var pointing at an explicit config file path.
pub const ENV_CONFIG_PATH: &str = "PPLX_TOKEN_POOL_CONFIG";

/// Preferred env var for a single-token CSRF value.
pub const ENV_CSRF_TOKEN: &str = "PPLX_CSRF_TOKEN";

/// Legacy env var for the CSRF value, still honored.
pub const ENV_CSRF_TOKEN_LEGACY: &str = "PPLX_NEXT_AUTH_CSRF_TOKEN";

/// Env var for a single-token session value.
pub const ENV_SESSION_TOKEN: &str = "PPLX_SESSION_TOKEN";

/// One token entry from the config file: an operator-chosen id plus
/// the two opaque secrets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenEntry {
    pub id: String,
    pub csrf_token: String,
    pub session_token: String,
}

/// Heartbeat prober settings, persisted alongside the tokens.
///
/// `interval` is in hours. The `tg_*` fields are opaque notification
/// credentials consumed by whatever notifier the embedding process
/// wires in.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HeartbeatConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_question")]
    pub question: String,
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default)]
    pub tg_bot_token: Option<String>,
    #[serde(default)]
    pub tg_chat_id: Option<String>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enable: false,
            question: default_question(),
            interval: default_interval(),
            tg_bot_token: None,
            tg_chat_id: None,
        }
    }
}

impl HeartbeatConfig {
    /// The probe interval as a duration.
    pub fn interval_duration(&self) -> Duration {
        Duration::from_secs(self.interval * 3600)
    }
}

fn default_question() -> String {
    "现在是农历几月几号？".to_string()
}

fn default_interval() -> u64 {
    6
}

/// The whole config file: a non-empty token list plus optional
/// heartbeat settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolFileConfig {
    pub tokens: Vec<TokenEntry>,
    #[serde(default)]
    pub heart_beat: HeartbeatConfig,
}

impl PoolFileConfig {
    /// Load and validate a config file. A present file without usable
    /// tokens is a hard error: silently falling back to anonymous mode
    /// would hide an operator mistake.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        if config.tokens.is_empty() {
            bail!("no tokens found in config file: {}", path.display());
        }
        for entry in &config.tokens {
            if entry.id.is_empty() || entry.csrf_token.is_empty() || entry.session_token.is_empty()
            {
                bail!(
                    "invalid token entry in {}: id, csrf_token and session_token are all required",
                    path.display()
                );
            }
        }

        Ok(config)
    }

    /// Rewrite the config file in place: pretty-printed UTF-8 with
    /// non-ASCII preserved.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let body = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        fs::write(path, body + "\n")
    }
}

/// Resolve the config file to bootstrap from, if any.
///
/// Order: explicit path argument, `PPLX_TOKEN_POOL_CONFIG`, the
/// working-directory default, then the executable-adjacent default.
/// A candidate is only taken when the file actually exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(ENV_CONFIG_PATH) {
        if !env_path.is_empty() {
            candidates.push(PathBuf::from(env_path));
        }
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG_FILE));
    if let Ok(exe) = env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join(DEFAULT_CONFIG_FILE));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

/// Single-token secret material resolved from the environment.
#[derive(Debug, Clone)]
pub struct EnvToken {
    pub csrf_token: String,
    pub session_token: String,
}

/// Read the single-token env pair, preferring `PPLX_CSRF_TOKEN` over
/// the legacy name. Both halves must be present and non-empty.
pub fn env_token() -> Option<EnvToken> {
    let csrf_token = env::var(ENV_CSRF_TOKEN)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| env::var(ENV_CSRF_TOKEN_LEGACY).ok().filter(|v| !v.is_empty()))?;
    let session_token = env::var(ENV_SESSION_TOKEN).ok().filter(|v| !v.is_empty())?;
    Some(EnvToken {
        csrf_token,
        session_token,
    })
}
