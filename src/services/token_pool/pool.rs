//! Concurrent token pool
//!
//! The pool owns every [`TokenRecord`] plus the rotation sequence and
//! serializes all mutation behind a single mutex. Request workers call
//! `acquire`/`report`, the admin caller gets the management
//! operations, and the prober reads targets and writes liveness
//! through the dedicated probe interface. Upstream calls and file I/O
//! always happen with the lock released.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{self, HeartbeatConfig, PoolFileConfig, TokenEntry};
use crate::error::PoolError;
use crate::services::upstream::{cookie_pairs, ClientFactory, UpstreamClient};

use super::record::{Liveness, Outcome, TokenRecord, TokenStatus};
use super::select::{pick, Selection};

/// How the pool was bootstrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolMode {
    /// No credentials at all; a single anonymous token.
    Anonymous,
    /// One env-provided token.
    Single,
    /// Multi-token config file, or grown past one token at runtime.
    Pool,
}

impl fmt::Display for PoolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolMode::Anonymous => write!(f, "anonymous"),
            PoolMode::Single => write!(f, "single"),
            PoolMode::Pool => write!(f, "pool"),
        }
    }
}

/// A token handed out for one upstream request. The caller must report
/// exactly one [`Outcome`] for it when the request finishes.
#[derive(Clone)]
pub struct Lease {
    pub id: String,
    pub client: Arc<dyn UpstreamClient>,
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("id", &self.id).finish()
    }
}

/// Pool-level aggregates plus per-token diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub total: usize,
    pub available: usize,
    pub mode: PoolMode,
    pub tokens: Vec<TokenStatus>,
}

/// The `{status, message?, data?}` envelope returned to the admin
/// caller for every management operation.
#[derive(Debug, Clone, Serialize)]
pub struct AdminResponse {
    pub status: AdminStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminStatus {
    Ok,
    Error,
}

impl AdminResponse {
    pub fn ok() -> Self {
        Self {
            status: AdminStatus::Ok,
            message: None,
            data: None,
        }
    }

    pub fn ok_with(data: impl Serialize) -> Self {
        Self {
            status: AdminStatus::Ok,
            message: None,
            data: serde_json::to_value(data).ok(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: AdminStatus::Error,
            message: Some(message.into()),
            data: None,
        }
    }
}

impl From<Result<(), PoolError>> for AdminResponse {
    fn from(result: Result<(), PoolError>) -> Self {
        match result {
            Ok(()) => AdminResponse::ok(),
            Err(err) => AdminResponse::error(err.to_string()),
        }
    }
}

struct PoolInner {
    records: HashMap<String, TokenRecord>,
    rotation: Vec<String>,
    cursor: usize,
    mode: PoolMode,
    heartbeat: HeartbeatConfig,
    /// Token entries as loaded from the config file, retained so
    /// heartbeat edits can rewrite the file. Runtime add/remove is
    /// in-memory only and never touches this list.
    file_tokens: Vec<TokenEntry>,
}

impl PoolInner {
    fn enabled_count(&self) -> usize {
        self.records.values().filter(|r| r.enabled).count()
    }

    fn insert(&mut self, record: TokenRecord) -> Result<(), PoolError> {
        if self.records.contains_key(&record.id) {
            return Err(PoolError::DuplicateToken(record.id.clone()));
        }
        self.rotation.push(record.id.clone());
        self.records.insert(record.id.clone(), record);
        Ok(())
    }
}

/// Pool of upstream tokens with weighted-fair selection and health
/// tracking.
pub struct TokenPool {
    factory: Arc<dyn ClientFactory>,
    config_path: Option<PathBuf>,
    inner: Mutex<PoolInner>,
}

impl fmt::Debug for TokenPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPool")
            .field("config_path", &self.config_path)
            .finish()
    }
}

impl TokenPool {
    /// Bootstrap following the standard resolution order: explicit
    /// path, `PPLX_TOKEN_POOL_CONFIG`, the default config file
    /// locations, the single-token env pair, and finally an anonymous
    /// token.
    pub fn bootstrap(
        factory: Arc<dyn ClientFactory>,
        config_path: Option<&Path>,
    ) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        if let Some(path) = config::resolve_config_path(config_path) {
            return Self::from_config_file(factory, &path);
        }
        if let Some(token) = config::env_token() {
            tracing::info!("bootstrapping single-token pool from environment");
            return Self::from_single_token(factory, &token.csrf_token, &token.session_token);
        }
        tracing::warn!("no token configuration found, bootstrapping anonymous pool");
        Self::anonymous(factory)
    }

    /// Build a pool from a validated config file. The path is retained
    /// so heartbeat-config edits can be persisted back.
    pub fn from_config_file(factory: Arc<dyn ClientFactory>, path: &Path) -> anyhow::Result<Self> {
        let file = PoolFileConfig::load(path)?;
        let pool = Self::from_entries(
            factory,
            file.tokens,
            file.heart_beat,
            Some(path.to_path_buf()),
        )?;
        tracing::info!(
            config = %path.display(),
            total = pool.len(),
            "token pool loaded from config file"
        );
        Ok(pool)
    }

    /// Build a multi-token pool directly from entries, for embedders
    /// that manage configuration themselves.
    pub fn from_entries(
        factory: Arc<dyn ClientFactory>,
        tokens: Vec<TokenEntry>,
        heartbeat: HeartbeatConfig,
        config_path: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut inner = PoolInner {
            records: HashMap::new(),
            rotation: Vec::new(),
            cursor: 0,
            mode: PoolMode::Pool,
            heartbeat,
            file_tokens: tokens.clone(),
        };

        for entry in &tokens {
            let client = factory
                .build(&cookie_pairs(&entry.csrf_token, &entry.session_token))
                .with_context(|| format!("failed to build upstream client for '{}'", entry.id))?;
            inner.insert(TokenRecord::new(entry.id.clone(), client, true))?;
        }
        anyhow::ensure!(!inner.records.is_empty(), "token pool cannot start empty");

        Ok(Self {
            factory,
            config_path,
            inner: Mutex::new(inner),
        })
    }

    /// Build a pool around a single env-provided token.
    pub fn from_single_token(
        factory: Arc<dyn ClientFactory>,
        csrf_token: &str,
        session_token: &str,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = factory
            .build(&cookie_pairs(csrf_token, session_token))
            .context("failed to build upstream client for the env-provided token")?;
        let mut inner = PoolInner {
            records: HashMap::new(),
            rotation: Vec::new(),
            cursor: 0,
            mode: PoolMode::Single,
            heartbeat: HeartbeatConfig::default(),
            file_tokens: Vec::new(),
        };
        inner.insert(TokenRecord::new("default".to_string(), client, true))?;

        Ok(Self {
            factory,
            config_path: None,
            inner: Mutex::new(inner),
        })
    }

    /// Build a pool with one anonymous, unowned token.
    pub fn anonymous(factory: Arc<dyn ClientFactory>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let client = factory
            .build(&[])
            .context("failed to build anonymous upstream client")?;
        let mut inner = PoolInner {
            records: HashMap::new(),
            rotation: Vec::new(),
            cursor: 0,
            mode: PoolMode::Anonymous,
            heartbeat: HeartbeatConfig::default(),
            file_tokens: Vec::new(),
        };
        inner.insert(TokenRecord::new("anonymous".to_string(), client, false))?;

        Ok(Self {
            factory,
            config_path: None,
            inner: Mutex::new(inner),
        })
    }

    fn locked(&self) -> MutexGuard<'_, PoolInner> {
        // A poisoned lock only means another thread panicked mid-write;
        // the state is still structurally sound, so keep serving.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Request path
    // ------------------------------------------------------------------

    /// Select the next token under the weighted-fair policy.
    ///
    /// Returns [`PoolError::Exhausted`] with the earliest cooldown
    /// deadline when nothing is available right now.
    pub fn acquire(&self) -> Result<Lease, PoolError> {
        let now = Utc::now();
        let mut inner = self.locked();
        let (selection, cursor) = pick(&inner.records, &inner.rotation, inner.cursor, now);
        inner.cursor = cursor;

        match selection {
            Selection::Token(id) => match inner.records.get(&id) {
                Some(record) => {
                    tracing::debug!(token = %id, weight = record.weight, "token acquired");
                    Ok(Lease {
                        id: id.clone(),
                        client: Arc::clone(&record.client),
                    })
                }
                None => Err(PoolError::UnknownToken(id)),
            },
            Selection::Exhausted { earliest } => {
                tracing::warn!(earliest = ?earliest, "token pool exhausted");
                Err(PoolError::Exhausted { earliest })
            }
        }
    }

    /// Report the outcome of one acquired request.
    ///
    /// Reporting against an id that has since been removed is a logged
    /// no-op: the acquire/report window legitimately races with admin
    /// `remove`.
    pub fn report(&self, id: &str, outcome: Outcome) {
        let now = Utc::now();
        let mut inner = self.locked();
        let Some(record) = inner.records.get_mut(id) else {
            tracing::warn!(token = %id, "outcome reported for a token no longer in the pool");
            return;
        };

        match outcome {
            Outcome::Success => {
                record.mark_success();
                tracing::debug!(token = %id, request_count = record.request_count, "request served");
            }
            Outcome::Failure => {
                record.mark_failure(now);
                tracing::warn!(
                    token = %id,
                    fail_count = record.fail_count,
                    available_after = ?record.available_after,
                    "token entered cooldown"
                );
            }
            Outcome::ProFailure => {
                record.mark_pro_failure();
                tracing::warn!(
                    token = %id,
                    weight = record.weight,
                    pro_fail_count = record.pro_fail_count,
                    "pro failure degraded token weight"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Admin path
    // ------------------------------------------------------------------

    /// Add an owned token at the tail of the rotation sequence.
    pub fn add(&self, id: &str, csrf_token: &str, session_token: &str) -> Result<(), PoolError> {
        {
            let inner = self.locked();
            if inner.records.contains_key(id) {
                return Err(PoolError::DuplicateToken(id.to_string()));
            }
        }

        // Handle construction may do real work; keep it outside the lock.
        let client = self
            .factory
            .build(&cookie_pairs(csrf_token, session_token))?;

        let mut inner = self.locked();
        inner.insert(TokenRecord::new(id.to_string(), client, true))?;
        if inner.records.len() > 1 {
            inner.mode = PoolMode::Pool;
        }
        tracing::info!(token = %id, total = inner.records.len(), "token added");
        Ok(())
    }

    /// Remove a token. Refused when the pool would be left empty or
    /// without any enabled token.
    pub fn remove(&self, id: &str) -> Result<(), PoolError> {
        let mut inner = self.locked();
        let Some(record) = inner.records.get(id) else {
            return Err(PoolError::UnknownToken(id.to_string()));
        };
        if inner.records.len() == 1 {
            return Err(PoolError::LastToken);
        }
        if record.enabled && inner.enabled_count() == 1 {
            return Err(PoolError::LastEnabledToken);
        }

        inner.records.remove(id);
        if let Some(pos) = inner.rotation.iter().position(|entry| entry == id) {
            inner.rotation.remove(pos);
            if inner.cursor > pos {
                inner.cursor -= 1;
            }
            if !inner.rotation.is_empty() {
                inner.cursor %= inner.rotation.len();
            } else {
                inner.cursor = 0;
            }
        }
        tracing::info!(token = %id, total = inner.records.len(), "token removed");
        Ok(())
    }

    /// Re-open a token for selection.
    pub fn enable(&self, id: &str) -> Result<(), PoolError> {
        let mut inner = self.locked();
        let Some(record) = inner.records.get_mut(id) else {
            return Err(PoolError::UnknownToken(id.to_string()));
        };
        record.enabled = true;
        tracing::info!(token = %id, "token enabled");
        Ok(())
    }

    /// Gate a token out of selection. Refused when it is the last
    /// enabled token.
    pub fn disable(&self, id: &str) -> Result<(), PoolError> {
        let mut inner = self.locked();
        let enabled_count = inner.enabled_count();
        let Some(record) = inner.records.get_mut(id) else {
            return Err(PoolError::UnknownToken(id.to_string()));
        };
        if record.enabled && enabled_count == 1 {
            return Err(PoolError::LastEnabledToken);
        }
        record.enabled = false;
        tracing::info!(token = %id, "token disabled");
        Ok(())
    }

    /// Clear a token's failure state and restore its default weight.
    pub fn reset(&self, id: &str) -> Result<(), PoolError> {
        let mut inner = self.locked();
        let Some(record) = inner.records.get_mut(id) else {
            return Err(PoolError::UnknownToken(id.to_string()));
        };
        record.reset();
        tracing::info!(token = %id, "token counters reset");
        Ok(())
    }

    /// Per-token diagnostics in rotation order.
    pub fn list(&self) -> Vec<TokenStatus> {
        let now = Utc::now();
        let inner = self.locked();
        inner
            .rotation
            .iter()
            .filter_map(|id| inner.records.get(id))
            .map(|record| record.status(now))
            .collect()
    }

    /// Full status snapshot: aggregates plus per-token diagnostics.
    pub fn status(&self) -> PoolStatus {
        let now = Utc::now();
        let inner = self.locked();
        let tokens: Vec<TokenStatus> = inner
            .rotation
            .iter()
            .filter_map(|id| inner.records.get(id))
            .map(|record| record.status(now))
            .collect();
        PoolStatus {
            total: tokens.len(),
            available: tokens.iter().filter(|status| status.available).count(),
            mode: inner.mode,
            tokens,
        }
    }

    pub fn mode(&self) -> PoolMode {
        self.locked().mode
    }

    pub fn len(&self) -> usize {
        self.locked().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().records.is_empty()
    }

    // ------------------------------------------------------------------
    // Heartbeat configuration
    // ------------------------------------------------------------------

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        self.locked().heartbeat.clone()
    }

    /// Replace the heartbeat config and persist it to the bootstrap
    /// config file when one exists.
    ///
    /// The in-memory update always sticks; a persistence failure is
    /// returned so the operator can retry the write.
    pub fn set_heartbeat_config(&self, heartbeat: HeartbeatConfig) -> Result<(), PoolError> {
        let snapshot = {
            let mut inner = self.locked();
            inner.heartbeat = heartbeat;
            PoolFileConfig {
                tokens: inner.file_tokens.clone(),
                heart_beat: inner.heartbeat.clone(),
            }
        };

        let Some(path) = &self.config_path else {
            return Ok(());
        };
        match snapshot.save(path) {
            Ok(()) => {
                tracing::info!(config = %path.display(), "heartbeat config persisted");
                Ok(())
            }
            Err(source) => {
                tracing::error!(
                    config = %path.display(),
                    error = %source,
                    "failed to persist heartbeat config"
                );
                Err(PoolError::Persist {
                    path: path.clone(),
                    source,
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Prober interface
    // ------------------------------------------------------------------

    /// Snapshot of the ids to probe, in rotation order.
    pub fn probe_targets(&self) -> Vec<String> {
        self.locked().rotation.clone()
    }

    /// The handle and ownership flag the prober needs for one token.
    pub fn probe_target(&self, id: &str) -> Result<(Arc<dyn UpstreamClient>, bool), PoolError> {
        let inner = self.locked();
        inner
            .records
            .get(id)
            .map(|record| (Arc::clone(&record.client), record.owned))
            .ok_or_else(|| PoolError::UnknownToken(id.to_string()))
    }

    /// Write a probe verdict and stamp the probe time. Returns the
    /// previous liveness so the caller can detect edges.
    pub fn apply_probe_result(
        &self,
        id: &str,
        state: Liveness,
        at: DateTime<Utc>,
    ) -> Result<Liveness, PoolError> {
        let mut inner = self.locked();
        let Some(record) = inner.records.get_mut(id) else {
            return Err(PoolError::UnknownToken(id.to_string()));
        };
        let previous = record.state;
        record.state = state;
        record.last_heartbeat = Some(at);
        if previous != state {
            tracing::info!(token = %id, from = %previous, to = %state, "token liveness changed");
        }
        Ok(previous)
    }
}
