//! Background liveness prober
//!
//! One long-lived task wakes every configured interval and probes each
//! token: a login check against the session endpoint, then a minimal
//! activity query. Probes run with bounded concurrency on the pool's
//! scheduler; the pool lock is only held for the snapshot at the start
//! and the liveness write at the end of each probe. A transition into
//! `offline` fires exactly one notification.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::PoolError;
use crate::services::notify::Notifier;
use crate::services::upstream::SearchRequest;

use super::pool::TokenPool;
use super::record::Liveness;

/// Upper bound on simultaneous probes.
pub const MAX_CONCURRENT_PROBES: usize = 5;

/// Pause after each probe before its slot frees up, so a large pool is
/// probed in a spread-out trickle rather than bursts.
pub const PROBE_SLOT_DELAY: Duration = Duration::from_millis(500);

/// What one probe concluded about a token.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProbeVerdict {
    /// Unowned token; both checks skipped.
    Anonymous,
    /// Session alive and the activity query answered.
    Online,
    /// The session endpoint reported no user.
    NotLoggedIn,
    /// Logged in, but the activity query came back without an answer.
    NoAnswer,
    /// Either check failed outright.
    Failed(String),
}

impl ProbeVerdict {
    fn liveness(&self) -> Liveness {
        match self {
            ProbeVerdict::Anonymous => Liveness::Anonymous,
            ProbeVerdict::Online => Liveness::Normal,
            ProbeVerdict::NotLoggedIn | ProbeVerdict::NoAnswer | ProbeVerdict::Failed(_) => {
                Liveness::Offline
            }
        }
    }

    fn reason(&self) -> Option<String> {
        match self {
            ProbeVerdict::Anonymous | ProbeVerdict::Online => None,
            ProbeVerdict::NotLoggedIn => Some("not logged in".to_string()),
            ProbeVerdict::NoAnswer => Some("heartbeat query failed (no answer)".to_string()),
            ProbeVerdict::Failed(message) => Some(format!("heartbeat exception: {message}")),
        }
    }
}

/// Outcome of probing one token.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub id: String,
    pub state: Liveness,
    pub reason: Option<String>,
}

/// Handle to a spawned heartbeat task.
pub struct HeartbeatHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Request a stop; the task exits at its next sleep point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                tracing::error!(error = %err, "heartbeat task ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// The prober itself: a pool reference plus the notification channel.
pub struct Heartbeat {
    pool: Arc<TokenPool>,
    notifier: Arc<dyn Notifier>,
}

impl Heartbeat {
    pub fn new(pool: Arc<TokenPool>, notifier: Arc<dyn Notifier>) -> Self {
        Self { pool, notifier }
    }

    /// Spawn the probe loop on the current runtime.
    pub fn spawn(pool: Arc<TokenPool>, notifier: Arc<dyn Notifier>) -> HeartbeatHandle {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Self::new(pool, notifier).run(cancel.clone()));
        HeartbeatHandle { cancel, task }
    }

    /// Sleep, probe everything, repeat. Nothing inside one cycle can
    /// stop the loop; only cancellation does.
    async fn run(self, cancel: CancellationToken) {
        tracing::info!("heartbeat task started");
        loop {
            let interval = self.pool.heartbeat_config().interval_duration();
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("heartbeat task stopping");
                    return;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            // Re-read so runtime config edits take effect next cycle.
            if !self.pool.heartbeat_config().enable {
                continue;
            }
            self.probe_all(&cancel).await;
        }
    }

    /// Probe every token currently in the pool, at most
    /// [`MAX_CONCURRENT_PROBES`] at a time.
    pub async fn probe_all(&self, cancel: &CancellationToken) {
        let question = self.pool.heartbeat_config().question;
        let ids = self.pool.probe_targets();
        tracing::debug!(total = ids.len(), "heartbeat cycle started");

        let slots = Arc::new(Semaphore::new(MAX_CONCURRENT_PROBES));
        let mut probes = JoinSet::new();

        for id in ids {
            let pool = Arc::clone(&self.pool);
            let notifier = Arc::clone(&self.notifier);
            let slots = Arc::clone(&slots);
            let cancel = cancel.clone();
            let question = question.clone();

            probes.spawn(async move {
                let Ok(_permit) = slots.acquire().await else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }

                match probe_token(&pool, notifier.as_ref(), &question, &id).await {
                    Ok(report) => {
                        tracing::debug!(
                            token = %report.id,
                            state = %report.state,
                            reason = ?report.reason,
                            "heartbeat probe finished"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(token = %id, error = %err, "heartbeat probe skipped");
                    }
                }

                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(PROBE_SLOT_DELAY) => {}
                }
            });
        }

        while let Some(joined) = probes.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "heartbeat probe task aborted");
            }
        }
        tracing::debug!("heartbeat cycle finished");
    }

    /// Probe a single token on demand, using the configured question.
    pub async fn probe_token(&self, id: &str) -> Result<ProbeReport, PoolError> {
        let question = self.pool.heartbeat_config().question;
        probe_token(&self.pool, self.notifier.as_ref(), &question, id).await
    }
}

/// Run both probe checks for one token, write the verdict back, and
/// fire the edge notification when the token just dropped offline.
async fn probe_token(
    pool: &TokenPool,
    notifier: &dyn Notifier,
    question: &str,
    id: &str,
) -> Result<ProbeReport, PoolError> {
    let (client, owned) = pool.probe_target(id)?;

    let verdict = if !owned {
        ProbeVerdict::Anonymous
    } else {
        match client.session_info().await {
            Ok(session) if session.is_logged_in() => {
                let request = SearchRequest::heartbeat(question);
                match client.search(&request).await {
                    Ok(reply) if reply.has_answer() => ProbeVerdict::Online,
                    Ok(_) => ProbeVerdict::NoAnswer,
                    Err(err) => ProbeVerdict::Failed(err.to_string()),
                }
            }
            Ok(_) => ProbeVerdict::NotLoggedIn,
            Err(err) => ProbeVerdict::Failed(err.to_string()),
        }
    };

    let state = verdict.liveness();
    let reason = verdict.reason();
    let previous = pool.apply_probe_result(id, state, Utc::now())?;

    if state == Liveness::Offline && previous != Liveness::Offline {
        if let Some(reason) = &reason {
            let message = format!("⚠️ <b>{id}</b> {reason}");
            if let Err(err) = notifier.emit(&message).await {
                tracing::warn!(token = %id, error = %err, "failed to emit offline notification");
            }
        }
    }

    Ok(ProbeReport {
        id: id.to_string(),
        state,
        reason,
    })
}
