//! Per-token state record
//!
//! A [`TokenRecord`] is a passive value: all mutation happens inside
//! the pool's critical section, so fields are plain data rather than
//! atomics.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::services::upstream::UpstreamClient;

/// Weight assigned to a fresh or fully recovered token.
pub const DEFAULT_WEIGHT: u32 = 100;

/// Floor a token's weight can decay to.
pub const MIN_WEIGHT: u32 = 10;

/// Weight lost on each pro failure.
pub const WEIGHT_DECAY: u32 = 10;

/// Weight regained on each success.
pub const WEIGHT_RECOVERY: u32 = 5;

/// Cooldown after the first consecutive failure, in seconds.
pub const INITIAL_BACKOFF_SECS: i64 = 60;

/// Cooldown ceiling, in seconds.
pub const MAX_BACKOFF_SECS: i64 = 3600;

/// The prober's belief about a token's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// Last probe succeeded end to end.
    Normal,
    /// Last probe found the session dead or the query unanswered.
    Offline,
    /// Never probed since creation.
    Unknown,
    /// Unowned token; probes are skipped.
    Anonymous,
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Liveness::Normal => write!(f, "normal"),
            Liveness::Offline => write!(f, "offline"),
            Liveness::Unknown => write!(f, "unknown"),
            Liveness::Anonymous => write!(f, "anonymous"),
        }
    }
}

/// Caller-reported result of one acquired request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The request was served; clears failure state and recovers weight.
    Success,
    /// A transient failure; drives exponential backoff.
    Failure,
    /// A scoped-capability exhaustion (e.g. pro quota); degrades weight
    /// without any cooldown, since the token still serves basic modes.
    ProFailure,
}

/// One token's complete runtime state.
pub struct TokenRecord {
    pub(crate) id: String,
    pub(crate) client: Arc<dyn UpstreamClient>,
    pub(crate) owned: bool,
    pub(crate) enabled: bool,
    pub(crate) fail_count: u32,
    pub(crate) available_after: Option<DateTime<Utc>>,
    pub(crate) weight: u32,
    pub(crate) pro_fail_count: u32,
    pub(crate) request_count: u64,
    pub(crate) state: Liveness,
    pub(crate) last_heartbeat: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub(crate) fn new(id: String, client: Arc<dyn UpstreamClient>, owned: bool) -> Self {
        Self {
            id,
            client,
            owned,
            enabled: true,
            fail_count: 0,
            available_after: None,
            weight: DEFAULT_WEIGHT,
            pro_fail_count: 0,
            request_count: 0,
            state: if owned {
                Liveness::Unknown
            } else {
                Liveness::Anonymous
            },
            last_heartbeat: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    pub fn state(&self) -> Liveness {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the token may be handed out: enabled and past any
    /// cooldown deadline.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.available_after.map_or(true, |after| now >= after)
    }

    /// Record a served request: failure state clears, the request
    /// counter advances, and weight recovers toward the default.
    pub(crate) fn mark_success(&mut self) {
        self.fail_count = 0;
        self.available_after = None;
        self.request_count += 1;
        if self.weight < DEFAULT_WEIGHT {
            self.weight = (self.weight + WEIGHT_RECOVERY).min(DEFAULT_WEIGHT);
        }
    }

    /// Record a transient failure: the cooldown doubles per consecutive
    /// failure (60s, 120s, 240s, ...) and saturates at one hour.
    pub(crate) fn mark_failure(&mut self, now: DateTime<Utc>) {
        self.fail_count += 1;
        // 60 << 6 already exceeds the cap, so clamping the shift keeps
        // the arithmetic exact for arbitrarily long failure runs.
        let shift = (self.fail_count - 1).min(6);
        let backoff = (INITIAL_BACKOFF_SECS << shift).min(MAX_BACKOFF_SECS);
        self.available_after = Some(now + Duration::seconds(backoff));
    }

    /// Record a pro-capability failure: weight drops toward the floor,
    /// cooldown untouched so the token keeps serving basic modes.
    pub(crate) fn mark_pro_failure(&mut self) {
        self.pro_fail_count += 1;
        self.weight = self.weight.saturating_sub(WEIGHT_DECAY).max(MIN_WEIGHT);
    }

    /// Administrative reset: both failure counters, the cooldown, and
    /// the weight return to their initial values. Enabled flag and
    /// liveness belief are untouched.
    pub(crate) fn reset(&mut self) {
        self.fail_count = 0;
        self.pro_fail_count = 0;
        self.available_after = None;
        self.weight = DEFAULT_WEIGHT;
    }

    /// Diagnostic projection for the status endpoint.
    pub fn status(&self, now: DateTime<Utc>) -> TokenStatus {
        let available = self.is_available(now);
        TokenStatus {
            id: self.id.clone(),
            available,
            enabled: self.enabled,
            state: self.state,
            fail_count: self.fail_count,
            next_available_at: if available {
                None
            } else {
                self.available_after.map(format_utc)
            },
            last_heartbeat_at: self.last_heartbeat.map(format_utc),
            request_count: self.request_count,
            weight: self.weight,
            pro_fail_count: self.pro_fail_count,
        }
    }
}

fn format_utc(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Serializable per-token diagnostics. Timestamps are ISO-8601 UTC
/// with an explicit `+00:00` offset.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenStatus {
    pub id: String,
    pub available: bool,
    pub enabled: bool,
    pub state: Liveness,
    pub fail_count: u32,
    pub next_available_at: Option<String>,
    pub last_heartbeat_at: Option<String>,
    pub request_count: u64,
    pub weight: u32,
    pub pro_fail_count: u32,
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::FakeClient;
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str) -> TokenRecord {
        TokenRecord::new(id.to_string(), FakeClient::online(), true)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_770_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_new_record_defaults() {
        let rec = record("a");
        assert_eq!(rec.weight, DEFAULT_WEIGHT);
        assert_eq!(rec.fail_count, 0);
        assert_eq!(rec.pro_fail_count, 0);
        assert_eq!(rec.request_count, 0);
        assert!(rec.enabled);
        assert_eq!(rec.state, Liveness::Unknown);
        assert!(rec.is_available(t(0)));

        let anon = TokenRecord::new("anonymous".to_string(), FakeClient::online(), false);
        assert_eq!(anon.state, Liveness::Anonymous);
    }

    #[test]
    fn test_backoff_walk_doubles_per_failure() {
        let mut rec = record("a");
        let expected = [60, 120, 240, 480, 960];

        for (i, expected_secs) in expected.iter().enumerate() {
            let now = t(i as i64);
            rec.mark_failure(now);
            assert_eq!(rec.fail_count, i as u32 + 1);
            assert_eq!(
                rec.available_after,
                Some(now + Duration::seconds(*expected_secs))
            );
            assert!(!rec.is_available(now));
        }

        // After the fifth failure, the deadline sits 960s past t=4.
        assert_eq!(rec.available_after, Some(t(4) + Duration::seconds(960)));

        rec.mark_success();
        assert_eq!(rec.fail_count, 0);
        assert_eq!(rec.available_after, None);
        assert_eq!(rec.request_count, 1);
        assert!(rec.is_available(t(5)));
    }

    #[test]
    fn test_backoff_saturates_at_one_hour() {
        let mut rec = record("a");
        for i in 0..20 {
            rec.mark_failure(t(i));
        }
        assert_eq!(rec.available_after, Some(t(19) + Duration::seconds(3600)));
    }

    #[test]
    fn test_success_is_idempotent_on_failure_state() {
        let mut rec = record("a");
        rec.mark_failure(t(0));
        rec.mark_success();
        rec.mark_success();
        assert_eq!(rec.fail_count, 0);
        assert_eq!(rec.available_after, None);
        assert_eq!(rec.request_count, 2);
    }

    #[test]
    fn test_weight_saturates_at_both_ends() {
        let mut rec = record("a");

        for _ in 0..10 {
            rec.mark_pro_failure();
        }
        assert_eq!(rec.weight, MIN_WEIGHT);
        assert_eq!(rec.pro_fail_count, 10);

        // One more decay stays on the floor.
        rec.mark_pro_failure();
        assert_eq!(rec.weight, MIN_WEIGHT);

        for _ in 0..18 {
            rec.mark_success();
        }
        assert_eq!(rec.weight, DEFAULT_WEIGHT);

        rec.mark_success();
        assert_eq!(rec.weight, DEFAULT_WEIGHT);
    }

    #[test]
    fn test_pro_failure_leaves_cooldown_untouched() {
        let mut rec = record("a");
        rec.mark_pro_failure();
        assert_eq!(rec.available_after, None);
        assert!(rec.is_available(t(0)));
        assert_eq!(rec.fail_count, 0);
    }

    #[test]
    fn test_reset_restores_initial_counters() {
        let mut rec = record("a");
        rec.mark_failure(t(0));
        rec.mark_failure(t(1));
        for _ in 0..4 {
            rec.mark_pro_failure();
        }
        rec.enabled = false;
        rec.state = Liveness::Offline;

        rec.reset();

        assert_eq!(rec.fail_count, 0);
        assert_eq!(rec.pro_fail_count, 0);
        assert_eq!(rec.available_after, None);
        assert_eq!(rec.weight, DEFAULT_WEIGHT);
        // Reset does not touch the administrative gate or the belief.
        assert!(!rec.enabled);
        assert_eq!(rec.state, Liveness::Offline);
    }

    #[test]
    fn test_disabled_record_is_never_available() {
        let mut rec = record("a");
        rec.enabled = false;
        assert!(!rec.is_available(t(0)));
    }

    #[test]
    fn test_status_projection() {
        let mut rec = record("a");
        let now = t(0);

        let status = rec.status(now);
        assert!(status.available);
        assert_eq!(status.next_available_at, None);
        assert_eq!(status.last_heartbeat_at, None);
        assert_eq!(status.weight, DEFAULT_WEIGHT);

        rec.mark_failure(now);
        rec.state = Liveness::Normal;
        rec.last_heartbeat = Some(now);

        let status = rec.status(now);
        assert!(!status.available);
        assert_eq!(status.fail_count, 1);
        let next = status.next_available_at.expect("cooldown deadline");
        assert!(next.ends_with("+00:00"));
        assert_eq!(
            status.last_heartbeat_at.as_deref(),
            Some(now.to_rfc3339_opts(SecondsFormat::Secs, false).as_str())
        );
    }

    #[test]
    fn test_status_serializes_expected_keys() {
        let rec = record("alpha");
        let value = serde_json::to_value(rec.status(t(0))).expect("serialize");
        let object = value.as_object().expect("object");

        for key in [
            "id",
            "available",
            "enabled",
            "state",
            "fail_count",
            "next_available_at",
            "last_heartbeat_at",
            "request_count",
            "weight",
            "pro_fail_count",
        ] {
            assert!(object.contains_key(key), "missing key {key}");
        }
        assert_eq!(object["state"], "unknown");
    }
}
