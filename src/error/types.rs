//! Pool and upstream error types

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::PathBuf;
use thiserror::Error;

use crate::services::token_pool::Outcome;

/// Errors surfaced by the token pool to request workers and the admin caller.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("token '{0}' already exists")]
    DuplicateToken(String),

    #[error("token '{0}' not found")]
    UnknownToken(String),

    #[error("cannot remove the last token in the pool")]
    LastToken,

    #[error("cannot leave the pool without an enabled token")]
    LastEnabledToken,

    #[error("all tokens are currently unavailable{}", earliest_suffix(.earliest))]
    Exhausted { earliest: Option<DateTime<Utc>> },

    #[error("failed to build upstream client: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("failed to persist pool config to {}: {}", .path.display(), .source)]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn earliest_suffix(earliest: &Option<DateTime<Utc>>) -> String {
    match earliest {
        Some(at) => format!(
            "; earliest available at {}",
            at.to_rfc3339_opts(SecondsFormat::Secs, false)
        ),
        None => String::new(),
    }
}

/// Errors produced by the upstream search provider.
///
/// The variants carry the classification the pool needs: a quota
/// exhaustion leaves the token usable for basic modes and must only
/// degrade its weight, while everything else puts it into cooldown.
#[derive(Error, Debug, Clone)]
pub enum UpstreamError {
    /// The account has run out of a scoped capability (e.g. pro-mode
    /// quota) but can still serve basic queries.
    #[error("pro quota exhausted: {0}")]
    QuotaExhausted(String),

    /// The session cookies were rejected by the upstream service.
    #[error("session rejected by upstream: {0}")]
    SessionInvalid(String),

    /// Any other request failure (network, decode, upstream 5xx).
    #[error("upstream request failed: {0}")]
    Request(String),
}

impl UpstreamError {
    /// Map this failure onto the outcome tag the pool expects.
    ///
    /// Callers report the result of every acquired request; this is the
    /// one blessed classification, so no caller needs to inspect error
    /// messages.
    pub fn outcome(&self) -> Outcome {
        match self {
            UpstreamError::QuotaExhausted(_) => Outcome::ProFailure,
            UpstreamError::SessionInvalid(_) | UpstreamError::Request(_) => Outcome::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_exhausted_message_includes_earliest() {
        let at = Utc.with_ymd_and_hms(2026, 8, 1, 12, 5, 0).unwrap();
        let err = PoolError::Exhausted { earliest: Some(at) };
        assert_eq!(
            err.to_string(),
            "all tokens are currently unavailable; earliest available at 2026-08-01T12:05:00+00:00"
        );
    }

    #[test]
    fn test_exhausted_message_without_earliest() {
        let err = PoolError::Exhausted { earliest: None };
        assert_eq!(err.to_string(), "all tokens are currently unavailable");
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(
            UpstreamError::QuotaExhausted("pro searches remaining: 0".into()).outcome(),
            Outcome::ProFailure
        );
        assert_eq!(
            UpstreamError::Request("connection reset".into()).outcome(),
            Outcome::Failure
        );
        assert_eq!(
            UpstreamError::SessionInvalid("401".into()).outcome(),
            Outcome::Failure
        );
    }
}
