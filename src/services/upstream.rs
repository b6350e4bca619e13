//! Upstream client capability seam
//!
//! The pool never talks to the search provider directly. It holds one
//! opaque [`UpstreamClient`] handle per token, built by a
//! [`ClientFactory`] from the token's cookie pairs. The concrete wire
//! codec (request construction, streaming decode, answer extraction)
//! lives behind this trait in an external collaborator; tests
//! substitute scripted fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::UpstreamError;

/// Cookie carrying the CSRF token for the upstream session.
pub const CSRF_COOKIE: &str = "next-auth.csrf-token";

/// Cookie carrying the session token for the upstream session.
pub const SESSION_COOKIE: &str = "__Secure-next-auth.session-token";

/// Convert a token's secret material into the cookie pairs the
/// upstream handle factory expects. The pool treats both values as
/// opaque.
pub fn cookie_pairs(csrf_token: &str, session_token: &str) -> Vec<(String, String)> {
    vec![
        (CSRF_COOKIE.to_string(), csrf_token.to_string()),
        (SESSION_COOKIE.to_string(), session_token.to_string()),
    ]
}

/// Search tier requested from the upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Fast tier; does not consume account quota.
    Auto,
    /// Pro tier with quota accounting.
    Pro,
    /// Multi-step reasoning tier.
    Reasoning,
    /// Long-running deep research tier.
    DeepResearch,
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Auto => write!(f, "auto"),
            SearchMode::Pro => write!(f, "pro"),
            SearchMode::Reasoning => write!(f, "reasoning"),
            SearchMode::DeepResearch => write!(f, "deep_research"),
        }
    }
}

/// Corpus the upstream searches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    Web,
    Scholar,
    Social,
}

/// A single upstream query.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub sources: Vec<SearchSource>,
    pub language: String,
    pub incognito: bool,
}

impl SearchRequest {
    /// Build a request with the default web source and language.
    pub fn new(query: impl Into<String>, mode: SearchMode) -> Self {
        Self {
            query: query.into(),
            mode,
            sources: vec![SearchSource::Web],
            language: "en-US".to_string(),
            incognito: false,
        }
    }

    /// The minimal liveness-check query: cheapest tier, web only, and
    /// never incognito so the account registers real activity.
    pub fn heartbeat(question: impl Into<String>) -> Self {
        Self {
            query: question.into(),
            mode: SearchMode::Auto,
            sources: vec![SearchSource::Web],
            language: "zh-CN".to_string(),
            incognito: false,
        }
    }

    pub fn with_sources(mut self, sources: Vec<SearchSource>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_incognito(mut self, incognito: bool) -> Self {
        self.incognito = incognito;
        self
    }
}

/// One source link cited by an answer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceLink {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// The normalized reply shape: final answer plus cited sources.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SearchReply {
    pub answer: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceLink>,
}

impl SearchReply {
    pub fn has_answer(&self) -> bool {
        self.answer.is_some()
    }
}

/// Session details reported by the upstream auth endpoint.
///
/// The `user` field is kept loosely typed: the upstream returns an
/// arbitrary profile object and the pool only cares whether it is
/// present and non-empty.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub user: Option<Value>,
    #[serde(default)]
    pub expires: Option<String>,
}

impl SessionInfo {
    /// A session counts as logged in iff it carries a non-empty `user`.
    pub fn is_logged_in(&self) -> bool {
        match &self.user {
            None | Some(Value::Null) => false,
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }
}

/// Narrow capability the pool requires from the upstream provider.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Issue one search and return the normalized reply.
    async fn search(&self, request: &SearchRequest) -> Result<SearchReply, UpstreamError>;

    /// Fetch the current session details (the `/api/auth/session`
    /// equivalent) for liveness checks.
    async fn session_info(&self) -> Result<SessionInfo, UpstreamError>;
}

/// Builds upstream handles from cookie pairs.
///
/// An empty cookie slice requests an anonymous handle. Construction
/// must not block: real factories prepare a lazily-connecting client.
pub trait ClientFactory: Send + Sync {
    fn build(&self, cookies: &[(String, String)]) -> Result<Arc<dyn UpstreamClient>, UpstreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cookie_pairs_use_upstream_names() {
        let pairs = cookie_pairs("csrf-abc", "sess-xyz");
        assert_eq!(
            pairs,
            vec![
                ("next-auth.csrf-token".to_string(), "csrf-abc".to_string()),
                (
                    "__Secure-next-auth.session-token".to_string(),
                    "sess-xyz".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_heartbeat_request_is_minimal() {
        let request = SearchRequest::heartbeat("现在是农历几月几号？");
        assert_eq!(request.mode, SearchMode::Auto);
        assert_eq!(request.sources, vec![SearchSource::Web]);
        assert!(!request.incognito);
        assert_eq!(request.query, "现在是农历几月几号？");
    }

    #[test]
    fn test_session_logged_in_requires_non_empty_user() {
        let absent = SessionInfo::default();
        assert!(!absent.is_logged_in());

        let null_user = SessionInfo {
            user: Some(Value::Null),
            expires: None,
        };
        assert!(!null_user.is_logged_in());

        let empty_object = SessionInfo {
            user: Some(json!({})),
            expires: None,
        };
        assert!(!empty_object.is_logged_in());

        let profile = SessionInfo {
            user: Some(json!({"email": "someone@example.com"})),
            expires: Some("2026-08-03T00:00:00.000Z".to_string()),
        };
        assert!(profile.is_logged_in());
    }

    #[test]
    fn test_session_info_deserializes_partial_payloads() {
        let info: SessionInfo = serde_json::from_str("{}").expect("empty object");
        assert!(!info.is_logged_in());

        let info: SessionInfo =
            serde_json::from_str(r#"{"user": {"name": "u"}, "expires": "soon"}"#).expect("full");
        assert!(info.is_logged_in());
        assert_eq!(info.expires.as_deref(), Some("soon"));
    }

    #[test]
    fn test_search_mode_serialization() {
        assert_eq!(
            serde_json::to_string(&SearchMode::DeepResearch).expect("serialize"),
            "\"deep_research\""
        );
        assert_eq!(SearchMode::Pro.to_string(), "pro");
    }
}
