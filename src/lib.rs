//! Perplexity token pool
//!
//! A multi-token credential pool for a conversational-search gateway:
//! weighted-fair selection with round-robin among equals, exponential
//! backoff on transient failures, weight decay on pro-quota
//! exhaustion, and a background heartbeat prober with edge-triggered
//! offline notifications.

// Public modules
pub mod config;
pub mod error;
pub mod services;

// Re-export commonly used types
pub use config::{HeartbeatConfig, PoolFileConfig, TokenEntry};
pub use error::{PoolError, UpstreamError};
pub use services::notify::{NoopNotifier, Notifier};
pub use services::token_pool::{
    AdminResponse, Heartbeat, HeartbeatHandle, Lease, Liveness, Outcome, PoolMode, PoolStatus,
    TokenPool, TokenStatus,
};
pub use services::upstream::{
    ClientFactory, SearchMode, SearchReply, SearchRequest, SearchSource, SessionInfo,
    UpstreamClient,
};
