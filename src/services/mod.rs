//! Services module
//!
//! Contains the token pool and the capability seams it consumes.

pub mod notify;
pub mod token_pool;
pub mod upstream;

pub use notify::{NoopNotifier, Notifier};
pub use token_pool::{
    AdminResponse, AdminStatus, Heartbeat, HeartbeatHandle, Lease, Liveness, Outcome, PoolMode,
    PoolStatus, ProbeReport, TokenPool, TokenStatus,
};
pub use upstream::{
    cookie_pairs, ClientFactory, SearchMode, SearchReply, SearchRequest, SearchSource, SessionInfo,
    SourceLink, UpstreamClient,
};
