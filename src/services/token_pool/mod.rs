//! Token Pool Module
//!
//! Manages a pool of upstream session tokens with weighted-fair
//! selection, exponential backoff on transient failures, weight decay
//! on pro-quota exhaustion, and a background heartbeat prober that
//! keeps the pool's liveness belief accurate.
//!
//! # Example
//! ```ignore
//! use pplx_token_pool::{Heartbeat, NoopNotifier, Outcome, TokenPool};
//!
//! let pool = Arc::new(TokenPool::bootstrap(factory, None)?);
//! let heartbeat = Heartbeat::spawn(pool.clone(), Arc::new(NoopNotifier));
//!
//! let lease = pool.acquire()?;
//! match lease.client.search(&request).await {
//!     Ok(reply) => pool.report(&lease.id, Outcome::Success),
//!     Err(err) => pool.report(&lease.id, err.outcome()),
//! }
//!
//! heartbeat.shutdown().await;
//! ```

mod heartbeat;
mod pool;
mod record;
mod select;

pub use heartbeat::{
    Heartbeat, HeartbeatHandle, ProbeReport, MAX_CONCURRENT_PROBES, PROBE_SLOT_DELAY,
};
pub use pool::{AdminResponse, AdminStatus, Lease, PoolMode, PoolStatus, TokenPool};
pub use record::{
    Liveness, Outcome, TokenRecord, TokenStatus, DEFAULT_WEIGHT, INITIAL_BACKOFF_SECS,
    MAX_BACKOFF_SECS, MIN_WEIGHT, WEIGHT_DECAY, WEIGHT_RECOVERY,
};
