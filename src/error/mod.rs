//! Error types for the token pool and its upstream seam

pub mod types;

pub use types::{PoolError, UpstreamError};
