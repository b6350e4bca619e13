//! Configuration management module
//!
//! Handles the on-disk pool config file and the env-var fallbacks used
//! to bootstrap single-token deployments.

pub mod settings;

pub use settings::{
    env_token, resolve_config_path, EnvToken, HeartbeatConfig, PoolFileConfig, TokenEntry,
    DEFAULT_CONFIG_FILE, ENV_CONFIG_PATH, ENV_CSRF_TOKEN, ENV_CSRF_TOKEN_LEGACY, ENV_SESSION_TOKEN,
};
