//! Keylease Common - Shared configuration, logging, and identity helpers
//!
//! This crate provides the ambient pieces used by every keylease component:
//! - Error type for configuration and startup failures
//! - Layered configuration (defaults, file, environment)
//! - Logging initialization
//! - Holder identity generation

pub mod config;
pub mod error;
pub mod identity;
pub mod logging;

// Re-exports for convenience
pub use config::{BackoffConfig, KeyleaseConfig, LockerConfig, StoreBackend, StoreConfig};
pub use error::KeyleaseError;
pub use identity::default_holder;
pub use logging::{LoggingConfig, LoggingGuard, init_logging};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "KEYLEASE";

/// Separator between nested keys in environment overrides (`KEYLEASE_STORE__BACKEND`)
pub const ENV_SEPARATOR: &str = "__";

/// Default configuration file name looked up when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "keylease";
