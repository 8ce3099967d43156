//! Holder identity generation
//!
//! A holder identity is written as the value of every lock record and is the
//! token compared by release and renewal scripts, so it must be unique across
//! every process that may contend for the same key.

use uuid::Uuid;

const UNKNOWN_HOST: &str = "unknown-host";

/// Build a fresh holder identity: `{hostname}-{pid}-{uuid_v4}`.
///
/// The random suffix carries 122 bits of entropy, which keeps collisions
/// between processes on the same host negligible.
pub fn default_holder() -> String {
    format!("{}-{}-{}", host_name(), std::process::id(), Uuid::new_v4())
}

/// Local host name, or a fixed placeholder when it cannot be read
pub fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}
