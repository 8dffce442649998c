//! Router configuration.
//!
//! Every tunable the heartbeat engine and the session bootstrap consult is
//! collected here so deployments can adjust them without code changes. The
//! retry threshold and the reconnection wait bounds were hard-coded in
//! earlier revisions of this protocol; they are plain fields now.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};

/// Fallback heartbeat interval applied when `sync_interval` is zero or
/// negative.
pub const DEFAULT_SYNC_INTERVAL: i64 = 10;

/// Consecutive probe transport failures after which a peer switches from
/// direct probing to sync recovery.
pub const DEFAULT_RETRY_THRESHOLD: u32 = 3;

/// Default base32 symbol count of an issued receive secret.
pub const DEFAULT_SECRET_LENGTH: usize = 8;

/// Static configuration of a [`ServiceRouter`](crate::ServiceRouter).
///
/// The credential validator and the address-change listener are behavior,
/// not configuration; they live on the router itself and are re-injected
/// after a persistence load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// UUID of the device this router speaks for.
    pub device_uuid: String,

    /// Heartbeat interval in seconds. Values of zero or below fall back to
    /// [`DEFAULT_SYNC_INTERVAL`] when the loop starts.
    pub sync_interval: i64,

    /// Probe failures tolerated before a peer enters sync recovery.
    #[serde(default = "default_retry_threshold")]
    pub retry_threshold: u32,

    /// Lower bound in seconds a caller should wait before re-establishing
    /// a dropped session.
    #[serde(default = "default_retry_wait_min")]
    pub retry_wait_min: u64,

    /// Upper bound in seconds for the same reconnection wait.
    #[serde(default = "default_retry_wait_max")]
    pub retry_wait_max: u64,

    /// Base32 symbol count of secrets issued to handshaking peers.
    /// Verification accepts any length a remote issues, so raising this
    /// does not break interop with older deployments.
    #[serde(default = "default_secret_length")]
    pub issued_secret_length: usize,
}

fn default_retry_threshold() -> u32 {
    DEFAULT_RETRY_THRESHOLD
}

fn default_retry_wait_min() -> u64 {
    10
}

fn default_retry_wait_max() -> u64 {
    120
}

fn default_secret_length() -> usize {
    DEFAULT_SECRET_LENGTH
}

impl RouterConfig {
    /// Configuration with protocol defaults for the given device UUID.
    pub fn new(device_uuid: impl Into<String>) -> Self {
        Self {
            device_uuid: device_uuid.into(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            retry_threshold: DEFAULT_RETRY_THRESHOLD,
            retry_wait_min: default_retry_wait_min(),
            retry_wait_max: default_retry_wait_max(),
            issued_secret_length: DEFAULT_SECRET_LENGTH,
        }
    }

    /// Heartbeat interval actually used by the loop.
    pub fn effective_interval(&self) -> i64 {
        if self.sync_interval <= 0 {
            DEFAULT_SYNC_INTERVAL
        } else {
            self.sync_interval
        }
    }

    /// Validates the configuration before a router is constructed from it.
    pub fn validate(&self) -> Result<()> {
        if self.device_uuid.trim().is_empty() {
            return Err(RouterError::Config("device UUID must not be empty".into()));
        }
        if self.retry_threshold == 0 {
            return Err(RouterError::Config("retry threshold must be at least 1".into()));
        }
        if self.retry_wait_min > self.retry_wait_max {
            return Err(RouterError::Config(format!(
                "retry wait bounds are inverted: {}..{}",
                self.retry_wait_min, self.retry_wait_max
            )));
        }
        if self.issued_secret_length == 0 {
            return Err(RouterError::Config("issued secret length must be at least 1".into()));
        }
        Ok(())
    }
}
