//! Core configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default lease lifetime: long enough for a slow upload, short enough that
/// an abandoned upload does not block the slot for long.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(5 * 60);

/// Default interval between lease reaper sweeps.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the upload coordinator.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Root of the per-user scratch directories.
    pub staging_root: PathBuf,

    /// Root of the per-user durable directories.
    pub storage_root: PathBuf,

    /// Whether to create the roots if they don't exist.
    pub create_if_missing: bool,

    /// Lifetime of a lease from the moment it is granted.
    pub lease_ttl: Duration,

    /// How often expired leases are evicted.
    pub reap_interval: Duration,

    /// Largest accepted upload in bytes (`None` = unlimited).
    pub max_upload_size: Option<u64>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from("cache"),
            storage_root: PathBuf::from("storage"),
            create_if_missing: true,
            lease_ttl: DEFAULT_LEASE_TTL,
            reap_interval: DEFAULT_REAP_INTERVAL,
            max_upload_size: None,
        }
    }
}

impl CoreConfig {
    /// Creates a configuration with the given roots and default limits.
    #[must_use]
    pub fn new(staging_root: impl Into<PathBuf>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            storage_root: storage_root.into(),
            ..Self::default()
        }
    }

    /// Sets whether to create missing roots.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the lease lifetime.
    #[must_use]
    pub const fn lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Sets the reaper interval.
    #[must_use]
    pub const fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Sets the upload size limit.
    #[must_use]
    pub const fn max_upload_size(mut self, bytes: u64) -> Self {
        self.max_upload_size = Some(bytes);
        self
    }
}
