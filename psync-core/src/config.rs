//! Driver configuration.

use std::time::Duration;

/// Default deadline for each polling phase.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Polling and deadline settings for a [`crate::Driver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Deadline for the create polling phase.
    pub create_timeout: Duration,
    /// Deadline for the update polling phase.
    pub update_timeout: Duration,
    /// Deadline for the delete polling phase.
    pub delete_timeout: Duration,
    /// Wait between the first and second poll.
    pub poll_interval: Duration,
    /// Upper bound for the doubling poll interval.
    pub max_poll_interval: Duration,
    /// Consecutive not-found answers tolerated while waiting for a freshly
    /// written resource to become visible.
    pub not_found_checks: u32,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            create_timeout: DEFAULT_TIMEOUT,
            update_timeout: DEFAULT_TIMEOUT,
            delete_timeout: DEFAULT_TIMEOUT,
            poll_interval: Duration::from_secs(1),
            max_poll_interval: Duration::from_secs(10),
            not_found_checks: 20,
        }
    }
}

impl DriverConfig {
    /// Use the same deadline for create, update and delete.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self.update_timeout = timeout;
        self.delete_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, initial: Duration, max: Duration) -> Self {
        self.poll_interval = initial;
        self.max_poll_interval = max.max(initial);
        self
    }

    pub fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }
}
