//! Database configuration.

use std::time::Duration;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database file if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to error if the database file already exists.
    pub error_if_exists: bool,

    /// How long the storage engine retries when the file is locked before
    /// an operation fails with `Busy`.
    pub busy_timeout: Duration,

    /// Bound on the in-memory change history retained for polling
    /// observers.
    pub change_history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            busy_timeout: Duration::from_secs(10),
            change_history_limit: 10_000,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to error if the database exists.
    #[must_use]
    pub const fn error_if_exists(mut self, value: bool) -> Self {
        self.error_if_exists = value;
        self
    }

    /// Sets the busy-retry window.
    #[must_use]
    pub const fn busy_timeout(mut self, value: Duration) -> Self {
        self.busy_timeout = value;
        self
    }

    /// Sets the change-history bound.
    #[must_use]
    pub const fn change_history_limit(mut self, value: usize) -> Self {
        self.change_history_limit = value;
        self
    }
}
