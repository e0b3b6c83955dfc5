//! Runtime configuration.

use std::{path::PathBuf, time::Duration};

use keysweep_core::{DEFAULT_PAGE_SIZE, EngineConfig};

use crate::ServerError;

/// Default time between scheduled passes.
pub const DEFAULT_PASS_INTERVAL: Duration = Duration::from_secs(30);

/// Default time a one-shot command waits for a database another process has
/// open.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the store, engine and scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Path to the redb database file
    pub database: PathBuf,
    /// Time between scheduled passes
    pub pass_interval: Duration,
    /// Rows per page when streaming blocks and keys
    pub page_size: usize,
    /// Stop the scheduler when a pass hits an invariant violation. When
    /// false the violation is logged and retried like a transient failure.
    pub stop_on_invariant: bool,
    /// How long one-shot commands retry while the database is open elsewhere
    pub busy_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("keysweep.redb"),
            pass_interval: DEFAULT_PASS_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
            stop_on_invariant: true,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Reject values the engine or scheduler cannot run with.
    ///
    /// # Errors
    ///
    /// - `Config`: zero page size or zero interval
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.page_size == 0 {
            return Err(ServerError::Config("page size must be at least 1".to_string()));
        }

        if self.pass_interval.is_zero() {
            return Err(ServerError::Config("pass interval must be non-zero".to_string()));
        }

        Ok(())
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig { page_size: self.page_size }
    }
}
