//! Keysweep server.
//!
//! Production glue around [`keysweep_core`]: a durable Redb store, a Tokio
//! scheduler that runs matching passes on an interval, key file import and
//! the configuration the `keysweep` binary is built from.
//!
//! # Components
//!
//! - [`RedbStore`]: durable [`MatchStore`], one write transaction per pass
//! - [`RedbFile`]: the same database opened per operation, so other processes
//!   can append between passes
//! - [`Scheduler`]: periodic pass driver with retry and shutdown
//! - [`ServerConfig`]: database path, interval, page size, failure policy
//! - [`parse_keys`] / [`read_key_file`]: key file import

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod import;
mod scheduler;
pub mod storage;

pub use config::{DEFAULT_BUSY_TIMEOUT, DEFAULT_PASS_INTERVAL, ServerConfig};
pub use error::ServerError;
pub use import::{parse_keys, read_key_file};
pub use keysweep_core::MatchStore;
pub use scheduler::{Scheduler, SchedulerSummary};
pub use storage::{RedbFile, RedbPass, RedbStore};
