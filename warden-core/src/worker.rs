//! ## warden-core::worker
//! **Contracts for the watcher and actuator threads a jail drives**

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendKind;
use crate::error::ConfigurationError;
use crate::ticket::Ticket;

/// Which flavor of status a caller asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFlavor {
    #[default]
    Basic,
    Stats,
}

impl FromStr for StatusFlavor {
    type Err = ConfigurationError;

    fn from_str(flavor: &str) -> Result<Self, Self::Err> {
        match flavor.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(StatusFlavor::Basic),
            "stats" => Ok(StatusFlavor::Stats),
            _ => Err(ConfigurationError::UnknownStatusFlavor(flavor.to_string())),
        }
    }
}

impl fmt::Display for StatusFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatusFlavor::Basic => "basic",
            StatusFlavor::Stats => "stats",
        })
    }
}

/// Ordered `(label, value)` pairs describing a worker.
pub type StatusSection = Vec<(String, String)>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0} is already running")]
    AlreadyRunning(&'static str),

    #[error("failed to spawn {component} thread: {source}")]
    Spawn {
        component: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} thread panicked")]
    Panicked(&'static str),

    #[error("ignore list lookup for {id} failed: {reason}")]
    IgnoreLookup { id: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

/// Lifecycle shared by watchers and actuators. Cancellation is
/// cooperative: `stop` only raises a flag the worker thread polls.
pub trait Worker: Send {
    fn start(&mut self) -> Result<(), WorkerError>;

    /// Signal the worker thread to finish.
    fn stop(&mut self) -> Result<(), WorkerError>;

    fn is_alive(&self) -> bool;

    /// Release whatever the worker still holds once it was told to stop.
    fn done(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Wait for the worker thread. Untimed.
    fn join(&mut self) -> Result<(), WorkerError>;

    fn idle(&self) -> bool;

    fn set_idle(&self, idle: bool);

    fn status(&self, flavor: StatusFlavor) -> StatusSection;
}

/// Observes a target and feeds tickets into the jail.
pub trait Watcher: Worker {
    /// Backend this watcher was constructed as.
    fn kind(&self) -> BackendKind;

    /// Upper bound on matches kept per ticket, also bounds restored history.
    fn max_matches(&self) -> usize;

    fn is_ignored(&self, ticket: &Ticket) -> Result<bool, WorkerError>;
}

/// Applies and lifts bans for the tickets it pulls from the jail.
pub trait Actuator: Worker {
    /// Flat, non-escalating ban time.
    fn ban_time(&self) -> Duration;
}
