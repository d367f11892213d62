use thiserror::Error;

use crate::backend::{BackendError, BackendKind};
use crate::bantime::expr::ExprError;
use crate::bantime::BanTimeOption;
use crate::jail::LifecycleState;
use crate::time::DurationParseError;
use crate::worker::WorkerError;

/// Misconfiguration detected while a jail is being set up.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("unknown backend {name:?}, must be among {known} or 'auto'")]
    UnknownBackend { name: String, known: String },

    #[error("malformed backend specification {0:?}")]
    MalformedBackend(String),

    #[error("unknown ban time option {0:?}")]
    UnknownOption(String),

    #[error("unknown status flavor {0:?}")]
    UnknownStatusFlavor(String),

    #[error("invalid value {value:?} for bantime.{option}: {reason}")]
    InvalidValue {
        option: BanTimeOption,
        value: String,
        reason: String,
    },

    #[error("invalid duration {value:?} for bantime.{option}: {source}")]
    Duration {
        option: BanTimeOption,
        value: String,
        #[source]
        source: DurationParseError,
    },

    #[error("invalid bantime.{option} expression: {source}")]
    Expression {
        option: BanTimeOption,
        #[source]
        source: ExprError,
    },
}

#[derive(Debug, Error)]
pub enum JailError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to initialize any backend for jail {jail:?}")]
    BackendInitialization { jail: String },

    #[error("backend {backend} of jail {jail:?} failed: {source}")]
    Backend {
        jail: String,
        backend: BackendKind,
        #[source]
        source: BackendError,
    },

    #[error("actuator of jail {jail:?} failed to initialize: {source}")]
    Actuator {
        jail: String,
        #[source]
        source: BackendError,
    },

    #[error("jail {jail:?} cannot {action} while {state}")]
    InvalidState {
        jail: String,
        action: &'static str,
        state: LifecycleState,
    },

    #[error("jail {jail:?} failed to start its {component}: {source}")]
    Start {
        jail: String,
        component: &'static str,
        #[source]
        source: WorkerError,
    },
}
