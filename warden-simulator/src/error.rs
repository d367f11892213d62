use thiserror::Error;
use warden_config::ConfigError;
use warden_core::store::StoreError;
use warden_core::{ConfigurationError, JailError};

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Jail(#[from] JailError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
