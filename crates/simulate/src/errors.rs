use std::path::PathBuf;

use ewe_routing::errors::{ApplicationError, PipelineError};
use thiserror::Error;

use crate::transfer::CodeId;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("captured variable `{path}` cannot cross the isolation boundary: {reason}")]
    NotTransferable { path: String, reason: String },

    #[error("no code unit is registered as `{0}`")]
    UnknownCode(CodeId),

    #[error("captured variable `{0}` does not exist")]
    MissingCapture(String),

    #[error("captured variable `{name}` is not a {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("closure envelope wire format: {0}")]
    Wire(#[from] serde_json::Error),
}

impl TransferError {
    pub(crate) fn not_transferable(path: &str, reason: impl Into<String>) -> Self {
        Self::NotTransferable {
            path: String::from(path),
            reason: reason.into(),
        }
    }

    pub(crate) fn mismatch(name: &str, expected: &'static str) -> Self {
        Self::TypeMismatch {
            name: String::from(name),
            expected,
        }
    }
}

#[derive(Error, Debug)]
pub enum SimulateError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("deployment manifest not found at {}: {hint}", path.display())]
    Configuration { path: PathBuf, hint: String },

    #[error("deployment manifest is invalid: {0}")]
    Manifest(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("unhandled application error: {0}")]
    Application(#[from] PipelineError),

    #[error("application could not be built: {0}")]
    Host(ApplicationError),

    #[error("browsing script failed: {0:#}")]
    Script(anyhow::Error),

    #[error("the isolation boundary is no longer running")]
    BoundaryClosed,
}

impl SimulateError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }
}

impl From<ApplicationError> for SimulateError {
    fn from(value: ApplicationError) -> Self {
        match value {
            ApplicationError::StaticContent(_, err) => Self::Io(err),
            other => Self::Host(other),
        }
    }
}

pub type SimulateResult<T> = std::result::Result<T, SimulateError>;
