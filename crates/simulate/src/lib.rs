//! In-process request simulation for ewe web applications.
//!
//! An [`IsolationBoundary`] owns one application on a dedicated thread.
//! Browsing scripts, transferable closures built from a
//! [`transfer::CodeUnit`] and their captured variables, run there against a
//! [`BrowsingSession`], which synthesizes requests, pushes them through the
//! full host pipeline and hands back what the pipeline normally throws away:
//! the executed action and result contexts, session state and cookies.

pub mod boundary;
pub mod browsing;
pub mod capture;
pub mod config;
pub mod errors;
pub mod forms;
pub mod interceptor;
pub mod synthesizer;
pub mod tokens;
pub mod transfer;

use std::path::PathBuf;

use ewe_routing::application::{Application, HostEnvironment};
use ewe_routing::errors::ApplicationError;

pub use boundary::{HostDomain, IsolationBoundary};
pub use browsing::{BrowsingSession, RequestOptions, RequestResult};
pub use capture::{ActionExecutedSnapshot, CaptureSlot, ResultExecutedSnapshot};
pub use config::BoundaryConfig;
pub use errors::{SimulateError, SimulateResult, TransferError};
pub use forms::to_form_fields;
pub use tokens::extract_anti_forgery_token;
pub use transfer::{CapturedContext, Closure, CodeUnit, Opaque, Restore, RestoredValue, Transferable};

/// Starts an [`IsolationBoundary`] for the application deployed at
/// `application_root` with default settings.
pub fn simulate<F>(application_root: impl Into<PathBuf>, factory: F) -> SimulateResult<IsolationBoundary>
where
    F: FnOnce(HostEnvironment) -> Result<Application, ApplicationError> + Send + 'static,
{
    IsolationBoundary::initialize(application_root, factory)
}
