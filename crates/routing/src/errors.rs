use thiserror::Error;

/// Failures raised while a controller action or its result executes.
///
/// These are the "exceptions" filters see on their executed contexts, so the
/// type is cheap to clone into snapshots.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("action failed: {0}")]
    Failed(String),

    #[error("the anti-forgery token was missing or did not match the cookie token")]
    AntiForgeryValidation,

    #[error("no view named '{view}' for controller '{controller}'")]
    ViewNotFound { controller: String, view: String },

    #[error("child action {controller}/{action} could not be found")]
    ChildActionNotFound { controller: String, action: String },

    #[error("missing action parameter: {0}")]
    MissingParameter(String),
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors decoding a worker request into the host request model.
#[derive(Error, Debug, Clone)]
pub enum RequestError {
    #[error("unknown http method: {0}")]
    UnknownMethod(String),

    #[error("invalid request target '{0}'")]
    InvalidTarget(String),

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Errors surfaced by [`crate::application::Application::process_request`].
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("request could not be decoded: {0}")]
    BadRequest(#[from] RequestError),

    #[error("unhandled exception in {controller}/{action}: {error}")]
    Unhandled {
        controller: String,
        action: String,
        error: ActionError,
    },

    #[error("static file {path} could not be read: {reason}")]
    StaticFile { path: String, reason: String },
}

/// Errors building an application from its manifest.
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("static content directory not found: {0}")]
    StaticContent(std::path::PathBuf, #[source] std::io::Error),

    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidRoute { pattern: String, reason: String },

    #[error("controller '{0}' registered twice")]
    DuplicateController(String),
}
