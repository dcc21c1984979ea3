use core::fmt;
use std::sync::Arc;

use http::StatusCode;

use crate::controllers::{ActionDescriptor, Controller, ControllerContext};
use crate::errors::ActionError;
use crate::results::ActionResult;

/// Runs before anything else; setting a result short-circuits the action.
pub trait AuthorizationFilter: Send + Sync {
    fn on_authorization(&self, context: &mut AuthorizationContext<'_>);
}

pub trait ActionFilter: Send + Sync {
    fn on_action_executing(&self, _context: &mut ActionExecutingContext<'_>) {}

    fn on_action_executed(&self, _context: &mut ActionExecutedContext<'_>) {}
}

pub trait ResultFilter: Send + Sync {
    fn on_result_executing(&self, _context: &mut ResultExecutingContext<'_>) {}

    fn on_result_executed(&self, _context: &mut ResultExecutedContext<'_>) {}
}

/// The filters applying to one action, each list in execution order.
#[derive(Clone, Default)]
pub struct FilterInfo {
    pub authorization: Vec<Arc<dyn AuthorizationFilter>>,
    pub action: Vec<Arc<dyn ActionFilter>>,
    pub result: Vec<Arc<dyn ResultFilter>>,
}

impl FilterInfo {
    pub fn extend(&mut self, other: FilterInfo) {
        self.authorization.extend(other.authorization);
        self.action.extend(other.action);
        self.result.extend(other.result);
    }

    /// Registers one [`HandleError`] instance as both an action and a result filter.
    pub fn push_handle_error(&mut self, filter: HandleError) {
        let shared = Arc::new(filter);
        self.action.push(shared.clone());
        self.result.push(shared);
    }
}

impl fmt::Debug for FilterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterInfo")
            .field("authorization", &self.authorization.len())
            .field("action", &self.action.len())
            .field("result", &self.result.len())
            .finish()
    }
}

pub struct AuthorizationContext<'a> {
    controller_context: &'a ControllerContext,
    descriptor: &'a Arc<dyn ActionDescriptor>,
    result: Option<ActionResult>,
    error: Option<ActionError>,
}

impl<'a> AuthorizationContext<'a> {
    #[must_use]
    pub fn new(controller_context: &'a ControllerContext, descriptor: &'a Arc<dyn ActionDescriptor>) -> Self {
        Self {
            controller_context,
            descriptor,
            result: None,
            error: None,
        }
    }

    #[must_use]
    pub fn controller_context(&self) -> &ControllerContext {
        self.controller_context
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<dyn ActionDescriptor> {
        self.descriptor
    }

    #[must_use]
    pub fn result(&self) -> Option<&ActionResult> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, result: ActionResult) {
        self.result = Some(result);
    }

    /// Rejects the request outright; the error is not seen by action filters.
    pub fn fail(&mut self, error: ActionError) {
        self.error = Some(error);
    }

    /// `Err` when a filter failed the request, otherwise the short-circuit
    /// result, if any.
    pub fn take_outcome(&mut self) -> Result<Option<ActionResult>, ActionError> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(self.result.take()),
        }
    }

    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}

pub struct ActionExecutingContext<'a> {
    controller_context: &'a ControllerContext,
    descriptor: &'a Arc<dyn ActionDescriptor>,
    controller: &'a dyn Controller,
    result: Option<ActionResult>,
}

impl<'a> ActionExecutingContext<'a> {
    #[must_use]
    pub fn new(
        controller_context: &'a ControllerContext,
        descriptor: &'a Arc<dyn ActionDescriptor>,
        controller: &'a dyn Controller,
    ) -> Self {
        Self {
            controller_context,
            descriptor,
            controller,
            result: None,
        }
    }

    #[must_use]
    pub fn controller_context(&self) -> &ControllerContext {
        self.controller_context
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<dyn ActionDescriptor> {
        self.descriptor
    }

    #[must_use]
    pub fn controller(&self) -> &dyn Controller {
        self.controller
    }

    #[must_use]
    pub fn result(&self) -> Option<&ActionResult> {
        self.result.as_ref()
    }

    /// Cancels the action; `result` is executed in its place.
    pub fn set_result(&mut self, result: ActionResult) {
        self.result = Some(result);
    }

    pub fn take_result(&mut self) -> Option<ActionResult> {
        self.result.take()
    }
}

/// The outcome of an action as seen by action filters on the way out.
pub struct ActionExecutedContext<'a> {
    controller_context: &'a ControllerContext,
    descriptor: &'a Arc<dyn ActionDescriptor>,
    controller: &'a Arc<dyn Controller>,
    canceled: bool,
    exception: Option<ActionError>,
    exception_handled: bool,
    result: Option<ActionResult>,
}

impl<'a> ActionExecutedContext<'a> {
    #[must_use]
    pub fn new(
        controller_context: &'a ControllerContext,
        descriptor: &'a Arc<dyn ActionDescriptor>,
        controller: &'a Arc<dyn Controller>,
        canceled: bool,
        outcome: Result<ActionResult, ActionError>,
    ) -> Self {
        let (result, exception) = match outcome {
            Ok(result) => (Some(result), None),
            Err(error) => (None, Some(error)),
        };
        Self {
            controller_context,
            descriptor,
            controller,
            canceled,
            exception,
            exception_handled: false,
            result,
        }
    }

    #[must_use]
    pub fn controller_context(&self) -> &ControllerContext {
        self.controller_context
    }

    #[must_use]
    pub fn descriptor(&self) -> &Arc<dyn ActionDescriptor> {
        self.descriptor
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<dyn Controller> {
        self.controller
    }

    #[must_use]
    pub fn canceled(&self) -> bool {
        self.canceled
    }

    #[must_use]
    pub fn exception(&self) -> Option<&ActionError> {
        self.exception.as_ref()
    }

    #[must_use]
    pub fn exception_handled(&self) -> bool {
        self.exception_handled
    }

    pub fn set_exception_handled(&mut self, handled: bool) {
        self.exception_handled = handled;
    }

    #[must_use]
    pub fn result(&self) -> Option<&ActionResult> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, result: ActionResult) {
        self.result = Some(result);
    }

    /// The error still propagating after every filter ran, if any.
    #[must_use]
    pub fn into_outcome(self) -> Result<ActionResult, ActionError> {
        match self.exception {
            Some(error) if !self.exception_handled => Err(error),
            _ => Ok(self.result.unwrap_or(ActionResult::Empty)),
        }
    }
}

pub struct ResultExecutingContext<'a> {
    controller_context: &'a ControllerContext,
    controller: &'a Arc<dyn Controller>,
    result: &'a ActionResult,
    cancel: bool,
}

impl<'a> ResultExecutingContext<'a> {
    #[must_use]
    pub fn new(
        controller_context: &'a ControllerContext,
        controller: &'a Arc<dyn Controller>,
        result: &'a ActionResult,
    ) -> Self {
        Self {
            controller_context,
            controller,
            result,
            cancel: false,
        }
    }

    #[must_use]
    pub fn controller_context(&self) -> &ControllerContext {
        self.controller_context
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<dyn Controller> {
        self.controller
    }

    #[must_use]
    pub fn result(&self) -> &ActionResult {
        self.result
    }

    #[must_use]
    pub fn cancel(&self) -> bool {
        self.cancel
    }

    /// Skips result execution and the remaining executing filters.
    pub fn set_cancel(&mut self, cancel: bool) {
        self.cancel = cancel;
    }
}

/// The outcome of executing a result as seen by result filters on the way out.
pub struct ResultExecutedContext<'a> {
    controller_context: &'a ControllerContext,
    controller: &'a Arc<dyn Controller>,
    result: &'a ActionResult,
    canceled: bool,
    exception: Option<ActionError>,
    exception_handled: bool,
    replacement: Option<ActionResult>,
}

impl<'a> ResultExecutedContext<'a> {
    #[must_use]
    pub fn new(
        controller_context: &'a ControllerContext,
        controller: &'a Arc<dyn Controller>,
        result: &'a ActionResult,
        canceled: bool,
        exception: Option<ActionError>,
    ) -> Self {
        Self {
            controller_context,
            controller,
            result,
            canceled,
            exception,
            exception_handled: false,
            replacement: None,
        }
    }

    #[must_use]
    pub fn controller_context(&self) -> &ControllerContext {
        self.controller_context
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<dyn Controller> {
        self.controller
    }

    #[must_use]
    pub fn result(&self) -> &ActionResult {
        self.result
    }

    #[must_use]
    pub fn canceled(&self) -> bool {
        self.canceled
    }

    #[must_use]
    pub fn exception(&self) -> Option<&ActionError> {
        self.exception.as_ref()
    }

    #[must_use]
    pub fn exception_handled(&self) -> bool {
        self.exception_handled
    }

    pub fn set_exception_handled(&mut self, handled: bool) {
        self.exception_handled = handled;
    }

    /// A result to execute instead once filters finish, used when handling
    /// a failure raised while the original result executed.
    pub fn set_replacement(&mut self, result: ActionResult) {
        self.replacement = Some(result);
    }

    #[must_use]
    pub fn into_outcome(self) -> Result<Option<ActionResult>, ActionError> {
        match self.exception {
            Some(error) if !self.exception_handled => Err(error),
            _ => Ok(self.replacement),
        }
    }
}

/// Requires an authenticated user; anonymous requests get a 401 result.
#[derive(Debug, Default)]
pub struct Authorize {
    users: Vec<String>,
}

impl Authorize {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts access to the named users.
    #[must_use]
    pub fn users(users: &[&str]) -> Self {
        Self {
            users: users.iter().map(|user| String::from(*user)).collect(),
        }
    }
}

impl AuthorizationFilter for Authorize {
    fn on_authorization(&self, context: &mut AuthorizationContext<'_>) {
        let allowed = context
            .controller_context()
            .http()
            .user()
            .is_some_and(|user| {
                self.users.is_empty()
                    || self
                        .users
                        .iter()
                        .any(|allowed| allowed.eq_ignore_ascii_case(user.name()))
            });
        if !allowed {
            tracing::debug!(
                "Authorize: denying {}/{}",
                context.descriptor().controller_name(),
                context.descriptor().action_name()
            );
            context.set_result(ActionResult::HttpUnauthorized);
        }
    }
}

/// Rejects requests whose posted anti-forgery token does not match the cookie.
#[derive(Debug, Default)]
pub struct ValidateAntiForgeryToken;

impl AuthorizationFilter for ValidateAntiForgeryToken {
    fn on_authorization(&self, context: &mut AuthorizationContext<'_>) {
        let http = context.controller_context().http();
        if !http.services().anti_forgery().validate(http.request()) {
            context.fail(ActionError::AntiForgeryValidation);
        }
    }
}

const DEFAULT_ERROR_MESSAGE: &str = "An error occurred while processing your request.";

/// Marks action and result failures handled, answering with a 500 content
/// result instead.
#[derive(Debug)]
pub struct HandleError {
    message: String,
}

impl HandleError {
    #[must_use]
    pub fn new() -> Self {
        Self {
            message: String::from(DEFAULT_ERROR_MESSAGE),
        }
    }

    #[must_use]
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn error_result(&self) -> ActionResult {
        ActionResult::content(self.message.clone())
    }
}

impl Default for HandleError {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionFilter for HandleError {
    fn on_action_executed(&self, context: &mut ActionExecutedContext<'_>) {
        if context.exception().is_none() || context.exception_handled() {
            return;
        }
        tracing::warn!(
            "HandleError: {} handled in {}/{}",
            context.exception().map(ToString::to_string).unwrap_or_default(),
            context.descriptor().controller_name(),
            context.descriptor().action_name()
        );
        context
            .controller_context()
            .http()
            .response()
            .set_status(StatusCode::INTERNAL_SERVER_ERROR);
        context.set_exception_handled(true);
        context.set_result(self.error_result());
    }
}

impl ResultFilter for HandleError {
    fn on_result_executed(&self, context: &mut ResultExecutedContext<'_>) {
        if context.exception().is_none() || context.exception_handled() {
            return;
        }
        context
            .controller_context()
            .http()
            .response()
            .set_status(StatusCode::INTERNAL_SERVER_ERROR);
        context.set_exception_handled(true);
        context.set_replacement(self.error_result());
    }
}
