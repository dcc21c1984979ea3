use std::sync::Arc;

use crate::context::HttpContext;
use crate::controllers::{ActionDescriptor, Controller, ControllerContext, ControllerRegistry};
use crate::errors::{ActionError, PipelineError};
use crate::filters::{
    ActionExecutedContext, ActionExecutingContext, AuthorizationContext, FilterInfo,
    ResultExecutedContext, ResultExecutingContext,
};
use crate::results::{ActionResult, ViewEngine};
use crate::routes::RouteData;

/// How far dispatching a route got.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Invocation {
    Completed,
    ControllerNotFound,
    ActionNotFound,
}

/// Dispatches routed requests to controller actions, running their filters
/// and results.
#[derive(Clone, Debug)]
pub struct MvcHandler {
    controllers: ControllerRegistry,
    views: Arc<ViewEngine>,
}

impl MvcHandler {
    #[must_use]
    pub fn new(controllers: ControllerRegistry, views: Arc<ViewEngine>) -> Self {
        Self { controllers, views }
    }

    #[must_use]
    pub fn controllers(&self) -> &ControllerRegistry {
        &self.controllers
    }

    #[must_use]
    pub fn views(&self) -> &ViewEngine {
        &self.views
    }

    /// Runs the action `route_data` names and writes its output to the
    /// response. Output of a failed invocation is discarded.
    pub fn process(&self, http: &HttpContext, route_data: RouteData) -> Result<Invocation, PipelineError> {
        let context = ControllerContext::new(http.clone(), route_data);
        let mut output = String::new();
        let invocation = self.invoke(&context, &mut output)?;
        http.response().write(&output);
        Ok(invocation)
    }

    pub(crate) fn invoke_child(&self, context: ControllerContext, output: &mut String) -> Result<(), ActionError> {
        let not_found = || ActionError::ChildActionNotFound {
            controller: String::from(context.controller_name()),
            action: String::from(context.action_name()),
        };
        match self.invoke(&context, output) {
            Ok(Invocation::Completed) => Ok(()),
            Ok(_) => Err(not_found()),
            Err(PipelineError::Unhandled { error, .. }) => Err(error),
            Err(other) => Err(ActionError::failed(other.to_string())),
        }
    }

    fn invoke(&self, context: &ControllerContext, output: &mut String) -> Result<Invocation, PipelineError> {
        let Some(descriptor) = self.controllers.find(context.controller_name()) else {
            tracing::debug!("MvcHandler: no controller named {:?}", context.controller_name());
            return Ok(Invocation::ControllerNotFound);
        };

        let method = context.http().request().method();
        let Some(action) = descriptor.find_action(method, context.action_name()) else {
            tracing::debug!(
                "MvcHandler: no action {:?} on {} for {}",
                context.action_name(),
                descriptor.controller_name(),
                method
            );
            return Ok(Invocation::ActionNotFound);
        };

        tracing::debug!(
            "MvcHandler: invoking {}/{} (child: {})",
            action.controller_name(),
            action.action_name(),
            context.is_child_action()
        );

        let filters = action.filters();

        let authorized = {
            let mut authorization = AuthorizationContext::new(context, &action);
            for filter in &filters.authorization {
                filter.on_authorization(&mut authorization);
                if authorization.is_decided() {
                    break;
                }
            }
            authorization.take_outcome()
        };
        match authorized {
            Err(error) => return Err(unhandled(&action, error)),
            Ok(Some(result)) => {
                result
                    .execute(context, self, output)
                    .map_err(|error| unhandled(&action, error))?;
                return Ok(Invocation::Completed);
            }
            Ok(None) => {}
        }

        let mut controller = descriptor.create_controller();

        let (entered, short_circuit) = {
            let mut executing = ActionExecutingContext::new(context, &action, &*controller);
            let mut entered = 0;
            for filter in &filters.action {
                filter.on_action_executing(&mut executing);
                if executing.result().is_some() {
                    break;
                }
                entered += 1;
            }
            (entered, executing.take_result())
        };

        let canceled = short_circuit.is_some();
        let outcome = match short_circuit {
            Some(result) => Ok(result),
            None => action.execute(&mut *controller, context),
        }
        .map(|mut result| {
            if let ActionResult::View(view) = &mut result {
                view.resolve_name(action.action_name());
            }
            result
        });

        let controller: Arc<dyn Controller> = Arc::from(controller);
        let mut executed = ActionExecutedContext::new(context, &action, &controller, canceled, outcome);
        for filter in filters.action[..entered].iter().rev() {
            filter.on_action_executed(&mut executed);
        }
        let result = executed
            .into_outcome()
            .map_err(|error| unhandled(&action, error))?;

        self.execute_result(context, &action, &controller, &filters, &result, output)?;
        Ok(Invocation::Completed)
    }

    fn execute_result(
        &self,
        context: &ControllerContext,
        action: &Arc<dyn ActionDescriptor>,
        controller: &Arc<dyn Controller>,
        filters: &FilterInfo,
        result: &ActionResult,
        output: &mut String,
    ) -> Result<(), PipelineError> {
        let mut entered = 0;
        let mut canceled = false;
        {
            let mut executing = ResultExecutingContext::new(context, controller, result);
            for filter in &filters.result {
                filter.on_result_executing(&mut executing);
                if executing.cancel() {
                    canceled = true;
                    break;
                }
                entered += 1;
            }
        }

        let mark = output.len();
        let exception = if canceled {
            None
        } else {
            result.execute(context, self, output).err()
        };
        if exception.is_some() {
            output.truncate(mark);
        }

        let mut executed = ResultExecutedContext::new(context, controller, result, canceled, exception);
        for filter in filters.result[..entered].iter().rev() {
            filter.on_result_executed(&mut executed);
        }

        match executed.into_outcome() {
            Err(error) => Err(unhandled(action, error)),
            Ok(Some(replacement)) => replacement
                .execute(context, self, output)
                .map_err(|error| unhandled(action, error)),
            Ok(None) => Ok(()),
        }
    }
}

fn unhandled(action: &Arc<dyn ActionDescriptor>, error: ActionError) -> PipelineError {
    tracing::warn!(
        "MvcHandler: unhandled error in {}/{}: {}",
        action.controller_name(),
        action.action_name(),
        error
    );
    PipelineError::Unhandled {
        controller: String::from(action.controller_name()),
        action: String::from(action.action_name()),
        error,
    }
}
