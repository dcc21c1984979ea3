use std::sync::Arc;

use ewe_routing::application::{Application, PipelineEvent, PipelineObserver};
use ewe_routing::context::HttpContext;
use ewe_routing::controllers::{ActionDescriptor, Controller, ControllerContext, ControllerDescriptor};
use ewe_routing::errors::ActionError;
use ewe_routing::filters::{ActionExecutedContext, ActionFilter, FilterInfo, ResultExecutedContext, ResultFilter};
use ewe_routing::requests::Method;
use ewe_routing::results::ActionResult;

use crate::capture::{ActionExecutedSnapshot, CaptureSlot, ResultExecutedSnapshot};

/// Copies the executed action and result contexts into the request's
/// [`CaptureSlot`]. Requests without a slot pass through untouched.
#[derive(Debug, Default)]
pub struct InterceptionFilter;

impl ActionFilter for InterceptionFilter {
    fn on_action_executed(&self, context: &mut ActionExecutedContext<'_>) {
        let Some(slot) = context.controller_context().http().items().get::<CaptureSlot>() else {
            return;
        };
        if slot.offer_post_handler(ActionExecutedSnapshot::from_context(context)) {
            tracing::debug!(
                "InterceptionFilter: captured post-handler context of {}/{}",
                context.descriptor().controller_name(),
                context.descriptor().action_name()
            );
        }
    }
}

impl ResultFilter for InterceptionFilter {
    fn on_result_executed(&self, context: &mut ResultExecutedContext<'_>) {
        let Some(slot) = context.controller_context().http().items().get::<CaptureSlot>() else {
            return;
        };
        if slot.offer_post_result(ResultExecutedSnapshot::from_context(context)) {
            tracing::debug!(
                "InterceptionFilter: captured post-result context of {}/{}",
                context.controller_context().controller_name(),
                context.controller_context().action_name()
            );
        }
    }
}

struct InterceptingAction {
    inner: Arc<dyn ActionDescriptor>,
    filter: Arc<InterceptionFilter>,
}

impl ActionDescriptor for InterceptingAction {
    fn action_name(&self) -> &str {
        self.inner.action_name()
    }

    fn controller_name(&self) -> &str {
        self.inner.controller_name()
    }

    fn accepts(&self, method: &Method) -> bool {
        self.inner.accepts(method)
    }

    /// The interception filter goes first so its executed callbacks run last
    /// and see what every other filter decided.
    fn filters(&self) -> FilterInfo {
        let mut filters = self.inner.filters();
        filters.action.insert(0, self.filter.clone());
        filters.result.insert(0, self.filter.clone());
        filters
    }

    fn execute(
        &self,
        controller: &mut dyn Controller,
        context: &ControllerContext,
    ) -> Result<ActionResult, ActionError> {
        self.inner.execute(controller, context)
    }
}

struct InterceptingController {
    inner: Arc<dyn ControllerDescriptor>,
    filter: Arc<InterceptionFilter>,
}

impl InterceptingController {
    fn wrap(&self, action: Arc<dyn ActionDescriptor>) -> Arc<dyn ActionDescriptor> {
        Arc::new(InterceptingAction {
            inner: action,
            filter: self.filter.clone(),
        })
    }
}

impl ControllerDescriptor for InterceptingController {
    fn controller_name(&self) -> &str {
        self.inner.controller_name()
    }

    fn create_controller(&self) -> Box<dyn Controller> {
        self.inner.create_controller()
    }

    fn actions(&self) -> Vec<Arc<dyn ActionDescriptor>> {
        self.inner
            .actions()
            .into_iter()
            .map(|action| self.wrap(action))
            .collect()
    }

    fn find_action(&self, method: &Method, action_name: &str) -> Option<Arc<dyn ActionDescriptor>> {
        self.inner
            .find_action(method, action_name)
            .map(|action| self.wrap(action))
    }
}

/// Hands the request's session and response to its [`CaptureSlot`] once the
/// handler has finished.
#[derive(Debug, Default)]
pub struct CompletionObserver;

impl PipelineObserver for CompletionObserver {
    fn on_event(&self, event: PipelineEvent, context: &HttpContext) {
        if event != PipelineEvent::PostRequestHandlerExecute {
            return;
        }
        let Some(slot) = context.items().get::<CaptureSlot>() else {
            return;
        };
        if let Some(session) = context.session() {
            slot.offer_session(session.clone());
        }
        slot.offer_response(context.response().clone());
    }
}

/// Wires interception into `application`: every registered controller is
/// decorated, the completion observer is registered and the pipeline is
/// rebuilt so both take effect.
pub fn install(application: &mut Application) {
    let filter = Arc::new(InterceptionFilter);
    application.controllers_mut().decorate_all(|inner| {
        tracing::debug!("Interceptor: decorating {}", inner.controller_name());
        Arc::new(InterceptingController {
            inner,
            filter: filter.clone(),
        }) as Arc<dyn ControllerDescriptor>
    });
    application.register_observer(PipelineEvent::PostRequestHandlerExecute, CompletionObserver);
    application.rebuild_pipeline();
    tracing::info!(
        "Interceptor: installed on {} controllers",
        application.controllers().len()
    );
}
