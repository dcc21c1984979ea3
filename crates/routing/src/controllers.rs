use core::fmt;
use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::HttpContext;
use crate::errors::{ActionError, ApplicationError};
use crate::filters::{ActionFilter, AuthorizationFilter, FilterInfo, HandleError, ResultFilter};
use crate::requests::Method;
use crate::results::ActionResult;
use crate::routes::RouteData;

/// A controller instance, created fresh for every action invocation.
pub trait Controller: Any + Send + Sync {}

impl dyn Controller {
    #[must_use]
    pub fn downcast_ref<T: Controller>(&self) -> Option<&T> {
        let any: &dyn Any = self;
        any.downcast_ref::<T>()
    }

    #[must_use]
    pub fn is<T: Controller>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }
}

impl fmt::Debug for dyn Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Controller")
    }
}

/// The request and route an action executes against.
#[derive(Clone, Debug)]
pub struct ControllerContext {
    http: HttpContext,
    route_data: RouteData,
    is_child_action: bool,
}

impl ControllerContext {
    #[must_use]
    pub fn new(http: HttpContext, route_data: RouteData) -> Self {
        Self {
            http,
            route_data,
            is_child_action: false,
        }
    }

    /// A context for a child action rendered from within this one.
    #[must_use]
    pub fn child(&self, route_data: RouteData) -> Self {
        Self {
            http: self.http.clone(),
            route_data,
            is_child_action: true,
        }
    }

    #[must_use]
    pub fn http(&self) -> &HttpContext {
        &self.http
    }

    #[must_use]
    pub fn route_data(&self) -> &RouteData {
        &self.route_data
    }

    #[must_use]
    pub fn is_child_action(&self) -> bool {
        self.is_child_action
    }

    #[must_use]
    pub fn controller_name(&self) -> &str {
        self.route_data.controller().unwrap_or_default()
    }

    #[must_use]
    pub fn action_name(&self) -> &str {
        self.route_data.action().unwrap_or_default()
    }

    /// Looks an action parameter up in the posted form, then the route, then
    /// the query string.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.http
            .request()
            .form()
            .get(name)
            .or_else(|| self.route_data.get(name))
            .or_else(|| self.http.request().query().get(name))
    }

    pub fn require_param(&self, name: &str) -> Result<&str, ActionError> {
        self.param(name)
            .ok_or_else(|| ActionError::MissingParameter(String::from(name)))
    }
}

/// Describes one invocable action of a controller.
pub trait ActionDescriptor: Send + Sync {
    fn action_name(&self) -> &str;

    fn controller_name(&self) -> &str;

    /// Whether the action answers requests made with `method`.
    fn accepts(&self, method: &Method) -> bool;

    /// Filters in execution order, controller scoped ones first.
    fn filters(&self) -> FilterInfo;

    fn execute(
        &self,
        controller: &mut dyn Controller,
        context: &ControllerContext,
    ) -> Result<ActionResult, ActionError>;
}

impl fmt::Debug for dyn ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("controller", &self.controller_name())
            .field("action", &self.action_name())
            .finish()
    }
}

/// Describes a controller type: how to create it and which actions it has.
pub trait ControllerDescriptor: Send + Sync {
    fn controller_name(&self) -> &str;

    fn create_controller(&self) -> Box<dyn Controller>;

    fn actions(&self) -> Vec<Arc<dyn ActionDescriptor>>;

    /// The action named `action_name` (ignoring case) that accepts `method`.
    fn find_action(&self, method: &Method, action_name: &str) -> Option<Arc<dyn ActionDescriptor>> {
        self.actions().into_iter().find(|action| {
            action.action_name().eq_ignore_ascii_case(action_name) && action.accepts(method)
        })
    }
}

impl fmt::Debug for dyn ControllerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerDescriptor")
            .field("name", &self.controller_name())
            .finish()
    }
}

type ActionFn<C> = dyn Fn(&mut C, &ControllerContext) -> Result<ActionResult, ActionError> + Send + Sync;

/// An action method of `C` as registered through [`ControllerType`].
pub struct Action<C> {
    name: String,
    verbs: Option<Vec<Method>>,
    filters: FilterInfo,
    handler: Arc<ActionFn<C>>,
}

impl<C: Controller> Action<C> {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut C, &ControllerContext) -> Result<ActionResult, ActionError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            verbs: None,
            filters: FilterInfo::default(),
            handler: Arc::new(handler),
        }
    }

    /// Restricts the action to the given verbs.
    #[must_use]
    pub fn accept_verbs(mut self, verbs: &[Method]) -> Self {
        self.verbs = Some(verbs.to_vec());
        self
    }

    #[must_use]
    pub fn authorization_filter(mut self, filter: impl AuthorizationFilter + 'static) -> Self {
        self.filters.authorization.push(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn action_filter(mut self, filter: impl ActionFilter + 'static) -> Self {
        self.filters.action.push(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn result_filter(mut self, filter: impl ResultFilter + 'static) -> Self {
        self.filters.result.push(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn handle_errors(mut self, filter: HandleError) -> Self {
        self.filters.push_handle_error(filter);
        self
    }
}

/// Builder for a reflected controller descriptor over the controller type `C`.
///
/// ```
/// use ewe_routing::controllers::*;
/// use ewe_routing::results::ActionResult;
///
/// #[derive(Default)]
/// struct PingController;
///
/// impl Controller for PingController {}
///
/// let descriptor = ControllerType::<PingController>::new("Ping")
///     .action(Action::new("Index", |_, _| Ok(ActionResult::content("pong"))))
///     .build();
///
/// assert_eq!(descriptor.controller_name(), "Ping");
/// ```
pub struct ControllerType<C> {
    name: String,
    filters: FilterInfo,
    actions: Vec<Action<C>>,
    _controller: PhantomData<fn() -> C>,
}

impl<C: Controller + Default> ControllerType<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filters: FilterInfo::default(),
            actions: Vec::new(),
            _controller: PhantomData,
        }
    }

    #[must_use]
    pub fn action(mut self, action: Action<C>) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn authorization_filter(mut self, filter: impl AuthorizationFilter + 'static) -> Self {
        self.filters.authorization.push(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn action_filter(mut self, filter: impl ActionFilter + 'static) -> Self {
        self.filters.action.push(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn result_filter(mut self, filter: impl ResultFilter + 'static) -> Self {
        self.filters.result.push(Arc::new(filter));
        self
    }

    #[must_use]
    pub fn handle_errors(mut self, filter: HandleError) -> Self {
        self.filters.push_handle_error(filter);
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<dyn ControllerDescriptor> {
        let controller_name: Arc<str> = Arc::from(self.name.as_str());
        let actions = self
            .actions
            .into_iter()
            .map(|action| {
                let mut filters = self.filters.clone();
                filters.extend(action.filters);
                Arc::new(ReflectedActionDescriptor {
                    controller_name: controller_name.clone(),
                    name: action.name,
                    verbs: action.verbs,
                    filters,
                    handler: action.handler,
                }) as Arc<dyn ActionDescriptor>
            })
            .collect();

        Arc::new(ReflectedControllerDescriptor::<C> {
            name: controller_name,
            actions,
            _controller: PhantomData,
        })
    }
}

struct ReflectedActionDescriptor<C> {
    controller_name: Arc<str>,
    name: String,
    verbs: Option<Vec<Method>>,
    filters: FilterInfo,
    handler: Arc<ActionFn<C>>,
}

impl<C: Controller> ActionDescriptor for ReflectedActionDescriptor<C> {
    fn action_name(&self) -> &str {
        &self.name
    }

    fn controller_name(&self) -> &str {
        &self.controller_name
    }

    fn accepts(&self, method: &Method) -> bool {
        self.verbs
            .as_ref()
            .is_none_or(|verbs| verbs.contains(method))
    }

    fn filters(&self) -> FilterInfo {
        self.filters.clone()
    }

    fn execute(
        &self,
        controller: &mut dyn Controller,
        context: &ControllerContext,
    ) -> Result<ActionResult, ActionError> {
        let any: &mut dyn Any = controller;
        let Some(typed) = any.downcast_mut::<C>() else {
            return Err(ActionError::failed(format!(
                "controller instance is not a {} controller",
                self.controller_name
            )));
        };
        (self.handler)(typed, context)
    }
}

struct ReflectedControllerDescriptor<C> {
    name: Arc<str>,
    actions: Vec<Arc<dyn ActionDescriptor>>,
    _controller: PhantomData<fn() -> C>,
}

impl<C: Controller + Default> ControllerDescriptor for ReflectedControllerDescriptor<C> {
    fn controller_name(&self) -> &str {
        &self.name
    }

    fn create_controller(&self) -> Box<dyn Controller> {
        Box::new(C::default())
    }

    fn actions(&self) -> Vec<Arc<dyn ActionDescriptor>> {
        self.actions.clone()
    }
}

/// The controller types known to an application.
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    descriptors: Vec<Arc<dyn ControllerDescriptor>>,
}

impl ControllerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: Arc<dyn ControllerDescriptor>) -> Result<(), ApplicationError> {
        if self.find(descriptor.controller_name()).is_some() {
            return Err(ApplicationError::DuplicateController(String::from(
                descriptor.controller_name(),
            )));
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Looks a controller up by name, ignoring case.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<Arc<dyn ControllerDescriptor>> {
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.controller_name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Replaces every registered descriptor with `decorate(descriptor)`.
    ///
    /// Descriptors registered afterwards are not decorated.
    pub fn decorate_all<F>(&mut self, mut decorate: F)
    where
        F: FnMut(Arc<dyn ControllerDescriptor>) -> Arc<dyn ControllerDescriptor>,
    {
        let current = std::mem::take(&mut self.descriptors);
        self.descriptors = current.into_iter().map(&mut decorate).collect();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ControllerDescriptor>> {
        self.descriptors.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl fmt::Debug for ControllerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.descriptors.iter().map(|d| d.controller_name()))
            .finish()
    }
}

#[cfg(test)]
mod controller_tests {
    use super::*;

    #[derive(Default)]
    struct CounterController {
        calls: usize,
    }

    impl Controller for CounterController {}

    fn counter_type() -> Arc<dyn ControllerDescriptor> {
        ControllerType::<CounterController>::new("Counter")
            .action(Action::new("Show", |controller: &mut CounterController, _| {
                controller.calls += 1;
                Ok(ActionResult::content(controller.calls.to_string()))
            }))
            .action(
                Action::new("Save", |_, _| Ok(ActionResult::content("saved")))
                    .accept_verbs(&[Method::POST]),
            )
            .build()
    }

    #[test]
    fn test_find_action_respects_name_case_and_verbs() {
        let descriptor = counter_type();
        assert!(descriptor.find_action(&Method::GET, "show").is_some());
        assert!(descriptor.find_action(&Method::GET, "Save").is_none());
        assert!(descriptor.find_action(&Method::POST, "save").is_some());
        assert!(descriptor.find_action(&Method::GET, "missing").is_none());
    }

    #[test]
    fn test_controller_downcast() {
        let descriptor = counter_type();
        let controller = descriptor.create_controller();
        assert!(controller.is::<CounterController>());
        assert_eq!(
            controller
                .downcast_ref::<CounterController>()
                .map(|c| c.calls),
            Some(0)
        );
    }

    #[test]
    fn test_registry_rejects_duplicates_and_decorates() {
        let mut registry = ControllerRegistry::new();
        registry.register(counter_type()).unwrap();
        assert!(matches!(
            registry.register(counter_type()),
            Err(ApplicationError::DuplicateController(_))
        ));

        let mut seen = Vec::new();
        registry.decorate_all(|descriptor| {
            seen.push(String::from(descriptor.controller_name()));
            descriptor
        });
        assert_eq!(seen, vec![String::from("Counter")]);
        assert!(registry.find("COUNTER").is_some());
    }
}
