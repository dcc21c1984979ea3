use core::fmt;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::HttpContext;
use crate::controllers::ControllerContext;
use crate::errors::ActionError;
use crate::invoker::MvcHandler;
use crate::response::TEXT_HTML;
use crate::routes::RouteData;
use crate::security::Principal;

pub const SHARED_VIEWS: &str = "Shared";

/// Validation messages keyed by the field they concern.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ModelState {
    errors: BTreeMap<String, Vec<String>>,
}

impl ModelState {
    pub fn add_model_error(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(key.into()).or_default().push(message.into());
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn errors_for(&self, key: &str) -> &[String] {
        self.errors.get(key).map_or(&[], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.errors.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Values an action hands to its view.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewData {
    values: Map<String, Value>,
    model: Option<Value>,
    model_state: ModelState,
}

impl ViewData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// The value under `key` when it is a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn model(&self) -> Option<&Value> {
        self.model.as_ref()
    }

    pub fn set_model(&mut self, model: Value) {
        self.model = Some(model);
    }

    #[must_use]
    pub fn model_state(&self) -> &ModelState {
        &self.model_state
    }

    pub fn model_state_mut(&mut self) -> &mut ModelState {
        &mut self.model_state
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ViewResult {
    view_name: String,
    view_data: ViewData,
}

impl ViewResult {
    /// A view named after the executing action.
    #[must_use]
    pub fn default_view() -> Self {
        Self {
            view_name: String::new(),
            view_data: ViewData::new(),
        }
    }

    pub fn named(view_name: impl Into<String>) -> Self {
        Self {
            view_name: view_name.into(),
            view_data: ViewData::new(),
        }
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.view_data.insert(key, value);
        self
    }

    #[must_use]
    pub fn with_view_data(mut self, view_data: ViewData) -> Self {
        self.view_data = view_data;
        self
    }

    /// Empty when the action left it to default to the action's name.
    #[must_use]
    pub fn view_name(&self) -> &str {
        &self.view_name
    }

    #[must_use]
    pub fn view_data(&self) -> &ViewData {
        &self.view_data
    }

    pub fn view_data_mut(&mut self) -> &mut ViewData {
        &mut self.view_data
    }

    pub(crate) fn resolve_name(&mut self, action_name: &str) {
        if self.view_name.is_empty() {
            self.view_name = String::from(action_name);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentResult {
    content: String,
    content_type: Option<String>,
}

impl ContentResult {
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

/// What an action asks the pipeline to do once it returns.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionResult {
    View(ViewResult),
    Content(ContentResult),
    Redirect(String),
    HttpUnauthorized,
    Json(Value),
    Empty,
}

impl ActionResult {
    #[must_use]
    pub fn view() -> Self {
        ActionResult::View(ViewResult::default_view())
    }

    pub fn content(content: impl Into<String>) -> Self {
        ActionResult::Content(ContentResult {
            content: content.into(),
            content_type: None,
        })
    }

    pub fn content_with_type(content: impl Into<String>, content_type: impl Into<String>) -> Self {
        ActionResult::Content(ContentResult {
            content: content.into(),
            content_type: Some(content_type.into()),
        })
    }

    pub fn redirect(url: impl Into<String>) -> Self {
        ActionResult::Redirect(url.into())
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self, ActionError> {
        serde_json::to_value(value)
            .map(ActionResult::Json)
            .map_err(|err| ActionError::failed(err.to_string()))
    }

    #[must_use]
    pub fn as_view(&self) -> Option<&ViewResult> {
        match self {
            ActionResult::View(view) => Some(view),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_content(&self) -> Option<&ContentResult> {
        match self {
            ActionResult::Content(content) => Some(content),
            _ => None,
        }
    }

    /// Writes the result: body text into `output`, everything else onto the
    /// response.
    pub(crate) fn execute(
        &self,
        context: &ControllerContext,
        handler: &MvcHandler,
        output: &mut String,
    ) -> Result<(), ActionError> {
        let response = context.http().response();
        match self {
            ActionResult::View(view) => {
                let view_name = if view.view_name.is_empty() {
                    context.action_name()
                } else {
                    view.view_name.as_str()
                };
                let render = handler.views().find(context.controller_name(), view_name).ok_or_else(|| {
                    ActionError::ViewNotFound {
                        controller: String::from(context.controller_name()),
                        view: String::from(view_name),
                    }
                })?;
                if !context.is_child_action() {
                    response.set_content_type(TEXT_HTML);
                }
                let mut view_context = ViewContext::new(context, &view.view_data, handler);
                render(&mut view_context)?;
                output.push_str(&view_context.output);
            }
            ActionResult::Content(content) => {
                if let Some(content_type) = &content.content_type {
                    response.set_content_type(content_type);
                }
                output.push_str(&content.content);
            }
            ActionResult::Redirect(url) => response.redirect(url),
            ActionResult::HttpUnauthorized => response.set_status(StatusCode::UNAUTHORIZED),
            ActionResult::Json(value) => {
                response.set_content_type("application/json");
                output.push_str(&value.to_string());
            }
            ActionResult::Empty => {}
        }
        Ok(())
    }
}

/// A registered view: writes its markup through the [`ViewContext`].
pub type ViewFn = Arc<dyn Fn(&mut ViewContext<'_>) -> Result<(), ActionError> + Send + Sync>;

/// Views keyed by controller and view name, looked up ignoring case with a
/// fallback to the [`SHARED_VIEWS`] folder.
#[derive(Clone, Default)]
pub struct ViewEngine {
    views: HashMap<String, ViewFn>,
}

impl ViewEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, controller: &str, view: &str, render: F)
    where
        F: Fn(&mut ViewContext<'_>) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.views.insert(view_key(controller, view), Arc::new(render));
    }

    #[must_use]
    pub fn find(&self, controller: &str, view: &str) -> Option<ViewFn> {
        self.views
            .get(&view_key(controller, view))
            .or_else(|| self.views.get(&view_key(SHARED_VIEWS, view)))
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.views.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

impl fmt::Debug for ViewEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.views.keys()).finish()
    }
}

fn view_key(controller: &str, view: &str) -> String {
    format!("{}/{}", controller.to_ascii_lowercase(), view.to_ascii_lowercase())
}

/// What a view sees while rendering.
pub struct ViewContext<'a> {
    controller_context: &'a ControllerContext,
    view_data: &'a ViewData,
    handler: &'a MvcHandler,
    output: String,
}

impl<'a> ViewContext<'a> {
    fn new(controller_context: &'a ControllerContext, view_data: &'a ViewData, handler: &'a MvcHandler) -> Self {
        Self {
            controller_context,
            view_data,
            handler,
            output: String::new(),
        }
    }

    #[must_use]
    pub fn controller_context(&self) -> &ControllerContext {
        self.controller_context
    }

    #[must_use]
    pub fn http(&self) -> &HttpContext {
        self.controller_context.http()
    }

    #[must_use]
    pub fn user(&self) -> Option<&Principal> {
        self.http().user()
    }

    #[must_use]
    pub fn view_data(&self) -> &ViewData {
        self.view_data
    }

    #[must_use]
    pub fn model_state(&self) -> &ModelState {
        self.view_data.model_state()
    }

    pub fn write(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Writes `text` with HTML special characters escaped.
    pub fn write_encoded(&mut self, text: &str) {
        self.output.push_str(&html_escape(text));
    }

    /// The anti-forgery hidden field for forms posting back to the application.
    #[must_use]
    pub fn anti_forgery_token(&self) -> String {
        self.http().services().anti_forgery().hidden_field_html(self.http())
    }

    /// Executes `controller/action` as a child action and writes its output
    /// in place.
    pub fn render_action(&mut self, action: &str, controller: &str) -> Result<(), ActionError> {
        let child = self
            .controller_context
            .child(RouteData::for_action(controller, action));
        let mut child_output = String::new();
        self.handler.invoke_child(child, &mut child_output)?;
        self.output.push_str(&child_output);
        Ok(())
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.output
    }
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod results_tests {
    use super::*;

    #[test]
    fn test_model_state_collects_errors() {
        let mut state = ModelState::default();
        assert!(state.is_valid());
        state.add_model_error("username", "required");
        state.add_model_error("username", "too short");
        assert!(!state.is_valid());
        assert_eq!(state.errors_for("username").len(), 2);
        assert!(state.errors_for("password").is_empty());
    }

    #[test]
    fn test_view_lookup_falls_back_to_shared() {
        let mut views = ViewEngine::new();
        views.register("Home", "Index", |view| {
            view.write("home");
            Ok(())
        });
        views.register(SHARED_VIEWS, "Error", |view| {
            view.write("error");
            Ok(())
        });

        assert!(views.find("home", "INDEX").is_some());
        assert!(views.find("Account", "Error").is_some());
        assert!(views.find("Account", "Index").is_none());
    }

    #[test]
    fn test_view_result_accessors() {
        let result = ActionResult::View(ViewResult::named("Index").with_data("Message", "hi"));
        let view = result.as_view().unwrap();
        assert_eq!(view.view_name(), "Index");
        assert_eq!(view.view_data().get_str("Message"), Some("hi"));
        assert!(result.as_content().is_none());
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
    }
}
