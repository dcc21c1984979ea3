use core::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::context::{HostServices, HttpContext};
use crate::controllers::{ControllerDescriptor, ControllerRegistry};
use crate::errors::{ActionError, ApplicationError, PipelineError};
use crate::invoker::{Invocation, MvcHandler};
use crate::requests::{HttpRequest, WorkerRequest};
use crate::response::HttpResponse;
use crate::results::{ViewContext, ViewEngine};
use crate::routes::{RouteData, RouteMatch, RouteTable};

const NOT_FOUND_TEXT: &str = "The resource cannot be found.";
const SERVER_ERROR_TEXT: &str = "Server Error in Application.";

/// The deployment manifest shipped under the application root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppManifest {
    pub name: String,
    pub login_url: String,
    pub default_url: String,
    pub session_cookie: String,
    pub auth_cookie: String,
    pub static_dir: Option<String>,
}

impl Default for AppManifest {
    fn default() -> Self {
        Self {
            name: String::from("ewe_app"),
            login_url: String::from("/Account/LogOn"),
            default_url: String::from("/"),
            session_cookie: String::from("ewe_session"),
            auth_cookie: String::from(".EWEAUTH"),
            static_dir: None,
        }
    }
}

impl AppManifest {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Where an application is deployed and how it is configured.
#[derive(Clone, Debug)]
pub struct HostEnvironment {
    root: PathBuf,
    manifest: AppManifest,
}

impl HostEnvironment {
    pub fn new(root: impl Into<PathBuf>, manifest: AppManifest) -> Self {
        Self {
            root: root.into(),
            manifest,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn manifest(&self) -> &AppManifest {
        &self.manifest
    }

    /// The directory static files are served from, when configured.
    #[must_use]
    pub fn static_root(&self) -> Option<PathBuf> {
        self.manifest
            .static_dir
            .as_ref()
            .map(|dir| self.root.join(dir))
    }
}

/// Points in the request pipeline observers can attach to, in the order the
/// pipeline raises them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineEvent {
    BeginRequest,
    AuthenticateRequest,
    AcquireRequestState,
    PostRequestHandlerExecute,
    ReleaseRequestState,
    EndRequest,
}

impl PipelineEvent {
    pub const ALL: [PipelineEvent; 6] = [
        PipelineEvent::BeginRequest,
        PipelineEvent::AuthenticateRequest,
        PipelineEvent::AcquireRequestState,
        PipelineEvent::PostRequestHandlerExecute,
        PipelineEvent::ReleaseRequestState,
        PipelineEvent::EndRequest,
    ];
}

pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: PipelineEvent, context: &HttpContext);
}

impl<F> PipelineObserver for F
where
    F: Fn(PipelineEvent, &HttpContext) + Send + Sync,
{
    fn on_event(&self, event: PipelineEvent, context: &HttpContext) {
        self(event, context);
    }
}

/// The outcome of one pass through [`Application::process_request`].
#[derive(Debug)]
pub struct CompletedRequest {
    response: HttpResponse,
    error: Option<PipelineError>,
}

impl CompletedRequest {
    #[must_use]
    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    #[must_use]
    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    pub fn into_result(self) -> Result<HttpResponse, PipelineError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.response),
        }
    }

    #[must_use]
    pub fn into_parts(self) -> (HttpResponse, Option<PipelineError>) {
        (self.response, self.error)
    }
}

enum RequestHandler {
    StaticFile(PathBuf),
    Mvc(RouteData),
    NotFound,
}

struct PipelineStep {
    event: PipelineEvent,
    observers: Vec<Arc<dyn PipelineObserver>>,
}

/// The steps a request runs through, fixed when the pipeline is built.
struct Pipeline {
    steps: Vec<PipelineStep>,
    handler: MvcHandler,
}

impl Pipeline {
    fn build(
        observers: &[(PipelineEvent, Arc<dyn PipelineObserver>)],
        controllers: &ControllerRegistry,
        views: &Arc<ViewEngine>,
    ) -> Self {
        let steps = PipelineEvent::ALL
            .into_iter()
            .map(|event| PipelineStep {
                event,
                observers: observers
                    .iter()
                    .filter(|(registered, _)| *registered == event)
                    .map(|(_, observer)| observer.clone())
                    .collect(),
            })
            .collect();

        Self {
            steps,
            handler: MvcHandler::new(controllers.clone(), views.clone()),
        }
    }

    fn notify(&self, event: PipelineEvent, context: &HttpContext) {
        for step in self.steps.iter().filter(|step| step.event == event) {
            for observer in &step.observers {
                observer.on_event(event, context);
            }
        }
    }
}

/// Builds an [`Application`] from routes, controller types and views.
pub struct ApplicationBuilder {
    environment: HostEnvironment,
    routes: RouteTable,
    controllers: ControllerRegistry,
    views: ViewEngine,
}

impl ApplicationBuilder {
    #[must_use]
    pub fn new(environment: HostEnvironment) -> Self {
        Self {
            environment,
            routes: RouteTable::new(),
            controllers: ControllerRegistry::new(),
            views: ViewEngine::new(),
        }
    }

    pub fn ignore_route(mut self, pattern: &str) -> Result<Self, ApplicationError> {
        self.routes
            .ignore_route(pattern)
            .map_err(|err| ApplicationError::InvalidRoute {
                pattern: String::from(pattern),
                reason: err.to_string(),
            })?;
        Ok(self)
    }

    pub fn map_route(
        mut self,
        name: &str,
        pattern: &str,
        defaults: &[(&str, &str)],
    ) -> Result<Self, ApplicationError> {
        self.routes
            .map_route(name, pattern, defaults)
            .map_err(|err| ApplicationError::InvalidRoute {
                pattern: String::from(pattern),
                reason: err.to_string(),
            })?;
        Ok(self)
    }

    pub fn controller(mut self, descriptor: Arc<dyn ControllerDescriptor>) -> Result<Self, ApplicationError> {
        self.controllers.register(descriptor)?;
        Ok(self)
    }

    #[must_use]
    pub fn view<F>(mut self, controller: &str, view: &str, render: F) -> Self
    where
        F: Fn(&mut ViewContext<'_>) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.views.register(controller, view, render);
        self
    }

    /// Builds the application, checking the configured static directory exists.
    pub fn build(self) -> Result<Application, ApplicationError> {
        if let Some(static_root) = self.environment.static_root() {
            std::fs::metadata(&static_root)
                .map_err(|err| ApplicationError::StaticContent(static_root.clone(), err))?;
        }

        let services = Arc::new(HostServices::new(self.environment.manifest().clone()));
        let views = Arc::new(self.views);
        let pipeline = Pipeline::build(&[], &self.controllers, &views);

        tracing::info!(
            "Application: built {} with {} controllers, {} routes and {} views",
            self.environment.manifest().name,
            self.controllers.len(),
            self.routes.len(),
            views.len()
        );

        Ok(Application {
            environment: self.environment,
            routes: self.routes,
            controllers: self.controllers,
            views,
            services,
            observers: Vec::new(),
            pipeline,
        })
    }
}

/// A built web application able to process worker requests.
///
/// Observers and controller changes only take effect once
/// [`Application::rebuild_pipeline`] is called.
pub struct Application {
    environment: HostEnvironment,
    routes: RouteTable,
    controllers: ControllerRegistry,
    views: Arc<ViewEngine>,
    services: Arc<HostServices>,
    observers: Vec<(PipelineEvent, Arc<dyn PipelineObserver>)>,
    pipeline: Pipeline,
}

impl Application {
    #[must_use]
    pub fn builder(environment: HostEnvironment) -> ApplicationBuilder {
        ApplicationBuilder::new(environment)
    }

    #[must_use]
    pub fn environment(&self) -> &HostEnvironment {
        &self.environment
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    #[must_use]
    pub fn services(&self) -> &HostServices {
        &self.services
    }

    #[must_use]
    pub fn controllers(&self) -> &ControllerRegistry {
        &self.controllers
    }

    pub fn controllers_mut(&mut self) -> &mut ControllerRegistry {
        &mut self.controllers
    }

    pub fn register_observer(&mut self, event: PipelineEvent, observer: impl PipelineObserver + 'static) {
        self.observers.push((event, Arc::new(observer)));
    }

    /// Rebuilds the request pipeline from the current observers and controllers.
    pub fn rebuild_pipeline(&mut self) {
        tracing::debug!(
            "Application: rebuilding pipeline with {} observers",
            self.observers.len()
        );
        self.pipeline = Pipeline::build(&self.observers, &self.controllers, &self.views);
    }

    /// Runs a request through every pipeline step and flushes the response
    /// body back to the worker request.
    ///
    /// A failing handler skips `PostRequestHandlerExecute` and answers with a
    /// 500 page; the remaining steps still run.
    pub fn process_request(&self, worker: &dyn WorkerRequest) -> CompletedRequest {
        let request = match HttpRequest::from_worker(worker) {
            Ok(request) => request,
            Err(error) => return bad_request(worker, error),
        };
        tracing::debug!("Application: {} {}", request.method(), request.raw_url());

        let mut context = HttpContext::new(request, self.services.clone());
        let handler = self.map_handler(context.request());

        self.pipeline.notify(PipelineEvent::BeginRequest, &context);

        let user = self.services.forms().authenticate(context.request());
        context.set_user(user);
        self.pipeline.notify(PipelineEvent::AuthenticateRequest, &context);

        if matches!(handler, RequestHandler::Mvc(_)) {
            let session = self.services.sessions().acquire(context.request());
            context.set_session(Some(session));
        }
        self.pipeline.notify(PipelineEvent::AcquireRequestState, &context);

        let error = self.execute_handler(&handler, &context).err();
        match &error {
            Some(failure) => {
                tracing::warn!("Application: request failed: {}", failure);
                let response = context.response();
                response.clear_output();
                response.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                response.write(SERVER_ERROR_TEXT);
            }
            None => self
                .pipeline
                .notify(PipelineEvent::PostRequestHandlerExecute, &context),
        }

        if let Some(session) = context.session() {
            self.services.sessions().release(session, context.response());
        }
        self.pipeline.notify(PipelineEvent::ReleaseRequestState, &context);

        self.services
            .forms()
            .redirect_unauthorized(context.request(), context.response());
        self.pipeline.notify(PipelineEvent::EndRequest, &context);

        let response = context.response().clone();
        worker.send_response_from_memory(response.output().as_bytes());
        CompletedRequest { response, error }
    }

    fn map_handler(&self, request: &HttpRequest) -> RequestHandler {
        if let Some(handler) = self.static_handler(request.path()) {
            return handler;
        }
        match self.routes.resolve(request.path()) {
            RouteMatch::Mapped(data) => RequestHandler::Mvc(data),
            RouteMatch::Ignored | RouteMatch::Unmatched => RequestHandler::NotFound,
        }
    }

    /// Paths under the static directory are served from disk, never routed.
    fn static_handler(&self, path: &str) -> Option<RequestHandler> {
        let static_dir = self.environment.manifest().static_dir.as_ref()?;
        let static_root = self.environment.static_root()?;

        let mut segments = path.split('/').filter(|segment| !segment.is_empty());
        if !segments.next()?.eq_ignore_ascii_case(static_dir) {
            return None;
        }

        let mut file = static_root;
        for segment in segments {
            if segment == ".." || segment == "." {
                return Some(RequestHandler::NotFound);
            }
            file.push(segment);
        }

        if file.is_file() {
            Some(RequestHandler::StaticFile(file))
        } else {
            Some(RequestHandler::NotFound)
        }
    }

    fn execute_handler(&self, handler: &RequestHandler, context: &HttpContext) -> Result<(), PipelineError> {
        let response = context.response();
        match handler {
            RequestHandler::StaticFile(path) => {
                let content = std::fs::read(path).map_err(|err| PipelineError::StaticFile {
                    path: path.display().to_string(),
                    reason: err.to_string(),
                })?;
                response.set_content_type(content_type_for(path));
                response.write(&String::from_utf8_lossy(&content));
            }
            RequestHandler::Mvc(route_data) => {
                match self.pipeline.handler.process(context, route_data.clone())? {
                    Invocation::Completed => {}
                    Invocation::ControllerNotFound | Invocation::ActionNotFound => not_found(response),
                }
            }
            RequestHandler::NotFound => not_found(response),
        }
        Ok(())
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("environment", &self.environment)
            .field("routes", &self.routes.len())
            .field("controllers", &self.controllers)
            .field("views", &self.views)
            .field("observers", &self.observers.len())
            .finish()
    }
}

fn not_found(response: &HttpResponse) {
    response.set_status(StatusCode::NOT_FOUND);
    response.clear_output();
    response.write(NOT_FOUND_TEXT);
}

fn bad_request(worker: &dyn WorkerRequest, error: PipelineError) -> CompletedRequest {
    tracing::warn!("Application: rejecting request: {}", error);
    let response = HttpResponse::new();
    response.set_status(StatusCode::BAD_REQUEST);
    worker.send_response_from_memory(&[]);
    CompletedRequest {
        response,
        error: Some(error),
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("html" | "htm") => "text/html",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod manifest_tests {
    use super::*;

    #[test]
    fn test_manifest_defaults_fill_missing_keys() {
        let manifest = AppManifest::from_toml_str("name = \"demo\"\nstatic_dir = \"Content\"\n").unwrap();
        assert_eq!(manifest.name, "demo");
        assert_eq!(manifest.login_url, "/Account/LogOn");
        assert_eq!(manifest.static_dir.as_deref(), Some("Content"));
    }

    #[test]
    fn test_manifest_rejects_wrong_types() {
        assert!(AppManifest::from_toml_str("name = 3").is_err());
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("site.CSS")), "text/css");
        assert_eq!(content_type_for(Path::new("noext")), "application/octet-stream");
    }
}
