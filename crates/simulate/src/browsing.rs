use std::sync::Arc;

use chrono::Utc;
use ewe_routing::application::Application;
use ewe_routing::cookies::CookieJar;
use ewe_routing::requests::Method;
use ewe_routing::response::HttpResponse;
use ewe_routing::results::{ContentResult, ViewResult};
use ewe_routing::session::SessionState;
use ewe_routing::StatusCode;
use serde::Serialize;

use crate::capture::{ActionExecutedSnapshot, CaptureSlot, ResultExecutedSnapshot};
use crate::errors::{SimulateError, SimulateResult};
use crate::forms::to_form_fields;
use crate::synthesizer::SynthesizedRequest;

/// Per-request header overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestOptions {
    pub accept: Option<String>,
    pub basic_auth: Option<(String, String)>,
}

impl RequestOptions {
    #[must_use]
    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    #[must_use]
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }
}

/// Everything one simulated request produced.
#[derive(Clone, Debug)]
pub struct RequestResult {
    response_text: String,
    response: HttpResponse,
    post_handler_context: Option<ActionExecutedSnapshot>,
    post_result_context: Option<ResultExecutedSnapshot>,
}

impl RequestResult {
    /// The body exactly as the host flushed it.
    #[must_use]
    pub fn response_text(&self) -> &str {
        &self.response_text
    }

    #[must_use]
    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    /// The first action to complete, as its filters last saw it. Absent when
    /// no action ran, e.g. for static files or denied requests.
    #[must_use]
    pub fn post_handler_context(&self) -> Option<&ActionExecutedSnapshot> {
        self.post_handler_context.as_ref()
    }

    /// The first result to finish executing. With child actions that is the
    /// innermost one.
    #[must_use]
    pub fn post_result_context(&self) -> Option<&ResultExecutedSnapshot> {
        self.post_result_context.as_ref()
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    #[must_use]
    pub fn redirect_location(&self) -> Option<String> {
        self.response.redirect_location()
    }

    #[must_use]
    pub fn view_result(&self) -> Option<&ViewResult> {
        self.post_handler_context
            .as_ref()
            .and_then(ActionExecutedSnapshot::result)
            .and_then(|result| result.as_view())
    }

    #[must_use]
    pub fn content_result(&self) -> Option<&ContentResult> {
        self.post_handler_context
            .as_ref()
            .and_then(ActionExecutedSnapshot::result)
            .and_then(|result| result.as_content())
    }
}

/// A browser-like client bound to one application inside the boundary.
///
/// Cookies returned by responses are kept and sent with later requests, so
/// session and authentication state carry over from call to call.
pub struct BrowsingSession {
    application: Arc<Application>,
    cookies: CookieJar,
    session: Option<SessionState>,
    slot: CaptureSlot,
}

impl BrowsingSession {
    #[must_use]
    pub fn new(application: Arc<Application>) -> Self {
        Self {
            application,
            cookies: CookieJar::new(),
            session: None,
            slot: CaptureSlot::new(),
        }
    }

    #[must_use]
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.cookies
    }

    /// Session state of the most recent request; absent before the first one
    /// and after requests that had no session.
    #[must_use]
    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    /// What the most recent request left behind, including requests that
    /// failed.
    #[must_use]
    pub fn capture_slot(&self) -> &CaptureSlot {
        &self.slot
    }

    pub fn get(&mut self, path: &str) -> SimulateResult<RequestResult> {
        self.get_with(path, &RequestOptions::default())
    }

    pub fn get_with(&mut self, path: &str, options: &RequestOptions) -> SimulateResult<RequestResult> {
        self.process(path, Method::GET, Vec::new(), options)
    }

    /// Posts `form` as form-urlencoded fields; see
    /// [`crate::forms::to_form_fields`] for how records are flattened.
    pub fn post<T: Serialize + ?Sized>(&mut self, path: &str, form: &T) -> SimulateResult<RequestResult> {
        self.post_with(path, form, &RequestOptions::default())
    }

    pub fn post_with<T: Serialize + ?Sized>(
        &mut self,
        path: &str,
        form: &T,
        options: &RequestOptions,
    ) -> SimulateResult<RequestResult> {
        let fields = to_form_fields(form)?;
        self.process(path, Method::POST, fields, options)
    }

    pub fn delete(&mut self, path: &str) -> SimulateResult<RequestResult> {
        self.delete_with(path, &RequestOptions::default())
    }

    pub fn delete_with(&mut self, path: &str, options: &RequestOptions) -> SimulateResult<RequestResult> {
        self.process(path, Method::DELETE, Vec::new(), options)
    }

    /// Runs one request through the host and folds its cookies and session
    /// back into this browsing session.
    ///
    /// An unhandled application error is returned only after cookies and
    /// session have been merged.
    pub fn process(
        &mut self,
        path: &str,
        verb: Method,
        form: Vec<(String, String)>,
        options: &RequestOptions,
    ) -> SimulateResult<RequestResult> {
        let mut builder = SynthesizedRequest::builder(path)
            .verb(verb)
            .form(form)
            .cookies(&self.cookies)
            .capture_slot(self.slot.clone());
        if let Some(accept) = &options.accept {
            builder = builder.accept(accept.as_str());
        }
        if let Some((user, password)) = &options.basic_auth {
            builder = builder.basic_auth(user.as_str(), password.as_str());
        }
        let request = builder.build()?;

        self.slot.reset_all();
        tracing::debug!("BrowsingSession: {} {}", request.verb(), path);
        let completed = self.application.process_request(&request);

        let response = self
            .slot
            .response()
            .unwrap_or_else(|| completed.response().clone());
        self.cookies
            .merge_response_cookies(&response.cookies(), Utc::now());
        self.session = self.slot.session();

        if let Some(error) = completed.error() {
            tracing::debug!("BrowsingSession: {} failed: {}", path, error);
            return Err(SimulateError::Application(error.clone()));
        }

        Ok(RequestResult {
            response_text: request.response_text(),
            response,
            post_handler_context: self.slot.post_handler_context(),
            post_result_context: self.slot.post_result_context(),
        })
    }
}
