use core::fmt;
use std::sync::Arc;

use http::Extensions;

use crate::application::AppManifest;
use crate::requests::HttpRequest;
use crate::response::HttpResponse;
use crate::security::{AntiForgery, FormsAuthentication, Principal};
use crate::session::{SessionState, SessionStore};

/// Application wide services reachable from every request.
#[derive(Debug)]
pub struct HostServices {
    manifest: AppManifest,
    sessions: SessionStore,
    forms: FormsAuthentication,
    anti_forgery: AntiForgery,
}

impl HostServices {
    #[must_use]
    pub fn new(manifest: AppManifest) -> Self {
        Self {
            sessions: SessionStore::new(manifest.session_cookie.clone()),
            forms: FormsAuthentication::new(
                manifest.auth_cookie.clone(),
                manifest.login_url.clone(),
                manifest.default_url.clone(),
            ),
            anti_forgery: AntiForgery::new(),
            manifest,
        }
    }

    #[must_use]
    pub fn manifest(&self) -> &AppManifest {
        &self.manifest
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    #[must_use]
    pub fn forms(&self) -> &FormsAuthentication {
        &self.forms
    }

    #[must_use]
    pub fn anti_forgery(&self) -> &AntiForgery {
        &self.anti_forgery
    }
}

/// Everything the pipeline knows about one request while it runs.
///
/// Cloning is cheap: the request is shared, the response and session are
/// handles, and `items` holds whatever the worker request threaded in.
#[derive(Clone)]
pub struct HttpContext {
    request: Arc<HttpRequest>,
    response: HttpResponse,
    session: Option<SessionState>,
    user: Option<Principal>,
    items: Extensions,
    services: Arc<HostServices>,
}

impl HttpContext {
    #[must_use]
    pub fn new(request: HttpRequest, services: Arc<HostServices>) -> Self {
        let items = request.extensions().clone();
        Self {
            request: Arc::new(request),
            response: HttpResponse::new(),
            session: None,
            user: None,
            items,
            services,
        }
    }

    #[must_use]
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    #[must_use]
    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    /// The session, once `AcquireRequestState` attached one.
    #[must_use]
    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    pub fn set_session(&mut self, session: Option<SessionState>) {
        self.session = session;
    }

    #[must_use]
    pub fn user(&self) -> Option<&Principal> {
        self.user.as_ref()
    }

    pub fn set_user(&mut self, user: Option<Principal>) {
        self.user = user;
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    #[must_use]
    pub fn items(&self) -> &Extensions {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut Extensions {
        &mut self.items
    }

    #[must_use]
    pub fn services(&self) -> &HostServices {
        &self.services
    }
}

impl fmt::Debug for HttpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpContext")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("session", &self.session)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}
