use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use http::StatusCode;

use crate::context::HttpContext;
use crate::cookies::Cookie;
use crate::macros::locked;
use crate::requests::HttpRequest;
use crate::response::HttpResponse;
use crate::results::ActionResult;

pub const ANTI_FORGERY_FIELD: &str = "__RequestVerificationToken";
pub const FORMS_AUTHENTICATION_TYPE: &str = "Forms";

const TICKET_LEN: usize = 32;
const ANTI_FORGERY_TOKEN_LEN: usize = 40;

/// The authenticated identity attached to a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    name: String,
    authentication_type: String,
}

impl Principal {
    pub fn new(name: impl Into<String>, authentication_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authentication_type: authentication_type.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn authentication_type(&self) -> &str {
        &self.authentication_type
    }
}

/// Cookie ticket based authentication with a login page.
///
/// Tickets are opaque random values resolved against an in-memory table, so
/// they only stay valid for the lifetime of the application instance.
#[derive(Debug)]
pub struct FormsAuthentication {
    cookie_name: String,
    login_url: String,
    default_url: String,
    tickets: Mutex<HashMap<String, String>>,
}

impl FormsAuthentication {
    pub fn new(
        cookie_name: impl Into<String>,
        login_url: impl Into<String>,
        default_url: impl Into<String>,
    ) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            login_url: login_url.into(),
            default_url: default_url.into(),
            tickets: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    #[must_use]
    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    #[must_use]
    pub fn default_url(&self) -> &str {
        &self.default_url
    }

    /// Resolves the request's ticket cookie into a principal.
    #[must_use]
    pub fn authenticate(&self, request: &HttpRequest) -> Option<Principal> {
        let ticket = request.cookies().value(&self.cookie_name)?;
        locked!(self.tickets)
            .get(ticket)
            .map(|name| Principal::new(name.clone(), FORMS_AUTHENTICATION_TYPE))
    }

    /// Issues a session-only ticket for `user_name` and returns the redirect
    /// to the request's local `ReturnUrl`, or to the default url.
    pub fn redirect_from_login_page(&self, context: &HttpContext, user_name: &str) -> ActionResult {
        let ticket = random_token(TICKET_LEN);
        locked!(self.tickets).insert(ticket.clone(), String::from(user_name));
        context.response().append_cookie(
            Cookie::new(self.cookie_name.clone(), ticket)
                .with_path("/")
                .http_only(),
        );

        let target = context
            .request()
            .query()
            .get("ReturnUrl")
            .or_else(|| context.request().form().get("ReturnUrl"))
            .filter(|url| is_local_url(url))
            .map_or_else(|| self.default_url.clone(), String::from);

        tracing::info!("FormsAuthentication: {} signed in, returning to {}", user_name, target);
        ActionResult::redirect(target)
    }

    /// Drops the request's ticket and expires its cookie.
    pub fn sign_out(&self, context: &HttpContext) {
        if let Some(ticket) = context.request().cookies().value(&self.cookie_name) {
            locked!(self.tickets).remove(ticket);
        }
        context.response().append_cookie(
            Cookie::new(self.cookie_name.clone(), "")
                .with_path("/")
                .with_expires(DateTime::<Utc>::UNIX_EPOCH),
        );
    }

    /// Turns a `401 Unauthorized` response into a redirect to the login page
    /// carrying the original url as `ReturnUrl`.
    pub fn redirect_unauthorized(&self, request: &HttpRequest, response: &HttpResponse) {
        if response.status() != StatusCode::UNAUTHORIZED {
            return;
        }

        let return_url: String =
            url::form_urlencoded::byte_serialize(request.raw_url().as_bytes()).collect();
        let separator = if self.login_url.contains('?') { '&' } else { '?' };
        let location = format!("{}{}ReturnUrl={}", self.login_url, separator, return_url);
        tracing::debug!("FormsAuthentication: unauthorized, redirecting to {}", location);
        response.redirect(&location);
    }
}

fn is_local_url(url: &str) -> bool {
    url.starts_with('/') && !url.starts_with("//") && !url.starts_with("/\\")
}

/// Double-submit anti-forgery tokens: a cookie plus a matching hidden field.
#[derive(Debug, Default)]
pub struct AntiForgery;

impl AntiForgery {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Renders the hidden form field, reusing the request's token cookie or
    /// issuing a new one on the response.
    #[must_use]
    pub fn hidden_field_html(&self, context: &HttpContext) -> String {
        let token = match context.request().cookies().value(ANTI_FORGERY_FIELD) {
            Some(existing) if !existing.is_empty() => String::from(existing),
            _ => {
                let token = random_token(ANTI_FORGERY_TOKEN_LEN);
                context.response().append_cookie(
                    Cookie::new(ANTI_FORGERY_FIELD, token.clone())
                        .with_path("/")
                        .http_only(),
                );
                token
            }
        };
        format!("<input name=\"{ANTI_FORGERY_FIELD}\" type=\"hidden\" value=\"{token}\" />")
    }

    /// Whether the posted form token matches the token cookie.
    #[must_use]
    pub fn validate(&self, request: &HttpRequest) -> bool {
        match (
            request.form().get(ANTI_FORGERY_FIELD),
            request.cookies().value(ANTI_FORGERY_FIELD),
        ) {
            (Some(form), Some(cookie)) => !form.is_empty() && form == cookie,
            _ => false,
        }
    }
}

fn random_token(len: usize) -> String {
    std::iter::repeat_with(fastrand::alphanumeric)
        .take(len)
        .collect()
}
