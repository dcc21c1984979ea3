use core::fmt;
use std::sync::{Arc, Mutex};

use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::cookies::Cookie;
use crate::macros::locked;

pub const TEXT_HTML: &str = "text/html";

struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    cookies: Vec<Cookie>,
    redirect_location: Option<String>,
    content_type: String,
    output: String,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            cookies: Vec::new(),
            redirect_location: None,
            content_type: String::from(TEXT_HTML),
            output: String::new(),
        }
    }
}

/// Shared handle to the response being built for one request.
///
/// Clones refer to the same response, so the handle can be held by the
/// pipeline, filters and anything that captured it after the request ended.
#[derive(Clone, Default)]
pub struct HttpResponse {
    state: Arc<Mutex<ResponseState>>,
}

impl HttpResponse {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        locked!(self.state).status
    }

    pub fn set_status(&self, status: StatusCode) {
        locked!(self.state).status = status;
    }

    #[must_use]
    pub fn headers(&self) -> HeaderMap {
        locked!(self.state).headers.clone()
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        locked!(self.state)
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(String::from)
    }

    /// Sets a header, replacing any existing value. Invalid names or values
    /// are rejected with the returned error.
    pub fn set_header(&self, name: &str, value: &str) -> Result<(), http::Error> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        locked!(self.state).headers.insert(name, value);
        Ok(())
    }

    /// Cookies appended to the response, in the order they were added.
    #[must_use]
    pub fn cookies(&self) -> Vec<Cookie> {
        locked!(self.state).cookies.clone()
    }

    pub fn append_cookie(&self, cookie: Cookie) {
        locked!(self.state).cookies.push(cookie);
    }

    #[must_use]
    pub fn redirect_location(&self) -> Option<String> {
        locked!(self.state).redirect_location.clone()
    }

    #[must_use]
    pub fn content_type(&self) -> String {
        locked!(self.state).content_type.clone()
    }

    pub fn set_content_type(&self, content_type: &str) {
        locked!(self.state).content_type = String::from(content_type);
    }

    pub fn write(&self, text: &str) {
        locked!(self.state).output.push_str(text);
    }

    #[must_use]
    pub fn output(&self) -> String {
        locked!(self.state).output.clone()
    }

    pub fn clear_output(&self) {
        locked!(self.state).output.clear();
    }

    /// Issues a `302 Found` to `url`, replacing any buffered output with the
    /// conventional "Object moved" body.
    pub fn redirect(&self, url: &str) {
        let mut state = locked!(self.state);
        state.status = StatusCode::FOUND;
        state.redirect_location = Some(String::from(url));
        if let Ok(value) = HeaderValue::try_from(url) {
            state.headers.insert(header::LOCATION, value);
        }
        state.content_type = String::from(TEXT_HTML);
        state.output = format!(
            "<html><head><title>Object moved</title></head><body>\r\n<h2>Object moved to <a href=\"{url}\">here</a>.</h2>\r\n</body></html>\r\n"
        );
    }

    /// Renders the `Set-Cookie` header values for the appended cookies.
    #[must_use]
    pub fn set_cookie_headers(&self) -> Vec<String> {
        locked!(self.state)
            .cookies
            .iter()
            .map(Cookie::to_set_cookie)
            .collect()
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = locked!(self.state);
        f.debug_struct("HttpResponse")
            .field("status", &state.status)
            .field("headers", &state.headers)
            .field("cookies", &state.cookies)
            .field("redirect_location", &state.redirect_location)
            .field("content_type", &state.content_type)
            .field("output_len", &state.output.len())
            .finish()
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let response = HttpResponse::new();
        let other = response.clone();
        other.write("hello");
        other.append_cookie(Cookie::new("a", "1"));
        assert_eq!(response.output(), "hello");
        assert_eq!(response.cookies().len(), 1);
    }

    #[test]
    fn test_redirect_replaces_output() {
        let response = HttpResponse::new();
        response.write("partial");
        response.redirect("/Account/LogOn?ReturnUrl=%2Fhome");

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.redirect_location().as_deref(),
            Some("/Account/LogOn?ReturnUrl=%2Fhome")
        );
        assert_eq!(
            response.header("location").as_deref(),
            Some("/Account/LogOn?ReturnUrl=%2Fhome")
        );
        assert!(response.output().contains("Object moved"));
        assert!(!response.output().contains("partial"));
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let response = HttpResponse::new();
        assert!(response.set_header("bad header", "x").is_err());
        assert!(response.set_header("X-Powered-By", "ewe").is_ok());
        assert_eq!(response.header("x-powered-by").as_deref(), Some("ewe"));
    }
}
