use std::sync::{Mutex, PoisonError};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use ewe_routing::cookies::CookieJar;
use ewe_routing::requests::{KnownHeader, Method, WorkerRequest, FORM_URLENCODED};
use ewe_routing::{Extensions, Uri};
use url::form_urlencoded::byte_serialize;
use url::Url;

use crate::capture::CaptureSlot;
use crate::errors::{SimulateError, SimulateResult};

const SYNTHETIC_HOST: &str = "localhost";
const SYNTHETIC_AGENT: &str = "ewe-simulate";
const SYNTHETIC_ORIGIN: &str = "http://localhost/";

/// Splits a test-supplied target into an application relative path and a
/// query string.
///
/// A leading `~/` or a single leading `/` is dropped, then the target is
/// split at the first `?`.
#[must_use]
pub fn normalize_target(target: &str) -> (String, String) {
    let relative = target
        .strip_prefix("~/")
        .or_else(|| target.strip_prefix('/'))
        .unwrap_or(target);

    match relative.split_once('?') {
        Some((path, query)) => (String::from(path), String::from(query)),
        None => (String::from(relative), String::new()),
    }
}

/// Percent-encodes whatever the path or query carries that a request line
/// cannot, the way a browser would before sending it. Only control
/// characters are refused.
fn encode_target(path: &str, query: &str) -> SimulateResult<(String, String)> {
    for (part, text) in [("path", path), ("query", query)] {
        if text.chars().any(char::is_control) {
            return Err(SimulateError::invalid(format!(
                "request {part} `{}` contains control characters",
                text.escape_debug()
            )));
        }
    }

    let mut url = Url::parse(SYNTHETIC_ORIGIN)
        .map_err(|err| SimulateError::invalid(format!("`{SYNTHETIC_ORIGIN}` is not a valid origin: {err}")))?;
    url.set_path(&format!("/{path}"));
    if !query.is_empty() {
        url.set_query(Some(query));
    }

    let target = match url.query() {
        Some(encoded) => format!("{}?{encoded}", url.path()),
        None => String::from(url.path()),
    };
    target
        .parse::<Uri>()
        .map_err(|err| SimulateError::invalid(format!("`{target}` is not a valid request target: {err}")))?;

    let encoded_path = url.path().strip_prefix('/').unwrap_or(url.path());
    Ok((String::from(encoded_path), String::from(url.query().unwrap_or_default())))
}

/// Serializes form fields as `key=value&` pairs, both sides percent-encoded.
#[must_use]
pub fn encode_form(fields: &[(String, String)]) -> String {
    let mut body = String::new();
    for (key, value) in fields {
        body.extend(byte_serialize(key.as_bytes()));
        body.push('=');
        body.extend(byte_serialize(value.as_bytes()));
        body.push('&');
    }
    body
}

pub struct RequestBuilder {
    target: String,
    verb: Method,
    form: Vec<(String, String)>,
    accept: Option<String>,
    credentials: Option<(String, String)>,
    cookie_header: Option<String>,
    slot: Option<CaptureSlot>,
}

impl RequestBuilder {
    #[must_use]
    pub fn verb(mut self, verb: Method) -> Self {
        self.verb = verb;
        self
    }

    #[must_use]
    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.form = fields;
        self
    }

    #[must_use]
    pub fn accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    #[must_use]
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Sends every cookie in `jar`; an empty jar sends no `Cookie` header.
    #[must_use]
    pub fn cookies(mut self, jar: &CookieJar) -> Self {
        self.cookie_header = jar.to_request_header();
        self
    }

    #[must_use]
    pub fn capture_slot(mut self, slot: CaptureSlot) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn build(self) -> SimulateResult<SynthesizedRequest> {
        let (path, query) = normalize_target(&self.target);
        let (path, query) = encode_target(&path, &query)?;

        let body = if self.form.is_empty() {
            None
        } else {
            Some(Bytes::from(encode_form(&self.form)))
        };

        let authorization = self.credentials.map(|(user, password)| {
            format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
        });

        let mut extensions = Extensions::new();
        if let Some(slot) = self.slot {
            extensions.insert(slot);
        }

        Ok(SynthesizedRequest {
            verb_name: self.verb.verb_name(),
            verb: self.verb,
            path,
            query,
            form: self.form,
            body,
            accept: self.accept,
            authorization,
            cookie_header: self.cookie_header,
            extensions,
            output: Mutex::new(Vec::new()),
        })
    }
}

/// A fabricated low-level request, good enough for the host pipeline to
/// route, authenticate and attach session state exactly as it would for a
/// request read off a socket.
#[derive(Debug)]
pub struct SynthesizedRequest {
    verb: Method,
    verb_name: String,
    path: String,
    query: String,
    form: Vec<(String, String)>,
    body: Option<Bytes>,
    accept: Option<String>,
    authorization: Option<String>,
    cookie_header: Option<String>,
    extensions: Extensions,
    output: Mutex<Vec<u8>>,
}

impl SynthesizedRequest {
    pub fn builder(target: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            target: target.into(),
            verb: Method::GET,
            form: Vec::new(),
            accept: None,
            credentials: None,
            cookie_header: None,
            slot: None,
        }
    }

    #[must_use]
    pub fn verb(&self) -> &Method {
        &self.verb
    }

    #[must_use]
    pub fn form(&self) -> &[(String, String)] {
        &self.form
    }

    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    #[must_use]
    pub fn cookie_header(&self) -> Option<&str> {
        self.cookie_header.as_deref()
    }

    /// Everything the host flushed into this request so far.
    #[must_use]
    pub fn response_text(&self) -> String {
        let output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&output).into_owned()
    }
}

impl WorkerRequest for SynthesizedRequest {
    fn http_verb_name(&self) -> &str {
        &self.verb_name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn query_string(&self) -> &str {
        &self.query
    }

    fn known_request_header(&self, header: KnownHeader) -> Option<String> {
        match header {
            KnownHeader::Accept => self.accept.clone(),
            KnownHeader::Authorization => self.authorization.clone(),
            KnownHeader::ContentType if self.verb == Method::POST => Some(String::from(FORM_URLENCODED)),
            KnownHeader::ContentLength => self.body.as_ref().map(|body| body.len().to_string()),
            KnownHeader::Cookie => self.cookie_header.clone(),
            KnownHeader::Host => Some(String::from(SYNTHETIC_HOST)),
            KnownHeader::UserAgent => Some(String::from(SYNTHETIC_AGENT)),
            _ => None,
        }
    }

    fn unknown_request_header(&self, _name: &str) -> Option<String> {
        None
    }

    fn unknown_request_headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn preloaded_entity_body(&self) -> Option<Bytes> {
        self.body.clone()
    }

    fn extensions(&self) -> Extensions {
        self.extensions.clone()
    }

    fn send_response_from_memory(&self, data: &[u8]) {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ewe_routing::cookies::Cookie;
    use ewe_routing::requests::HttpRequest;

    use super::*;

    #[test]
    fn targets_are_normalized_before_splitting() {
        for target in ["~/a/b", "/a/b", "a/b"] {
            assert_eq!(normalize_target(target), (String::from("a/b"), String::new()));
        }
        assert_eq!(
            normalize_target("a/b?x=1&y=2"),
            (String::from("a/b"), String::from("x=1&y=2"))
        );
        assert_eq!(
            normalize_target("//twice?q=a?b"),
            (String::from("/twice"), String::from("q=a?b"))
        );
    }

    #[test]
    fn spaces_in_targets_are_percent_encoded() {
        let request = SynthesizedRequest::builder("search/all items?q=hello world&tag=a#b")
            .build()
            .expect("request");

        assert_eq!(request.path(), "search/all%20items");
        assert_eq!(request.query_string(), "q=hello%20world&tag=a%23b");

        let parsed = HttpRequest::from_worker(&request).expect("host request");
        assert_eq!(parsed.query().get("q"), Some("hello world"));
        assert_eq!(parsed.query().get("tag"), Some("a#b"));
    }

    #[test]
    fn existing_escapes_are_kept() {
        let request = SynthesizedRequest::builder("/a%20b?ReturnUrl=%2Fhome")
            .build()
            .expect("request");
        assert_eq!(request.path(), "a%20b");
        assert_eq!(request.query_string(), "ReturnUrl=%2Fhome");
    }

    #[test]
    fn control_characters_are_rejected_naming_the_part() {
        match SynthesizedRequest::builder("home/index?q=a\nb").build() {
            Err(SimulateError::InvalidArgument(message)) => {
                assert!(message.starts_with("request query"), "{message}");
            }
            other => panic!("expected an invalid argument, got {other:?}"),
        }
        match SynthesizedRequest::builder("home/\tindex").build() {
            Err(SimulateError::InvalidArgument(message)) => {
                assert!(message.starts_with("request path"), "{message}");
            }
            other => panic!("expected an invalid argument, got {other:?}"),
        }
    }

    #[test]
    fn empty_jar_sends_no_cookie_header() {
        let request = SynthesizedRequest::builder("/")
            .cookies(&CookieJar::new())
            .build()
            .expect("request");

        assert_eq!(request.known_request_header(KnownHeader::Cookie), None);
    }

    #[test]
    fn jar_cookies_are_sent_in_order() {
        let mut jar = CookieJar::new();
        jar.merge_response_cookies(
            &[Cookie::new("a", "1"), Cookie::new("b", "2")],
            Utc::now(),
        );

        let request = SynthesizedRequest::builder("/").cookies(&jar).build().expect("request");
        assert_eq!(request.cookie_header(), Some("a=1;b=2;"));
    }

    #[test]
    fn post_form_body_and_headers() {
        let request = SynthesizedRequest::builder("~/account/logon?ReturnUrl=%2F")
            .verb(Method::POST)
            .form(vec![
                (String::from("user name"), String::from("steve & co")),
                (String::from("tag"), String::from("a")),
                (String::from("tag"), String::from("b")),
            ])
            .accept("text/html")
            .basic_auth("steve", "secret")
            .build()
            .expect("request");

        assert_eq!(request.http_verb_name(), "post");
        assert_eq!(request.path(), "account/logon");
        assert_eq!(request.query_string(), "ReturnUrl=%2F");
        assert_eq!(
            request.body().map(|body| body.to_vec()),
            Some(b"user+name=steve+%26+co&tag=a&tag=b&".to_vec())
        );
        assert_eq!(
            request.known_request_header(KnownHeader::ContentType).as_deref(),
            Some(FORM_URLENCODED)
        );
        assert_eq!(
            request.known_request_header(KnownHeader::Accept).as_deref(),
            Some("text/html")
        );
        assert_eq!(
            request.known_request_header(KnownHeader::Authorization).as_deref(),
            Some("Basic c3RldmU6c2VjcmV0")
        );

        let parsed = HttpRequest::from_worker(&request).expect("host request");
        assert_eq!(parsed.form().get("user name"), Some("steve & co"));
        assert_eq!(parsed.form().get_all("tag").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(parsed.query().get("returnurl"), Some("/"));
    }

    #[test]
    fn post_without_fields_still_reports_form_content_type() {
        let request = SynthesizedRequest::builder("home")
            .verb(Method::POST)
            .build()
            .expect("request");

        assert!(request.body().is_none());
        assert_eq!(
            request.known_request_header(KnownHeader::ContentType).as_deref(),
            Some(FORM_URLENCODED)
        );

        let get = SynthesizedRequest::builder("home").build().expect("request");
        assert_eq!(get.known_request_header(KnownHeader::ContentType), None);
    }

    #[test]
    fn capture_slot_rides_in_the_extensions() {
        let slot = CaptureSlot::new();
        let request = SynthesizedRequest::builder("home")
            .capture_slot(slot.clone())
            .build()
            .expect("request");

        let carried = request.extensions().get::<CaptureSlot>().cloned().expect("slot");
        assert!(carried.offer_response(ewe_routing::response::HttpResponse::new()));
        assert!(slot.response().is_some());
    }

    #[test]
    fn flushed_output_is_collected() {
        let request = SynthesizedRequest::builder("home").build().expect("request");
        request.send_response_from_memory(b"<p>");
        request.send_response_from_memory(b"hi</p>");
        assert_eq!(request.response_text(), "<p>hi</p>");
    }
}
