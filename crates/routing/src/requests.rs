use core::fmt;
use std::str::FromStr;

use bytes::Bytes;
use http::{HeaderName, HeaderValue};
/// Implementation of the request primitives the pipeline dispatches on.
pub use http::{Extensions, HeaderMap, Uri, Version};

use crate::cookies::CookieJar;
use crate::errors::{PipelineError, RequestError};
use crate::{field_method, field_method_as_mut, set_field_method_as_mut};

pub type RouteURL = String;

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Method {
    OPTIONS,
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    TRACE,
    CONNECT,
    PATCH,
    CUSTOM(String),
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CUSTOM(arg0) => f.debug_tuple("CUSTOM").field(arg0).finish(),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Method {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::OPTIONS => "OPTIONS",
            Self::GET => "GET",
            Self::POST => "POST",
            Self::PUT => "PUT",
            Self::DELETE => "DELETE",
            Self::HEAD => "HEAD",
            Self::TRACE => "TRACE",
            Self::CONNECT => "CONNECT",
            Self::PATCH => "PATCH",
            Self::CUSTOM(name) => name.as_str(),
        }
    }

    /// The lowercase verb name as a worker request reports it.
    #[must_use]
    pub fn verb_name(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }

    pub fn into_http_method(self) -> Result<http::Method, http::method::InvalidMethod> {
        match self {
            Method::CONNECT => Ok(http::Method::CONNECT),
            Method::PUT => Ok(http::Method::PUT),
            Method::GET => Ok(http::Method::GET),
            Method::POST => Ok(http::Method::POST),
            Method::HEAD => Ok(http::Method::HEAD),
            Method::PATCH => Ok(http::Method::PATCH),
            Method::TRACE => Ok(http::Method::TRACE),
            Method::DELETE => Ok(http::Method::DELETE),
            Method::OPTIONS => Ok(http::Method::OPTIONS),
            Method::CUSTOM(name) => http::Method::from_bytes(name.as_bytes()),
        }
    }
}

impl FromStr for Method {
    type Err = RequestError;

    /// Verb names are matched case-insensitively; anything else that is a
    /// valid token becomes [`Method::CUSTOM`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "OPTIONS" => Ok(Method::OPTIONS),
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            "HEAD" => Ok(Method::HEAD),
            "TRACE" => Ok(Method::TRACE),
            "CONNECT" => Ok(Method::CONNECT),
            "PATCH" => Ok(Method::PATCH),
            "" => Err(RequestError::UnknownMethod(String::from(s))),
            _ => http::Method::from_bytes(upper.as_bytes())
                .map(|_| Method::CUSTOM(upper.clone()))
                .map_err(|_| RequestError::UnknownMethod(String::from(s))),
        }
    }
}

impl TryFrom<http::Method> for Method {
    type Error = RequestError;

    fn try_from(value: http::Method) -> Result<Self, Self::Error> {
        Method::from_str(value.as_str())
    }
}

/// Request headers the host runtime resolves through dedicated slots on a
/// [`WorkerRequest`] rather than by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KnownHeader {
    Accept,
    Authorization,
    ContentLength,
    ContentType,
    Cookie,
    Host,
    Referer,
    UserAgent,
}

impl KnownHeader {
    pub const ALL: [KnownHeader; 8] = [
        KnownHeader::Accept,
        KnownHeader::Authorization,
        KnownHeader::ContentLength,
        KnownHeader::ContentType,
        KnownHeader::Cookie,
        KnownHeader::Host,
        KnownHeader::Referer,
        KnownHeader::UserAgent,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            KnownHeader::Accept => "Accept",
            KnownHeader::Authorization => "Authorization",
            KnownHeader::ContentLength => "Content-Length",
            KnownHeader::ContentType => "Content-Type",
            KnownHeader::Cookie => "Cookie",
            KnownHeader::Host => "Host",
            KnownHeader::Referer => "Referer",
            KnownHeader::UserAgent => "User-Agent",
        }
    }

    /// Resolves a header name to its known slot, if it has one.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|known| known.name().eq_ignore_ascii_case(name))
    }
}

/// The low-level request abstraction the host pipeline consumes.
///
/// A real server backs this with a socket; anything that can answer these
/// questions consistently can be dispatched through
/// [`crate::application::Application::process_request`].
pub trait WorkerRequest {
    /// Lowercase verb name, e.g. `"get"`.
    fn http_verb_name(&self) -> &str;

    /// Application relative path without a leading slash.
    fn path(&self) -> &str;

    /// Raw query string without the leading `?`.
    fn query_string(&self) -> &str;

    fn known_request_header(&self, header: KnownHeader) -> Option<String>;

    fn unknown_request_header(&self, name: &str) -> Option<String>;

    fn unknown_request_headers(&self) -> Vec<(String, String)>;

    fn preloaded_entity_body(&self) -> Option<Bytes>;

    /// Per-request objects threaded into the request's
    /// [`crate::context::HttpContext`] items.
    fn extensions(&self) -> Extensions {
        Extensions::new()
    }

    /// Receives the rendered response body once the pipeline completes.
    fn send_response_from_memory(&self, data: &[u8]);
}

/// An ordered multi-map of decoded name/value pairs (query string or form).
///
/// Keys may repeat; lookups are case-insensitive and return the first match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NameValues(Vec<(String, String)>);

impl NameValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `application/x-www-form-urlencoded` content.
    #[must_use]
    pub fn parse_urlencoded(content: &[u8]) -> Self {
        Self(
            url::form_urlencoded::parse(content)
                .into_owned()
                .collect::<Vec<(String, String)>>(),
        )
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<(String, String)>> for NameValues {
    fn from(value: Vec<(String, String)>) -> Self {
        Self(value)
    }
}

#[derive(Clone)]
pub struct RequestHead {
    // headers for the giving request.
    headers: HeaderMap,

    /// The HTTP method of the request.
    method: Method,

    /// The HTTP version used by the request.
    version: Version,

    /// The [target](https://datatracker.ietf.org/doc/html/rfc7230#section-5.3) of the request.
    target: Uri,

    /// Extensions threaded in by the worker request.
    extensions: Extensions,

    /// The application relative path used for routing.
    route_path: RouteURL,
}

impl RequestHead {
    #[must_use]
    pub fn new(method: Method, version: Version, url: Uri, route_url: RouteURL) -> Self {
        Self {
            target: url,
            route_path: route_url,
            headers: HeaderMap::new(),
            extensions: Extensions::new(),
            method,
            version,
        }
    }

    field_method!(headers, HeaderMap);
    field_method_as_mut!(headers_mut, headers, HeaderMap);

    field_method!(route_path, RouteURL);

    field_method!(extensions, Extensions);
    set_field_method_as_mut!(set_extensions, extensions, Extensions);

    field_method!(target, Uri);

    field_method!(method, Method);

    field_method!(version, Version);
}

impl fmt::Debug for RequestHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHead")
            .field("headers", &self.headers)
            .field("method", &self.method)
            .field("version", &self.version)
            .field("target", &self.target)
            .field("route_path", &self.route_path)
            .finish_non_exhaustive()
    }
}

/// The request as the pipeline sees it, decoded once from a [`WorkerRequest`].
#[derive(Clone, Debug)]
pub struct HttpRequest {
    head: RequestHead,
    query: NameValues,
    form: NameValues,
    cookies: CookieJar,
    body: Bytes,
}

impl HttpRequest {
    /// Decodes the worker request.
    ///
    /// Form values are only read from the body when the request claims a
    /// form-urlencoded content type, as a browser submitting a form would.
    pub fn from_worker(worker: &dyn WorkerRequest) -> Result<Self, PipelineError> {
        let method = Method::from_str(worker.http_verb_name())?;

        let path = worker.path();
        let query = worker.query_string();
        let raw_url = if query.is_empty() {
            format!("/{path}")
        } else {
            format!("/{path}?{query}")
        };
        let target = Uri::from_str(&raw_url)
            .map_err(|_| RequestError::InvalidTarget(raw_url.clone()))?;

        let mut head = RequestHead::new(method, Version::HTTP_11, target, String::from(path));
        for known in KnownHeader::ALL {
            if let Some(value) = worker.known_request_header(known) {
                insert_header(head.headers_mut(), known.name(), &value)?;
            }
        }
        for (name, value) in worker.unknown_request_headers() {
            insert_header(head.headers_mut(), &name, &value)?;
        }
        head.set_extensions(worker.extensions());

        let body = worker.preloaded_entity_body().unwrap_or_default();
        let form = if is_form_urlencoded(head.headers()) {
            NameValues::parse_urlencoded(&body)
        } else {
            NameValues::new()
        };

        let cookies = head
            .headers()
            .get(http::header::COOKIE)
            .and_then(|value| value.to_str().ok())
            .map(CookieJar::parse_header)
            .unwrap_or_default();

        Ok(Self {
            query: NameValues::parse_urlencoded(query.as_bytes()),
            head,
            form,
            cookies,
            body,
        })
    }

    field_method!(head, RequestHead);
    field_method!(query, NameValues);
    field_method!(form, NameValues);
    field_method!(cookies, CookieJar);
    field_method!(body, Bytes);

    #[must_use]
    pub fn method(&self) -> &Method {
        self.head.method()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        self.head.extensions()
    }

    /// Application relative path without a leading slash.
    #[must_use]
    pub fn path(&self) -> &str {
        self.head.route_path()
    }

    /// The path and query as the client requested them, e.g. `/home/About?x=1`.
    #[must_use]
    pub fn raw_url(&self) -> String {
        self.head
            .target()
            .path_and_query()
            .map_or_else(|| String::from("/"), ToString::to_string)
    }
}

fn is_form_urlencoded(headers: &HeaderMap) -> bool {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_URLENCODED))
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), RequestError> {
    let header_name =
        HeaderName::from_str(name).map_err(|err| RequestError::InvalidHeader {
            name: String::from(name),
            reason: err.to_string(),
        })?;
    let header_value =
        HeaderValue::from_str(value).map_err(|err| RequestError::InvalidHeader {
            name: String::from(name),
            reason: err.to_string(),
        })?;
    headers.insert(header_name, header_value);
    Ok(())
}

#[cfg(test)]
mod request_tests {
    use super::*;

    struct FakeWorker {
        verb: &'static str,
        path: &'static str,
        query: &'static str,
        content_type: Option<&'static str>,
        cookie: Option<&'static str>,
        body: Option<&'static str>,
    }

    impl WorkerRequest for FakeWorker {
        fn http_verb_name(&self) -> &str {
            self.verb
        }

        fn path(&self) -> &str {
            self.path
        }

        fn query_string(&self) -> &str {
            self.query
        }

        fn known_request_header(&self, header: KnownHeader) -> Option<String> {
            match header {
                KnownHeader::ContentType => self.content_type.map(String::from),
                KnownHeader::Cookie => self.cookie.map(String::from),
                _ => None,
            }
        }

        fn unknown_request_header(&self, _name: &str) -> Option<String> {
            None
        }

        fn unknown_request_headers(&self) -> Vec<(String, String)> {
            vec![(String::from("X-Requested-With"), String::from("test"))]
        }

        fn preloaded_entity_body(&self) -> Option<Bytes> {
            self.body.map(|body| Bytes::from_static(body.as_bytes()))
        }

        fn send_response_from_memory(&self, _data: &[u8]) {}
    }

    #[test]
    fn test_method_parses_lowercase_verbs() {
        assert_eq!(Method::from_str("post").unwrap(), Method::POST);
        assert_eq!(Method::from_str("Delete").unwrap(), Method::DELETE);
        assert_eq!(
            Method::from_str("purge").unwrap(),
            Method::CUSTOM(String::from("PURGE"))
        );
        assert!(Method::from_str("").is_err());
        assert_eq!(Method::POST.verb_name(), "post");
    }

    #[test]
    fn test_known_header_lookup_is_case_insensitive() {
        assert_eq!(KnownHeader::from_name("content-type"), Some(KnownHeader::ContentType));
        assert_eq!(KnownHeader::from_name("X-Custom"), None);
    }

    #[test]
    fn test_form_is_only_read_for_urlencoded_content() {
        let worker = FakeWorker {
            verb: "post",
            path: "Account/LogOn",
            query: "ReturnUrl=%2Fhome%2FSecretAction",
            content_type: Some(FORM_URLENCODED),
            cookie: Some("a=1;b=2;"),
            body: Some("UserName=steve&Password=s+cret&"),
        };

        let request = HttpRequest::from_worker(&worker).unwrap();
        assert_eq!(request.method(), &Method::POST);
        assert_eq!(request.path(), "Account/LogOn");
        assert_eq!(request.query().get("returnurl"), Some("/home/SecretAction"));
        assert_eq!(request.form().get("username"), Some("steve"));
        assert_eq!(request.form().get("Password"), Some("s cret"));
        assert_eq!(request.cookies().value("b"), Some("2"));
        assert_eq!(request.header("x-requested-with"), Some("test"));
        assert_eq!(
            request.raw_url(),
            "/Account/LogOn?ReturnUrl=%2Fhome%2FSecretAction"
        );

        let plain = FakeWorker {
            content_type: None,
            ..worker
        };
        let request = HttpRequest::from_worker(&plain).unwrap();
        assert!(request.form().is_empty());
    }
}
