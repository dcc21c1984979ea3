use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{field_method, set_field_method_as_mut};

const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// A single cookie as seen on either side of the wire.
///
/// A cookie without `expires` is session-only: it lives for as long as the
/// browsing session holding it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    name: String,
    value: String,
    path: Option<String>,
    expires: Option<DateTime<Utc>>,
    http_only: bool,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            expires: None,
            http_only: false,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_expires(mut self, expires: DateTime<Utc>) -> Self {
        self.expires = Some(expires);
        self
    }

    #[must_use]
    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    field_method!(name, String);
    field_method!(value, String);
    field_method!(path, Option<String>);
    field_method!(expires, Option<DateTime<Utc>>);

    set_field_method_as_mut!(set_value, value, String);

    #[must_use]
    pub fn is_http_only(&self) -> bool {
        self.http_only
    }

    /// A cookie with no expiry never expires.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    /// Renders the cookie as the value of a `Set-Cookie` header.
    #[must_use]
    pub fn to_set_cookie(&self) -> String {
        let mut rendered = format!("{}={}", self.name, self.value);
        if let Some(path) = &self.path {
            rendered.push_str("; path=");
            rendered.push_str(path);
        }
        if let Some(expires) = &self.expires {
            rendered.push_str("; expires=");
            rendered.push_str(&expires.format(EXPIRES_FORMAT).to_string());
        }
        if self.http_only {
            rendered.push_str("; HttpOnly");
        }
        rendered
    }
}

/// An insertion-ordered set of cookies, unique by name.
///
/// Names compare case-insensitively, matching how the host runtime resolves
/// cookie names on incoming requests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CookieJar {
    entries: Vec<Cookie>,
}

impl CookieJar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the value of a request `Cookie` header.
    ///
    /// Pairs are `;` separated, surrounding whitespace is ignored and blank
    /// entries (including the trailing one left by a `;` terminated header)
    /// are skipped.
    #[must_use]
    pub fn parse_header(header: &str) -> Self {
        let mut jar = Self::new();
        for pair in header.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            jar.set(Cookie::new(name.trim(), value.trim()));
        }
        jar
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.entries
            .iter()
            .find(|cookie| cookie.name.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|cookie| cookie.value.as_str())
    }

    /// Inserts the cookie, replacing an existing cookie of the same name in
    /// its current position.
    pub fn set(&mut self, cookie: Cookie) {
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.name.eq_ignore_ascii_case(&cookie.name))
        {
            Some(existing) => *existing = cookie,
            None => self.entries.push(cookie),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Cookie> {
        let index = self
            .entries
            .iter()
            .position(|cookie| cookie.name.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(index))
    }

    /// Merges cookies returned by a response into this jar.
    ///
    /// Any existing cookie of the same name is removed; the incoming cookie is
    /// then appended unless it has already expired relative to `now`.
    pub fn merge_response_cookies<'a, I>(&mut self, cookies: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = &'a Cookie>,
    {
        for cookie in cookies {
            self.remove(&cookie.name);
            if !cookie.is_expired_at(now) {
                self.entries.push(cookie.clone());
            }
        }
    }

    /// Renders the jar as a request `Cookie` header value: every cookie as
    /// `name=value;`, in jar order. An empty jar renders no header at all.
    #[must_use]
    pub fn to_request_header(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        Some(
            self.entries
                .iter()
                .map(|cookie| format!("{}={};", cookie.name, cookie.value))
                .collect(),
        )
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cookie> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a> IntoIterator for &'a CookieJar {
    type Item = &'a Cookie;
    type IntoIter = std::slice::Iter<'a, Cookie>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod cookie_jar_tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_session_only_cookie_is_kept() {
        let mut jar = CookieJar::new();
        jar.merge_response_cookies(&[Cookie::new("mycookie", "myval")], now());
        assert_eq!(jar.value("mycookie"), Some("myval"));
    }

    #[test]
    fn test_expired_cookie_is_dropped_and_removes_existing() {
        let mut jar = CookieJar::new();
        jar.set(Cookie::new("auth", "ticket"));

        let expired = Cookie::new("auth", "").with_expires(now() - Duration::days(1));
        jar.merge_response_cookies(&[expired], now());

        assert!(jar.get("auth").is_none());
        assert!(jar.is_empty());
    }

    #[test]
    fn test_future_expiry_is_kept() {
        let mut jar = CookieJar::new();
        let cookie = Cookie::new("pref", "dark").with_expires(now() + Duration::hours(2));
        jar.merge_response_cookies(&[cookie], now());
        assert_eq!(jar.value("pref"), Some("dark"));
    }

    #[test]
    fn test_same_name_replaces_rather_than_duplicates() {
        let mut jar = CookieJar::new();
        jar.merge_response_cookies(&[Cookie::new("mycookie", "one")], now());
        jar.merge_response_cookies(&[Cookie::new("MyCookie", "two")], now());

        assert_eq!(jar.len(), 1);
        assert_eq!(jar.value("mycookie"), Some("two"));
    }

    #[test]
    fn test_request_header_is_semicolon_terminated_in_jar_order() {
        let mut jar = CookieJar::new();
        jar.set(Cookie::new("a", "1"));
        jar.set(Cookie::new("b", "2"));
        assert_eq!(jar.to_request_header().as_deref(), Some("a=1;b=2;"));
    }

    #[test]
    fn test_empty_jar_renders_no_header() {
        assert_eq!(CookieJar::new().to_request_header(), None);
    }

    #[test]
    fn test_parse_header_skips_blank_entries() {
        let jar = CookieJar::parse_header("a=1;b=2;");
        assert_eq!(jar.len(), 2);
        assert_eq!(jar.value("b"), Some("2"));

        let spaced = CookieJar::parse_header(" a = 1 ; ; c=");
        assert_eq!(spaced.value("a"), Some("1"));
        assert_eq!(spaced.value("c"), Some(""));
    }

    #[test]
    fn test_set_cookie_rendering() {
        let cookie = Cookie::new("auth", "x")
            .with_path("/")
            .with_expires(Utc.with_ymd_and_hms(1999, 10, 12, 0, 0, 0).unwrap())
            .http_only();
        assert_eq!(
            cookie.to_set_cookie(),
            "auth=x; path=/; expires=Tue, 12 Oct 1999 00:00:00 GMT; HttpOnly"
        );
    }
}
