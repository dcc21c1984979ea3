use core::fmt;
use std::collections::BTreeMap;

use lazy_regex::{lazy_regex, Lazy, Regex};
use thiserror::Error;

static PARAM_SEGMENT: Lazy<Regex> = lazy_regex!(r"^\{(\*?)(\w+)\}$");
static SEGMENT_PART: Lazy<Regex> = lazy_regex!(r"\{(\w+)\}|[^{}]+");

#[derive(Clone, Debug, Error)]
pub enum RouteOp {
    #[error("segment was empty/None or invalid: {0}")]
    InvalidSegment(String),

    #[error("invalid route regex: {0}")]
    InvalidRouteRegex(#[from] regex::Error),

    #[error("a catch-all segment must be the last segment of a route: {0}")]
    CatchAllNotLast(String),

    #[error("parameter '{0}' appears more than once in the route")]
    DuplicateParameter(String),
}

type RouteResult<T> = Result<T, RouteOp>;

/// A single `/` separated piece of a route pattern.
#[derive(Clone)]
pub enum SegmentType {
    /// Literal text that must match the path segment, ignoring case.
    ///
    /// ```
    /// use ewe_routing::routes::*;
    ///
    /// let segment = SegmentType::parse("home").expect("literal");
    /// assert_eq!(segment, SegmentType::Static(String::from("home")));
    /// ```
    Static(String),

    /// A named parameter taking the whole segment, i.e `{id}`.
    ///
    /// ```
    /// use ewe_routing::routes::*;
    ///
    /// let segment = SegmentType::parse("{id}").expect("param");
    /// assert_eq!(segment, SegmentType::Param(String::from("id")));
    /// ```
    Param(String),

    /// Literal text mixed with parameters inside one segment, i.e
    /// `{resource}.axd`. Matched through a generated regex.
    Composite(Vec<String>, Regex),

    /// Captures the remainder of the path, i.e `{*pathInfo}`. Only valid as
    /// the final segment.
    CatchAll(String),
}

impl SegmentType {
    pub fn parse(text: &str) -> RouteResult<Self> {
        if text.is_empty() {
            return Err(RouteOp::InvalidSegment(String::from(text)));
        }

        if let Some(captures) = PARAM_SEGMENT.captures(text) {
            let name = String::from(&captures[2]);
            if captures[1].is_empty() {
                return Ok(SegmentType::Param(name));
            }
            return Ok(SegmentType::CatchAll(name));
        }

        if !text.contains('{') && !text.contains('}') {
            return Ok(SegmentType::Static(String::from(text)));
        }

        let mut names = Vec::new();
        let mut expression = String::from("(?i)^");
        let mut consumed = 0;
        for part in SEGMENT_PART.captures_iter(text) {
            let whole = part.get(0).map_or("", |m| m.as_str());
            consumed += whole.len();
            match part.get(1) {
                Some(name) => {
                    names.push(String::from(name.as_str()));
                    expression.push_str(&format!("(?P<{}>.+?)", name.as_str()));
                }
                None => expression.push_str(&regex::escape(whole)),
            }
        }
        expression.push('$');

        // stray braces are left unmatched by the part scanner
        if consumed != text.len() {
            return Err(RouteOp::InvalidSegment(String::from(text)));
        }

        Ok(SegmentType::Composite(names, Regex::new(&expression)?))
    }

    /// Parameter names this segment binds.
    #[must_use]
    pub fn parameters(&self) -> Vec<&str> {
        match self {
            SegmentType::Static(_) => vec![],
            SegmentType::Param(name) | SegmentType::CatchAll(name) => vec![name.as_str()],
            SegmentType::Composite(names, _) => names.iter().map(String::as_str).collect(),
        }
    }

    pub fn priority(&self) -> usize {
        match self {
            SegmentType::Static(_) => 4,
            SegmentType::Composite(_, _) => 3,
            SegmentType::Param(_) => 2,
            SegmentType::CatchAll(_) => 1,
        }
    }

    fn match_segment(&self, segment: &str, values: &mut BTreeMap<String, String>) -> bool {
        match self {
            SegmentType::Static(text) => text.eq_ignore_ascii_case(segment),
            SegmentType::Param(name) | SegmentType::CatchAll(name) => {
                values.insert(name.to_ascii_lowercase(), String::from(segment));
                true
            }
            SegmentType::Composite(names, matcher) => {
                let Some(captures) = matcher.captures(segment) else {
                    return false;
                };
                for name in names {
                    if let Some(value) = captures.name(name) {
                        values.insert(name.to_ascii_lowercase(), String::from(value.as_str()));
                    }
                }
                true
            }
        }
    }
}

impl fmt::Debug for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(arg0) => f.debug_tuple("Static").field(arg0).finish(),
            Self::Param(arg0) => f.debug_tuple("Param").field(arg0).finish(),
            Self::Composite(arg0, arg1) => f
                .debug_tuple("Composite")
                .field(arg0)
                .field(&arg1.as_str())
                .finish(),
            Self::CatchAll(arg0) => f.debug_tuple("CatchAll").field(arg0).finish(),
        }
    }
}

impl PartialEq for SegmentType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Static(l0), Self::Static(r0)) => l0 == r0,
            (Self::Param(l0), Self::Param(r0)) => l0 == r0,
            (Self::Composite(l0, l1), Self::Composite(r0, r1)) => {
                l0 == r0 && l1.as_str() == r1.as_str()
            }
            (Self::CatchAll(l0), Self::CatchAll(r0)) => l0 == r0,
            _ => false,
        }
    }
}

impl Eq for SegmentType {}

/// Values extracted from a matched route, keyed case-insensitively.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteData {
    route_name: Option<String>,
    values: BTreeMap<String, String>,
}

impl RouteData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route data addressing an action directly, as child action rendering does.
    #[must_use]
    pub fn for_action(controller: &str, action: &str) -> Self {
        let mut data = Self::new();
        data.insert("controller", controller);
        data.insert("action", action);
        data
    }

    #[must_use]
    pub fn route_name(&self) -> Option<&str> {
        self.route_name.as_deref()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_ascii_lowercase(), value.into());
    }

    #[must_use]
    pub fn controller(&self) -> Option<&str> {
        self.get("controller")
    }

    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.get("action")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A parsed route pattern such as `{controller}/{action}/{id}` with the
/// default values that fill absent trailing parameters.
#[derive(Clone, Debug)]
pub struct RoutePattern {
    name: Option<String>,
    text: String,
    segments: Vec<SegmentType>,
    defaults: BTreeMap<String, String>,
}

impl RoutePattern {
    pub fn parse(name: Option<&str>, pattern: &str, defaults: &[(&str, &str)]) -> RouteResult<Self> {
        let segments = parse_route_into_segments(pattern)?
            .into_iter()
            .map(SegmentType::parse)
            .collect::<RouteResult<Vec<SegmentType>>>()?;

        let last = segments.len().saturating_sub(1);
        let mut seen: Vec<&str> = Vec::new();
        for (index, segment) in segments.iter().enumerate() {
            if matches!(segment, SegmentType::CatchAll(_)) && index != last {
                return Err(RouteOp::CatchAllNotLast(String::from(pattern)));
            }
            for parameter in segment.parameters() {
                if seen.iter().any(|known| known.eq_ignore_ascii_case(parameter)) {
                    return Err(RouteOp::DuplicateParameter(String::from(parameter)));
                }
                seen.push(parameter);
            }
        }

        Ok(Self {
            name: name.map(String::from),
            text: String::from(pattern),
            defaults: defaults
                .iter()
                .map(|(key, value)| (key.to_ascii_lowercase(), String::from(*value)))
                .collect(),
            segments,
        })
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn segments(&self) -> &[SegmentType] {
        &self.segments
    }

    /// Matches an application relative path (no leading slash, no query).
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<RouteData> {
        let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
        let mut values = self.defaults.clone();

        for (index, segment) in self.segments.iter().enumerate() {
            if let SegmentType::CatchAll(name) = segment {
                let rest = parts.get(index..).map(|rest| rest.join("/")).unwrap_or_default();
                values.insert(name.to_ascii_lowercase(), rest);
                return Some(self.route_data(values));
            }

            match parts.get(index) {
                Some(part) => {
                    if !segment.match_segment(part, &mut values) {
                        return None;
                    }
                }
                None => {
                    let defaulted = match segment {
                        SegmentType::Param(name) => {
                            self.defaults.contains_key(&name.to_ascii_lowercase())
                        }
                        _ => false,
                    };
                    if !defaulted {
                        return None;
                    }
                }
            }
        }

        if parts.len() > self.segments.len() {
            return None;
        }

        Some(self.route_data(values))
    }

    fn route_data(&self, values: BTreeMap<String, String>) -> RouteData {
        RouteData {
            route_name: self.name.clone(),
            values,
        }
    }
}

#[derive(Clone, Debug)]
enum RouteEntry {
    Mapped(RoutePattern),
    Ignored(RoutePattern),
}

/// What a path resolved to in the [`RouteTable`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteMatch {
    Mapped(RouteData),
    Ignored,
    Unmatched,
}

/// Ordered route registrations; the first matching entry wins.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_route(
        &mut self,
        name: &str,
        pattern: &str,
        defaults: &[(&str, &str)],
    ) -> RouteResult<()> {
        let parsed = RoutePattern::parse(Some(name), pattern, defaults)?;
        tracing::debug!("map_route: {} => {:?}", pattern, parsed.segments());
        self.entries.push(RouteEntry::Mapped(parsed));
        Ok(())
    }

    /// Requests matching the pattern bypass the MVC handler entirely.
    pub fn ignore_route(&mut self, pattern: &str) -> RouteResult<()> {
        let parsed = RoutePattern::parse(None, pattern, &[])?;
        self.entries.push(RouteEntry::Ignored(parsed));
        Ok(())
    }

    #[must_use]
    pub fn resolve(&self, path: &str) -> RouteMatch {
        for entry in &self.entries {
            match entry {
                RouteEntry::Ignored(pattern) => {
                    if pattern.match_path(path).is_some() {
                        return RouteMatch::Ignored;
                    }
                }
                RouteEntry::Mapped(pattern) => {
                    if let Some(data) = pattern.match_path(path) {
                        return RouteMatch::Mapped(data);
                    }
                }
            }
        }
        RouteMatch::Unmatched
    }

    /// Route data for the path, when a mapped (not ignored) route matches.
    #[must_use]
    pub fn route_data_for(&self, path: &str) -> Option<RouteData> {
        match self.resolve(path) {
            RouteMatch::Mapped(data) => Some(data),
            _ => None,
        }
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

fn parse_route_into_segments(route: &str) -> RouteResult<Vec<&str>> {
    let target_route = route.strip_prefix('/').unwrap_or(route);
    let target_route = target_route.strip_suffix('/').unwrap_or(target_route);
    if target_route.is_empty() {
        return Ok(vec![]);
    }

    target_route
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                Err(RouteOp::InvalidSegment(String::from(route)))
            } else {
                Ok(segment)
            }
        })
        .collect()
}

#[cfg(test)]
mod parse_route_segment_tests {
    use super::*;

    #[test]
    fn test_parsing_route_segments_with_ending_slash() {
        let result = parse_route_into_segments("/{controller}/{action}/");
        assert_eq!(result.unwrap(), vec!["{controller}", "{action}"]);
    }

    #[test]
    fn test_parsing_route_segments_rejects_empty_segments() {
        assert!(matches!(
            parse_route_into_segments("home//index"),
            Err(RouteOp::InvalidSegment(_))
        ));
    }

    #[test]
    fn test_segment_kinds() {
        assert_eq!(
            SegmentType::parse("{*pathInfo}").unwrap(),
            SegmentType::CatchAll(String::from("pathInfo"))
        );
        let composite = SegmentType::parse("{resource}.axd").unwrap();
        assert_eq!(composite.parameters(), vec!["resource"]);
        assert!(composite.priority() > SegmentType::Param(String::from("x")).priority());
        assert!(SegmentType::parse("{broken").is_err());
    }
}
