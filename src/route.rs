use std::collections::HashMap;

use regex::Regex;
use thiserror::Error;

/// One path segment of a compiled [`Route`] pattern.
///
/// Splat (`*`) segments are part of the pattern grammar but unimplemented;
/// `Route::compile` rejects them rather than silently mismatching.
#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Named(String),
    NamedRegex(String, Regex),
}

/// A compiled route pattern. Two routes are equal iff their original
/// pattern strings are equal; `segments` is derived data and excluded
/// from `PartialEq`/`Hash`.
#[derive(Debug, Clone)]
pub struct Route {
    pattern: String,
    segments: Vec<Segment>,
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}
impl Eq for Route {}

impl std::hash::Hash for Route {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.pattern.hash(state);
    }
}

#[derive(Debug, Error)]
pub enum RouteCompileError {
    #[error("splat (*) segments are not implemented")]
    SplatUnimplemented,
    #[error("invalid regex in named-regex segment `{0}`: {1}")]
    InvalidRegex(String, regex::Error),
}

impl Route {
    /// Compiles a pattern string such as `/name/:name<[A-Za-z]+>` into a
    /// matcher. `:name` binds a single path segment; `:name<regex>`
    /// additionally anchors that capture to `regex`; anything else is
    /// matched literally, byte-for-byte.
    pub fn compile(pattern: &str) -> Result<Self, RouteCompileError> {
        let mut segments = Vec::new();
        for raw in pattern.split('/').filter(|s| !s.is_empty()) {
            if raw.contains('*') {
                return Err(RouteCompileError::SplatUnimplemented);
            }
            if let Some(rest) = raw.strip_prefix(':') {
                if let Some(lt) = rest.find('<') {
                    if rest.ends_with('>') {
                        let name = rest[..lt].to_string();
                        let pattern_src = &rest[lt + 1..rest.len() - 1];
                        let anchored = format!("^(?:{})$", pattern_src);
                        let regex = Regex::new(&anchored)
                            .map_err(|e| RouteCompileError::InvalidRegex(name.clone(), e))?;
                        segments.push(Segment::NamedRegex(name, regex));
                        continue;
                    }
                }
                segments.push(Segment::Named(rest.to_string()));
                continue;
            }
            segments.push(Segment::Literal(raw.to_string()));
        }
        Ok(Route {
            pattern: pattern.to_string(),
            segments,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Attempts to match `path` against this route. Segment count must
    /// be equal; each segment is checked in order.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut bindings = HashMap::new();
        for (segment, value) in self.segments.iter().zip(parts.iter()) {
            match segment {
                Segment::Literal(expected) => {
                    if expected != value {
                        return None;
                    }
                }
                Segment::Named(name) => {
                    bindings.insert(name.clone(), (*value).to_string());
                }
                Segment::NamedRegex(name, regex) => {
                    if !regex.is_match(value) {
                        return None;
                    }
                    bindings.insert(name.clone(), (*value).to_string());
                }
            }
        }
        Some(bindings)
    }
}

/// Ordered collection of routes. `resolve` returns the first route whose
/// match succeeds. Ties are broken by insertion order; literal routes do
/// *not* automatically outrank parameterized ones.
#[derive(Debug, Default, Clone)]
pub struct RouteMap {
    routes: Vec<Route>,
}

impl RouteMap {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn insert(&mut self, route: Route) {
        if !self.routes.iter().any(|r| r == &route) {
            self.routes.push(route);
        }
    }

    /// Returns the first matching route together with its bindings.
    pub fn resolve(&self, path: &str) -> Option<(&Route, HashMap<String, String>)> {
        for route in &self.routes {
            if let Some(bindings) = route.matches(path) {
                return Some((route, bindings));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_matches_exactly() {
        let r = Route::compile("/hello/world").unwrap();
        assert!(r.matches("/hello/world").is_some());
        assert!(r.matches("/hello/world/").is_some());
        assert!(r.matches("/hello").is_none());
    }

    #[test]
    fn named_segment_binds_value() {
        let r = Route::compile("/name/:name").unwrap();
        let bindings = r.matches("/name/Tim").unwrap();
        assert_eq!(bindings.get("name").unwrap(), "Tim");
    }

    #[test]
    fn named_regex_rejects_non_matching_capture() {
        let r = Route::compile("/name/:name<[A-Za-z]+>").unwrap();
        assert!(r.matches("/name/Tim").is_some());
        assert!(r.matches("/name/123").is_none());
    }

    #[test]
    fn match_is_idempotent() {
        let r = Route::compile("/name/:name").unwrap();
        let a = r.matches("/name/Tim").unwrap();
        let b = r.matches("/name/Tim").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn splat_is_rejected() {
        assert!(matches!(
            Route::compile("/assets/*"),
            Err(RouteCompileError::SplatUnimplemented)
        ));
    }

    #[test]
    fn routes_compare_by_pattern_string_only() {
        let a = Route::compile("/name/:name").unwrap();
        let b = Route::compile("/name/:other").unwrap();
        assert_ne!(a, b);
        let c = Route::compile("/name/:name").unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn route_map_resolves_in_insertion_order() {
        let mut map = RouteMap::new();
        map.insert(Route::compile("/resource/:id").unwrap());
        map.insert(Route::compile("/resource/fixed").unwrap());
        // "/resource/fixed" would also match the parameterized route
        // registered first; insertion order wins, not specificity.
        let (route, _) = map.resolve("/resource/fixed").unwrap();
        assert_eq!(route.pattern(), "/resource/:id");
    }

    #[test]
    fn route_map_returns_none_when_nothing_matches() {
        let map = RouteMap::new();
        assert!(map.resolve("/anything").is_none());
    }
}
