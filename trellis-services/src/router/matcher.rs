//! The frozen route table and the matching algorithm.
//!
//! Per-method tables are tried in insertion order, so matching is
//! deterministic for a given table. Path normalization happens before any
//! table is consulted: percent-escapes are decoded and dot segments
//! resolved; a traversal that escapes the mount root is a not-found, never
//! an error.

use std::{collections::HashMap, rc::Rc};

use http::{Method, StatusCode};
use trellis_core::{config::RoutingOptions, http::PathParams};

use super::route::Route;

#[derive(Debug)]
pub enum MatchOutcome {
    Matched {
        route: Rc<Route>,
        params: PathParams,
        /// A HEAD request answered by the GET route; the engine strips the
        /// body at finalize.
        head_fallback: bool,
    },
    MethodNotAllowed {
        allow: Vec<Method>,
    },
    RedirectSlash {
        location: String,
        status: StatusCode,
    },
    AutoOptions {
        allow: Vec<Method>,
    },
    NotFound,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

pub struct RouteTable {
    routes: Vec<Rc<Route>>,
    by_method: HashMap<Method, Vec<usize>>,
}

impl RouteTable {
    pub(crate) fn new(routes: Vec<Rc<Route>>) -> Self {
        let mut by_method: HashMap<Method, Vec<usize>> = HashMap::new();
        for (index, route) in routes.iter().enumerate() {
            by_method.entry(route.method.clone()).or_default().push(index);
        }
        RouteTable { routes, by_method }
    }

    pub fn routes(&self) -> &[Rc<Route>] {
        &self.routes
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Rc<Route>> {
        self.routes
            .iter()
            .find(|r| r.name.as_deref() == Some(name))
    }

    fn match_in(&self, method: &Method, path: &str) -> Option<(Rc<Route>, PathParams)> {
        let indexes = self.by_method.get(method)?;
        for &index in indexes {
            let route = &self.routes[index];
            if let Some(params) = route.compiled().match_path(path) {
                return Some((route.clone(), params));
            }
        }
        None
    }

    /// Methods whose table matches `path`, excluding `exclude`; sorted for a
    /// stable `Allow` header.
    fn allow_for(&self, path: &str, exclude: Option<&Method>) -> Vec<Method> {
        let mut allow: Vec<Method> = self
            .by_method
            .iter()
            .filter(|(method, _)| exclude.map_or(true, |excluded| *method != excluded))
            .filter(|(_, indexes)| {
                indexes
                    .iter()
                    .any(|&i| self.routes[i].compiled().match_path(path).is_some())
            })
            .map(|(method, _)| method.clone())
            .collect();
        allow.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
        allow
    }

    /// Resolve `(method, normalized path)` per the configured options.
    pub fn lookup(&self, method: &Method, path: &str, options: &RoutingOptions) -> MatchOutcome {
        if let Some((route, params)) = self.match_in(method, path) {
            return MatchOutcome::Matched {
                route,
                params,
                head_fallback: false,
            };
        }

        // HEAD falls back to the GET route; the body is stripped later
        if *method == Method::HEAD {
            if let Some((route, params)) = self.match_in(&Method::GET, path) {
                return MatchOutcome::Matched {
                    route,
                    params,
                    head_fallback: true,
                };
            }
        }

        if *method == Method::OPTIONS && options.default_options {
            let mut allow = self.allow_for(path, None);
            if !allow.is_empty() {
                allow.push(Method::OPTIONS);
                allow.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
                return MatchOutcome::AutoOptions { allow };
            }
        }

        if options.handle_method_not_allowed {
            let allow = self.allow_for(path, Some(method));
            if !allow.is_empty() {
                return MatchOutcome::MethodNotAllowed { allow };
            }
        }

        if options.redirect_trailing_slash && path.len() > 1 {
            if let Some(trimmed) = path.strip_suffix('/') {
                if self.match_in(method, trimmed).is_some() {
                    let status = if *method == Method::GET {
                        StatusCode::MOVED_PERMANENTLY
                    } else {
                        StatusCode::TEMPORARY_REDIRECT
                    };
                    return MatchOutcome::RedirectSlash {
                        location: trimmed.to_string(),
                        status,
                    };
                }
            }
        }

        MatchOutcome::NotFound
    }
}

/// Decode and normalize a raw request path. `None` means the path cannot be
/// routed (bad encoding, or a traversal that escapes the root) and maps to a
/// not-found.
pub fn normalize_path(raw: &str) -> Option<String> {
    if !raw.starts_with('/') {
        return None;
    }
    let trailing = raw.len() > 1 && raw.ends_with('/');

    let mut segments: Vec<String> = Vec::new();
    for segment in raw.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        let decoded = percent_decode(segment)?;
        if decoded == ".." {
            // popping past the root escapes the mount point
            segments.pop()?;
            continue;
        }
        segments.push(decoded);
    }

    if segments.is_empty() {
        return Some("/".to_string());
    }
    let mut path = String::with_capacity(raw.len());
    for segment in &segments {
        path.push('/');
        path.push_str(segment);
    }
    if trailing {
        path.push('/');
    }
    Some(path)
}

fn percent_decode(segment: &str) -> Option<String> {
    let bytes = segment.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = char::from(*bytes.get(i + 1)?).to_digit(16)?;
            let lo = char::from(*bytes.get(i + 2)?).to_digit(16)?;
            decoded.push((hi * 16 + lo) as u8);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        middleware::{handler_fn, Chain},
        router::pattern,
    };
    use trellis_core::http::Response;

    fn route(method: Method, path: &str) -> Rc<Route> {
        Rc::new(Route::new(
            method,
            path.to_string(),
            None,
            Vec::new(),
            pattern::compile(path, &HashMap::new()).unwrap(),
            Chain::new(Vec::new(), handler_fn(|_| async { Ok(Response::ok()) })),
        ))
    }

    fn table(routes: &[(Method, &str)]) -> RouteTable {
        RouteTable::new(routes.iter().map(|(m, p)| route(m.clone(), p)).collect())
    }

    fn options_all() -> RoutingOptions {
        RoutingOptions::default()
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/a/b"), Some("/a/b".to_string()));
        assert_eq!(normalize_path("/a//b/"), Some("/a/b/".to_string()));
        assert_eq!(normalize_path("/a/./b"), Some("/a/b".to_string()));
        assert_eq!(normalize_path("/a/x/../b"), Some("/a/b".to_string()));
        assert_eq!(normalize_path("/%61%2Fb"), Some("/a/b".to_string()));
        assert_eq!(normalize_path("/"), Some("/".to_string()));
        // escaping the root is unroutable
        assert_eq!(normalize_path("/../etc/passwd"), None);
        assert_eq!(normalize_path("/%2e%2e/x"), None);
        assert_eq!(normalize_path("no-slash"), None);
        assert_eq!(normalize_path("/bad%zz"), None);
    }

    #[test]
    fn test_insertion_order_wins() {
        let table = table(&[(Method::GET, "/users/{id}"), (Method::GET, "/users/me")]);
        match table.lookup(&Method::GET, "/users/me", &options_all()) {
            MatchOutcome::Matched { route, .. } => assert_eq!(route.pattern, "/users/{id}"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_method_not_allowed_collects_sorted() {
        let table = table(&[(Method::GET, "/users"), (Method::POST, "/users")]);
        match table.lookup(&Method::PUT, "/users", &options_all()) {
            MatchOutcome::MethodNotAllowed { allow } => {
                assert_eq!(allow, vec![Method::GET, Method::POST]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let mut opts = options_all();
        opts.handle_method_not_allowed = false;
        assert!(matches!(
            table.lookup(&Method::PUT, "/users", &opts),
            MatchOutcome::NotFound
        ));
    }

    #[test]
    fn test_trailing_slash_redirect() {
        let table = table(&[(Method::GET, "/users"), (Method::POST, "/users")]);

        match table.lookup(&Method::GET, "/users/", &options_all()) {
            MatchOutcome::RedirectSlash { location, status } => {
                assert_eq!(location, "/users");
                assert_eq!(status, StatusCode::MOVED_PERMANENTLY);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        // non-GET methods redirect with 307
        match table.lookup(&Method::POST, "/users/", &options_all()) {
            MatchOutcome::RedirectSlash { status, .. } => {
                assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let mut opts = options_all();
        opts.redirect_trailing_slash = false;
        assert!(matches!(
            table.lookup(&Method::GET, "/users/", &opts),
            MatchOutcome::NotFound
        ));
    }

    #[test]
    fn test_head_falls_back_to_get() {
        let table = table(&[(Method::GET, "/status")]);
        match table.lookup(&Method::HEAD, "/status", &options_all()) {
            MatchOutcome::Matched { head_fallback, .. } => assert!(head_fallback),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_auto_options() {
        let table1 = table(&[(Method::GET, "/users"), (Method::POST, "/users")]);
        let mut opts = options_all();
        opts.default_options = true;
        match table1.lookup(&Method::OPTIONS, "/users", &opts) {
            MatchOutcome::AutoOptions { allow } => {
                assert_eq!(allow, vec![Method::GET, Method::OPTIONS, Method::POST]);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        // an explicit OPTIONS route always wins over the auto-answer
        let table2 = table(&[(Method::GET, "/users"), (Method::OPTIONS, "/users")]);
        assert!(matches!(
            table2.lookup(&Method::OPTIONS, "/users", &opts),
            MatchOutcome::Matched { .. }
        ));
    }

    #[test]
    fn test_typed_mismatch_is_not_found() {
        let table = table(&[(Method::GET, "/users/{id:int}")]);
        assert!(matches!(
            table.lookup(&Method::GET, "/users/abc", &options_all()),
            MatchOutcome::NotFound
        ));
    }
}
