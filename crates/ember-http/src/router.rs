//! Pattern-based routing: path segments beginning with `:` bind as
//! parameters (spec §4.7 "Routing is pattern-based").

use crate::context::RequestContext;
use crate::response::HttpResponse;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A route handler: receives the request context (headers, body, bound
/// `:param`s, and the per-request arena) and produces a response.
///
/// Implemented for any `Fn(&mut RequestContext) -> HttpResponse` closure, so
/// the embedder that actually calls into the evaluator (`ember-runtime`)
/// need not implement the trait by hand. Not `Send`/`Sync`: the accept loop
/// is single-threaded by default (spec §4.7), and the evaluator's handler
/// closures close over an `ember_core::Vm`, whose `Rc`-based heap is not
/// thread-safe (spec §5) — there is no reason to demand thread-safety a
/// single-threaded server never exercises.
pub trait RouteHandler {
    /// Handle a matched request.
    fn handle(&self, ctx: &mut RequestContext) -> HttpResponse;
}

impl<F> RouteHandler for F
where
    F: Fn(&mut RequestContext) -> HttpResponse,
{
    fn handle(&self, ctx: &mut RequestContext) -> HttpResponse {
        self(ctx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

fn split_pattern(pattern: &str) -> Vec<Segment> {
    pattern
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix(':') {
            Some(name) => Segment::Param(name.to_string()),
            None => Segment::Literal(s.to_string()),
        })
        .collect()
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

struct Route {
    method: String,
    segments: Vec<Segment>,
    handler: Arc<dyn RouteHandler>,
}

impl Route {
    /// Try to match `method`/`path` against this route, returning the bound
    /// `:param`s on success.
    fn matches(&self, method: &str, path: &str) -> Option<FxHashMap<String, String>> {
        if !self.method.eq_ignore_ascii_case(method) {
            return None;
        }
        let path_segments = split_path(path);
        if path_segments.len() != self.segments.len() {
            return None;
        }
        let mut params = FxHashMap::default();
        for (pattern_seg, actual) in self.segments.iter().zip(path_segments.iter()) {
            match pattern_seg {
                Segment::Literal(expected) => {
                    if expected != actual {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), actual.to_string());
                }
            }
        }
        Some(params)
    }
}

/// The registered set of routes for an [`crate::server::HttpServer`].
///
/// Routes are matched in registration order; the first match wins (the same
/// "first registered, first tried" rule PHP micro-frameworks use).
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// An empty router.
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register a handler for `method` and a `:param`-style path pattern.
    pub fn route(&mut self, method: &str, pattern: &str, handler: impl RouteHandler + 'static) -> &mut Self {
        self.routes.push(Route {
            method: method.to_ascii_uppercase(),
            segments: split_pattern(pattern),
            handler: Arc::new(handler),
        });
        self
    }

    /// Find the first route matching `method`/`path`, returning its handler
    /// and the bound parameters.
    pub fn find(&self, method: &str, path: &str) -> Option<(Arc<dyn RouteHandler>, FxHashMap<String, String>)> {
        for route in &self.routes {
            if let Some(params) = route.matches(method, path) {
                return Some((route.handler.clone(), params));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_route_matches_exact_path() {
        let mut router = Router::new();
        router.route("GET", "/health", |_ctx: &mut RequestContext| HttpResponse::ok());
        assert!(router.find("GET", "/health").is_some());
        assert!(router.find("GET", "/health/x").is_none());
    }

    #[test]
    fn param_segment_binds_value() {
        let mut router = Router::new();
        router.route("GET", "/users/:id", |_ctx: &mut RequestContext| HttpResponse::ok());
        let (_, params) = router.find("GET", "/users/42").unwrap();
        assert_eq!(params.get("id"), Some(&"42".to_string()));
    }

    #[test]
    fn method_mismatch_does_not_match() {
        let mut router = Router::new();
        router.route("POST", "/users", |_ctx: &mut RequestContext| HttpResponse::ok());
        assert!(router.find("GET", "/users").is_none());
    }

    #[test]
    fn multiple_params_all_bind() {
        let mut router = Router::new();
        router.route("GET", "/teams/:team_id/users/:user_id", |_ctx: &mut RequestContext| HttpResponse::ok());
        let (_, params) = router.find("GET", "/teams/7/users/9").unwrap();
        assert_eq!(params.get("team_id"), Some(&"7".to_string()));
        assert_eq!(params.get("user_id"), Some(&"9".to_string()));
    }

    #[test]
    fn first_registered_route_wins_on_ambiguity() {
        let mut router = Router::new();
        router.route("GET", "/users/:id", |_ctx: &mut RequestContext| HttpResponse::text(200, "param"));
        router.route("GET", "/users/me", |_ctx: &mut RequestContext| HttpResponse::text(200, "literal"));
        let (handler, params) = router.find("GET", "/users/me").unwrap();
        let mut ctx = RequestContext::new_standalone();
        assert_eq!(handler.handle(&mut ctx).body, b"param");
        assert_eq!(params.get("id"), Some(&"me".to_string()));
    }
}
