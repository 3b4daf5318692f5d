//! Route table
//!
//! Built once before the server starts. Templates are split on `/`; a
//! segment is a literal, a `:name` capture, or a trailing `*` that swallows
//! the rest of the path. Exact templates win over captures, captures over
//! wildcards, and within a tier the first registered route wins.
//!
//! Request paths are split while still percent-encoded and each segment is
//! decoded afterwards, so `/rooms/a%2Fb` captures `a/b` as one segment.

use std::borrow::Cow;
use std::sync::Arc;

use percent_encoding::percent_decode_str;

use crate::http::{Request, Response};

/// Plain request handler
pub type HandlerFn = dyn Fn(&Request, &Params) -> Response + Send + Sync;

/// Maps a streaming request to the topics it wants, or rejects it
pub type TopicResolver = dyn Fn(&Request, &Params) -> Result<Vec<String>, Response> + Send + Sync;

/// What a route does with a matched request
#[derive(Clone)]
pub enum Endpoint {
    /// Answer with one buffered response
    Handler(Arc<HandlerFn>),
    /// Take the connection over and push frames for the resolved topics
    Stream(Arc<TopicResolver>),
}

impl Endpoint {
    pub fn handler<F>(f: F) -> Self
    where
        F: Fn(&Request, &Params) -> Response + Send + Sync + 'static,
    {
        Endpoint::Handler(Arc::new(f))
    }

    pub fn stream<F>(f: F) -> Self
    where
        F: Fn(&Request, &Params) -> Result<Vec<String>, Response> + Send + Sync + 'static,
    {
        Endpoint::Stream(Arc::new(f))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Endpoint::Stream(_))
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Handler(_) => f.write_str("Endpoint::Handler"),
            Endpoint::Stream(_) => f.write_str("Endpoint::Stream"),
        }
    }
}

/// Captured `:name` segments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Exact,
    Captures,
    Wildcard,
}

#[derive(Debug)]
struct Route {
    method: String,
    template: String,
    segments: Vec<Segment>,
    tier: Tier,
    endpoint: Endpoint,
}

impl Route {
    fn new(method: &str, template: &str, endpoint: Endpoint) -> Self {
        let segments: Vec<Segment> = split_path(template)
            .map(|seg| {
                if seg == "*" {
                    Segment::Rest
                } else if let Some(name) = seg.strip_prefix(':') {
                    Segment::Param(name.to_string())
                } else {
                    Segment::Literal(seg.to_string())
                }
            })
            .collect();

        let tier = if segments.contains(&Segment::Rest) {
            Tier::Wildcard
        } else if segments.iter().any(|s| matches!(s, Segment::Param(_))) {
            Tier::Captures
        } else {
            Tier::Exact
        };

        Self {
            method: method.to_ascii_uppercase(),
            template: template.to_string(),
            segments,
            tier,
            endpoint,
        }
    }

    fn match_path(&self, path: &str) -> Option<Params> {
        let mut actual = split_path(path);
        let mut params = Vec::new();

        for segment in &self.segments {
            match segment {
                Segment::Rest => return Some(Params(params)),
                Segment::Literal(lit) => {
                    if decode_segment(actual.next()?) != lit.as_str() {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.push((name.clone(), decode_segment(actual.next()?).into_owned()));
                }
            }
        }

        actual.next().is_none().then_some(Params(params))
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn decode_segment(segment: &str) -> Cow<'_, str> {
    percent_decode_str(segment).decode_utf8_lossy()
}

/// Outcome of routing one request
#[derive(Debug)]
pub enum RouteMatch<'a> {
    Found(&'a Endpoint, Params),
    /// No template matches the path
    NotFound,
    /// The path exists under other methods, listed for `Allow`
    MethodNotAllowed(Vec<String>),
}

/// Static table of `(method, template, endpoint)`
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route
    pub fn route(mut self, method: &str, template: &str, endpoint: Endpoint) -> Self {
        let route = Route::new(method, template, endpoint);
        tracing::debug!(method = %route.method, template = %route.template, "Route registered");
        self.routes.push(route);
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the endpoint for `method` and `path`
    pub fn resolve(&self, method: &str, path: &str) -> RouteMatch<'_> {
        let mut allowed: Vec<String> = Vec::new();

        for tier in [Tier::Exact, Tier::Captures, Tier::Wildcard] {
            for route in self.routes.iter().filter(|r| r.tier == tier) {
                let Some(params) = route.match_path(path) else {
                    continue;
                };
                if route.method.eq_ignore_ascii_case(method) {
                    return RouteMatch::Found(&route.endpoint, params);
                }
                if !allowed.contains(&route.method) {
                    allowed.push(route.method.clone());
                }
            }
        }

        if allowed.is_empty() {
            RouteMatch::NotFound
        } else {
            allowed.sort();
            RouteMatch::MethodNotAllowed(allowed)
        }
    }
}
