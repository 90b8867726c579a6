//! Routing table. Maps a request path to the route that will answer it.
//!
//! Three pattern styles are supported:
//!
//! | Pattern              | Example match              | Captured params                 |
//! |----------------------|----------------------------|---------------------------------|
//! | `/users`             | `/users`                   | *(none)*                        |
//! | `/users/:id`         | `/users/42`                | `id → "42"`                     |
//! | `/files/*`           | `/files/docs/readme.txt`   | `wildcard → "/docs/readme.txt"` |
//!
//! Trailing slashes are normalized on both patterns and incoming paths.
//! Matching is on the path only; method restrictions are enforced by each
//! route's terminal step. Routes are tried in registration order and the
//! first match wins.

use crate::context::PathParams;
use crate::middleware::MiddlewareHandler;

// A single path segment, either a literal string or a named capture (`:name`).
#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Parameterized { segments: Vec<Segment> },
    // Any path under the prefix, e.g. `/files/*`.
    Wildcard(String),
}

impl Pattern {
    /// Compiles a pattern string.
    ///
    /// Checked in order: a `/*` suffix makes a wildcard, any `:` makes a
    /// parameterized pattern, anything else is exact.
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(name) => Segment::Parameter(name.to_string()),
                    None => Segment::Static(s.to_string()),
                })
                .collect();
            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (segment, actual) in segments.iter().zip(path_segments) {
                    match segment {
                        Segment::Static(expected) if expected != actual => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => params.insert(name.clone(), actual.to_string()),
                    }
                }
                Some(params)
            }
            Pattern::Wildcard(prefix) => {
                let suffix = path.strip_prefix(prefix.as_str())?;
                // `/files/*` must not match `/filesystem`.
                if !suffix.is_empty() && !suffix.starts_with('/') {
                    return None;
                }
                let mut params = PathParams::new();
                params.insert("wildcard".to_string(), suffix.to_string());
                Some(params)
            }
        }
    }
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

/// A registered route: its pattern, the group interceptors it was registered
/// under, and its synthesized terminal step.
pub struct Route {
    raw: String,
    pattern: Pattern,
    middlewares: Vec<MiddlewareHandler>,
    terminal: MiddlewareHandler,
}

impl Route {
    /// The full pattern, group prefixes included.
    pub fn pattern(&self) -> &str {
        &self.raw
    }

    /// Group interceptors, outermost group first.
    pub fn middlewares(&self) -> &[MiddlewareHandler] {
        &self.middlewares
    }

    pub fn terminal(&self) -> &MiddlewareHandler {
        &self.terminal
    }
}

/// Ordered routing table.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Appends a route.
    pub fn add(
        &mut self,
        pattern: &str,
        middlewares: Vec<MiddlewareHandler>,
        terminal: MiddlewareHandler,
    ) {
        self.routes.push(Route {
            raw: pattern.to_owned(),
            pattern: Pattern::parse(pattern),
            middlewares,
            terminal,
        });
    }

    /// Finds the first route matching `path`, with its captured parameters.
    pub fn find(&self, path: &str) -> Option<(&Route, PathParams)> {
        self.routes
            .iter()
            .find_map(|route| route.pattern.matches(path).map(|params| (route, params)))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::from_fn;

    fn noop() -> MiddlewareHandler {
        from_fn(|_ctx| Box::pin(async {}))
    }

    // ── Pattern::parse ────────────────────────────────────────────────────────

    #[test]
    fn pattern_parse_root() {
        assert!(matches!(Pattern::parse("/"), Pattern::Exact(s) if s == "/"));
    }

    #[test]
    fn pattern_parse_trailing_slash_stripped() {
        assert!(matches!(Pattern::parse("/users/"), Pattern::Exact(s) if s == "/users"));
    }

    #[test]
    fn pattern_parse_parameterized_multi() {
        match Pattern::parse("/users/:id/posts/:post_id") {
            Pattern::Parameterized { segments } => {
                assert_eq!(segments.len(), 4);
                assert!(matches!(&segments[0], Segment::Static(s) if s == "users"));
                assert!(matches!(&segments[1], Segment::Parameter(s) if s == "id"));
                assert!(matches!(&segments[3], Segment::Parameter(s) if s == "post_id"));
            }
            other => panic!("expected Parameterized, got {other:?}"),
        }
    }

    #[test]
    fn pattern_parse_wildcard() {
        assert!(matches!(Pattern::parse("/files/*"), Pattern::Wildcard(s) if s == "/files"));
    }

    // ── Pattern::matches ──────────────────────────────────────────────────────

    #[test]
    fn exact_match_normalizes_trailing_slash() {
        let pat = Pattern::parse("/users");
        assert!(pat.matches("/users").is_some());
        assert!(pat.matches("/users/").is_some());
        assert!(pat.matches("/posts").is_none());
    }

    #[test]
    fn param_extracts_values() {
        let params = Pattern::parse("/users/:id/posts/:post_id")
            .matches("/users/7/posts/99")
            .unwrap();
        assert_eq!(params.get("id"), Some("7"));
        assert_eq!(params.get("post_id"), Some("99"));
    }

    #[test]
    fn param_wrong_shape() {
        let pat = Pattern::parse("/users/:id");
        assert!(pat.matches("/users").is_none());
        assert!(pat.matches("/users/42/extra").is_none());
        assert!(pat.matches("/posts/42").is_none());
    }

    #[test]
    fn wildcard_captures_suffix() {
        let pat = Pattern::parse("/files/*");
        let params = pat.matches("/files/docs/readme.txt").unwrap();
        assert_eq!(params.get("wildcard"), Some("/docs/readme.txt"));
        assert!(pat.matches("/files").is_some());
        assert!(pat.matches("/filesystem").is_none());
        assert!(pat.matches("/other/readme.txt").is_none());
    }

    // ── Router ────────────────────────────────────────────────────────────────

    #[test]
    fn router_starts_empty() {
        let router = Router::new();
        assert!(router.is_empty());
        assert!(router.find("/").is_none());
    }

    #[test]
    fn first_matching_route_wins() {
        let mut router = Router::new();
        router.add("/path", vec![], noop());
        router.add("/path", vec![noop()], noop());

        let (route, _) = router.find("/path").unwrap();
        assert!(route.middlewares().is_empty());
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn find_returns_params_and_full_pattern() {
        let mut router = Router::new();
        router.add("/api/users/:id", vec![noop(), noop()], noop());

        let (route, params) = router.find("/api/users/42").unwrap();
        assert_eq!(route.pattern(), "/api/users/:id");
        assert_eq!(route.middlewares().len(), 2);
        assert_eq!(params.get("id"), Some("42"));
    }
}
