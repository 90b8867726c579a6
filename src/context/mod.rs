//! Per-request execution context.
//!
//! A [`Context`] is created for each matched request and owned by the task
//! handling it. It carries:
//!
//! - the inbound [`Request`] and the outbound [`Response`] sink;
//! - the request's own chain: global interceptors, then group interceptors,
//!   then the synthesized terminal step;
//! - a cursor over that chain and an `aborted` flag;
//! - path parameters, request-scoped [`Extensions`] and a handle to the
//!   engine's shared [`Cache`].
//!
//! The cursor only moves forward. Once the context is aborted no further
//! step of the chain runs.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::http::{QueryParams, Request, Response, StatusCode};
use crate::middleware::{BoxFuture, MiddlewareHandler};

/// Type-erased request extensions. They let interceptors hand values to later
/// steps without either side knowing the other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the one previously stored for that type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|previous| *previous)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Path parameters captured by the matched route pattern.
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Execution context of one request's chain.
pub struct Context {
    request: Request,
    response: Response,
    status_written: bool,
    chain: Vec<MiddlewareHandler>,
    // Number of chain steps already started.
    cursor: usize,
    aborted: bool,
    params: PathParams,
    extensions: Extensions,
    cache: Arc<Cache>,
}

impl Context {
    /// Creates a context positioned before the first step of `chain`.
    pub fn new(request: Request, chain: Vec<MiddlewareHandler>, cache: Arc<Cache>) -> Self {
        Self::with_params(request, PathParams::new(), chain, cache)
    }

    pub fn with_params(
        request: Request,
        params: PathParams,
        chain: Vec<MiddlewareHandler>,
        cache: Arc<Cache>,
    ) -> Self {
        let keep_alive = request.is_keep_alive();
        let mut response = Response::default();
        response.set_keep_alive(keep_alive);
        Self {
            request,
            response,
            status_written: false,
            chain,
            cursor: 0,
            aborted: false,
            params,
            extensions: Extensions::new(),
            cache,
        }
    }

    // ── Chain control ────────────────────────────────────────────────────────

    /// Runs the next step of the chain, if any, and returns once it (and
    /// everything it transitively continued into) has finished.
    ///
    /// A no-op when the context is aborted or the chain is exhausted. Calling
    /// `next` is how an interceptor yields to the rest of the chain; code
    /// after the `.await` runs once the remainder returns.
    pub fn next(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.aborted || self.cursor >= self.chain.len() {
                return;
            }
            let step = Arc::clone(&self.chain[self.cursor]);
            self.cursor += 1;
            step(self).await;
        })
    }

    /// Stops the chain: any later [`next`](Self::next) call does nothing.
    ///
    /// Writes nothing to the response.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    /// Writes `status` to the response, then aborts.
    pub fn abort_with_status(&mut self, status: StatusCode) {
        self.write_status(status);
        self.abort();
    }

    /// Writes `payload` as JSON with `status`, then aborts.
    ///
    /// If `payload` cannot be serialized, `500` is written instead and the
    /// serialization error is dropped.
    pub fn abort_with_status_json<T>(&mut self, status: StatusCode, payload: &T)
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_vec(payload) {
            Ok(body) => {
                self.set_header("Content-Type", "application/json");
                self.write_status(status);
                self.write(&body);
            }
            Err(_) => self.write_status(StatusCode::InternalServerError),
        }
        self.abort();
    }

    /// Appends `middleware` to this request's chain only.
    ///
    /// The new step runs when a later [`next`](Self::next) call reaches it;
    /// registrations on the engine or its groups are unaffected.
    pub fn use_middleware(&mut self, middleware: MiddlewareHandler) {
        self.chain.push(middleware);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Number of chain steps already started.
    pub fn index(&self) -> usize {
        self.cursor
    }

    /// Current length of the chain, terminal step included.
    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    // ── Response sink ────────────────────────────────────────────────────────

    /// Sets a response header, replacing previous values.
    ///
    /// Ignored once the status has been written.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.status_written {
            let name = name.into();
            debug!(header = %name, "header set after status was written, ignored");
            return;
        }
        self.response.set_header(name, value);
    }

    /// Commits the response status. Only the first call takes effect.
    pub fn write_status(&mut self, status: StatusCode) {
        if self.status_written {
            warn!(
                path = %self.request.path(),
                committed = self.response.status().as_u16(),
                ignored = status.as_u16(),
                "superfluous status write"
            );
            return;
        }
        self.response.set_status(status);
        self.status_written = true;
    }

    /// Appends to the response body, committing `200` first if no status
    /// has been written.
    pub fn write(&mut self, chunk: &[u8]) {
        if !self.status_written {
            self.write_status(StatusCode::Ok);
        }
        self.response.append_body(chunk);
    }

    /// `true` once a status has been committed.
    pub fn is_written(&self) -> bool {
        self.status_written
    }

    /// The response as written so far.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Consumes the context, yielding the response to send.
    ///
    /// A chain that never wrote a status produces `200` with an empty body.
    pub fn into_response(self) -> Response {
        self.response
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn query(&self) -> &QueryParams {
        self.request.query()
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// The engine's shared cache.
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::middleware::from_fn;

    type Trail = Arc<Mutex<Vec<String>>>;

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn context(chain: Vec<MiddlewareHandler>) -> Context {
        Context::new(
            request("GET /chain HTTP/1.1\r\n\r\n"),
            chain,
            Arc::new(Cache::new()),
        )
    }

    // Interceptor that records "<name>:before", continues, then "<name>:after".
    fn visit(trail: &Trail, name: &'static str) -> MiddlewareHandler {
        let trail = Arc::clone(trail);
        from_fn(move |ctx| {
            let trail = Arc::clone(&trail);
            Box::pin(async move {
                trail.lock().unwrap().push(format!("{name}:before"));
                ctx.next().await;
                trail.lock().unwrap().push(format!("{name}:after"));
            })
        })
    }

    fn terminal(trail: &Trail) -> MiddlewareHandler {
        let trail = Arc::clone(trail);
        from_fn(move |ctx| {
            let trail = Arc::clone(&trail);
            Box::pin(async move {
                trail.lock().unwrap().push("terminal".into());
                ctx.write(b"done");
            })
        })
    }

    fn recorded(trail: &Trail) -> Vec<String> {
        trail.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn runs_in_registration_order_then_unwinds() {
        for n in 0..5 {
            let trail = Trail::default();
            let names = ["a", "b", "c", "d", "e"];
            let mut chain: Vec<_> = names[..n].iter().map(|name| visit(&trail, *name)).collect();
            chain.push(terminal(&trail));

            let mut ctx = context(chain);
            ctx.next().await;

            let mut expected: Vec<String> =
                names[..n].iter().map(|name| format!("{name}:before")).collect();
            expected.push("terminal".into());
            expected.extend(names[..n].iter().rev().map(|name| format!("{name}:after")));
            assert_eq!(recorded(&trail), expected, "chain of {n} interceptors");
            assert_eq!(ctx.index(), n + 1);
        }
    }

    #[tokio::test]
    async fn abort_stops_later_steps() {
        let trail = Trail::default();
        let guard = from_fn(|ctx| {
            Box::pin(async move {
                ctx.abort_with_status(StatusCode::Unauthorized);
            })
        });
        let mut ctx = context(vec![visit(&trail, "a"), guard, visit(&trail, "b"), terminal(&trail)]);
        ctx.next().await;

        assert_eq!(recorded(&trail), vec!["a:before", "a:after"]);
        assert!(ctx.is_aborted());
        assert_eq!(ctx.into_response().status(), StatusCode::Unauthorized);
    }

    #[tokio::test]
    async fn next_after_abort_is_a_no_op() {
        let trail = Trail::default();
        let guard = from_fn(|ctx| {
            Box::pin(async move {
                ctx.abort();
                ctx.next().await;
                ctx.next().await;
            })
        });
        let mut ctx = context(vec![guard, terminal(&trail)]);
        ctx.next().await;

        assert!(recorded(&trail).is_empty());
        assert_eq!(ctx.index(), 1);
        assert!(!ctx.is_written());
    }

    #[tokio::test]
    async fn skipping_next_short_circuits_silently() {
        let trail = Trail::default();
        let quiet = from_fn(|_ctx| Box::pin(async move {}));
        let mut ctx = context(vec![quiet, terminal(&trail)]);
        ctx.next().await;

        assert!(recorded(&trail).is_empty());
        assert!(!ctx.is_aborted());
        let response = ctx.into_response();
        assert_eq!(response.status(), StatusCode::Ok);
        assert!(response.content().is_empty());
    }

    #[tokio::test]
    async fn next_past_the_end_is_a_no_op() {
        let trail = Trail::default();
        let greedy = from_fn(|ctx| {
            Box::pin(async move {
                ctx.next().await;
                ctx.next().await;
            })
        });
        let mut ctx = context(vec![greedy, terminal(&trail)]);
        ctx.next().await;

        assert_eq!(recorded(&trail), vec!["terminal"]);
        assert_eq!(ctx.index(), ctx.chain_len());
    }

    #[tokio::test]
    async fn use_extends_only_this_context() {
        let trail = Trail::default();
        let late = visit(&trail, "late");
        let grower = from_fn(move |ctx| {
            let late = Arc::clone(&late);
            Box::pin(async move {
                ctx.use_middleware(late);
                ctx.next().await;
                ctx.next().await;
            })
        });
        let shared_chain = vec![grower, terminal(&trail)];

        let mut first = context(shared_chain.clone());
        first.next().await;
        assert_eq!(first.chain_len(), 3);
        assert_eq!(recorded(&trail), vec!["terminal", "late:before", "late:after"]);

        assert_eq!(shared_chain.len(), 2);
        let second = context(shared_chain);
        assert_eq!(second.chain_len(), 2);
    }

    #[tokio::test]
    async fn abort_with_status_json_writes_body() {
        let mut ctx = context(vec![]);
        ctx.abort_with_status_json(
            StatusCode::Unauthorized,
            &serde_json::json!({"error": "Unauthorized"}),
        );

        assert!(ctx.is_aborted());
        let response = ctx.into_response();
        assert_eq!(response.status(), StatusCode::Unauthorized);
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        assert_eq!(response.content(), br#"{"error":"Unauthorized"}"#);
    }

    #[tokio::test]
    async fn abort_with_status_json_unserializable_payload_yields_500() {
        // JSON object keys must be strings.
        let payload: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
        let mut ctx = context(vec![]);
        ctx.abort_with_status_json(StatusCode::Ok, &payload);

        assert!(ctx.is_aborted());
        let response = ctx.into_response();
        assert_eq!(response.status(), StatusCode::InternalServerError);
        assert!(response.content().is_empty());
    }

    #[test]
    fn first_status_write_wins_and_freezes_headers() {
        let mut ctx = context(vec![]);
        ctx.set_header("X-Before", "1");
        ctx.write_status(StatusCode::Created);
        ctx.write_status(StatusCode::BadRequest);
        ctx.set_header("X-After", "2");
        ctx.write(b"body");

        let response = ctx.into_response();
        assert_eq!(response.status(), StatusCode::Created);
        assert_eq!(response.headers().get("x-before"), Some("1"));
        assert!(!response.headers().contains("x-after"));
        assert_eq!(response.content(), b"body");
    }

    #[test]
    fn extensions_by_type() {
        #[derive(Debug, PartialEq)]
        struct UserId(u64);

        let mut ctx = context(vec![]);
        assert!(ctx.extensions_mut().insert(UserId(7)).is_none());
        assert_eq!(ctx.extensions().get::<UserId>(), Some(&UserId(7)));
        assert_eq!(ctx.extensions_mut().insert(UserId(8)), Some(UserId(7)));
        assert_eq!(ctx.extensions_mut().remove::<UserId>(), Some(UserId(8)));
        assert!(ctx.extensions().get::<UserId>().is_none());
    }

    #[test]
    fn keep_alive_follows_request() {
        let ctx = Context::new(
            request("GET / HTTP/1.1\r\nConnection: close\r\n\r\n"),
            vec![],
            Arc::new(Cache::new()),
        );
        let wire = ctx.into_response().into_bytes();
        assert!(String::from_utf8_lossy(&wire).contains("Connection: close\r\n"));
    }
}
