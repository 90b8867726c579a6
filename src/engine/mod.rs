//! The engine: interceptor registration, route groups and dispatch.
//!
//! ```text
//! Request ──► Router::find(path)
//!               │ no match ──► 404
//!               ▼
//!             chain = global ++ group ++ [terminal]
//!               ▼
//!             Context::next() ──► ... ──► Response
//! ```
//!
//! Register everything before serving. [`Engine::serve`] and [`Engine::run`]
//! take the engine by value, so the tables cannot change under live traffic.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::cache::Cache;
use crate::config::EngineConfig;
use crate::context::Context;
use crate::handler::{self, Call};
use crate::http::{Method, Request, Response, StatusCode};
use crate::middleware::MiddlewareHandler;
use crate::router::Router;
use crate::server::{self, Server, ServerError};

/// Framework entry point.
///
/// # Examples
///
/// ```rust,no_run
/// use joker::{Engine, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), joker::ServerError> {
///     let mut engine = Engine::new();
///     engine.map_get("/ping", |_call| (StatusCode::Ok, Some("pong")));
///     engine.run().await
/// }
/// ```
pub struct Engine {
    config: EngineConfig,
    middlewares: Vec<MiddlewareHandler>,
    router: Router,
    cache: Arc<Cache>,
}

impl Engine {
    /// Creates an engine with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates an engine from `config`.
    ///
    /// The cache sweeper is started right away when a Tokio runtime is
    /// active, otherwise when the engine starts serving.
    pub fn with_config(config: EngineConfig) -> Self {
        let cache = Arc::new(Cache::with_sweep_interval(config.sweep_interval));
        if tokio::runtime::Handle::try_current().is_ok() {
            cache.start_sweeper();
        }
        Self {
            config,
            middlewares: Vec::new(),
            router: Router::new(),
            cache,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Overrides the port [`run`](Self::run) binds.
    pub fn set_port(&mut self, port: u16) {
        self.config.port = port;
    }

    /// Appends a global interceptor. Global interceptors run before any
    /// group interceptor, in registration order.
    pub fn use_middleware(&mut self, middleware: MiddlewareHandler) {
        self.middlewares.push(middleware);
    }

    /// The process-wide cache shared with every request.
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Opens a route group under `prefix`.
    ///
    /// # Panics
    ///
    /// Panics if `prefix` does not start with `/`.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            prefix: join_prefix("", prefix),
            engine: self,
            middlewares: Vec::new(),
        }
    }

    pub fn map<F, T>(&mut self, pattern: &str, callback: F)
    where
        F: Fn(&mut Call<'_>) -> (StatusCode, Option<T>) + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        self.root().map(pattern, callback);
    }

    pub fn map_get<F, T>(&mut self, pattern: &str, callback: F)
    where
        F: Fn(&mut Call<'_>) -> (StatusCode, Option<T>) + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        self.root().map_get(pattern, callback);
    }

    pub fn map_post<F, T>(&mut self, pattern: &str, callback: F)
    where
        F: Fn(&mut Call<'_>) -> (StatusCode, Option<T>) + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        self.root().map_post(pattern, callback);
    }

    pub fn map_redirect(&mut self, pattern: &str, target: &str) {
        self.root().map_redirect(pattern, target);
    }

    fn root(&mut self) -> Group<'_> {
        Group {
            engine: self,
            prefix: String::new(),
            middlewares: Vec::new(),
        }
    }

    /// Dispatches one request through its route's chain.
    pub async fn handle(&self, request: Request) -> Response {
        let Some((route, params)) = self.router.find(request.path()) else {
            debug!(path = %request.path(), "no route matched");
            return Response::new(StatusCode::NotFound).keep_alive(request.is_keep_alive());
        };

        let mut chain =
            Vec::with_capacity(self.middlewares.len() + route.middlewares().len() + 1);
        chain.extend(self.middlewares.iter().cloned());
        chain.extend(route.middlewares().iter().cloned());
        chain.push(Arc::clone(route.terminal()));

        let mut ctx = Context::with_params(request, params, chain, Arc::clone(&self.cache));
        ctx.next().await;
        ctx.into_response()
    }

    /// Binds the configured address and serves until Ctrl-C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn run(self) -> Result<(), ServerError> {
        let server = Server::bind(self.config.address()).await?;
        self.serve(server, server::shutdown_signal()).await
    }

    /// Serves on an already bound `server` until `shutdown` resolves.
    ///
    /// In-flight requests are drained before the cache sweeper is stopped.
    pub async fn serve<S>(self, server: Server, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()>,
    {
        let cache = Arc::clone(&self.cache);
        cache.start_sweeper();
        info!(
            routes = self.router.len(),
            global_middlewares = self.middlewares.len(),
            "engine starting"
        );

        let engine = Arc::new(self);
        let result = server
            .run_until(
                move |request| {
                    let engine = Arc::clone(&engine);
                    async move { engine.handle(request).await }
                },
                shutdown,
            )
            .await;

        cache.stop_sweeper();
        result
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// A route group: a path prefix plus its own interceptor sequence.
///
/// Borrowed from the [`Engine`] for as long as routes are being registered
/// on it.
pub struct Group<'e> {
    engine: &'e mut Engine,
    prefix: String,
    middlewares: Vec<MiddlewareHandler>,
}

impl Group<'_> {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Appends a group interceptor. Only routes registered afterwards see it.
    pub fn use_middleware(&mut self, middleware: MiddlewareHandler) {
        self.middlewares.push(middleware);
    }

    /// Opens a sub-group. It starts with a copy of this group's interceptors.
    ///
    /// # Panics
    ///
    /// Panics if `prefix` does not start with `/`.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            prefix: join_prefix(&self.prefix, prefix),
            engine: &mut *self.engine,
            middlewares: self.middlewares.clone(),
        }
    }

    /// Registers `callback` for any method.
    pub fn map<F, T>(&mut self, pattern: &str, callback: F)
    where
        F: Fn(&mut Call<'_>) -> (StatusCode, Option<T>) + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        self.register(pattern, None, false, callback);
    }

    /// Registers `callback` for `GET`; other methods get `405`.
    pub fn map_get<F, T>(&mut self, pattern: &str, callback: F)
    where
        F: Fn(&mut Call<'_>) -> (StatusCode, Option<T>) + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        self.register(pattern, Some(Method::Get), false, callback);
    }

    /// Registers `callback` for `POST`, with access to the request body.
    /// Other methods get `405`.
    pub fn map_post<F, T>(&mut self, pattern: &str, callback: F)
    where
        F: Fn(&mut Call<'_>) -> (StatusCode, Option<T>) + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        self.register(pattern, Some(Method::Post), true, callback);
    }

    /// Answers every request to `pattern` with a `307` to `target`.
    pub fn map_redirect(&mut self, pattern: &str, target: &str) {
        let full = self.full_pattern(pattern);
        self.add_route(full, handler::redirect(target.to_owned()));
    }

    fn register<F, T>(&mut self, pattern: &str, method: Option<Method>, with_body: bool, callback: F)
    where
        F: Fn(&mut Call<'_>) -> (StatusCode, Option<T>) + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        let full = self.full_pattern(pattern);
        let terminal = handler::terminal(full.clone(), method, with_body, callback);
        self.add_route(full, terminal);
    }

    fn full_pattern(&self, pattern: &str) -> String {
        if self.prefix == "/" {
            pattern.to_owned()
        } else {
            format!("{}{}", self.prefix, pattern)
        }
    }

    fn add_route(&mut self, pattern: String, terminal: MiddlewareHandler) {
        debug!(pattern = %pattern, middlewares = self.middlewares.len(), "route registered");
        self.engine
            .router
            .add(&pattern, self.middlewares.clone(), terminal);
    }
}

// A parent of "" or "/" is replaced by the child prefix.
fn join_prefix(parent: &str, child: &str) -> String {
    assert!(
        child.starts_with('/'),
        "group prefix must start with '/', got {child:?}"
    );
    if parent.is_empty() || parent == "/" {
        child.to_owned()
    } else {
        format!("{parent}{child}")
    }
}
