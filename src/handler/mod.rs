//! Business callbacks and the terminal step synthesized for each route.
//!
//! # How a callback becomes the last link of the chain
//!
//! ```text
//! engine.map_get("/hello", |call| (StatusCode::Ok, Some("hi")))   ← user writes this
//!        ↓ terminal(pattern, Some(Method::Get), false, callback)
//! MiddlewareHandler                                               ← stored on the route
//!        ↓ appended after global + group interceptors at dispatch
//! ctx.next() reaches it → method check → callback → JSON → sink
//! ```
//!
//! A callback returns `(status, payload)`. `None` means "no body": only the
//! status is written. `Some(payload)` is serialized with `serde_json` and
//! written with `Content-Type: application/json` and the `Server`
//! fingerprint header.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::error;

use crate::cache::Cache;
use crate::context::{Context, Extensions, PathParams};
use crate::http::{Method, QueryParams, Request, StatusCode};
use crate::middleware::{MiddlewareHandler, from_fn};

/// Value of the `Server` header set on every serialized reply.
pub const FINGERPRINT: &str = "Joker";

/// What a business callback sees of the request it is answering.
///
/// Borrowed from the request's [`Context`] for the duration of the call.
pub struct Call<'a> {
    ctx: &'a mut Context,
    with_body: bool,
}

impl<'a> Call<'a> {
    pub(crate) fn new(ctx: &'a mut Context, with_body: bool) -> Self {
        Self { ctx, with_body }
    }

    pub fn request(&self) -> &Request {
        self.ctx.request()
    }

    /// Raw request body. `Some` only for routes registered with `map_post`.
    pub fn body(&self) -> Option<&Bytes> {
        self.with_body.then(|| self.ctx.request().body())
    }

    pub fn query(&self) -> &QueryParams {
        self.ctx.query()
    }

    pub fn params(&self) -> &PathParams {
        self.ctx.params()
    }

    /// Sets a response header on the reply being built.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.ctx.set_header(name, value);
    }

    /// The engine's shared cache.
    pub fn cache(&self) -> &Arc<Cache> {
        self.ctx.cache()
    }

    /// Values left by earlier interceptors.
    pub fn extensions(&self) -> &Extensions {
        self.ctx.extensions()
    }
}

/// Builds the terminal step for a callback route.
///
/// `method` restricts the route: any other method gets `405` with no body
/// and the callback is not invoked. With `with_body`, the callback can read
/// the request body through [`Call::body`].
pub(crate) fn terminal<F, T>(
    pattern: String,
    method: Option<Method>,
    with_body: bool,
    callback: F,
) -> MiddlewareHandler
where
    F: Fn(&mut Call<'_>) -> (StatusCode, Option<T>) + Send + Sync + 'static,
    T: Serialize + 'static,
{
    let callback = Arc::new(callback);
    let pattern: Arc<str> = pattern.into();
    let method = method.map(Arc::new);

    from_fn(move |ctx| {
        let callback = Arc::clone(&callback);
        let pattern = Arc::clone(&pattern);
        let method = method.clone();
        Box::pin(async move {
            if let Some(allowed) = method.as_deref() {
                if ctx.request().method() != allowed {
                    ctx.write_status(StatusCode::MethodNotAllowed);
                    return;
                }
            }

            let (status, payload) = callback(&mut Call::new(ctx, with_body));
            let Some(payload) = payload else {
                ctx.write_status(status);
                return;
            };

            match serde_json::to_vec(&payload) {
                Ok(body) => {
                    ctx.set_header("Content-Type", "application/json");
                    ctx.set_header("Server", FINGERPRINT);
                    ctx.write_status(status);
                    ctx.write(&body);
                }
                Err(e) => {
                    error!(pattern = %pattern, error = %e, "failed to serialize response");
                    ctx.write_status(StatusCode::InternalServerError);
                }
            }
        })
    })
}

/// Builds the terminal step of a redirect route: `Location: target`, `307`.
pub(crate) fn redirect(target: String) -> MiddlewareHandler {
    let target: Arc<str> = target.into();
    from_fn(move |ctx| {
        let target = Arc::clone(&target);
        Box::pin(async move {
            ctx.set_header("Location", &*target);
            ctx.write_status(StatusCode::TemporaryRedirect);
        })
    })
}
