//! Interceptors: composable before/after logic around a request's chain.
//!
//! An interceptor receives the per-request [`Context`] and decides what
//! happens to the rest of the chain:
//!
//! - **Pass through**: call [`Context::next`] and return.
//! - **Wrap**: run code before and after `ctx.next().await`; the "after"
//!   half sees everything later steps wrote to the response.
//! - **Short-circuit**: return without calling `next`; later steps never run.
//! - **Abort**: call [`Context::abort`] (or an `abort_with_status*` variant)
//!   so that no later `next` call can resume the chain.
//!
//! ## Core types
//!
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable interceptor.
//! - [`from_fn`]: builds a handler from a closure.
//! - [`Middleware`] / [`from_middleware`]: trait-object form for stateful
//!   interceptors.
//! - [`Logger`]: built-in request/response logger.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;

use crate::context::Context;

/// A pinned, boxed, `Send` future borrowing for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A type-erased, reference-counted interceptor.
///
/// Every element of a request's chain (global interceptors, group
/// interceptors and the synthesized terminal step) is stored as one of these.
/// The [`Arc`] makes it cheap to copy the registered lists into each
/// request's own chain.
pub type MiddlewareHandler =
    Arc<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static>;

/// Builds a [`MiddlewareHandler`] from a closure.
///
/// # Examples
///
/// ```rust
/// use joker::middleware::from_fn;
///
/// let add_header = from_fn(|ctx| {
///     Box::pin(async move {
///         ctx.set_header("X-Powered-By", "joker");
///         ctx.next().await;
///     })
/// });
/// # let _ = add_header;
/// ```
pub fn from_fn<F>(f: F) -> MiddlewareHandler
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Stateful interceptor.
///
/// # Contract
///
/// - Implementations must be `Send + Sync`: one instance serves every
///   request concurrently.
/// - To continue the chain, await [`Context::next`] exactly where the
///   "before" half ends.
pub trait Middleware: Send + Sync {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()>;
}

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use joker::middleware::{Logger, from_middleware};
///
/// let handler = from_middleware(Arc::new(Logger));
/// # let _ = handler;
/// ```
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    from_fn(move |ctx| {
        let middleware = Arc::clone(&middleware);
        Box::pin(async move { middleware.handle(ctx).await })
    })
}

/// Logs each request's method, path, final status and duration.
///
/// Emits one `tracing::info!` record after the rest of the chain returns:
///
/// ```text
/// METHOD /path - STATUS (duration)
/// ```
///
/// Register it first so that its timing covers every later interceptor.
pub struct Logger;

impl Middleware for Logger {
    fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().to_string();
            let path = ctx.request().path().to_owned();

            ctx.next().await;

            let status = ctx.response().status().as_u16();
            tracing::info!(
                aborted = ctx.is_aborted(),
                "{} {} - {} ({:?})",
                method,
                path,
                status,
                start.elapsed()
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::http::{Request, StatusCode};

    fn context_with(chain: Vec<MiddlewareHandler>) -> Context {
        let (request, _) = Request::parse(b"GET /logged HTTP/1.1\r\n\r\n").unwrap();
        Context::new(request, chain, Arc::new(Cache::new()))
    }

    struct Stamp(&'static str);

    impl Middleware for Stamp {
        fn handle<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                ctx.set_header("X-Stamp", self.0);
                ctx.next().await;
            })
        }
    }

    #[tokio::test]
    async fn trait_middleware_runs_through_adapter() {
        let terminal = from_fn(|ctx| {
            Box::pin(async move {
                ctx.write_status(StatusCode::Accepted);
            })
        });
        let mut ctx = context_with(vec![from_middleware(Arc::new(Stamp("yes"))), terminal]);
        ctx.next().await;

        let response = ctx.into_response();
        assert_eq!(response.status(), StatusCode::Accepted);
        assert_eq!(response.headers().get("x-stamp"), Some("yes"));
    }

    #[tokio::test]
    async fn logger_is_transparent() {
        let terminal = from_fn(|ctx| {
            Box::pin(async move {
                ctx.write_status(StatusCode::NoContent);
            })
        });
        let mut ctx = context_with(vec![from_middleware(Arc::new(Logger)), terminal]);
        ctx.next().await;

        assert!(!ctx.is_aborted());
        assert_eq!(ctx.into_response().status(), StatusCode::NoContent);
    }
}
