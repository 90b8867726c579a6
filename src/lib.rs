//! # joker
//!
//! A small async HTTP/1.1 framework built around an interceptor chain and a
//! process-wide expiring cache.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use joker::{Engine, StatusCode};
//! use joker::middleware::{Logger, from_middleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), joker::ServerError> {
//!     let mut engine = Engine::new();
//!     engine.use_middleware(from_middleware(Arc::new(Logger)));
//!     engine.map_get("/hello", |call| {
//!         let name = call.query().get("name").unwrap_or("World").to_owned();
//!         (StatusCode::Ok, Some(HashMap::from([("message", format!("Hello, {name}!"))])))
//!     });
//!     engine.run().await
//! }
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod handler;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{Cache, absolute_time_from_now};
pub use config::EngineConfig;
pub use context::{Context, Extensions, PathParams};
pub use engine::{Engine, Group};
pub use handler::Call;
pub use http::{Headers, Method, QueryParams, Request, Response, StatusCode};
pub use middleware::{Middleware, MiddlewareHandler, from_fn, from_middleware};
pub use server::{Server, ServerError};
