//! Minimal joker application: request logging, a shared-secret check and
//! three routes, one of which uses the engine cache.
//!
//! ```text
//! JOKER_PORT=1314 cargo run --example basic
//! curl -H 'Authorization: secret' 'localhost:1314/hello?name=Ada'
//! curl -H 'Authorization: secret' -d 'hi' localhost:1314/echo
//! curl -H 'Authorization: secret' localhost:1314/cache
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use joker::middleware::{Logger, from_fn, from_middleware};
use joker::{Engine, EngineConfig, StatusCode, absolute_time_from_now};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut engine = Engine::with_config(EngineConfig::from_env());

    engine.use_middleware(from_middleware(Arc::new(Logger)));
    engine.use_middleware(from_fn(|ctx| {
        Box::pin(async move {
            if ctx.request().headers().get("authorization") != Some("secret") {
                ctx.abort_with_status_json(
                    StatusCode::Unauthorized,
                    &HashMap::from([("error", "Unauthorized")]),
                );
                return;
            }
            ctx.next().await;
        })
    }));

    engine.map_get("/hello", |call| {
        let name = call
            .query()
            .get("name")
            .filter(|name| !name.is_empty())
            .unwrap_or("World")
            .to_owned();
        (
            StatusCode::Ok,
            Some(HashMap::from([("message", format!("Hello, {name}!"))])),
        )
    });

    engine.map_post("/echo", |call| {
        let original = call
            .body()
            .map(|body| String::from_utf8_lossy(body).into_owned())
            .unwrap_or_default();
        (StatusCode::Ok, Some(HashMap::from([("original", original)])))
    });

    engine.map_get("/cache", |call| {
        if let Some(value) = call.cache().try_get("myKey") {
            return (StatusCode::Ok, Some(json!({ "value": value })));
        }
        let secs = joker::cache::unix_now().rem_euclid(86_400);
        let stamp = format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60);
        call.cache().set(
            "myKey",
            json!({ "time": stamp }),
            absolute_time_from_now(Duration::from_secs(60)),
        );
        (StatusCode::Ok, Some(json!({ "message": "Cache set!" })))
    });

    engine.run().await?;
    Ok(())
}
