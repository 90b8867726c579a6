use std::collections::HashMap;
use std::net::SocketAddr;

use joker::middleware::from_fn;
use joker::{Engine, Server, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), joker::ServerError>>,
}

async fn start(engine: Engine) -> Running {
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    let (stop, rx) = oneshot::channel();
    let task = tokio::spawn(engine.serve(server, async {
        let _ = rx.await;
    }));
    Running { addr, stop, task }
}

async fn send(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

fn demo_engine() -> Engine {
    let mut engine = Engine::new();
    engine.use_middleware(from_fn(|ctx| {
        Box::pin(async move {
            ctx.set_header("X-A", "a");
            ctx.next().await;
        })
    }));
    {
        let mut group = engine.group("/g");
        group.use_middleware(from_fn(|ctx| {
            Box::pin(async move {
                ctx.set_header("X-B", "b");
                ctx.next().await;
            })
        }));
        group.map("/ping", |_call| (StatusCode::Ok, Some("pong")));
    }
    engine.map_post("/echo", |call| {
        let original = call
            .body()
            .map(|body| String::from_utf8_lossy(body).into_owned())
            .unwrap_or_default();
        (StatusCode::Ok, Some(HashMap::from([("original", original)])))
    });
    engine
}

#[tokio::test]
async fn grouped_route_over_tcp() {
    let running = start(demo_engine()).await;

    let reply = send(
        running.addr,
        "GET /g/ping HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "{reply}");
    assert!(reply.contains("X-A: a\r\n"), "{reply}");
    assert!(reply.contains("X-B: b\r\n"), "{reply}");
    assert!(reply.contains("Server: Joker\r\n"), "{reply}");
    assert!(reply.ends_with("\r\n\r\n\"pong\""), "{reply}");

    running.stop.send(()).unwrap();
    running.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn post_body_and_not_found_over_tcp() {
    let running = start(demo_engine()).await;

    let echoed = send(
        running.addr,
        "POST /echo HTTP/1.1\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
    )
    .await;
    assert!(echoed.ends_with(r#"{"original":"hello"}"#), "{echoed}");

    let missing = send(running.addr, "GET /nowhere HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"), "{missing}");
    assert!(!missing.contains("X-A"), "{missing}");

    running.stop.send(()).unwrap();
    running.task.await.unwrap().unwrap();
}
