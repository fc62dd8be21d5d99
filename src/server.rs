//! HTTP server: accept loop, connection handling, graceful shutdown.
//!
//! Each accepted connection runs in its own task serving HTTP/1.1 with
//! keep-alive and upgrade support (WebSocket). Requests on one connection
//! are processed in the order received; across connections no ordering is
//! implied. The optional whole-request timeout converts overruns into 408
//! before anything is written.
//!
//! Graceful shutdown stops accepting, signals every live connection to
//! finish its in-flight exchanges, closes WebSocket connections with 1001,
//! waits up to the configured grace period, and tears down application
//! state.
//!
//! # Examples
//!
//! ```rust,no_run
//! use nextrush::{app::App, serve};
//! use tokio::net::TcpListener;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let app = App::new();
//! app.get("/", |_ctx| async { "Hello, World!" });
//!
//! let listener = TcpListener::bind("127.0.0.1:3000").await?;
//! serve(listener, app).await;
//! # Ok(())
//! # }
//! ```

use std::{convert::Infallible, sync::Arc, time::Duration};

use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::{net::TcpListener, task::JoinSet};

use crate::{app::App, errors::HttpError, types::Request};

/// Serves the application until the process ends.
pub async fn serve(listener: TcpListener, app: App) {
    serve_with_shutdown(listener, app, std::future::pending::<()>()).await;
}

/// Serves the application until `shutdown` resolves, then drains.
pub async fn serve_with_shutdown(
    listener: TcpListener,
    app: App,
    shutdown: impl std::future::Future<Output = ()>,
) {
    let app = Arc::new(app);
    app.setup_plugins_once();

    let sweeper = app
        .rooms()
        .start_sweeper(app.config().ws.cleanup_interval());

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "listening");
    }

    let (close_tx, close_rx) = tokio::sync::watch::channel(false);
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let app = app.clone();
                        let close_rx = close_rx.clone();
                        connections.spawn(async move {
                            handle_connection(stream, addr, app, close_rx).await;
                        });
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                    }
                }
            }
            // Reap finished connection tasks as they complete.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    // Stop accepting, then drain.
    drop(listener);
    let _ = close_tx.send(true);
    app.rooms().close_all(1001).await;

    let grace = Duration::from_millis(app.config().shutdown_grace_ms);
    let drain = async {
        while connections.join_next().await.is_some() {}
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!("shutdown grace period elapsed with connections still active");
        connections.abort_all();
    }

    sweeper.abort();
    app.shutdown();
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    addr: std::net::SocketAddr,
    app: Arc<App>,
    mut close_rx: tokio::sync::watch::Receiver<bool>,
) {
    let io = TokioIo::new(stream);
    let svc_app = app.clone();
    let svc = service_fn(move |req: Request| {
        let app = svc_app.clone();
        async move {
            let request_timeout = app
                .config()
                .timeouts
                .request_ms
                .map(Duration::from_millis);
            let response = match request_timeout {
                Some(limit) => match tokio::time::timeout(limit, app.dispatch(req, addr)).await {
                    Ok(resp) => resp,
                    Err(_) => {
                        tracing::warn!(%addr, "request timed out");
                        HttpError::request_timeout("request timed out").into_response()
                    }
                },
                None => app.dispatch(req, addr).await,
            };
            Ok::<_, Infallible>(response)
        }
    });

    let mut http = http1::Builder::new();
    http.keep_alive(app.config().timeouts.keep_alive);
    http.timer(TokioTimer::new());
    http.header_read_timeout(Duration::from_millis(app.config().timeouts.headers_ms));

    let conn = http.serve_connection(io, svc).with_upgrades();
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(err) = result {
                tracing::debug!(%addr, error = %err, "connection error");
            }
        }
        _ = close_rx.changed() => {
            conn.as_mut().graceful_shutdown();
            let _ = conn.as_mut().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start_app(app: App) -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            serve_with_shutdown(listener, app, async {
                let _ = stop_rx.await;
            })
            .await;
        });
        (addr, stop_tx)
    }

    async fn raw_request(addr: std::net::SocketAddr, request: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match tokio::time::timeout(Duration::from_secs(2), stream.read(&mut chunk)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => {
                    buf.extend_from_slice(&chunk[..n]);
                    // A blank line plus body is enough for these assertions.
                    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                Ok(Err(_)) => break,
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[tokio::test]
    async fn serves_a_real_tcp_request() {
        let app = App::new();
        app.get("/ping", |_ctx: Context| async { "pong" });
        let (addr, stop) = start_app(app).await;

        let response = raw_request(
            addr,
            "GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "got: {response}");

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn websocket_upgrade_switches_protocols() {
        let app = App::new();
        app.ws("/ws", |_conn, mut rx| async move {
            while rx.recv().await.is_some() {}
        });
        let (addr, stop) = start_app(app).await;

        let response = raw_request(
            addr,
            "GET /ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .await;
        assert!(
            response.starts_with("HTTP/1.1 101 Switching Protocols"),
            "got: {response}"
        );
        assert!(response.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

        let _ = stop.send(());
    }

    #[tokio::test]
    async fn unknown_paths_return_404_json() {
        let app = App::new();
        let (addr, stop) = start_app(app).await;

        let response = raw_request(
            addr,
            "GET /missing HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 404"), "got: {response}");
        assert!(response.contains("application/json"));

        let _ = stop.send(());
    }
}
