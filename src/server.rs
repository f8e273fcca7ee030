//! HTTP server: accept loop, HTTP/1.1 parsing, and graceful shutdown.
//!
//! Each connection runs on its own task and serves requests in sequence,
//! keep-alive included. Per request the middleware chain assembles around
//! the router — panic recovery outermost, then request logging, then
//! dispatch — and the response travels through a pooled status recorder so
//! the log line names the code that actually went out.
//!
//! The protocol surface is a deliberate subset: HTTP/1.1 with
//! content-length framing. Chunked uploads are accepted but not decoded —
//! the request is served with `content_length: -1` and the connection closes
//! after the response. Pipelining is not supported.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before SIGKILL. The server
//! reacts by immediately stopping `listener.accept()`, letting every
//! in-flight connection task run to completion, and then returning from
//! [`Server::serve`]. Set the grace period longer than your slowest request.

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use crate::error::Error;
use crate::log::{LogSink, StderrSink};
use crate::method::Method;
use crate::middleware::{logging, recover};
use crate::pool::RecorderPool;
use crate::request::Request;
use crate::router::Router;
use crate::sink::{status_reason, Conn, HttpSink};

/// Request heads larger than this are answered with 431.
const MAX_HEAD: usize = 16 * 1024;

/// Declared bodies larger than this are answered with 413.
const MAX_BODY: usize = 1024 * 1024;

static RECORDERS: OnceLock<Arc<RecorderPool<HttpSink<TcpStream>>>> = OnceLock::new();

/// The process-wide recorder pool, initialized on first use. `OnceLock`
/// makes the initialization race-free under concurrent first requests.
fn shared_recorders() -> Arc<RecorderPool<HttpSink<TcpStream>>> {
    Arc::clone(RECORDERS.get_or_init(|| Arc::new(RecorderPool::new())))
}

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    out: Arc<dyn LogSink>,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called. Structured request lines go to stderr unless
    /// [`log_sink`](Server::log_sink) replaces the destination.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use lintel::Server;
    /// let server = Server::bind("0.0.0.0:9126");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr, out: Arc::new(StderrSink) }
    }

    /// Replaces the structured-log destination.
    pub fn log_sink(mut self, out: impl LogSink + 'static) -> Self {
        self.out = Arc::new(out);
        self
    }

    /// Starts accepting connections and dispatching them through `router`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener, router).await
    }

    /// Like [`serve`](Server::serve), on an already-bound listener. For
    /// ephemeral ports and socket activation.
    pub async fn serve_on(self, listener: TcpListener, router: Router) -> Result<(), Error> {
        // Arcs let the router and pool be shared across connection tasks
        // without copying the routing table.
        let router = Arc::new(router);
        let pool = shared_recorders();

        info!(addr = %listener.local_addr()?, "lintel listening");

        // JoinSet tracks every spawned connection task so we can wait for
        // them all to finish during graceful shutdown.
        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // `biased` makes select! check arms top-to-bottom instead of
                // randomly. We check shutdown first so a SIGTERM immediately
                // stops accepting new connections, even if more are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    tasks.spawn(connection(
                        stream,
                        remote_addr,
                        Arc::clone(&router),
                        Arc::clone(&pool),
                        Arc::clone(&self.out),
                    ));
                }

                // Reap finished connection tasks so the JoinSet does not grow
                // without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain: wait for every in-flight connection to finish before we return.
        while tasks.join_next().await.is_some() {}

        info!("lintel stopped");
        Ok(())
    }
}

// ── Connection loop ───────────────────────────────────────────────────────────

/// Serves one connection until it closes: parse a request, run it through
/// the middleware chain, and reuse the socket if keep-alive allows.
///
/// A request that panics ends the connection (the sink is dropped mid-unwind
/// and the peer sees EOF); the task itself always returns cleanly.
async fn connection<T: Conn>(
    mut stream: T,
    remote_addr: SocketAddr,
    router: Arc<Router>,
    pool: Arc<RecorderPool<HttpSink<T>>>,
    out: Arc<dyn LogSink>,
) {
    loop {
        let (req, keep_alive) = match read_request(&mut stream, remote_addr).await {
            Ok(v) => v,
            Err(Reject::Status(code)) => {
                reject(&mut stream, code).await;
                return;
            }
            Err(Reject::Disconnect) => return,
        };

        let log = req.log().clone();
        let sink = HttpSink::new(stream);

        let served = recover::guard(
            out.as_ref(),
            &log,
            logging::serve_logged(&router, &pool, out.as_ref(), req, sink),
        )
        .await;

        // Three ways to lose the socket here: a panic (guard returned None),
        // a failed response write, or a hijack.
        match served.flatten().and_then(HttpSink::into_stream) {
            Some(s) if keep_alive => stream = s,
            _ => return,
        }
    }
}

/// Answers a request that never reached the middleware chain, then closes.
/// These rejections happen below the logging layer and emit no structured
/// line, like any other transport-level failure.
async fn reject<T: Conn>(stream: &mut T, status: u16) {
    let head = format!(
        "HTTP/1.1 {} {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        status,
        status_reason(status),
    );
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.flush().await;
}

// ── Request parsing ───────────────────────────────────────────────────────────

/// Why an inbound request never reached the middleware chain.
enum Reject {
    /// Peer closed or the socket failed; nothing to say back.
    Disconnect,
    /// Protocol-level refusal, answered with a bodyless status.
    Status(u16),
}

struct Head {
    method: Method,
    path: String,
    query: Option<String>,
    headers: Vec<(String, String)>,
    content_length: i64,
    keep_alive: bool,
}

/// Reads and parses one request from the stream.
async fn read_request<T: Conn>(
    stream: &mut T,
    remote_addr: SocketAddr,
) -> Result<(Request, bool), Reject> {
    let mut buf = Vec::with_capacity(1024);
    let head_end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > MAX_HEAD {
            return Err(Reject::Status(431));
        }
        match stream.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return Err(Reject::Disconnect),
            Ok(_) => {}
        }
    };

    let head = parse_head(&buf[..head_end])?;

    // Pipelining is not supported: bytes past the current request's body are
    // discarded with `buf`.
    let mut body = buf.split_off(head_end);
    if head.content_length > 0 {
        let want = head.content_length as usize;
        if want > MAX_BODY {
            return Err(Reject::Status(413));
        }
        while body.len() < want {
            match stream.read_buf(&mut body).await {
                Ok(0) | Err(_) => return Err(Reject::Disconnect),
                Ok(_) => {}
            }
        }
        body.truncate(want);
    } else {
        body.clear();
    }

    let keep_alive = head.keep_alive;
    let req = Request::new(
        head.method,
        head.path,
        head.query,
        head.headers,
        body,
        remote_addr,
        head.content_length,
    );
    Ok((req, keep_alive))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Parses a complete request head (request line + headers + blank line).
fn parse_head(raw: &[u8]) -> Result<Head, Reject> {
    let mut storage = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Request::new(&mut storage);
    let status = parsed.parse(raw).map_err(|_| Reject::Status(400))?;
    if status.is_partial() {
        // The caller found the terminating blank line, so a partial parse
        // means the head itself is malformed.
        return Err(Reject::Status(400));
    }

    let (Some(method), Some(target), Some(version)) =
        (parsed.method, parsed.path, parsed.version)
    else {
        return Err(Reject::Status(400));
    };
    let method: Method = method.parse().map_err(|()| Reject::Status(501))?;

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_owned(), Some(q.to_owned())),
        None => (target.to_owned(), None),
    };

    let headers: Vec<(String, String)> = parsed
        .headers
        .iter()
        .map(|h| (h.name.to_owned(), String::from_utf8_lossy(h.value).into_owned()))
        .collect();

    let chunked = header(&headers, "transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    let content_length = match header(&headers, "content-length") {
        // Chunked framing wins; the declared length is unknowable.
        _ if chunked => -1,
        Some(v) => match v.trim().parse::<i64>() {
            Ok(n) if n >= 0 => n,
            _ => return Err(Reject::Status(400)),
        },
        None => 0,
    };

    // HTTP/1.1 defaults to keep-alive. A chunked body is never drained, so
    // the connection cannot be re-framed and must close.
    let close_requested =
        header(&headers, "connection").is_some_and(|v| v.eq_ignore_ascii_case("close"));
    let keep_alive = version == 1 && !close_requested && !chunked;

    Ok(Head { method, path, query, headers, content_length, keep_alive })
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    // `pending()` never resolves — on non-Unix platforms the SIGTERM arm is
    // effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::capture::MemorySink;
    use crate::response::Response;
    use tokio::io::DuplexStream;

    fn addr() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    async fn ok_handler(_req: Request) -> Response {
        Response::text("ok")
    }

    async fn boom(_req: Request) -> Response {
        panic!("kaboom");
    }

    async fn read_response(stream: &mut DuplexStream) -> String {
        let mut buf = Vec::new();
        let head_end = loop {
            if let Some(end) = find_head_end(&buf) {
                break end;
            }
            let mut chunk = [0u8; 256];
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "peer closed early: {}", String::from_utf8_lossy(&buf));
            buf.extend_from_slice(&chunk[..n]);
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        let body_len: usize = head
            .lines()
            .find_map(|l| {
                let (k, v) = l.split_once(':')?;
                k.eq_ignore_ascii_case("content-length").then(|| v.trim().parse().ok())?
            })
            .unwrap_or(0);
        while buf.len() < head_end + body_len {
            let mut chunk = [0u8; 256];
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "peer closed mid-body");
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    // ── parse_head ───────────────────────────────────────────────

    #[test]
    fn parse_head_splits_target_and_reads_declared_length() {
        let head =
            parse_head(b"GET /tea?sugar=1 HTTP/1.1\r\nHost: t\r\nContent-Length: 3\r\n\r\n")
                .unwrap_or_else(|_| panic!("expected parse"));
        assert_eq!(head.method, Method::Get);
        assert_eq!(head.path, "/tea");
        assert_eq!(head.query.as_deref(), Some("sugar=1"));
        assert_eq!(head.content_length, 3);
        assert!(head.keep_alive);
    }

    #[test]
    fn parse_head_honors_connection_close() {
        let head = parse_head(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
            .unwrap_or_else(|_| panic!("expected parse"));
        assert!(!head.keep_alive);
    }

    #[test]
    fn chunked_bodies_have_unknown_length_and_close_the_connection() {
        let head = parse_head(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n")
            .unwrap_or_else(|_| panic!("expected parse"));
        assert_eq!(head.content_length, -1);
        assert!(!head.keep_alive);
    }

    #[test]
    fn unknown_methods_are_rejected_with_501() {
        let Err(Reject::Status(code)) = parse_head(b"BREW / HTTP/1.1\r\n\r\n") else {
            panic!("expected reject");
        };
        assert_eq!(code, 501);
    }

    #[test]
    fn malformed_request_lines_are_rejected_with_400() {
        let Err(Reject::Status(code)) = parse_head(b"///bad lines\r\n\r\n") else {
            panic!("expected reject");
        };
        assert_eq!(code, 400);
    }

    #[test]
    fn negative_content_lengths_are_rejected_with_400() {
        let Err(Reject::Status(code)) =
            parse_head(b"POST / HTTP/1.1\r\nContent-Length: -5\r\n\r\n")
        else {
            panic!("expected reject");
        };
        assert_eq!(code, 400);
    }

    // ── read_request ─────────────────────────────────────────────

    #[tokio::test]
    async fn oversized_heads_are_rejected_with_431() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let mut huge = Vec::from(&b"GET / HTTP/1.1\r\nx-pad: "[..]);
        huge.extend(std::iter::repeat_n(b'a', MAX_HEAD + 1024));
        client.write_all(&huge).await.unwrap();

        let Err(Reject::Status(code)) = read_request(&mut server, addr()).await else {
            panic!("expected reject");
        };
        assert_eq!(code, 431);
    }

    #[tokio::test]
    async fn clean_eof_between_requests_is_a_disconnect() {
        let (client, mut server) = tokio::io::duplex(4096);
        drop(client);
        let Err(Reject::Disconnect) = read_request(&mut server, addr()).await else {
            panic!("expected disconnect");
        };
    }

    #[tokio::test]
    async fn bodies_are_read_to_their_declared_length() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(b"POST /in HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();
        let (req, keep_alive) = match read_request(&mut server, addr()).await {
            Ok(v) => v,
            Err(_) => panic!("expected request"),
        };
        assert_eq!(req.body(), b"hello");
        assert_eq!(req.content_length(), 5);
        assert!(keep_alive);
    }

    // ── connection ───────────────────────────────────────────────

    fn harness(routes: Router) -> (DuplexStream, tokio::task::JoinHandle<()>, MemorySink) {
        let (client, server_side) = tokio::io::duplex(4096);
        let out = MemorySink::new();
        let task = tokio::spawn(connection(
            server_side,
            addr(),
            Arc::new(routes),
            Arc::new(RecorderPool::new()),
            Arc::new(out.clone()),
        ));
        (client, task, out)
    }

    #[tokio::test]
    async fn keep_alive_serves_requests_in_sequence_and_logs_each() {
        let (mut client, task, out) = harness(Router::new().on(Method::Get, "/", ok_handler));

        client.write_all(b"GET / HTTP/1.1\r\nhost: t\r\n\r\n").await.unwrap();
        let first = read_response(&mut client).await;
        assert!(first.starts_with("HTTP/1.1 200 OK\r\n"), "got: {first}");
        assert!(first.ends_with("ok"), "got: {first}");

        client.write_all(b"GET /missing HTTP/1.1\r\nhost: t\r\n\r\n").await.unwrap();
        let second = read_response(&mut client).await;
        assert!(second.starts_with("HTTP/1.1 404 Not Found\r\n"), "got: {second}");

        drop(client);
        task.await.unwrap();

        let lines = out.lines();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        let second: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(first["code"], 200);
        assert_eq!(first["url"], "/");
        assert_eq!(second["code"], 404);
        assert_eq!(second["url"], "/missing");
    }

    #[tokio::test]
    async fn a_panicking_handler_drops_the_connection_after_one_event_line() {
        let (mut client, task, out) = harness(Router::new().on(Method::Get, "/boom", boom));

        client.write_all(b"GET /boom HTTP/1.1\r\nhost: t\r\n\r\n").await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "no response expected, got: {}", String::from_utf8_lossy(&rest));

        // The connection task survived the panic.
        task.await.unwrap();

        let lines = out.lines();
        assert_eq!(lines.len(), 1);
        let v: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(v["event"], "panic");
        assert_eq!(v["url"], "/boom");
        assert!(v["message"].as_str().unwrap().contains("kaboom"));
        assert!(v.get("code").is_none());
    }

    #[tokio::test]
    async fn protocol_rejections_answer_and_close_without_logging() {
        let (mut client, task, out) = harness(Router::new());

        client.write_all(b"BREW / HTTP/1.1\r\nhost: t\r\n\r\n").await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        let text = String::from_utf8_lossy(&rest);
        assert!(text.starts_with("HTTP/1.1 501 Not Implemented\r\n"), "got: {text}");

        task.await.unwrap();
        assert!(out.lines().is_empty());
    }
}
