//! Minimal lintel example — routed JSON endpoints with per-request log lines.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:9126/users/42
//!   curl -X POST http://localhost:9126/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl http://localhost:9126/admin
//!   curl http://localhost:9126/panic        # connection drops, server survives
//!
//! Watch stderr: one JSON line per request, panics included.

use lintel::middleware::auth::require_auth;
use lintel::{Method, Request, Response, Router, Server};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let app = Router::new()
        .on(Method::Get,  "/users/{id}", get_user)
        .on(Method::Post, "/users",      create_user)
        .on(Method::Get,  "/admin",      require_auth(admin))
        .on(Method::Get,  "/panic",      panic_on_purpose);

    Server::bind("0.0.0.0:9126")
        .serve(app)
        .await
        .expect("server error");
}

// GET /users/{id}
//
// Fields added through req.log() land on this request's log line, between
// the seeded fields and the closing code/tts_ns pair.
async fn get_user(req: Request) -> Response {
    let id = req.param("id").unwrap_or("unknown").to_owned();
    req.log().insert("user_id", id.clone());
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes())
}

// POST /users
//
// req.body() is &[u8] — parse with serde_json::from_slice or leave it raw.
// The declared length is already on the log line as content_length.
async fn create_user(req: Request) -> Response {
    if req.body().is_empty() {
        return Response::status(400);
    }
    Response::builder()
        .status(201)
        .header("location", "/users/99")
        .json(r#"{"id":"99","name":"new_user"}"#.to_owned().into_bytes())
}

// GET /admin — the auth gate logs the access and delegates.
async fn admin(_req: Request) -> Response {
    Response::text("admin area")
}

// GET /panic — the recovery middleware turns this into one "panic" log line
// and a dropped connection. The next request is served normally.
async fn panic_on_purpose(_req: Request) -> Response {
    panic!("on purpose");
}
