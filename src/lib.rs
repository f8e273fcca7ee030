//! # lintel
//!
//! A minimal HTTP server skeleton that accounts for every request: exactly
//! one structured JSON log line per request served, panic or not.
//!
//! ## The contract
//!
//! Routing, handlers, and responses stay small and boring. The work this
//! crate actually commits to is the per-request plumbing around them:
//!
//! - **One line per request** — seeded with `request_time`, `request_id`,
//!   `event`, `remote_addr`, `method`, `url`, and `content_length`, closed
//!   with the `code` that really went out and the elapsed `tts_ns`, and
//!   emitted to a [`LogSink`] in insertion order.
//! - **Shared log context** — handlers reach the same line through
//!   [`Request::log`]; a field added three layers down is on the emitted
//!   record.
//! - **Recorded status** — responses pass through a pooled
//!   [`StatusRecorder`](recorder::StatusRecorder), so the logged code is
//!   observed at the sink, not assumed.
//! - **Panic containment** — a panicking handler costs its connection and
//!   produces a single `"panic"` event with message, location, and stack
//!   trace. The process keeps serving.
//!
//! A served request leaves a record like:
//!
//! ```text
//! {"request_time":1756080000,"request_id":"0d15327a","event":"request",
//!  "remote_addr":"127.0.0.1:58632","method":"GET","url":"/",
//!  "content_length":0,"code":200,"tts_ns":0}
//! ```
//!
//! (One line on the wire; wrapped here for width.)
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use lintel::{Method, Request, Response, Router, Server};
//! use lintel::middleware::auth::require_auth;
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .on(Method::Get, "/",       index)
//!         .on(Method::Get, "/unauth", unauth)
//!         .on(Method::Get, "/auth",   require_auth(auth));
//!
//!     Server::bind("0.0.0.0:9126").serve(app).await.unwrap();
//! }
//!
//! async fn index(req: Request) -> Response {
//!     req.log().insert("handler", "index");
//!     Response::status(200)
//! }
//! # async fn unauth(_req: Request) -> Response { Response::status(200) }
//! # async fn auth(_req: Request) -> Response { Response::status(200) }
//! ```

mod error;
mod handler;
mod method;
mod request;
mod response;
mod router;
mod server;

pub mod log;
pub mod middleware;
pub mod pool;
pub mod recorder;
pub mod sink;

pub use error::Error;
pub use handler::Handler;
pub use log::LogSink;
pub use method::Method;
pub use request::Request;
pub use response::{IntoResponse, Response};
pub use router::Router;
pub use server::Server;
