//! Authorization gate, stub scope.
//!
//! [`require_auth`] marks a route as auth-gated: every invocation logs that
//! the path requires authorization, tags the request's structured line with
//! `auth: "required"`, then delegates to the wrapped handler unconditionally.
//! Verification, token parsing, and rejection live outside this skeleton;
//! the gate is the seam where they will go.

use tracing::info;

use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;

/// Wraps `handler` so each call logs the auth requirement before delegating.
///
/// The `auth` field lands on the request's emitted log line, between the
/// seeded fields and the closing `code`/`tts_ns` pair.
///
/// ```rust,no_run
/// use lintel::{Method, Request, Response, Router};
/// use lintel::middleware::auth::require_auth;
///
/// async fn account(_: Request) -> Response { Response::text("yours") }
///
/// Router::new().on(Method::Get, "/account", require_auth(account));
/// ```
pub fn require_auth(handler: impl Handler) -> impl Handler {
    let inner: BoxedHandler = handler.into_boxed_handler();
    move |req: Request| {
        info!("requires auth {}", req.url());
        req.log().insert("auth", "required");
        inner.call(req)
    }
}
