//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup, and a not-found outcome
//! when nothing matches. Routing stays dumb on purpose: cross-cutting
//! concerns live in the [`middleware`](crate::middleware) chain around
//! [`dispatch`](Router::dispatch), or wrap individual handlers at
//! registration time.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;

/// The application router.
///
/// One radix tree per HTTP method — no allocations on the hot path. Build it
/// once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Each [`Router::on`] call returns `self` so registrations chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax — `req.param("name")` retrieves them:
    ///
    /// ```rust,no_run
    /// # use lintel::{Method, Request, Response, Router};
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// # async fn create_user(_: Request) -> Response { Response::text("") }
    /// # async fn delete_user(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::Delete, "/users/{id}", delete_user)
    ///     .on(Method::Get,    "/users/{id}", get_user)
    ///     .on(Method::Post,   "/users",      create_user);
    /// ```
    pub fn on(self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.add(method, path, handler)
    }

    fn add(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Routes one request to its handler, or to a bodyless 404 when no route
    /// matches. The not-found response carries nothing handler-specific; the
    /// request's log line still gets its usual fields.
    pub(crate) async fn dispatch(&self, mut req: Request) -> Response {
        match self.lookup(req.method(), req.path()) {
            Some((handler, params)) => {
                req.params = params;
                handler.call(req).await
            }
            None => Response::status(404),
        }
    }

    fn lookup(
        &self,
        method: Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(&method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, path: &str) -> Request {
        Request::new(
            method,
            path.to_owned(),
            None,
            Vec::new(),
            Vec::new(),
            "127.0.0.1:5000".parse().unwrap(),
            0,
        )
    }

    async fn echo_id(req: Request) -> Response {
        Response::text(req.param("id").unwrap_or("missing").to_owned())
    }

    #[tokio::test]
    async fn dispatch_runs_the_matching_handler_with_its_params() {
        let router = Router::new().on(Method::Get, "/users/{id}", echo_id);
        let resp = router.dispatch(request(Method::Get, "/users/42")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"42");
    }

    #[tokio::test]
    async fn unmatched_paths_dispatch_to_a_bodyless_404() {
        let router = Router::new().on(Method::Get, "/users/{id}", echo_id);
        let resp = router.dispatch(request(Method::Get, "/nope")).await;
        assert_eq!(resp.status, 404);
        assert!(resp.body.is_empty());
    }

    #[tokio::test]
    async fn methods_route_through_separate_trees() {
        let router = Router::new().on(Method::Get, "/users/{id}", echo_id);
        let resp = router.dispatch(request(Method::Post, "/users/42")).await;
        assert_eq!(resp.status, 404);
    }
}
