//! Handler trait and type erasure.
//!
//! The router stores handlers of *different* concrete types in one tree, so
//! each handler is erased behind `dyn ErasedHandler` at registration:
//!
//! ```text
//! async fn hello(req: Request) -> Response { … }      ← user writes this
//!        ↓ router.on(Method::Get, "/", hello)
//! Arc::new(FnHandler(hello)) as BoxedHandler          ← Handler blanket impl
//!        ↓ handler.call(req) at request time
//! Box::pin(async { hello(req).await.into_response() })
//! ```
//!
//! Per request that costs one `Arc` clone and one virtual call — negligible
//! next to network I/O. Middleware composes on the same shape: a wrapper is
//! just a closure over the inner [`BoxedHandler`], which itself satisfies
//! [`Handler`] (see [`middleware::auth`](crate::middleware::auth)).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future resolving to a [`Response`].
///
/// `Pin<Box<…>>` because the runtime polls it in place; `Send + 'static` so
/// tokio may move it across worker threads.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
/// External crates cannot usefully interact with this trait.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A heap-allocated, type-erased handler shared across concurrent requests.
///
/// `#[doc(hidden)] pub` for the same reason as `ErasedHandler`.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// blanket impl below can satisfy it, which keeps the API surface stable.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

/// The sealing module. Because `Sealed` is private, external crates cannot
/// name it and therefore cannot implement `Handler` on their own types.
mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

/// `Fn(Request) -> Fut` covers named `async fn` items, closures returning
/// futures, and any struct implementing `Fn`.
impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype that holds a concrete handler `F` and implements [`ErasedHandler`],
/// bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        // The wrapped function yields the concrete `Fut`; map it through
        // `IntoResponse` and box so the return type matches the trait.
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
