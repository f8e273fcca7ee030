//! Middleware layer.
//!
//! Cross-cutting concerns compose around the router in a fixed order:
//!
//! ```text
//! panic recovery → request logging → router dispatch → (auth gate →) handler
//! ```
//!
//! Recovery and logging are driven by the server for every request, with
//! recovery outermost so a panic anywhere below it becomes one logged event
//! instead of a dead process. [`auth`] wraps individual handlers at
//! registration time and only runs on the routes that opt in.

pub mod auth;
pub(crate) mod logging;
pub(crate) mod recover;
