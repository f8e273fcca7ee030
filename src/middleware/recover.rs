//! Panic recovery middleware.
//!
//! A panic in a handler must cost one request, not the process. [`guard`]
//! wraps the rest of the chain in an unwind catch; when the guarded future
//! panics it emits a single `"panic"` event through the request's log handle
//! — the seed fields are already in there, so the event identifies which
//! request failed — and reports the failure upward as `None`. No response is
//! synthesized for the failed request: whatever reached the peer before the
//! panic is all it gets, and the connection is dropped.
//!
//! Panic location and backtrace are only observable from inside a panic
//! hook, so the first guarded request installs one, process-wide, exactly
//! once. The hook stashes the detail in a thread local for the catch site
//! and then chains to the previously installed hook, leaving default panic
//! output intact.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::Cell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use futures::FutureExt;

use crate::log::{event, LogHandle, LogSink};

static HOOK: Once = Once::new();

thread_local! {
    static LAST_PANIC: Cell<Option<PanicDetail>> = const { Cell::new(None) };
}

/// What the panic hook saw, carried from the unwind to the catch site.
pub(crate) struct PanicDetail {
    message: String,
    location: String,
    backtrace: String,
}

impl PanicDetail {
    /// Built at the catch site when the hook did not run (for instance when
    /// the application replaced it). Payload only; no location or backtrace.
    fn from_payload(payload: &(dyn Any + Send)) -> Self {
        Self {
            message: payload_message(payload),
            location: String::new(),
            backtrace: String::new(),
        }
    }

    /// One string for the event line: message, location, then the stack.
    pub(crate) fn describe(&self) -> String {
        let mut msg = self.message.clone();
        if !self.location.is_empty() {
            msg.push_str(" at ");
            msg.push_str(&self.location);
        }
        if !self.backtrace.is_empty() {
            msg.push('\n');
            msg.push_str(&self.backtrace);
        }
        msg
    }
}

/// Runs `fut` inside an unwind catch.
///
/// On success the output passes through as `Some`. On a panic, one `"panic"`
/// event is emitted to `out` with the panic message, location, and stack
/// trace, and the result is `None`. The process and its other connections
/// are unaffected either way.
pub(crate) async fn guard<F, T>(out: &dyn LogSink, log: &LogHandle, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    install_hook();
    // The log handle and recorder pool are the only state shared with the
    // guarded future, and both recover their locks after a poisoning panic.
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(value) => Some(value),
        Err(payload) => {
            let detail = LAST_PANIC
                .take()
                .unwrap_or_else(|| PanicDetail::from_payload(payload.as_ref()));
            event(out, log, "panic", detail.describe());
            None
        }
    }
}

/// The hook fires on the panicking thread during the unwind, which is the
/// same thread that observes `catch_unwind` return — a thread local is
/// enough to hand the detail across.
fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let detail = PanicDetail {
                message: payload_message(info.payload()),
                location: info.location().map(|l| l.to_string()).unwrap_or_default(),
                backtrace: Backtrace::force_capture().to_string(),
            };
            LAST_PANIC.set(Some(detail));
            previous(info);
        }));
    });
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::capture::MemorySink;

    fn seeded_handle() -> LogHandle {
        let log = LogHandle::new();
        log.insert("request_id", "0000abcd");
        log.insert("event", "request");
        log.insert("url", "/");
        log
    }

    #[tokio::test]
    async fn successful_futures_pass_through_untouched() {
        let out = MemorySink::new();
        let log = seeded_handle();
        let got = guard(&out, &log, async { 7 }).await;
        assert_eq!(got, Some(7));
        assert!(out.lines().is_empty());
    }

    #[tokio::test]
    async fn a_panic_becomes_one_event_line_carrying_the_seeds() {
        let out = MemorySink::new();
        let log = seeded_handle();

        let got: Option<()> = guard(&out, &log, async { panic!("boom") }).await;
        assert!(got.is_none());

        let lines = out.lines();
        assert_eq!(lines.len(), 1);
        let v: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(v["event"], "panic");
        assert_eq!(v["request_id"], "0000abcd");
        assert_eq!(v["url"], "/");
        let message = v["message"].as_str().unwrap();
        assert!(message.starts_with("boom at "), "got: {message}");
        assert!(message.contains("recover.rs"), "got: {message}");
    }

    #[tokio::test]
    async fn formatted_and_non_string_payloads_are_described() {
        let out = MemorySink::new();
        let log = seeded_handle();

        let user = "eve";
        let _: Option<()> = guard(&out, &log, async { panic!("no such user {user}") }).await;
        let _: Option<()> = guard(&out, &log, async { std::panic::panic_any(42) }).await;

        let lines = out.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("no such user eve"));
        assert!(lines[1].contains("non-string panic payload"));
    }

    #[tokio::test]
    async fn the_task_keeps_running_after_a_recovered_panic() {
        let out = MemorySink::new();
        let log = seeded_handle();
        let _: Option<()> = guard(&out, &log, async { panic!("first") }).await;
        let got = guard(&out, &log, async { "second" }).await;
        assert_eq!(got, Some("second"));
    }
}
