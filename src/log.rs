//! Structured per-request log records.
//!
//! Every request that enters the middleware chain produces exactly one JSON
//! line. The line is assembled in a [`LogContext`]: an insertion-ordered list
//! of fields seeded by the logging middleware and open to additions from any
//! downstream handler for the rest of that request.
//!
//! Two channels coexist and do not mix:
//!
//! - `tracing` carries human diagnostics (startup, connection errors, the
//!   stub handlers' chatter);
//! - [`LogSink`] carries the one machine-parseable record per request.
//!
//! The context is shared by reference ([`LogHandle`]) rather than copied into
//! the request: a field added by a handler three layers down lands in the
//! same structure the middleware serializes at the end. Whoever holds a
//! handle writes to the line that will actually be emitted.

use std::borrow::Cow;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::ser::{Error as _, Serialize, SerializeMap, Serializer};

// ── Field values ──────────────────────────────────────────────────────────────

/// A single log field value: string, integer, or float.
#[derive(Clone, Debug, PartialEq)]
pub enum LogValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl From<&str> for LogValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for LogValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for LogValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for LogValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl Serialize for LogValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Str(v) => serializer.serialize_str(v),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Float(v) if v.is_finite() => serializer.serialize_f64(*v),
            // JSON has no spelling for NaN or the infinities. Refuse instead
            // of emitting `null` and losing the value without a trace.
            Self::Float(v) => Err(S::Error::custom(format!("non-finite float {v} in log field"))),
        }
    }
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(v) => f.write_str(v),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

// ── LogContext ────────────────────────────────────────────────────────────────

/// The ordered field map behind one structured log line.
///
/// Fields serialize in insertion order, so repeated serialization of the same
/// context is byte-identical and the seed fields always lead the line.
/// Re-inserting an existing key replaces the value in place; the key keeps
/// its original position.
#[derive(Debug, Default)]
pub struct LogContext {
    fields: Vec<(Cow<'static, str>, LogValue)>,
}

impl LogContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, or replaces its value if the key is already present.
    pub fn insert(&mut self, key: impl Into<Cow<'static, str>>, value: impl Into<LogValue>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&LogValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serializes the context to one JSON line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for LogContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key.as_ref(), value)?;
        }
        map.end()
    }
}

// ── LogHandle ─────────────────────────────────────────────────────────────────

/// A shared, mutable-by-reference handle to one request's [`LogContext`].
///
/// Created once per request by the server and cloned into the [`Request`]
/// (`Request::log`). Every clone points at the same context, so additions
/// made anywhere downstream are visible to the final emission. The handle is
/// scoped to a single request; it is never reused across requests.
///
/// [`Request`]: crate::Request
#[derive(Clone, Default)]
pub struct LogHandle {
    inner: Arc<Mutex<LogContext>>,
}

impl LogHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field to the request's log line (replacing in place if present).
    pub fn insert(&self, key: impl Into<Cow<'static, str>>, value: impl Into<LogValue>) {
        self.lock().insert(key, value);
    }

    /// Runs `f` with the locked context. The lock is held only for the call;
    /// never park on it across an `await`.
    pub fn with<R>(&self, f: impl FnOnce(&LogContext) -> R) -> R {
        f(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, LogContext> {
        // A panic while holding the lock poisons it; the context data is
        // still sound (plain inserts), so keep logging.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── LogSink ───────────────────────────────────────────────────────────────────

/// An append-only, line-oriented destination for structured records.
///
/// One call, one line. No rotation or buffering policy lives here; pair the
/// process with whatever ships its stderr.
pub trait LogSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// The default sink: one line to standard error per record.
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn emit(&self, line: &str) {
        // Logging must never take the process down; a dead stderr is ignored.
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{line}");
    }
}

// ── Emission ──────────────────────────────────────────────────────────────────

/// Serializes the handle's context and writes one line to `out`.
///
/// If serialization fails, a fallback error record is emitted instead —
/// built with [`serde_json::json!`] from plain strings, a path disjoint from
/// the context serializer, so the failure cannot recurse and the line is
/// never lost silently.
pub fn emit(out: &dyn LogSink, log: &LogHandle) {
    let ctx = log.lock();
    match ctx.to_line() {
        Ok(line) => out.emit(&line),
        Err(e) => out.emit(&fallback_line(&e, &ctx)),
    }
}

/// Records a named event on the request's line and emits it.
///
/// Sets `event` (replacing the seeded `"request"` in place) and `message`,
/// then serializes whatever else the context has accumulated. Used by the
/// panic recovery path; the seed fields survive into the event line.
pub fn event(out: &dyn LogSink, log: &LogHandle, name: &str, message: impl Into<String>) {
    log.insert("event", name);
    log.insert("message", message.into());
    emit(out, log);
}

fn fallback_line(err: &serde_json::Error, ctx: &LogContext) -> String {
    serde_json::json!({
        "event": "error",
        "message": "unable to serialize log context",
        "error": err.to_string(),
        "data": format!("{ctx:?}"),
    })
    .to_string()
}

// ── Test support ──────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod capture {
    use super::LogSink;
    use std::sync::{Arc, Mutex};

    /// In-memory sink for asserting on emitted lines.
    #[derive(Clone, Default)]
    pub(crate) struct MemorySink {
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl MemorySink {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl LogSink for MemorySink {
        fn emit(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::capture::MemorySink;
    use super::*;

    // ── LogContext ───────────────────────────────────────────────

    #[test]
    fn fields_serialize_in_insertion_order() {
        let mut ctx = LogContext::new();
        ctx.insert("request_time", 1_700_000_000_i64);
        ctx.insert("request_id", "0000abcd");
        ctx.insert("event", "request");
        assert_eq!(
            ctx.to_line().unwrap(),
            r#"{"request_time":1700000000,"request_id":"0000abcd","event":"request"}"#
        );
    }

    #[test]
    fn reinserting_a_key_replaces_in_place() {
        let mut ctx = LogContext::new();
        ctx.insert("event", "request");
        ctx.insert("code", 200_i64);
        ctx.insert("event", "panic");
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.get("event"), Some(&LogValue::Str("panic".into())));
        // position kept
        assert!(ctx.to_line().unwrap().starts_with(r#"{"event":"panic""#));
    }

    #[test]
    fn serialization_is_deterministic() {
        let mut ctx = LogContext::new();
        ctx.insert("method", "GET");
        ctx.insert("content_length", -1_i64);
        ctx.insert("ratio", 0.5);
        assert_eq!(ctx.to_line().unwrap(), ctx.to_line().unwrap());
    }

    #[test]
    fn non_finite_floats_refuse_to_serialize() {
        let mut ctx = LogContext::new();
        ctx.insert("ratio", f64::NAN);
        assert!(ctx.to_line().is_err());
    }

    // ── LogHandle sharing ────────────────────────────────────────

    #[test]
    fn clones_share_one_context() {
        let log = LogHandle::new();
        let downstream = log.clone();
        downstream.insert("auth", "required");
        assert_eq!(
            log.with(|ctx| ctx.get("auth").cloned()),
            Some(LogValue::Str("required".into()))
        );
    }

    // ── Emission ─────────────────────────────────────────────────

    #[test]
    fn emit_writes_exactly_one_line() {
        let out = MemorySink::new();
        let log = LogHandle::new();
        log.insert("event", "request");
        log.insert("code", 200_i64);
        emit(&out, &log);
        let lines = out.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0], r#"{"event":"request","code":200}"#);
    }

    #[test]
    fn event_replaces_name_and_appends_message() {
        let out = MemorySink::new();
        let log = LogHandle::new();
        log.insert("request_id", "0000abcd");
        log.insert("event", "request");
        event(&out, &log, "panic", "boom");
        let lines = out.lines();
        assert_eq!(lines.len(), 1);
        let v: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(v["event"], "panic");
        assert_eq!(v["message"], "boom");
        assert_eq!(v["request_id"], "0000abcd");
    }

    #[test]
    fn serialization_failure_falls_back_to_an_error_record() {
        let out = MemorySink::new();
        let log = LogHandle::new();
        log.insert("event", "request");
        log.insert("ratio", f64::INFINITY);
        emit(&out, &log);
        let lines = out.lines();
        assert_eq!(lines.len(), 1);
        let v: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(v["event"], "error");
        assert_eq!(v["message"], "unable to serialize log context");
        assert!(v["error"].as_str().unwrap().contains("non-finite"));
        assert!(v["data"].as_str().unwrap().contains("ratio"));
    }
}
