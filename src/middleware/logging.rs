//! Request logging middleware.
//!
//! Owns the request's whole logged lifetime: seed the [`LogHandle`] with the
//! seven standard fields, borrow a [`StatusRecorder`] from the pool, run the
//! router underneath it, then close the line with the recorded status code
//! and elapsed time and emit it. One request in, one structured line out —
//! whether the route matched or not.
//!
//! Seeded fields, in line order:
//!
//! | field            | value                                        |
//! |------------------|----------------------------------------------|
//! | `request_time`   | unix seconds at arrival                      |
//! | `request_id`     | eight lowercase hex characters               |
//! | `event`          | `"request"`                                  |
//! | `remote_addr`    | peer `ip:port`                               |
//! | `method`         | `"GET"`, `"POST"`, …                         |
//! | `url`            | path plus `?query` when present              |
//! | `content_length` | declared body bytes, `-1` if unknown         |
//!
//! Handler-added fields land between `content_length` and the closing
//! `code` / `tts_ns` pair.
//!
//! [`StatusRecorder`]: crate::recorder::StatusRecorder

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::error;

use crate::log::{emit, LogHandle, LogSink};
use crate::pool::RecorderPool;
use crate::request::Request;
use crate::router::Router;
use crate::sink::ResponseSink;

/// Serves one request with full logging, returning the response sink for
/// connection reuse. `None` means the connection is no longer usable: the
/// response failed to reach the peer.
///
/// A panic below this frame unwinds through it: the pooled recorder is still
/// released, and no `"request"` line is emitted — the recovery layer above
/// owns the failure event.
pub(crate) async fn serve_logged<S: ResponseSink>(
    router: &Router,
    pool: &RecorderPool<S>,
    out: &dyn LogSink,
    req: Request,
    sink: S,
) -> Option<S> {
    let start = Instant::now();
    let log = req.log().clone();
    seed(&log, &req);

    let mut rec = pool.acquire(sink);
    let response = router.dispatch(req).await;
    // A failed write still gets its line; the code is whatever the recorder
    // saw before the transport gave out.
    let delivered = match response.write_to(&mut *rec).await {
        Ok(()) => true,
        Err(e) => {
            error!("response write failed: {e}");
            false
        }
    };

    log.insert("code", i64::from(rec.status()));
    log.insert("tts_ns", elapsed_ms(start));
    emit(out, &log);

    let sink = rec.take_sink();
    drop(rec);
    if delivered { sink } else { None }
}

fn seed(log: &LogHandle, req: &Request) {
    log.insert("request_time", unix_now());
    log.insert("request_id", request_id());
    log.insert("event", "request");
    log.insert("remote_addr", req.remote_addr().to_string());
    log.insert("method", req.method().as_str());
    log.insert("url", req.url());
    log.insert("content_length", req.content_length());
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

/// Exactly eight lowercase hex characters: values are drawn below 10^9,
/// which fits in eight digits, and zero-padded up to eight.
fn request_id() -> String {
    format!("{:08x}", rand::rng().random_range(0..1_000_000_000_i64))
}

/// Elapsed wall time in whole milliseconds, truncated. The field is emitted
/// as `tts_ns`: the name has always been wrong and downstream log pipelines
/// key on it, so the name stays and the unit stays milliseconds.
fn elapsed_ms(start: Instant) -> i64 {
    (start.elapsed().as_nanos() / 1_000_000) as i64
}
