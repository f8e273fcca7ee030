//! Recorder reuse pool.
//!
//! Allocating a [`StatusRecorder`] per request is cheap but pointless; the
//! pool keeps released instances around and hands them back to later
//! requests, in no particular order. Release does **not** reset state — the
//! next acquirer re-arms the instance, so a freshly acquired recorder never
//! shows another request's status or sink.
//!
//! [`RecorderPool::acquire`] returns a guard that releases on drop. Drop runs
//! on every exit path, panics included, so instances cannot leak out of the
//! pool and a recorder is never referenced after its request ends.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::recorder::StatusRecorder;
use crate::sink::ResponseSink;

/// Idle instances retained per pool; the rest are dropped on release.
const DEFAULT_MAX_IDLE: usize = 64;

/// A concurrency-safe bag of [`StatusRecorder`]s.
///
/// Safe to share across arbitrarily many request tasks; synchronization is
/// internal and the lock is never held across an `await`.
pub struct RecorderPool<S> {
    idle: Mutex<Vec<StatusRecorder<S>>>,
    max_idle: usize,
}

impl<S: ResponseSink> RecorderPool<S> {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(max_idle: usize) -> Self {
        Self { idle: Mutex::new(Vec::new()), max_idle }
    }

    /// Pops an idle recorder (or fabricates one), resets it, and attaches
    /// `sink`. The returned guard gives the recorder back on drop.
    pub fn acquire(&self, sink: S) -> PooledRecorder<'_, S> {
        let mut rec = self.lock().pop().unwrap_or_else(StatusRecorder::vacant);
        rec.reset(sink);
        PooledRecorder { rec: Some(rec), pool: self }
    }

    /// Idle instances currently retained.
    pub fn idle_count(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, mut rec: StatusRecorder<S>) {
        // A pooled recorder must never hold a live connection.
        drop(rec.take_sink());
        let mut idle = self.lock();
        if idle.len() < self.max_idle {
            idle.push(rec);
        }
    }

    #[cfg(test)]
    pub(crate) fn take_idle(&self) -> Option<StatusRecorder<S>> {
        self.lock().pop()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StatusRecorder<S>>> {
        // Recorders are plain state; a panic elsewhere cannot corrupt them.
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: ResponseSink> Default for RecorderPool<S> {
    fn default() -> Self {
        Self::new()
    }
}

// ── Guard ─────────────────────────────────────────────────────────────────────

/// Scoped ownership of a pooled recorder for one request.
///
/// Dereferences to the [`StatusRecorder`]; returns it to the pool when
/// dropped, on normal exit and during unwind alike. A sink still attached at
/// drop time is dropped with the guard.
pub struct PooledRecorder<'a, S: ResponseSink> {
    rec: Option<StatusRecorder<S>>,
    pool: &'a RecorderPool<S>,
}

impl<S: ResponseSink> Deref for PooledRecorder<'_, S> {
    type Target = StatusRecorder<S>;

    fn deref(&self) -> &Self::Target {
        // Some until Drop, which is the only taker.
        self.rec.as_ref().expect("recorder gone before drop")
    }
}

impl<S: ResponseSink> DerefMut for PooledRecorder<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.rec.as_mut().expect("recorder gone before drop")
    }
}

impl<S: ResponseSink> Drop for PooledRecorder<'_, S> {
    fn drop(&mut self) {
        if let Some(rec) = self.rec.take() {
            self.pool.release(rec);
        }
    }
}
