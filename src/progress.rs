//! Per-session progress log.
//!
//! Rasterisation workers, the periodic reporter and extraction workers all
//! append human-readable lines to a [`SessionLog`]; a poller reads the
//! current sequence at any time with [`ProgressTracker::snapshot`]. Reads
//! never drain the log. Nothing is trimmed or rotated; [`ProgressTracker::clear`]
//! is the only way lines disappear.
//!
//! # Example
//!
//! ```rust
//! use pdf2records::ProgressTracker;
//!
//! let tracker = ProgressTracker::new();
//! let log = tracker.session("session-1");
//! log.append("Starting conversion for report.pdf");
//! log.append("Converted page 1/3");
//!
//! let lines = tracker.snapshot("session-1");
//! assert_eq!(lines.len(), 2);
//! assert_eq!(lines[1].message, "Converted page 1/3");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

/// One timestamped line of a session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Registry of session logs.
///
/// Cheap to clone; clones share the same sessions.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    sessions: Arc<Mutex<HashMap<String, SessionLog>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for appending to `session_id`, creating the log on first use.
    pub fn session(&self, session_id: &str) -> SessionLog {
        lock(&self.sessions)
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Copy of the session's events in append order. Empty for unknown sessions.
    pub fn snapshot(&self, session_id: &str) -> Vec<ProgressEvent> {
        let log = lock(&self.sessions).get(session_id).cloned();
        log.map(|l| l.snapshot()).unwrap_or_default()
    }

    /// Drop one session's log.
    ///
    /// Handles obtained earlier keep appending to the detached log; the next
    /// [`session`](Self::session) call starts a fresh one.
    pub fn clear(&self, session_id: &str) {
        lock(&self.sessions).remove(session_id);
    }

    pub fn clear_all(&self) {
        lock(&self.sessions).clear();
    }
}

/// Append handle for one session. All clones append to the same sequence.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl SessionLog {
    /// A log not registered with any tracker.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn append(&self, message: impl Into<String>) {
        let message = message.into();
        let mut events = lock(&self.events);
        events.push(ProgressEvent {
            at: Utc::now(),
            message,
        });
    }

    pub fn snapshot(&self) -> Vec<ProgressEvent> {
        lock(&self.events).clone()
    }

    /// Events appended after the first `offset`, for incremental polling.
    pub fn since(&self, offset: usize) -> Vec<ProgressEvent> {
        let events = lock(&self.events);
        events.get(offset..).map(<[_]>::to_vec).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Completion reporter ──────────────────────────────────────────────────

/// Shared count of settled units, polled by [`spawn_reporter`].
#[derive(Debug, Clone, Default)]
pub(crate) struct CompletionCounter(Arc<AtomicUsize>);

impl CompletionCounter {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Token that counts its unit as settled when dropped, unwinding included.
    pub(crate) fn token(&self) -> CompletionToken {
        CompletionToken(Arc::clone(&self.0))
    }
}

pub(crate) struct CompletionToken(Arc<AtomicUsize>);

impl Drop for CompletionToken {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Append "`done`/`total` pages finished" every `interval` until the counter
/// reaches `total`.
///
/// The reporter only observes the counter; it is not part of the completion
/// barrier. `None` when there is nothing to report.
pub(crate) fn spawn_reporter(
    counter: CompletionCounter,
    total: usize,
    interval: Duration,
    log: SessionLog,
) -> Option<JoinHandle<()>> {
    if total == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let done = counter.get().min(total);
            log.append(format!("Progress: {done}/{total} pages finished"));
            if done >= total {
                break;
            }
        }
    }))
}

// A panicking appender must not wedge every other producer.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_does_not_drain() {
        let tracker = ProgressTracker::new();
        let log = tracker.session("s");
        log.append("one");
        assert_eq!(tracker.snapshot("s").len(), 1);
        assert_eq!(tracker.snapshot("s").len(), 1);
    }

    #[test]
    fn sessions_are_isolated() {
        let tracker = ProgressTracker::new();
        tracker.session("a").append("x");
        tracker.session("b").append("y");
        tracker.session("b").append("z");
        assert_eq!(tracker.snapshot("a").len(), 1);
        assert_eq!(tracker.snapshot("b").len(), 2);
        assert!(tracker.snapshot("missing").is_empty());
    }

    #[test]
    fn clear_removes_only_that_session() {
        let tracker = ProgressTracker::new();
        tracker.session("a").append("x");
        tracker.session("b").append("y");
        tracker.clear("a");
        assert!(tracker.snapshot("a").is_empty());
        assert_eq!(tracker.snapshot("b").len(), 1);
        tracker.clear_all();
        assert!(tracker.snapshot("b").is_empty());
    }

    #[test]
    fn since_returns_tail() {
        let log = SessionLog::detached();
        log.append("a");
        log.append("b");
        log.append("c");
        let tail: Vec<String> = log.since(1).into_iter().map(|e| e.message).collect();
        assert_eq!(tail, vec!["b", "c"]);
        assert!(log.since(10).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_stops_once_it_observes_total() {
        let log = SessionLog::detached();
        let counter = CompletionCounter::default();
        let reporter = spawn_reporter(counter.clone(), 2, Duration::from_millis(700), log.clone())
            .unwrap();

        let first = counter.token();
        tokio::time::sleep(Duration::from_millis(800)).await;
        drop(first);
        tokio::time::sleep(Duration::from_millis(700)).await;
        drop(counter.token());
        reporter.await.unwrap();

        let lines: Vec<String> = log.snapshot().into_iter().map(|e| e.message).collect();
        assert_eq!(
            lines,
            vec![
                "Progress: 0/2 pages finished",
                "Progress: 1/2 pages finished",
                "Progress: 2/2 pages finished",
            ]
        );
    }

    #[test]
    fn no_reporter_for_empty_work() {
        assert!(spawn_reporter(
            CompletionCounter::default(),
            0,
            Duration::from_millis(1),
            SessionLog::detached()
        )
        .is_none());
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let log = SessionLog::detached();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        log.append(format!("t{t} line {i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let events = log.snapshot();
        assert_eq!(events.len(), 800);
        for t in 0..8 {
            let own: Vec<&str> = events
                .iter()
                .map(|e| e.message.as_str())
                .filter(|m| m.starts_with(&format!("t{t} ")))
                .collect();
            assert_eq!(own.len(), 100);
            assert_eq!(own[99], format!("t{t} line 99"));
        }
    }
}
