//! Lobby-wide counters behind `GET /api/metrics`.
//!
//! One collector is shared by every game kind's coordinator and by the
//! request-logging filter. All counters are relaxed atomics; a snapshot is
//! a best-effort reading, not a consistent cut.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counter(AtomicU64);

impl Counter {
    fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn add(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Relaxed);
    }

    /// Saturates at zero; `None` when already there.
    fn drop_one(&self) -> Option<u64> {
        self.0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .ok()
            .map(|previous| previous - 1)
    }

    fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
struct Http {
    requests: Counter,
    failures: Counter,
    elapsed_ms: Counter,
}

#[derive(Debug, Default)]
struct Sessions {
    created: Counter,
    live: Counter,
}

#[derive(Debug, Default)]
struct Play {
    actions: Counter,
    timeout_fallbacks: Counter,
    stale_timers: Counter,
    broadcasts: Counter,
    pairings: Counter,
}

#[derive(Debug, Default)]
struct Counters {
    http: Http,
    sessions: Sessions,
    play: Play,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    counters: Arc<Counters>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// `success` is false only for 5xx responses.
    pub fn record_request(&self, elapsed_ms: u64, success: bool) {
        let http = &self.counters.http;
        http.requests.bump();
        http.elapsed_ms.add(elapsed_ms);
        if !success {
            http.failures.bump();
        }
    }

    pub fn session_created(&self) {
        let sessions = &self.counters.sessions;
        sessions.created.bump();
        let live = sessions.live.bump();
        tracing::debug!(active_sessions = live, "session registered");
    }

    pub fn session_removed(&self) {
        match self.counters.sessions.live.drop_one() {
            Some(live) => tracing::debug!(active_sessions = live, "session unregistered"),
            None => tracing::warn!("session removed while none were registered"),
        }
    }

    pub fn action_committed(&self) {
        self.counters.play.actions.bump();
    }

    /// A turn timer expired and a fallback action was applied for the seat.
    pub fn timeout_fallback(&self) {
        self.counters.play.timeout_fallbacks.bump();
    }

    /// A timer fired for a turn that had already moved on.
    pub fn stale_timer(&self) {
        self.counters.play.stale_timers.bump();
    }

    pub fn event_broadcast(&self) {
        self.counters.play.broadcasts.bump();
    }

    pub fn matchmaking_pairing(&self) {
        self.counters.play.pairings.bump();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let Counters {
            http,
            sessions,
            play,
        } = &*self.counters;
        let total_requests = http.requests.read();
        MetricsSnapshot {
            total_requests,
            failed_requests: http.failures.read(),
            avg_response_time_ms: http.elapsed_ms.read().checked_div(total_requests).unwrap_or(0),
            sessions_created: sessions.created.read(),
            active_sessions: sessions.live.read(),
            actions_committed: play.actions.read(),
            timeout_fallbacks: play.timeout_fallbacks.read(),
            stale_timers: play.stale_timers.read(),
            events_broadcast: play.broadcasts.read(),
            matchmaking_pairings: play.pairings.read(),
        }
    }

    /// Periodic summary line written by the server's reporting task.
    pub fn log_metrics(&self) {
        let s = self.snapshot();
        tracing::info!(
            requests = s.total_requests,
            failed = s.failed_requests,
            avg_ms = s.avg_response_time_ms,
            sessions = s.active_sessions,
            actions = s.actions_committed,
            fallbacks = s.timeout_fallbacks,
            pairings = s.matchmaking_pairings,
            "lobby metrics"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub avg_response_time_ms: u64,
    pub sessions_created: u64,
    pub active_sessions: u64,
    pub actions_committed: u64,
    pub timeout_fallbacks: u64,
    pub stale_timers: u64,
    pub events_broadcast: u64,
    pub matchmaking_pairings: u64,
}
