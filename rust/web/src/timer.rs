//! The single scheduled callback a session may have outstanding.
//!
//! A [`TimerSlot`] lives inside the session it guards, so holding the
//! session lock is enough to arm, cancel or claim. Arming always cancels
//! the previous timer first. A fired callback must [`TimerSlot::claim`] its
//! ticket under the session lock before acting; a ticket that no longer
//! matches the slot belongs to a timer that was cancelled or replaced
//! after it woke up, and the callback does nothing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Per-turn clock of an alternating game.
    Turn,
    /// Per-round clock of a simultaneous game.
    Round,
    /// Disconnect grace period.
    Abandonment,
    /// Delay before a bot seat acts.
    Bot,
}

/// Identifies one arming of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTicket {
    pub id: u64,
    pub kind: TimerKind,
    /// Turn number the timer was armed for.
    pub turn: u32,
}

#[derive(Debug)]
struct ActiveTimer {
    ticket: TimerTicket,
    deadline: Instant,
    deadline_at: DateTime<Utc>,
    handle: AbortHandle,
}

#[derive(Debug, Default)]
pub struct TimerSlot {
    active: Option<ActiveTimer>,
    next_id: u64,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel whatever is outstanding and schedule `on_fire` to run after
    /// `after`. Returns the wall-clock deadline, or `None` when no runtime
    /// is available to schedule on.
    pub fn arm<F, Fut>(
        &mut self,
        kind: TimerKind,
        turn: u32,
        after: Duration,
        on_fire: F,
    ) -> Option<DateTime<Utc>>
    where
        F: FnOnce(TimerTicket) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(error = %err, ?kind, "cannot arm timer outside a tokio runtime");
                debug_assert!(false, "timer armed outside a tokio runtime");
                return None;
            }
        };

        self.next_id += 1;
        let ticket = TimerTicket {
            id: self.next_id,
            kind,
            turn,
        };
        let deadline = Instant::now() + after;
        let deadline_at =
            Utc::now() + chrono::Duration::from_std(after).unwrap_or_else(|_| chrono::Duration::zero());
        let fire = on_fire(ticket);
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            fire.await;
        });

        self.active = Some(ActiveTimer {
            ticket,
            deadline,
            deadline_at,
            handle: task.abort_handle(),
        });
        Some(deadline_at)
    }

    /// Abort the outstanding timer, if any. A cancelled timer never runs its
    /// callback unless it had already woken up, in which case its claim fails.
    pub fn cancel(&mut self) -> Option<TimerTicket> {
        let active = self.active.take()?;
        active.handle.abort();
        tracing::trace!(timer_id = active.ticket.id, kind = ?active.ticket.kind, "timer cancelled");
        Some(active.ticket)
    }

    /// Consume the slot on behalf of a fired timer. Returns `false` when
    /// `ticket` is no longer the outstanding timer.
    pub fn claim(&mut self, ticket: &TimerTicket) -> bool {
        match &self.active {
            Some(active) if active.ticket == *ticket => {
                self.active = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.active.is_some()
    }

    pub fn kind(&self) -> Option<TimerKind> {
        self.active.as_ref().map(|active| active.ticket.kind)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|active| active.deadline)
    }

    pub fn deadline_at(&self) -> Option<DateTime<Utc>> {
        self.active.as_ref().map(|active| active.deadline_at)
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
