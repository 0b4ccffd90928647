//! FIFO matchmaking for one game kind.
//!
//! A request first consumes a pending match, then tries to fill an open
//! session, then pairs with the longest-waiting identity, and only then
//! queues. The queued identity learns about its match on its next poll.

use crate::coordinator::Coordinator;
use crate::session::{Identity, SessionCode, SessionError};
use gambit_ai::Strategies;
use gambit_engine::Seat;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueueStatus {
    Matched {
        code: SessionCode,
        seat: &'static str,
    },
    Waiting {
        queue_position: usize,
    },
    /// Neither queued nor holding a pending match.
    Idle,
}

#[derive(Debug, Default)]
struct QueueState {
    waiting: VecDeque<Identity>,
    /// Matches made for identities that were queued at pairing time,
    /// handed out exactly once.
    pending: HashMap<String, (SessionCode, &'static str)>,
}

impl QueueState {
    fn position(&self, player_id: &str) -> Option<usize> {
        self.waiting
            .iter()
            .position(|queued| queued.id == player_id)
            .map(|index| index + 1)
    }
}

pub struct Matchmaker<R: Strategies> {
    coordinator: Coordinator<R>,
    state: Mutex<QueueState>,
}

impl<R: Strategies> Matchmaker<R> {
    pub fn new(coordinator: Coordinator<R>) -> Self {
        Self {
            coordinator,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Join the queue, or poll it when already queued.
    pub fn join(&self, identity: Identity) -> Result<QueueStatus, SessionError> {
        let mut state = self.state.lock().map_err(|_| SessionError::StoragePoisoned)?;

        if let Some((code, seat)) = state.pending.remove(&identity.id) {
            if self.coordinator.is_live(&code) {
                return Ok(QueueStatus::Matched { code, seat });
            }
            tracing::debug!(code = %code, player = %identity.id, "pending match already gone");
        }
        if let Some(queue_position) = state.position(&identity.id) {
            return Ok(QueueStatus::Waiting { queue_position });
        }

        if let Some(snapshot) = self.coordinator.join_open_session(&identity)? {
            let seat = snapshot
                .your_seat
                .ok_or_else(|| SessionError::Internal("joined session without a seat".into()))?;
            tracing::info!(code = %snapshot.code, player = %identity.id, "matchmaking filled open session");
            return Ok(QueueStatus::Matched {
                code: snapshot.code,
                seat,
            });
        }

        let Some(opponent) = state.waiting.pop_front() else {
            state.waiting.push_back(identity.clone());
            let queue_position = state.waiting.len();
            tracing::debug!(kind = %self.coordinator.kind(), player = %identity.id, queue_position, "queued for matchmaking");
            return Ok(QueueStatus::Waiting { queue_position });
        };

        let snapshot = match self.coordinator.create_paired(opponent.clone(), identity.clone()) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                state.waiting.push_front(opponent);
                return Err(err);
            }
        };
        let rules = self.coordinator.rules();
        state.pending.insert(
            opponent.id.clone(),
            (snapshot.code.clone(), rules.seat_label(Seat::First)),
        );
        self.coordinator.metrics().matchmaking_pairing();
        tracing::info!(
            code = %snapshot.code,
            first = %opponent.id,
            second = %identity.id,
            "matchmaking paired players"
        );
        Ok(QueueStatus::Matched {
            code: snapshot.code,
            seat: rules.seat_label(Seat::Second),
        })
    }

    /// Current standing without consuming a pending match. A pending match
    /// whose session has been torn down is forgotten.
    pub fn status(&self, player_id: &str) -> Result<QueueStatus, SessionError> {
        let mut state = self.state.lock().map_err(|_| SessionError::StoragePoisoned)?;
        if let Some((code, seat)) = state.pending.get(player_id).cloned() {
            if self.coordinator.is_live(&code) {
                return Ok(QueueStatus::Matched { code, seat });
            }
            state.pending.remove(player_id);
        }
        Ok(match state.position(player_id) {
            Some(queue_position) => QueueStatus::Waiting { queue_position },
            None => QueueStatus::Idle,
        })
    }

    /// Leave the queue. Returns whether anything was removed.
    pub fn leave(&self, player_id: &str) -> Result<bool, SessionError> {
        let mut state = self.state.lock().map_err(|_| SessionError::StoragePoisoned)?;
        let before = state.waiting.len();
        state.waiting.retain(|queued| queued.id != player_id);
        let dropped_pending = state.pending.remove(player_id).is_some();
        Ok(state.waiting.len() != before || dropped_pending)
    }

    /// Forget pending matches whose sessions no longer exist. Returns how many.
    pub fn prune_pending(&self) -> usize {
        let Ok(mut state) = self.state.lock() else {
            tracing::error!(kind = %self.coordinator.kind(), "matchmaking state poisoned");
            return 0;
        };
        let before = state.pending.len();
        state.pending.retain(|_, (code, _)| self.coordinator.is_live(code));
        let pruned = before - state.pending.len();
        if pruned > 0 {
            tracing::debug!(kind = %self.coordinator.kind(), pruned, "stale pending matches dropped");
        }
        pruned
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().map(|state| state.waiting.len()).unwrap_or(0)
    }
}
