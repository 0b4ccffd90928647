//! The session coordinator: every state transition of every live session
//! of one game kind goes through here.
//!
//! Each operation resolves the session from the registry, takes the
//! session lock, checks its guards, mutates, publishes the resulting room
//! events and re-arms or cancels the session timer, all before the lock is
//! released. Publishing under the lock keeps room events in commit order.
//! Timer callbacks hold only a weak handle and the session code, and must
//! claim their ticket under the lock before acting.

use crate::autoplay;
use crate::events::{EventBus, RoomEvent};
use crate::history::{HistoryStore, MatchRecord, SeatRecord};
use crate::metrics::MetricsCollector;
use crate::registry::SessionRegistry;
use crate::session::{
    GameResult, Identity, Observer, Participant, Phase, PlayerView, Session, SessionCode,
    SessionError, SessionInner, SessionSummary, SnapshotView,
};
use crate::settings::{AppSettings, SettingsStore, TimeoutPolicy};
use crate::timer::{TimerKind, TimerTicket};
use chrono::{DateTime, Utc};
use gambit_ai::Strategies;
use gambit_engine::{EndReason, GameKind, GameRules, Seat, Terminal};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

const CHAT_MAX_CHARS: usize = 500;
const MAX_BOT_DELAY_MS: u64 = 60_000;

/// Shared services a coordinator publishes to and reads from.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorDeps {
    pub bus: EventBus,
    pub history: Arc<HistoryStore>,
    pub settings: Arc<SettingsStore>,
    pub metrics: MetricsCollector,
    /// Makes session codes, seat draws and automatic play reproducible.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateOptions {
    /// Seat label for the host, or `"random"`; defaults to the first seat.
    #[serde(default)]
    pub seat: Option<String>,
    /// Strategy name of a bot filling the other seat.
    #[serde(default)]
    pub opponent: Option<String>,
}

/// A bot-vs-bot session for spectators.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BattleOptions {
    /// Strategy of the first seat; random when absent.
    #[serde(default)]
    pub first: Option<String>,
    #[serde(default)]
    pub second: Option<String>,
    /// Pause before each bot move; defaults to `bot_move_delay_ms`.
    #[serde(default)]
    pub move_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    Win,
    Draw,
}

pub struct Coordinator<R: Strategies> {
    inner: Arc<CoordinatorInner<R>>,
}

impl<R: Strategies> Clone for Coordinator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CoordinatorInner<R: Strategies> {
    rules: R,
    registry: SessionRegistry<R>,
    deps: CoordinatorDeps,
    sessions_started: AtomicU64,
}

impl<R: Strategies> Coordinator<R> {
    pub fn new(rules: R, deps: CoordinatorDeps) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                registry: SessionRegistry::new(deps.seed.map(|seed| seed ^ kind_salt(rules.kind()))),
                rules,
                deps,
                sessions_started: AtomicU64::new(0),
            }),
        }
    }

    pub fn rules(&self) -> &R {
        &self.inner.rules
    }

    pub fn kind(&self) -> GameKind {
        self.inner.rules.kind()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.deps.bus
    }

    pub fn registry(&self) -> &SessionRegistry<R> {
        &self.inner.registry
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.inner.deps.history
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.inner.deps.metrics
    }

    /// Open a new session with `host` seated. With an `opponent` strategy the
    /// other seat is filled by a bot and the match starts right away.
    pub fn create_session(
        &self,
        host: Identity,
        options: CreateOptions,
    ) -> Result<SnapshotView, SessionError> {
        let mut rng = self.session_rng();
        let seat = match options.seat.as_deref() {
            None => Seat::First,
            Some(label) if label.eq_ignore_ascii_case("random") => {
                if rng.random_bool(0.5) {
                    Seat::First
                } else {
                    Seat::Second
                }
            }
            Some(label) => self
                .rules()
                .seat_from_label(label)
                .ok_or_else(|| SessionError::seat_unavailable(format!("unknown seat: {label}")))?,
        };
        let opponent = options.opponent.as_deref().map(bot_strategy::<R>);

        let session = self.inner.registry.create(|code| {
            let mut inner = SessionInner::new(host.clone(), self.rules().initial_state(), rng);
            inner.seats[seat.index()] = Some(Participant::human(host.clone()));
            if let Some(strategy) = &opponent {
                inner.seats[seat.other().index()] = Some(Participant::bot(strategy));
            }
            Session::new(code, self.kind(), inner)
        })?;
        self.metrics().session_created();
        tracing::info!(
            code = %session.code,
            kind = %self.kind(),
            host = %host.id,
            seat = self.rules().seat_label(seat),
            opponent = ?opponent,
            "session created"
        );

        let mut guard = session.lock()?;
        let inner = &mut *guard;
        self.publish(
            &session.code,
            RoomEvent::ParticipantJoined {
                code: session.code.clone(),
                seat: Some(self.rules().seat_label(seat)),
                player: PlayerView::from(&host),
            },
        );
        if inner.is_full() {
            self.activate(&session, inner);
        }
        Ok(session.snapshot(inner, self.rules(), Some(&host.id)))
    }

    /// Session for a matchmaking pair, both seats filled and started.
    pub fn create_paired(&self, first: Identity, second: Identity) -> Result<SnapshotView, SessionError> {
        let rng = self.session_rng();
        let session = self.inner.registry.create(|code| {
            let mut inner = SessionInner::new(first.clone(), self.rules().initial_state(), rng);
            inner.seats[Seat::First.index()] = Some(Participant::human(first.clone()));
            inner.seats[Seat::Second.index()] = Some(Participant::human(second.clone()));
            Session::new(code, self.kind(), inner)
        })?;
        self.metrics().session_created();
        tracing::info!(
            code = %session.code,
            kind = %self.kind(),
            first = %first.id,
            second = %second.id,
            "paired session created"
        );

        let mut guard = session.lock()?;
        let inner = &mut *guard;
        self.activate(&session, inner);
        Ok(session.snapshot(inner, self.rules(), Some(&second.id)))
    }

    /// Start a match between two bots. `host` is not seated but may stop it.
    pub fn create_battle(&self, host: Identity, options: BattleOptions) -> Result<SnapshotView, SessionError> {
        let strategies = [
            bot_strategy::<R>(options.first.as_deref().unwrap_or("random")),
            bot_strategy::<R>(options.second.as_deref().unwrap_or("random")),
        ];
        let delay = options
            .move_delay_ms
            .map(|ms| Duration::from_millis(ms.min(MAX_BOT_DELAY_MS)));
        let rng = self.session_rng();
        let session = self.inner.registry.create(|code| {
            let mut inner = SessionInner::new(host.clone(), self.rules().initial_state(), rng);
            for seat in Seat::ALL {
                inner.seats[seat.index()] = Some(Participant::bot(&strategies[seat.index()]));
            }
            inner.battle = true;
            inner.bot_delay = delay;
            Session::new(code, self.kind(), inner)
        })?;
        self.metrics().session_created();
        tracing::info!(
            code = %session.code,
            kind = %self.kind(),
            host = %host.id,
            first = %strategies[0],
            second = %strategies[1],
            "bot battle created"
        );

        let mut guard = session.lock()?;
        let inner = &mut *guard;
        self.activate(&session, inner);
        Ok(session.snapshot(inner, self.rules(), Some(&host.id)))
    }

    pub fn list_battles(&self) -> Vec<SessionSummary> {
        self.list_sessions()
            .into_iter()
            .filter(|summary| summary.battle)
            .collect()
    }

    pub fn is_battle(&self, code: &str) -> Result<bool, SessionError> {
        let session = self.live_session(code)?;
        let inner = session.lock()?;
        ensure_live(&session, &inner)?;
        Ok(inner.battle)
    }

    /// Tear a bot battle down at any point. Only its creator may.
    pub fn stop_battle(&self, code: &str, player_id: &str) -> Result<(), SessionError> {
        let session = self.live_session(code)?;
        let mut guard = session.lock()?;
        let inner = &mut *guard;
        ensure_live(&session, inner)?;
        if !inner.battle {
            return Err(SessionError::invalid_phase("not a bot battle"));
        }
        if inner.host.id != player_id {
            return Err(SessionError::wrong_participant("only the creator can stop a battle"));
        }
        self.teardown(&session, inner, "stopped")
    }

    /// Seat a bot in the open seat of a waiting session; the caller must
    /// already be seated there. Fills the session, so the match starts.
    pub fn add_bot(
        &self,
        code: &str,
        player_id: &str,
        strategy: Option<&str>,
    ) -> Result<SnapshotView, SessionError> {
        let session = self.live_session(code)?;
        let mut guard = session.lock()?;
        let inner = &mut *guard;
        ensure_live(&session, inner)?;
        seated(inner, player_id)?;
        if inner.phase != Phase::Waiting {
            return Err(SessionError::invalid_phase(format!(
                "a bot can only join a waiting session, not one that is {}",
                inner.phase.name()
            )));
        }
        let seat = *inner
            .open_seats()
            .first()
            .ok_or_else(|| SessionError::seat_unavailable("no open seat"))?;

        let bot = Participant::bot(&bot_strategy::<R>(strategy.unwrap_or("random")));
        let player = bot.view();
        tracing::info!(
            code = %session.code,
            seat = self.rules().seat_label(seat),
            bot = %player.id,
            "bot seated"
        );
        inner.seats[seat.index()] = Some(bot);
        inner.touch();
        self.publish(
            &session.code,
            RoomEvent::ParticipantJoined {
                code: session.code.clone(),
                seat: Some(self.rules().seat_label(seat)),
                player,
            },
        );
        if inner.is_full() {
            self.activate(&session, inner);
        }
        self.publish(
            &session.code,
            RoomEvent::SessionSnapshot {
                code: session.code.clone(),
                snapshot: Box::new(session.snapshot(inner, self.rules(), None)),
            },
        );
        Ok(session.snapshot(inner, self.rules(), Some(player_id)))
    }

    /// Whether `code` still names a session that has not been torn down.
    pub fn is_live(&self, code: &str) -> bool {
        let Ok(session) = self.live_session(code) else {
            return false;
        };
        let live = match session.lock() {
            Ok(inner) => !inner.torn_down,
            Err(_) => false,
        };
        live
    }

    /// Seat `identity` in an open session it does not already belong to.
    /// Returns `None` when no such session exists.
    pub fn join_open_session(&self, identity: &Identity) -> Result<Option<SnapshotView>, SessionError> {
        for session in self.inner.registry.list() {
            let candidate = {
                let inner = session.lock()?;
                !inner.torn_down
                    && inner.phase == Phase::Waiting
                    && inner.open_seats().len() == 1
                    && inner.seat_of(&identity.id).is_none()
            };
            if !candidate {
                continue;
            }
            match self.take_seat(&session.code, identity.clone(), None) {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(SessionError::SeatUnavailable(_)) | Err(SessionError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// A connection for `identity` entered the room. Seated participants are
    /// marked connected again; anyone else becomes an observer.
    pub fn join_room(&self, code: &str, identity: &Identity) -> Result<SnapshotView, SessionError> {
        let session = self.live_session(code)?;
        let mut guard = session.lock()?;
        let inner = &mut *guard;
        ensure_live(&session, inner)?;

        if let Some(seat) = inner.seat_of(&identity.id) {
            let label = self.rules().seat_label(seat);
            let reconnected = match inner.participant_mut(seat) {
                Some(participant) => {
                    participant.connections += 1;
                    let was_disconnected = !participant.connected;
                    participant.mark_connected();
                    was_disconnected.then(|| participant.view())
                }
                None => None,
            };
            if let Some(player) = reconnected {
                tracing::info!(code = %session.code, seat = label, "participant reconnected");
                self.publish(
                    &session.code,
                    RoomEvent::ParticipantReconnected {
                        code: session.code.clone(),
                        seat: label,
                        player,
                    },
                );
                if inner.timer.kind() == Some(TimerKind::Abandonment) {
                    inner.timer.cancel();
                }
                self.arm_abandonment(&session, inner);
            }
        } else {
            let observer = inner
                .observers
                .entry(identity.id.clone())
                .or_insert_with(|| Observer {
                    identity: identity.clone(),
                    connections: 0,
                });
            observer.connections += 1;
            if observer.connections == 1 {
                self.publish(
                    &session.code,
                    RoomEvent::ParticipantJoined {
                        code: session.code.clone(),
                        seat: None,
                        player: PlayerView::from(identity),
                    },
                );
            }
        }
        inner.touch();
        Ok(session.snapshot(inner, self.rules(), Some(&identity.id)))
    }

    /// A connection of `player_id` left the room. The last connection of a
    /// seated participant marks the seat disconnected.
    pub fn leave_room(&self, code: &str, player_id: &str) -> Result<(), SessionError> {
        let session = self.live_session(code)?;
        let mut guard = session.lock()?;
        let inner = &mut *guard;
        if inner.torn_down {
            return Ok(());
        }

        if let Some(seat) = inner.seat_of(player_id) {
            let label = self.rules().seat_label(seat);
            let dropped = match inner.participant_mut(seat) {
                Some(participant) if !participant.is_bot() => {
                    participant.connections = participant.connections.saturating_sub(1);
                    if participant.connections == 0 && participant.connected {
                        participant.mark_disconnected();
                        Some((participant.view(), participant.disconnected_at.unwrap_or_else(Utc::now)))
                    } else {
                        None
                    }
                }
                _ => None,
            };
            if let Some((player, at)) = dropped {
                tracing::info!(code = %session.code, seat = label, "participant disconnected");
                self.publish(
                    &session.code,
                    RoomEvent::ParticipantDisconnected {
                        code: session.code.clone(),
                        seat: label,
                        player,
                        at,
                    },
                );
                self.arm_abandonment(&session, inner);
            }
        } else if let Some(observer) = inner.observers.get_mut(player_id) {
            observer.connections = observer.connections.saturating_sub(1);
            if observer.connections == 0 {
                if let Some(observer) = inner.observers.remove(player_id) {
                    self.publish(
                        &session.code,
                        RoomEvent::ObserverLeft {
                            code: session.code.clone(),
                            player: PlayerView::from(&observer.identity),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Occupy `requested` (a seat label) or the first open seat. Filling the
    /// last open seat starts the match.
    pub fn take_seat(
        &self,
        code: &str,
        identity: Identity,
        requested: Option<&str>,
    ) -> Result<SnapshotView, SessionError> {
        let session = self.live_session(code)?;
        let mut guard = session.lock()?;
        let inner = &mut *guard;
        ensure_live(&session, inner)?;
        if inner.phase.is_terminal() {
            return Err(SessionError::seat_unavailable("session has finished"));
        }

        let requested = match requested {
            Some(label) => Some(self.rules().seat_from_label(label).ok_or_else(|| {
                SessionError::seat_unavailable(format!("unknown seat: {label}"))
            })?),
            None => None,
        };

        if let Some(current) = inner.seat_of(&identity.id) {
            if requested.map_or(true, |seat| seat == current) {
                return Ok(session.snapshot(inner, self.rules(), Some(&identity.id)));
            }
            return Err(SessionError::seat_unavailable("already seated"));
        }

        let seat = match requested {
            Some(seat) if inner.participant(seat).is_none() => seat,
            Some(seat) => {
                return Err(SessionError::seat_unavailable(format!(
                    "seat {} is taken",
                    self.rules().seat_label(seat)
                )))
            }
            None => *inner
                .open_seats()
                .first()
                .ok_or_else(|| SessionError::seat_unavailable("no open seat"))?,
        };

        let mut participant = Participant::human(identity.clone());
        if let Some(observer) = inner.observers.remove(&identity.id) {
            participant.connections = observer.connections;
        }
        inner.seats[seat.index()] = Some(participant);
        inner.touch();
        tracing::info!(
            code = %session.code,
            player = %identity.id,
            seat = self.rules().seat_label(seat),
            "participant seated"
        );
        self.publish(
            &session.code,
            RoomEvent::ParticipantJoined {
                code: session.code.clone(),
                seat: Some(self.rules().seat_label(seat)),
                player: PlayerView::from(&identity),
            },
        );

        if inner.is_full() && inner.phase == Phase::Waiting {
            self.activate(&session, inner);
        }
        self.publish(
            &session.code,
            RoomEvent::SessionSnapshot {
                code: session.code.clone(),
                snapshot: Box::new(session.snapshot(inner, self.rules(), None)),
            },
        );
        Ok(session.snapshot(inner, self.rules(), Some(&identity.id)))
    }

    pub fn submit_action(
        &self,
        code: &str,
        player_id: &str,
        action: R::Action,
    ) -> Result<SnapshotView, SessionError> {
        let session = self.live_session(code)?;
        let mut guard = session.lock()?;
        let inner = &mut *guard;
        ensure_live(&session, inner)?;
        let seat = seated(inner, player_id)?;
        if inner.phase != Phase::Active {
            return Err(SessionError::invalid_phase(format!(
                "actions are not accepted while the session is {}",
                inner.phase.name()
            )));
        }

        self.commit(&session, inner, seat, action, false)?;
        Ok(session.snapshot(inner, self.rules(), Some(player_id)))
    }

    pub fn resign(&self, code: &str, player_id: &str) -> Result<SnapshotView, SessionError> {
        let session = self.live_session(code)?;
        let mut guard = session.lock()?;
        let inner = &mut *guard;
        ensure_live(&session, inner)?;
        let seat = seated(inner, player_id)?;
        require_active(inner, "resign")?;

        self.finish(&session, inner, Terminal::win(seat.other(), EndReason::Resignation));
        Ok(session.snapshot(inner, self.rules(), Some(player_id)))
    }

    /// Offer a draw. Offering while the opponent's offer is pending accepts it.
    pub fn offer_draw(&self, code: &str, player_id: &str) -> Result<SnapshotView, SessionError> {
        let session = self.live_session(code)?;
        let mut guard = session.lock()?;
        let inner = &mut *guard;
        ensure_live(&session, inner)?;
        let seat = seated(inner, player_id)?;
        require_active(inner, "offer a draw")?;

        match inner.draw_offer {
            Some(pending) if pending == seat.other() => {
                self.finish(&session, inner, Terminal::draw(EndReason::DrawAgreement));
            }
            Some(_) => {}
            None => {
                inner.draw_offer = Some(seat);
                inner.touch();
                self.publish(
                    &session.code,
                    RoomEvent::DrawOffered {
                        code: session.code.clone(),
                        seat: self.rules().seat_label(seat),
                    },
                );
            }
        }
        Ok(session.snapshot(inner, self.rules(), Some(player_id)))
    }

    pub fn respond_draw(
        &self,
        code: &str,
        player_id: &str,
        accept: bool,
    ) -> Result<SnapshotView, SessionError> {
        let session = self.live_session(code)?;
        let mut guard = session.lock()?;
        let inner = &mut *guard;
        ensure_live(&session, inner)?;
        let seat = seated(inner, player_id)?;
        require_active(inner, "answer a draw offer")?;

        match inner.draw_offer {
            None => return Err(SessionError::invalid_phase("no draw offer is pending")),
            Some(offered_by) if offered_by == seat => {
                return Err(SessionError::wrong_participant(
                    "the draw offer must be answered by the opponent",
                ))
            }
            Some(_) if accept => {
                self.finish(&session, inner, Terminal::draw(EndReason::DrawAgreement));
            }
            Some(_) => {
                inner.draw_offer = None;
                inner.touch();
                self.publish(
                    &session.code,
                    RoomEvent::DrawDeclined {
                        code: session.code.clone(),
                        seat: self.rules().seat_label(seat),
                    },
                );
            }
        }
        Ok(session.snapshot(inner, self.rules(), Some(player_id)))
    }

    /// Claim a result against an opponent whose connection has been gone for
    /// at least the abandonment grace period.
    pub fn claim_abandonment(
        &self,
        code: &str,
        player_id: &str,
        outcome: ClaimOutcome,
    ) -> Result<SnapshotView, SessionError> {
        let session = self.live_session(code)?;
        let mut guard = session.lock()?;
        let inner = &mut *guard;
        ensure_live(&session, inner)?;
        let seat = seated(inner, player_id)?;
        require_active(inner, "claim abandonment")?;

        if !inner.participant(seat).is_some_and(|p| p.connected) {
            return Err(SessionError::invalid_phase("only a connected participant may claim"));
        }
        let grace = self.grace_period();
        let gone_since = inner
            .participant(seat.other())
            .filter(|opponent| !opponent.connected)
            .and_then(|opponent| opponent.disconnected_since)
            .ok_or_else(|| SessionError::invalid_phase("opponent is connected"))?;
        if gone_since.elapsed() < grace {
            return Err(SessionError::invalid_phase(
                "opponent is still within the reconnect grace period",
            ));
        }

        let terminal = match outcome {
            ClaimOutcome::Win => Terminal::win(seat, EndReason::Abandoned),
            ClaimOutcome::Draw => Terminal::draw(EndReason::Abandoned),
        };
        self.finish(&session, inner, terminal);
        Ok(session.snapshot(inner, self.rules(), Some(player_id)))
    }

    /// Start a fresh match under the same code and seats.
    pub fn continue_session(&self, code: &str, player_id: &str) -> Result<SnapshotView, SessionError> {
        let session = self.live_session(code)?;
        let mut guard = session.lock()?;
        let inner = &mut *guard;
        ensure_live(&session, inner)?;
        seated(inner, player_id)?;
        if !inner.phase.is_terminal() {
            return Err(SessionError::invalid_phase("the current match is not finished"));
        }

        inner.timer.cancel();
        inner.state = self.rules().initial_state();
        inner.draw_offer = None;
        inner.match_number += 1;
        inner.phase = Phase::Waiting;
        inner.touch();
        tracing::info!(code = %session.code, match_number = inner.match_number, "session reset");
        self.publish(
            &session.code,
            RoomEvent::SessionReset {
                code: session.code.clone(),
                match_number: inner.match_number,
            },
        );
        if inner.is_full() {
            self.activate(&session, inner);
        }
        self.publish(
            &session.code,
            RoomEvent::SessionSnapshot {
                code: session.code.clone(),
                snapshot: Box::new(session.snapshot(inner, self.rules(), None)),
            },
        );
        Ok(session.snapshot(inner, self.rules(), Some(player_id)))
    }

    /// Tear a finished session down.
    pub fn end_session(&self, code: &str, player_id: &str) -> Result<(), SessionError> {
        let session = self.live_session(code)?;
        let mut guard = session.lock()?;
        let inner = &mut *guard;
        ensure_live(&session, inner)?;
        seated(inner, player_id)?;
        if !inner.phase.is_terminal() {
            return Err(SessionError::invalid_phase("only a finished session can be ended"));
        }
        self.teardown(&session, inner, "ended")
    }

    pub fn chat(&self, code: &str, player_id: &str, message: &str) -> Result<(), SessionError> {
        let message = message.trim();
        let length = message.chars().count();
        if length == 0 || length > CHAT_MAX_CHARS {
            return Err(SessionError::IllegalAction(format!(
                "chat messages must be 1-{CHAT_MAX_CHARS} characters"
            )));
        }

        let session = self.live_session(code)?;
        let mut guard = session.lock()?;
        let inner = &mut *guard;
        ensure_live(&session, inner)?;
        let player = match inner.seat_of(player_id) {
            Some(seat) => inner.participant(seat).map(Participant::view),
            None => inner
                .observers
                .get(player_id)
                .map(|observer| PlayerView::from(&observer.identity)),
        }
        .ok_or_else(|| SessionError::wrong_participant("only room members can chat"))?;

        self.publish(
            &session.code,
            RoomEvent::Chat {
                code: session.code.clone(),
                player,
                message: message.to_string(),
                at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn snapshot(&self, code: &str, viewer: Option<&str>) -> Result<SnapshotView, SessionError> {
        let session = self.live_session(code)?;
        let inner = session.lock()?;
        ensure_live(&session, &inner)?;
        Ok(session.snapshot(&inner, self.rules(), viewer))
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.inner
            .registry
            .list()
            .into_iter()
            .filter_map(|session| {
                let inner = session.lock().ok()?;
                (!inner.torn_down).then(|| session.summary(&inner, self.rules()))
            })
            .collect()
    }

    /// Tear down every session idle for at least `idle`. Returns how many.
    pub fn sweep_expired(&self, idle: Duration) -> usize {
        let mut removed = 0;
        for session in self.inner.registry.list() {
            let mut guard = match session.lock() {
                Ok(guard) => guard,
                Err(err) => {
                    tracing::error!(code = %session.code, error = %err, "skipping poisoned session");
                    continue;
                }
            };
            let inner = &mut *guard;
            if inner.torn_down || inner.last_active.elapsed() < idle {
                continue;
            }
            if self.teardown(&session, inner, "expired").is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(kind = %self.kind(), removed, "expired sessions swept");
        }
        removed
    }

    fn live_session(&self, code: &str) -> Result<Arc<Session<R>>, SessionError> {
        self.inner.registry.get(code)
    }

    fn settings(&self) -> AppSettings {
        self.inner.deps.settings.get().unwrap_or_else(|err| {
            tracing::error!(error = %err, "settings unavailable, using defaults");
            AppSettings::default()
        })
    }

    fn grace_period(&self) -> Duration {
        Duration::from_secs(self.settings().abandon_grace_seconds)
    }

    fn session_rng(&self) -> ChaCha8Rng {
        let n = self.inner.sessions_started.fetch_add(1, Ordering::Relaxed);
        match self.inner.deps.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed ^ kind_salt(self.kind()) ^ n.rotate_left(17)),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        }
    }

    fn publish(&self, code: &str, event: RoomEvent) {
        self.inner.deps.metrics.event_broadcast();
        self.inner.deps.bus.publish(code, event);
    }

    fn activate(&self, session: &Arc<Session<R>>, inner: &mut SessionInner<R>) {
        inner.phase = Phase::Active;
        inner.started_at = Utc::now();
        tracing::info!(code = %session.code, match_number = inner.match_number, "session active");
        self.start_turn(session, inner);
    }

    /// Apply `action` for `seat` and run everything that follows from it.
    /// Nothing is mutated unless the action is accepted.
    fn commit(
        &self,
        session: &Arc<Session<R>>,
        inner: &mut SessionInner<R>,
        seat: Seat,
        action: R::Action,
        automatic: bool,
    ) -> Result<(), SessionError> {
        let rules = self.rules();
        let before = rules.turn(&inner.state);
        if !before.is_awaiting(seat) {
            return Err(SessionError::NotYourTurn);
        }
        let (state, effect) = rules.apply_action(&inner.state, seat, &action)?;
        let terminal = rules.is_terminal(&state);
        let advanced = rules.turn(&state).number != before.number;
        if terminal.is_some() || advanced {
            inner.timer.cancel();
        }

        inner.state = state;
        inner.draw_offer = None;
        inner.touch();
        self.inner.deps.metrics.action_committed();
        tracing::debug!(
            code = %session.code,
            seat = rules.seat_label(seat),
            turn = before.number,
            automatic,
            "action committed"
        );
        let effect = serde_json::to_value(&effect).unwrap_or_else(|err| {
            tracing::error!(code = %session.code, error = %err, "failed to serialize action effect");
            serde_json::Value::Null
        });
        self.publish(
            &session.code,
            RoomEvent::ActionApplied {
                code: session.code.clone(),
                seat: rules.seat_label(seat),
                turn: before.number,
                effect,
                automatic,
            },
        );

        if let Some(terminal) = terminal {
            self.finish(session, inner, terminal);
        } else if advanced {
            self.start_turn(session, inner);
        }
        Ok(())
    }

    /// Arm the clock for the turn that just opened and announce it.
    fn start_turn(&self, session: &Arc<Session<R>>, inner: &mut SessionInner<R>) {
        let turn = self.rules().turn(&inner.state);
        let settings = self.settings();
        let game = settings.game(self.kind());
        let all_bots = !turn.awaiting.is_empty() && turn.awaiting.iter().all(|seat| inner.is_bot(*seat));

        let deadline = if all_bots {
            let delay = inner
                .bot_delay
                .unwrap_or_else(|| Duration::from_millis(settings.bot_move_delay_ms));
            self.arm(session, inner, TimerKind::Bot, turn.number, delay)
        } else if game.turn_seconds > 0 {
            let kind = if self.kind().is_simultaneous() {
                TimerKind::Round
            } else {
                TimerKind::Turn
            };
            self.arm(session, inner, kind, turn.number, Duration::from_secs(game.turn_seconds))
        } else {
            inner.timer.cancel();
            self.arm_abandonment(session, inner);
            None
        };

        self.publish(
            &session.code,
            RoomEvent::PhaseChanged {
                code: session.code.clone(),
                phase: inner.phase.name(),
                turn: turn.number,
                awaiting: turn
                    .awaiting
                    .iter()
                    .map(|seat| self.rules().seat_label(*seat))
                    .collect(),
                deadline,
            },
        );

        if !all_bots {
            let bots: Vec<Seat> = turn
                .awaiting
                .iter()
                .copied()
                .filter(|seat| inner.is_bot(*seat))
                .collect();
            for seat in bots {
                self.play_bot(session, inner, seat);
            }
        }
    }

    fn play_bot(&self, session: &Arc<Session<R>>, inner: &mut SessionInner<R>, seat: Seat) {
        let strategy = inner
            .participant(seat)
            .and_then(|p| p.bot.clone())
            .unwrap_or_else(|| "random".to_string());
        let Some(action) =
            autoplay::choose_action(self.rules(), &inner.state, seat, &strategy, &mut inner.rng)
        else {
            tracing::error!(code = %session.code, seat = ?seat, "bot has no legal action");
            return;
        };
        if let Err(err) = self.commit(session, inner, seat, action, true) {
            tracing::error!(code = %session.code, error = %err, "bot action rejected");
            debug_assert!(false, "bot action rejected: {err}");
        }
    }

    /// Arm the abandonment clock when a seat is disconnected during an
    /// active match and nothing else is outstanding.
    fn arm_abandonment(&self, session: &Arc<Session<R>>, inner: &mut SessionInner<R>) {
        if inner.phase != Phase::Active || inner.timer.is_armed() {
            return;
        }
        let grace = self.grace_period();
        if grace.is_zero() {
            return;
        }
        let earliest = Seat::ALL
            .into_iter()
            .filter_map(|seat| inner.participant(seat))
            .filter(|p| !p.connected)
            .filter_map(|p| p.disconnected_since)
            .min();
        let Some(since) = earliest else {
            return;
        };
        let remaining = grace.saturating_sub(since.elapsed());
        let turn = self.rules().turn(&inner.state).number;
        self.arm(session, inner, TimerKind::Abandonment, turn, remaining);
    }

    fn arm(
        &self,
        session: &Arc<Session<R>>,
        inner: &mut SessionInner<R>,
        kind: TimerKind,
        turn: u32,
        after: Duration,
    ) -> Option<DateTime<Utc>> {
        let coordinator: Weak<CoordinatorInner<R>> = Arc::downgrade(&self.inner);
        let code = session.code.clone();
        inner.timer.arm(kind, turn, after, move |ticket| async move {
            if let Some(inner) = coordinator.upgrade() {
                Coordinator { inner }.handle_timer(&code, ticket);
            }
        })
    }

    /// Entry point of every fired timer.
    pub(crate) fn handle_timer(&self, code: &SessionCode, ticket: TimerTicket) {
        let Ok(session) = self.inner.registry.get(code) else {
            self.stale_timer(code, &ticket, "session gone");
            return;
        };
        let mut guard = match session.lock() {
            Ok(guard) => guard,
            Err(err) => {
                tracing::error!(code = %code, error = %err, "timer fired on a poisoned session");
                return;
            }
        };
        let inner = &mut *guard;
        if inner.torn_down || inner.phase != Phase::Active {
            self.stale_timer(code, &ticket, "session not active");
            return;
        }
        if !inner.timer.claim(&ticket) {
            self.stale_timer(code, &ticket, "timer superseded");
            return;
        }

        match ticket.kind {
            TimerKind::Abandonment => self.announce_abandonment(&session, inner),
            TimerKind::Bot => {
                let turn = self.rules().turn(&inner.state);
                if turn.number != ticket.turn {
                    self.stale_timer(code, &ticket, "turn already advanced");
                    return;
                }
                for seat in turn.awaiting {
                    if inner.phase != Phase::Active || !self.rules().turn(&inner.state).is_awaiting(seat) {
                        break;
                    }
                    self.play_bot(&session, inner, seat);
                }
            }
            TimerKind::Turn | TimerKind::Round => {
                let turn = self.rules().turn(&inner.state);
                if turn.number != ticket.turn {
                    self.stale_timer(code, &ticket, "turn already advanced");
                    return;
                }
                self.expire_turn(&session, inner, ticket.turn, turn.awaiting);
            }
        }
    }

    fn expire_turn(
        &self,
        session: &Arc<Session<R>>,
        inner: &mut SessionInner<R>,
        turn_number: u32,
        awaiting: Vec<Seat>,
    ) {
        self.inner.deps.metrics.timeout_fallback();
        let settings = self.settings();
        let game = settings.game(self.kind());
        tracing::info!(
            code = %session.code,
            turn = turn_number,
            awaiting = ?awaiting.iter().map(|s| self.rules().seat_label(*s)).collect::<Vec<_>>(),
            policy = ?game.on_timeout,
            "turn clock expired"
        );

        if game.on_timeout == TimeoutPolicy::Forfeit {
            let terminal = match awaiting.as_slice() {
                [seat] => Terminal::win(seat.other(), EndReason::Timeout),
                _ => Terminal::draw(EndReason::Timeout),
            };
            self.finish(session, inner, terminal);
            return;
        }

        for seat in awaiting {
            if inner.phase != Phase::Active || self.rules().turn(&inner.state).number != turn_number {
                break;
            }
            let strategy = inner
                .participant(seat)
                .and_then(|p| p.bot.clone())
                .unwrap_or_else(|| game.autoplay_strategy.clone());
            match autoplay::choose_action(self.rules(), &inner.state, seat, &strategy, &mut inner.rng) {
                Some(action) => {
                    if let Err(err) = self.commit(session, inner, seat, action, true) {
                        tracing::error!(code = %session.code, error = %err, "fallback action rejected");
                        debug_assert!(false, "fallback action rejected: {err}");
                        return;
                    }
                }
                None => {
                    self.finish(session, inner, Terminal::win(seat.other(), EndReason::Timeout));
                    return;
                }
            }
        }
    }

    fn announce_abandonment(&self, session: &Arc<Session<R>>, inner: &mut SessionInner<R>) {
        for seat in Seat::ALL {
            let claimant_connected = inner.participant(seat).is_some_and(|p| p.connected);
            let opponent_gone = inner.participant(seat.other()).is_some_and(|p| !p.connected);
            if claimant_connected && opponent_gone {
                tracing::info!(
                    code = %session.code,
                    seat = self.rules().seat_label(seat),
                    "abandonment claimable"
                );
                self.publish(
                    &session.code,
                    RoomEvent::AbandonmentClaimable {
                        code: session.code.clone(),
                        seat: self.rules().seat_label(seat),
                    },
                );
            }
        }
    }

    fn stale_timer(&self, code: &str, ticket: &TimerTicket, why: &'static str) {
        self.inner.deps.metrics.stale_timer();
        tracing::debug!(
            code = %code,
            timer_id = ticket.id,
            kind = ?ticket.kind,
            turn = ticket.turn,
            why,
            "stale timer ignored"
        );
    }

    /// Record the result. The first terminal transition wins; callers only
    /// reach this from `Active`.
    fn finish(&self, session: &Arc<Session<R>>, inner: &mut SessionInner<R>, terminal: Terminal) {
        if inner.phase.is_terminal() {
            tracing::error!(code = %session.code, "session finished twice");
            debug_assert!(false, "session finished twice");
            return;
        }
        inner.timer.cancel();
        inner.draw_offer = None;
        inner.touch();
        let result = GameResult {
            outcome: terminal.outcome,
            reason: terminal.reason,
            decided_at: Utc::now(),
        };
        inner.phase = Phase::Terminal(result);
        tracing::info!(
            code = %session.code,
            winner = ?terminal.outcome.winner().map(|seat| self.rules().seat_label(seat)),
            reason = %terminal.reason,
            "session finished"
        );
        self.publish(
            &session.code,
            RoomEvent::SessionTerminal {
                code: session.code.clone(),
                result: session.result_view(inner, self.rules(), &result),
            },
        );

        if self.settings().game(self.kind()).persist_history {
            let record = self.match_record(session, inner, &result);
            if let Err(err) = self.inner.deps.history.add_record(record) {
                tracing::error!(code = %session.code, error = %err, "failed to record finished match");
            }
        }
    }

    fn match_record(&self, session: &Session<R>, inner: &SessionInner<R>, result: &GameResult) -> MatchRecord {
        let rules = self.rules();
        MatchRecord {
            id: uuid::Uuid::new_v4().to_string(),
            code: session.code.clone(),
            kind: self.kind(),
            match_number: inner.match_number,
            players: Seat::ALL
                .into_iter()
                .filter_map(|seat| {
                    inner.participant(seat).map(|p| SeatRecord {
                        seat: rules.seat_label(seat).to_string(),
                        player_id: p.identity.id.clone(),
                        name: p.identity.name.clone(),
                        bot: p.is_bot(),
                    })
                })
                .collect(),
            winner: result
                .outcome
                .winner()
                .map(|seat| rules.seat_label(seat).to_string()),
            reason: result.reason,
            transcript: rules.transcript(&inner.state),
            final_state: serde_json::to_value(&inner.state).unwrap_or(serde_json::Value::Null),
            started_at: inner.started_at,
            ended_at: result.decided_at,
        }
    }

    fn teardown(
        &self,
        session: &Arc<Session<R>>,
        inner: &mut SessionInner<R>,
        reason: &str,
    ) -> Result<(), SessionError> {
        inner.torn_down = true;
        inner.timer.cancel();
        self.publish(
            &session.code,
            RoomEvent::SessionTorndown {
                code: session.code.clone(),
                reason: reason.to_string(),
            },
        );
        self.inner.registry.remove(&session.code)?;
        self.inner.deps.bus.drop_room(&session.code);
        self.inner.deps.metrics.session_removed();
        tracing::info!(code = %session.code, reason, "session torn down");
        Ok(())
    }
}

fn ensure_live<R: GameRules>(session: &Session<R>, inner: &SessionInner<R>) -> Result<(), SessionError> {
    if inner.torn_down {
        return Err(SessionError::NotFound(session.code.clone()));
    }
    Ok(())
}

fn seated<R: GameRules>(inner: &SessionInner<R>, player_id: &str) -> Result<Seat, SessionError> {
    inner
        .seat_of(player_id)
        .ok_or_else(|| SessionError::wrong_participant("not seated in this session"))
}

fn require_active<R: GameRules>(inner: &SessionInner<R>, what: &str) -> Result<(), SessionError> {
    if inner.phase != Phase::Active {
        return Err(SessionError::invalid_phase(format!(
            "cannot {what} while the session is {}",
            inner.phase.name()
        )));
    }
    Ok(())
}

/// `name` if the game knows that strategy, otherwise random.
fn bot_strategy<R: Strategies>(name: &str) -> String {
    if autoplay::is_known_strategy::<R>(name) {
        name.to_string()
    } else {
        tracing::warn!(strategy = %name, "unknown bot strategy, using random");
        "random".to_string()
    }
}

fn kind_salt(kind: GameKind) -> u64 {
    match kind {
        GameKind::Chess => 0x6368_6573_7300_0001,
        GameKind::RockPaperScissors => 0x7270_7300_0000_0002,
        GameKind::TicTacToe => 0x7474_7400_0000_0003,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSubscription;
    use gambit_engine::rps::{Hand, RpsPick, RpsRules};
    use gambit_engine::ttt::{TttMove, TttRules};

    fn ann() -> Identity {
        Identity::new("ann", "Ann")
    }

    fn bob() -> Identity {
        Identity::new("bob", "Bob")
    }

    fn coordinator<R: Strategies>(rules: R, settings: AppSettings) -> Coordinator<R> {
        Coordinator::new(
            rules,
            CoordinatorDeps {
                settings: Arc::new(SettingsStore::with_settings(settings).expect("valid settings")),
                seed: Some(11),
                ..CoordinatorDeps::default()
            },
        )
    }

    fn untimed() -> AppSettings {
        let mut settings = AppSettings::default();
        settings.ttt.turn_seconds = 0;
        settings.rps.turn_seconds = 0;
        settings
    }

    fn timed_ttt(policy: TimeoutPolicy) -> AppSettings {
        let mut settings = AppSettings::default();
        settings.ttt.turn_seconds = 10;
        settings.ttt.on_timeout = policy;
        settings.ttt.persist_history = true;
        settings
    }

    fn drain(subscription: &mut EventSubscription) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        while let Ok(event) = subscription.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    fn names(events: &[RoomEvent]) -> Vec<&'static str> {
        events.iter().map(RoomEvent::name).collect()
    }

    fn play(game: &Coordinator<TttRules>, code: &str, player: &str, index: u8) -> SnapshotView {
        game.submit_action(code, player, TttMove { index })
            .expect("legal move")
    }

    #[tokio::test(start_paused = true)]
    async fn turn_timeout_auto_plays_exactly_once() {
        let game = coordinator(TttRules, timed_ttt(TimeoutPolicy::AutoPlay));
        let code = game.create_paired(ann(), bob()).expect("create").code;
        let mut events = game.bus().subscribe(code.clone());

        let snapshot = game.snapshot(&code, Some("ann")).expect("snapshot");
        assert_eq!(snapshot.timer, Some(TimerKind::Turn));
        assert!(snapshot.deadline.is_some());

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let seen = drain(&mut events);
        let applied: Vec<_> = seen
            .iter()
            .filter_map(|event| match event {
                RoomEvent::ActionApplied { seat, turn, automatic, .. } => Some((*seat, *turn, *automatic)),
                _ => None,
            })
            .collect();
        assert_eq!(applied, vec![("X", 1, true)]);
        assert_eq!(names(&seen), vec!["action_applied", "phase_changed"]);

        let snapshot = game.snapshot(&code, None).expect("snapshot");
        assert_eq!(snapshot.turn, 2);
        assert_eq!(snapshot.awaiting, vec!["O"]);
        assert_eq!(game.metrics().snapshot().timeout_fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn action_before_deadline_cancels_the_turn_clock() {
        let game = coordinator(TttRules, timed_ttt(TimeoutPolicy::AutoPlay));
        let code = game.create_paired(ann(), bob()).expect("create").code;
        let mut events = game.bus().subscribe(code.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        play(&game, &code, "ann", 4);
        tokio::time::sleep(Duration::from_secs(6)).await;

        let automatic = drain(&mut events)
            .into_iter()
            .filter(|event| matches!(event, RoomEvent::ActionApplied { automatic: true, .. }))
            .count();
        assert_eq!(automatic, 0);
        assert_eq!(game.snapshot(&code, None).expect("snapshot").turn, 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(game.snapshot(&code, None).expect("snapshot").turn, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn forfeit_policy_awards_the_waiting_seat() {
        let game = coordinator(TttRules, timed_ttt(TimeoutPolicy::Forfeit));
        let code = game.create_paired(ann(), bob()).expect("create").code;

        tokio::time::sleep(Duration::from_secs(11)).await;
        let snapshot = game.snapshot(&code, None).expect("snapshot");
        assert_eq!(snapshot.phase, "terminal");
        let result = snapshot.result.expect("result");
        assert_eq!(result.winner, Some("O"));
        assert_eq!(result.reason, EndReason::Timeout);
        assert!(snapshot.timer.is_none());

        let records = game.history().get_recent(None).expect("history");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].winner.as_deref(), Some("O"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_tickets_do_nothing() {
        let game = coordinator(TttRules, timed_ttt(TimeoutPolicy::AutoPlay));
        let code = game.create_paired(ann(), bob()).expect("create").code;
        let mut events = game.bus().subscribe(code.clone());

        let stale = TimerTicket {
            id: 999,
            kind: TimerKind::Turn,
            turn: 1,
        };
        let logged = crate::logging::LogCapture::during(|| {
            game.handle_timer(&code, stale);
            game.handle_timer(&"NOSUCH".to_string(), stale);
        });

        assert!(drain(&mut events).is_empty());
        let reasons: Vec<_> = logged
            .iter()
            .filter(|entry| entry.message == "stale timer ignored")
            .filter_map(|entry| entry.field("why"))
            .collect();
        assert_eq!(reasons, ["timer superseded", "session gone"]);
        assert_eq!(game.metrics().snapshot().stale_timers, 2);
        assert_eq!(game.snapshot(&code, None).expect("snapshot").turn, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_round_resolves_once_and_rearms() {
        let mut settings = AppSettings::default();
        settings.rps.turn_seconds = 30;
        let game = coordinator(RpsRules, settings);
        let code = game.create_paired(ann(), bob()).expect("create").code;
        let mut events = game.bus().subscribe(code.clone());

        let after_pick = game
            .submit_action(&code, "ann", RpsPick { choice: Hand::Rock })
            .expect("pick");
        assert_eq!(after_pick.turn, 1);
        assert_eq!(after_pick.awaiting, vec!["p2"]);
        assert!(matches!(
            game.submit_action(&code, "ann", RpsPick { choice: Hand::Paper }),
            Err(SessionError::NotYourTurn)
        ));

        tokio::time::sleep(Duration::from_secs(20)).await;
        game.submit_action(&code, "bob", RpsPick { choice: Hand::Scissors })
            .expect("pick");
        let snapshot = game.snapshot(&code, None).expect("snapshot");
        assert_eq!(snapshot.turn, 2);
        assert_eq!(snapshot.timer, Some(TimerKind::Round));

        // The first round's clock would have fired here.
        tokio::time::sleep(Duration::from_secs(15)).await;
        let seen = drain(&mut events);
        assert_eq!(
            names(&seen),
            vec!["action_applied", "action_applied", "phase_changed"]
        );
        assert_eq!(game.snapshot(&code, None).expect("snapshot").turn, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn round_timeout_auto_picks_for_both_seats() {
        let mut settings = AppSettings::default();
        settings.rps.turn_seconds = 3;
        let game = coordinator(RpsRules, settings);
        let code = game.create_paired(ann(), bob()).expect("create").code;

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        let snapshot = game.snapshot(&code, None).expect("snapshot");
        assert_eq!(snapshot.turn, 2);
        assert_eq!(game.metrics().snapshot().actions_committed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn round_timeout_only_picks_for_the_seat_still_awaited() {
        let mut settings = AppSettings::default();
        settings.rps.turn_seconds = 3;
        let game = coordinator(RpsRules, settings);
        let code = game.create_paired(ann(), bob()).expect("create").code;
        let mut events = game.bus().subscribe(code.clone());

        game.submit_action(&code, "ann", RpsPick { choice: Hand::Rock })
            .expect("pick");
        tokio::time::sleep(Duration::from_millis(3_100)).await;

        let automatic: Vec<_> = drain(&mut events)
            .into_iter()
            .filter_map(|event| match event {
                RoomEvent::ActionApplied { seat, automatic: true, .. } => Some(seat),
                _ => None,
            })
            .collect();
        assert_eq!(automatic, vec!["p2"]);
        let snapshot = game.snapshot(&code, None).expect("snapshot");
        assert_eq!(snapshot.turn, 2);
        assert_eq!(snapshot.awaiting, vec!["p1", "p2"]);
        assert_eq!(game.metrics().snapshot().timeout_fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandonment_claim_respects_grace_period() {
        let game = coordinator(TttRules, untimed());
        let code = game.create_paired(ann(), bob()).expect("create").code;
        game.join_room(&code, &ann()).expect("join");
        game.join_room(&code, &bob()).expect("join");
        let mut events = game.bus().subscribe(code.clone());

        game.leave_room(&code, "bob").expect("leave");
        let snapshot = game.snapshot(&code, None).expect("snapshot");
        assert_eq!(snapshot.timer, Some(TimerKind::Abandonment));
        assert!(!snapshot.seats[1].connected);
        assert!(matches!(
            game.claim_abandonment(&code, "ann", ClaimOutcome::Win),
            Err(SessionError::InvalidPhase(_))
        ));

        tokio::time::sleep(Duration::from_secs(61)).await;
        let seen = drain(&mut events);
        assert!(seen.iter().any(|event| matches!(
            event,
            RoomEvent::AbandonmentClaimable { seat: "X", .. }
        )));
        assert!(matches!(
            game.claim_abandonment(&code, "bob", ClaimOutcome::Win),
            Err(SessionError::InvalidPhase(_))
        ));

        let snapshot = game
            .claim_abandonment(&code, "ann", ClaimOutcome::Win)
            .expect("claim");
        let result = snapshot.result.expect("result");
        assert_eq!(result.winner, Some("X"));
        assert_eq!(result.reason, EndReason::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnecting_cancels_the_abandonment_clock() {
        let game = coordinator(TttRules, untimed());
        let code = game.create_paired(ann(), bob()).expect("create").code;
        game.join_room(&code, &bob()).expect("join");
        game.join_room(&code, &bob()).expect("second tab");
        let mut events = game.bus().subscribe(code.clone());

        game.leave_room(&code, "bob").expect("leave");
        assert!(game.snapshot(&code, None).expect("snapshot").timer.is_none());
        game.leave_room(&code, "bob").expect("leave");
        assert_eq!(
            game.snapshot(&code, None).expect("snapshot").timer,
            Some(TimerKind::Abandonment)
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        game.join_room(&code, &bob()).expect("rejoin");
        assert!(game.snapshot(&code, None).expect("snapshot").timer.is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(
            names(&drain(&mut events)),
            vec!["participant_disconnected", "participant_reconnected"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn draw_offer_handshake() {
        let game = coordinator(TttRules, untimed());
        let code = game.create_paired(ann(), bob()).expect("create").code;

        assert!(matches!(
            game.respond_draw(&code, "bob", true),
            Err(SessionError::InvalidPhase(_))
        ));
        let snapshot = game.offer_draw(&code, "ann").expect("offer");
        assert_eq!(snapshot.draw_offer, Some("X"));
        assert!(matches!(
            game.respond_draw(&code, "ann", true),
            Err(SessionError::WrongParticipant(_))
        ));
        let snapshot = game.respond_draw(&code, "bob", false).expect("decline");
        assert!(snapshot.draw_offer.is_none());

        game.offer_draw(&code, "bob").expect("offer");
        play(&game, &code, "ann", 0);
        assert!(game.snapshot(&code, None).expect("snapshot").draw_offer.is_none());

        game.offer_draw(&code, "bob").expect("offer");
        let snapshot = game.offer_draw(&code, "ann").expect("counter offer");
        let result = snapshot.result.expect("agreed");
        assert!(result.draw);
        assert_eq!(result.reason, EndReason::DrawAgreement);
    }

    #[tokio::test(start_paused = true)]
    async fn resignation_is_final_and_terminal_is_idempotent() {
        let game = coordinator(TttRules, untimed());
        let code = game.create_paired(ann(), bob()).expect("create").code;
        let mut events = game.bus().subscribe(code.clone());

        let snapshot = game.resign(&code, "bob").expect("resign");
        let result = snapshot.result.expect("result");
        assert_eq!(result.winner, Some("X"));
        assert_eq!(result.reason, EndReason::Resignation);

        assert!(matches!(game.resign(&code, "ann"), Err(SessionError::InvalidPhase(_))));
        assert!(matches!(
            game.submit_action(&code, "ann", TttMove { index: 0 }),
            Err(SessionError::InvalidPhase(_))
        ));
        assert!(matches!(game.offer_draw(&code, "ann"), Err(SessionError::InvalidPhase(_))));

        let terminal = drain(&mut events)
            .into_iter()
            .filter(|event| matches!(event, RoomEvent::SessionTerminal { .. }))
            .count();
        assert_eq!(terminal, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn guards_reject_outsiders_and_wrong_turns() {
        let game = coordinator(TttRules, untimed());
        let code = game.create_paired(ann(), bob()).expect("create").code;

        assert!(matches!(
            game.submit_action(&code, "bob", TttMove { index: 0 }),
            Err(SessionError::NotYourTurn)
        ));
        assert!(matches!(
            game.submit_action(&code, "eve", TttMove { index: 0 }),
            Err(SessionError::WrongParticipant(_))
        ));
        play(&game, &code, "ann", 4);
        assert!(matches!(
            game.submit_action(&code, "bob", TttMove { index: 4 }),
            Err(SessionError::IllegalAction(_))
        ));
        assert!(matches!(
            game.snapshot("NOSUCH", None),
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn continue_starts_a_new_match_and_end_tears_down() {
        let game = coordinator(TttRules, untimed());
        let code = game.create_paired(ann(), bob()).expect("create").code;
        let mut events = game.bus().subscribe(code.clone());

        assert!(matches!(
            game.continue_session(&code, "ann"),
            Err(SessionError::InvalidPhase(_))
        ));
        for (player, index) in [("ann", 0), ("bob", 3), ("ann", 1), ("bob", 4), ("ann", 2)] {
            play(&game, &code, player, index);
        }
        let finished = game.snapshot(&code, None).expect("snapshot");
        assert_eq!(finished.result.expect("result").reason, EndReason::ThreeInRow);

        assert!(matches!(
            game.continue_session(&code, "eve"),
            Err(SessionError::WrongParticipant(_))
        ));
        let snapshot = game.continue_session(&code, "bob").expect("continue");
        assert_eq!(snapshot.code, code);
        assert_eq!(snapshot.match_number, 2);
        assert_eq!(snapshot.phase, "active");
        assert_eq!(snapshot.turn, 1);
        assert!(snapshot.result.is_none());

        assert!(matches!(
            game.end_session(&code, "ann"),
            Err(SessionError::InvalidPhase(_))
        ));
        game.resign(&code, "ann").expect("resign");
        game.end_session(&code, "ann").expect("end");
        assert!(game.registry().is_empty());
        assert!(matches!(game.snapshot(&code, None), Err(SessionError::NotFound(_))));

        let seen = drain(&mut events);
        assert!(seen.iter().any(|event| matches!(event, RoomEvent::SessionReset { match_number: 2, .. })));
        assert_eq!(seen.last().map(RoomEvent::name), Some("session_torndown"));
        assert!(events.receiver.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn bot_opponent_moves_after_delay() {
        let game = coordinator(TttRules, untimed());
        let snapshot = game
            .create_session(
                ann(),
                CreateOptions {
                    seat: Some("o".to_string()),
                    opponent: Some("heuristic".to_string()),
                },
            )
            .expect("create");
        assert_eq!(snapshot.your_seat, Some("O"));
        assert_eq!(snapshot.phase, "active");
        assert_eq!(snapshot.timer, Some(TimerKind::Bot));
        assert!(snapshot.seats[0].player.as_ref().is_some_and(|p| p.bot));

        tokio::time::sleep(Duration::from_millis(600)).await;
        let snapshot = game.snapshot(&snapshot.code, Some("ann")).expect("snapshot");
        assert_eq!(snapshot.turn, 2);
        assert_eq!(snapshot.awaiting, vec!["O"]);
        assert!(snapshot.legal_actions.is_some_and(|actions| actions.len() == 8));
    }

    #[tokio::test(start_paused = true)]
    async fn rps_bot_picks_as_soon_as_the_round_opens() {
        let game = coordinator(RpsRules, untimed());
        let snapshot = game
            .create_session(
                ann(),
                CreateOptions {
                    seat: None,
                    opponent: Some("no-such-strategy".to_string()),
                },
            )
            .expect("create");
        assert_eq!(snapshot.turn, 1);
        assert_eq!(snapshot.awaiting, vec!["p1"]);

        let snapshot = game
            .submit_action(&snapshot.code, "ann", RpsPick { choice: Hand::Rock })
            .expect("pick");
        assert_eq!(snapshot.phase, "active");
        assert_eq!(snapshot.turn, 2);
        assert_eq!(snapshot.awaiting, vec!["p1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn bot_seats_cannot_be_driven_by_their_id() {
        let game = coordinator(TttRules, untimed());
        let snapshot = game
            .create_session(
                ann(),
                CreateOptions {
                    seat: Some("o".to_string()),
                    opponent: Some("random".to_string()),
                },
            )
            .expect("create");
        let bot_id = snapshot.seats[0]
            .player
            .as_ref()
            .map(|player| player.id.clone())
            .expect("bot seated");

        assert!(matches!(
            game.submit_action(&snapshot.code, &bot_id, TttMove { index: 8 }),
            Err(SessionError::WrongParticipant(_))
        ));
        assert!(matches!(
            game.resign(&snapshot.code, &bot_id),
            Err(SessionError::WrongParticipant(_))
        ));
        assert_eq!(game.snapshot(&snapshot.code, None).expect("snapshot").turn, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bot_battle_plays_to_the_end() {
        let game = coordinator(TttRules, untimed());
        let created = game
            .create_battle(
                ann(),
                BattleOptions {
                    first: Some("heuristic".to_string()),
                    second: None,
                    move_delay_ms: Some(200),
                },
            )
            .expect("battle");
        assert!(created.battle);
        assert_eq!(created.phase, "active");
        assert_eq!(created.your_seat, None);
        assert_eq!(created.timer, Some(TimerKind::Bot));
        assert!(created.seats.iter().all(|seat| seat.player.as_ref().is_some_and(|p| p.bot)));
        assert_eq!(game.list_battles().len(), 1);
        assert!(game.is_battle(&created.code).expect("lookup"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let finished = game.snapshot(&created.code, None).expect("snapshot");
        assert_eq!(finished.phase, "terminal");
        assert!(finished.result.is_some());
        assert_eq!(finished.timer, None);
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_creator_stops_a_battle() {
        let game = coordinator(TttRules, untimed());
        let code = game
            .create_battle(ann(), BattleOptions::default())
            .expect("battle")
            .code;
        let ordinary = game.create_paired(ann(), bob()).expect("create").code;
        assert!(!game.is_battle(&ordinary).expect("lookup"));
        assert!(matches!(
            game.stop_battle(&ordinary, "ann"),
            Err(SessionError::InvalidPhase(_))
        ));
        assert!(matches!(
            game.stop_battle(&code, "bob"),
            Err(SessionError::WrongParticipant(_))
        ));

        game.stop_battle(&code, "ann").expect("stop");
        assert!(matches!(game.is_battle(&code), Err(SessionError::NotFound(_))));
        assert!(game.list_battles().is_empty());
        assert!(!game.is_live(&code));
    }

    #[tokio::test(start_paused = true)]
    async fn battle_delay_is_clamped() {
        let game = coordinator(TttRules, untimed());
        let code = game
            .create_battle(
                ann(),
                BattleOptions {
                    move_delay_ms: Some(u64::MAX),
                    ..BattleOptions::default()
                },
            )
            .expect("battle")
            .code;

        tokio::time::sleep(Duration::from_millis(MAX_BOT_DELAY_MS + 100)).await;
        assert_eq!(game.snapshot(&code, None).expect("snapshot").turn, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn bot_fills_the_open_seat_of_a_waiting_session() {
        let game = coordinator(TttRules, untimed());
        let code = game.create_session(ann(), CreateOptions::default()).expect("create").code;
        let mut events = game.bus().subscribe(code.clone());

        assert!(matches!(
            game.add_bot(&code, "bob", None),
            Err(SessionError::WrongParticipant(_))
        ));
        let snapshot = game.add_bot(&code, "ann", Some("heuristic")).expect("bot");
        assert_eq!(snapshot.phase, "active");
        assert_eq!(snapshot.your_seat, Some("X"));
        let bot = snapshot.seats[1].player.as_ref().expect("bot seated");
        assert!(bot.bot);
        assert!(bot.id.starts_with("bot:heuristic:"));
        assert!(names(&drain(&mut events)).contains(&"participant_joined"));

        assert!(matches!(
            game.add_bot(&code, "ann", None),
            Err(SessionError::InvalidPhase(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn seating_moves_observer_connections_and_starts_the_match() {
        let game = coordinator(TttRules, untimed());
        let created = game.create_session(ann(), CreateOptions::default()).expect("create");
        let code = created.code;
        assert_eq!(created.phase, "waiting");

        let as_observer = game.join_room(&code, &bob()).expect("observe");
        assert_eq!(as_observer.observers.len(), 1);
        assert!(matches!(
            game.take_seat(&code, bob(), Some("X")),
            Err(SessionError::SeatUnavailable(_))
        ));
        let seated = game.take_seat(&code, bob(), None).expect("seat");
        assert_eq!(seated.your_seat, Some("O"));
        assert_eq!(seated.phase, "active");
        assert!(seated.observers.is_empty());
        assert!(matches!(
            game.take_seat(&code, Identity::from_id("eve"), None),
            Err(SessionError::SeatUnavailable(_))
        ));

        game.leave_room(&code, "bob").expect("leave");
        assert!(!game.snapshot(&code, None).expect("snapshot").seats[1].connected);
    }

    #[tokio::test(start_paused = true)]
    async fn open_sessions_are_joined_before_new_ones() {
        let game = coordinator(TttRules, untimed());
        assert!(game.join_open_session(&ann()).expect("lookup").is_none());
        let code = game.create_session(ann(), CreateOptions::default()).expect("create").code;
        assert!(game.join_open_session(&ann()).expect("lookup").is_none());

        let joined = game.join_open_session(&bob()).expect("lookup").expect("joined");
        assert_eq!(joined.code, code);
        assert_eq!(joined.phase, "active");
    }

    #[tokio::test(start_paused = true)]
    async fn chat_requires_membership_and_length() {
        let game = coordinator(TttRules, untimed());
        let code = game.create_paired(ann(), bob()).expect("create").code;
        let mut events = game.bus().subscribe(code.clone());

        game.chat(&code, "ann", "  good luck  ").expect("chat");
        assert!(matches!(game.chat(&code, "ann", "   "), Err(SessionError::IllegalAction(_))));
        assert!(matches!(
            game.chat(&code, "ann", &"x".repeat(501)),
            Err(SessionError::IllegalAction(_))
        ));
        assert!(matches!(game.chat(&code, "eve", "hi"), Err(SessionError::WrongParticipant(_))));

        match drain(&mut events).as_slice() {
            [RoomEvent::Chat { message, player, .. }] => {
                assert_eq!(message, "good luck");
                assert_eq!(player.id, "ann");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_tears_down_idle_sessions() {
        let game = coordinator(TttRules, untimed());
        let idle = game.create_paired(ann(), bob()).expect("create").code;
        tokio::time::sleep(Duration::from_secs(20 * 60)).await;
        let busy = game
            .create_paired(Identity::from_id("cat"), Identity::from_id("dan"))
            .expect("create")
            .code;
        tokio::time::sleep(Duration::from_secs(11 * 60)).await;

        assert_eq!(game.sweep_expired(Duration::from_secs(30 * 60)), 1);
        assert!(game.snapshot(&idle, None).is_err());
        assert!(game.snapshot(&busy, None).is_ok());
        assert_eq!(game.list_sessions().len(), 1);
    }
}
