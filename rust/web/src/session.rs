//! Per-session data: seats, observers, phase and the game state.
//!
//! Everything mutable lives in [`SessionInner`] behind the session's own
//! mutex; only the coordinator takes that lock.

use crate::timer::{TimerKind, TimerSlot};
use chrono::{DateTime, Utc};
use gambit_engine::{EndReason, GameKind, GameRules, Outcome, RulesError, Seat};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tokio::time::Instant;

pub type SessionCode = String;

/// Ids with this prefix belong to server-driven seats and are never
/// accepted from a client.
pub const BOT_ID_PREFIX: &str = "bot:";

/// Who is behind a connection or request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Identity without a display name uses its id as the name.
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
        }
    }

    /// A fresh bot identity; every bot seat gets its own id.
    fn bot(strategy: &str) -> Self {
        let tag = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{BOT_ID_PREFIX}{strategy}:{}", &tag[..8]),
            name: format!("{strategy} bot"),
        }
    }

    pub fn is_reserved_id(id: &str) -> bool {
        id.starts_with(BOT_ID_PREFIX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: String,
    pub name: String,
    pub bot: bool,
}

impl From<&Identity> for PlayerView {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            name: identity.name.clone(),
            bot: false,
        }
    }
}

/// An occupied seat.
#[derive(Debug, Clone)]
pub struct Participant {
    pub identity: Identity,
    /// Strategy driving a bot seat.
    pub bot: Option<String>,
    pub connected: bool,
    /// Open sockets of this identity in the room.
    pub connections: usize,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub disconnected_since: Option<Instant>,
}

impl Participant {
    pub fn human(identity: Identity) -> Self {
        Self {
            identity,
            bot: None,
            connected: true,
            connections: 0,
            disconnected_at: None,
            disconnected_since: None,
        }
    }

    pub fn bot(strategy: &str) -> Self {
        Self {
            bot: Some(strategy.to_string()),
            ..Self::human(Identity::bot(strategy))
        }
    }

    pub fn is_bot(&self) -> bool {
        self.bot.is_some()
    }

    pub fn mark_disconnected(&mut self) {
        self.connected = false;
        self.disconnected_at = Some(Utc::now());
        self.disconnected_since = Some(Instant::now());
    }

    pub fn mark_connected(&mut self) {
        self.connected = true;
        self.disconnected_at = None;
        self.disconnected_since = None;
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            bot: self.is_bot(),
            ..PlayerView::from(&self.identity)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Observer {
    pub identity: Identity,
    pub connections: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GameResult {
    pub outcome: Outcome,
    pub reason: EndReason,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Active,
    Terminal(GameResult),
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Waiting => "waiting",
            Phase::Active => "active",
            Phase::Terminal(_) => "terminal",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Terminal(_))
    }

    pub fn result(&self) -> Option<&GameResult> {
        match self {
            Phase::Terminal(result) => Some(result),
            _ => None,
        }
    }
}

/// Mutable part of a session.
#[derive(Debug)]
pub struct SessionInner<R: GameRules> {
    pub host: Identity,
    pub seats: [Option<Participant>; 2],
    pub observers: BTreeMap<String, Observer>,
    pub state: R::State,
    pub phase: Phase,
    pub timer: TimerSlot,
    pub draw_offer: Option<Seat>,
    pub match_number: u32,
    pub started_at: DateTime<Utc>,
    pub last_active: Instant,
    pub rng: ChaCha8Rng,
    /// Both seats are bots and the room exists to be watched.
    pub battle: bool,
    /// Per-session override of `bot_move_delay_ms`.
    pub bot_delay: Option<std::time::Duration>,
    /// Set once by teardown; a torn-down session accepts nothing.
    pub torn_down: bool,
}

impl<R: GameRules> SessionInner<R> {
    pub fn new(host: Identity, state: R::State, rng: ChaCha8Rng) -> Self {
        Self {
            host,
            seats: [None, None],
            observers: BTreeMap::new(),
            state,
            phase: Phase::Waiting,
            timer: TimerSlot::new(),
            draw_offer: None,
            match_number: 1,
            started_at: Utc::now(),
            last_active: Instant::now(),
            rng,
            battle: false,
            bot_delay: None,
            torn_down: false,
        }
    }

    /// Seat held by a human with this id. Bot seats are never addressed by id.
    pub fn seat_of(&self, player_id: &str) -> Option<Seat> {
        Seat::ALL.into_iter().find(|seat| {
            self.seats[seat.index()]
                .as_ref()
                .is_some_and(|p| !p.is_bot() && p.identity.id == player_id)
        })
    }

    pub fn participant(&self, seat: Seat) -> Option<&Participant> {
        self.seats[seat.index()].as_ref()
    }

    pub fn participant_mut(&mut self, seat: Seat) -> Option<&mut Participant> {
        self.seats[seat.index()].as_mut()
    }

    pub fn open_seats(&self) -> Vec<Seat> {
        Seat::ALL
            .into_iter()
            .filter(|seat| self.seats[seat.index()].is_none())
            .collect()
    }

    pub fn is_full(&self) -> bool {
        self.seats.iter().all(Option::is_some)
    }

    pub fn is_bot(&self, seat: Seat) -> bool {
        self.participant(seat).is_some_and(Participant::is_bot)
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

/// One live match, addressed by its public code.
#[derive(Debug)]
pub struct Session<R: GameRules> {
    pub code: SessionCode,
    pub kind: GameKind,
    pub created_at: DateTime<Utc>,
    inner: Mutex<SessionInner<R>>,
}

impl<R: GameRules> Session<R> {
    pub fn new(code: SessionCode, kind: GameKind, inner: SessionInner<R>) -> Self {
        Self {
            code,
            kind,
            created_at: Utc::now(),
            inner: Mutex::new(inner),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, SessionInner<R>>, SessionError> {
        self.inner.lock().map_err(|_| SessionError::StoragePoisoned)
    }

    /// Full view of the session for `viewer` (legal actions are only filled
    /// in for a seated viewer whose input is awaited).
    pub fn snapshot(&self, inner: &SessionInner<R>, rules: &R, viewer: Option<&str>) -> SnapshotView {
        let turn = rules.turn(&inner.state);
        let viewer_seat = viewer.and_then(|id| inner.seat_of(id));
        let legal_actions = viewer_seat
            .filter(|seat| inner.phase == Phase::Active && turn.is_awaiting(*seat))
            .map(|seat| {
                rules
                    .legal_actions(&inner.state, seat)
                    .iter()
                    .filter_map(|action| serde_json::to_value(action).ok())
                    .collect()
            });
        let state = serde_json::to_value(&inner.state).unwrap_or_else(|err| {
            tracing::error!(code = %self.code, error = %err, "failed to serialize game state");
            serde_json::Value::Null
        });

        SnapshotView {
            code: self.code.clone(),
            kind: self.kind,
            host: PlayerView::from(&inner.host),
            phase: inner.phase.name(),
            battle: inner.battle,
            match_number: inner.match_number,
            seats: self.seat_views(inner, rules),
            observers: inner
                .observers
                .values()
                .map(|o| PlayerView::from(&o.identity))
                .collect(),
            turn: turn.number,
            awaiting: turn
                .awaiting
                .iter()
                .map(|seat| rules.seat_label(*seat))
                .collect(),
            deadline: inner.timer.deadline_at(),
            timer: inner.timer.kind(),
            draw_offer: inner.draw_offer.map(|seat| rules.seat_label(seat)),
            state,
            result: inner
                .phase
                .result()
                .map(|result| self.result_view(inner, rules, result)),
            transcript: rules.transcript(&inner.state),
            your_seat: viewer_seat.map(|seat| rules.seat_label(seat)),
            legal_actions,
            created_at: self.created_at,
        }
    }

    pub fn summary(&self, inner: &SessionInner<R>, rules: &R) -> SessionSummary {
        SessionSummary {
            code: self.code.clone(),
            kind: self.kind,
            host: PlayerView::from(&inner.host),
            phase: inner.phase.name(),
            battle: inner.battle,
            seats: self.seat_views(inner, rules),
            observers: inner.observers.len(),
            created_at: self.created_at,
        }
    }

    pub fn result_view(&self, inner: &SessionInner<R>, rules: &R, result: &GameResult) -> ResultView {
        let winner = result.outcome.winner();
        ResultView {
            winner: winner.map(|seat| rules.seat_label(seat)),
            winner_player: winner
                .and_then(|seat| inner.participant(seat))
                .map(Participant::view),
            draw: winner.is_none(),
            reason: result.reason,
            decided_at: result.decided_at,
        }
    }

    fn seat_views(&self, inner: &SessionInner<R>, rules: &R) -> Vec<SeatView> {
        Seat::ALL
            .into_iter()
            .map(|seat| {
                let participant = inner.participant(seat);
                SeatView {
                    seat: rules.seat_label(seat),
                    player: participant.map(Participant::view),
                    connected: participant.is_some_and(|p| p.connected),
                    disconnected_at: participant.and_then(|p| p.disconnected_at),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SeatView {
    pub seat: &'static str,
    pub player: Option<PlayerView>,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    /// Seat label of the winner.
    pub winner: Option<&'static str>,
    pub winner_player: Option<PlayerView>,
    pub draw: bool,
    pub reason: EndReason,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotView {
    pub code: SessionCode,
    pub kind: GameKind,
    pub host: PlayerView,
    pub phase: &'static str,
    pub battle: bool,
    pub match_number: u32,
    pub seats: Vec<SeatView>,
    pub observers: Vec<PlayerView>,
    pub turn: u32,
    pub awaiting: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draw_offer: Option<&'static str>,
    pub state: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub your_seat: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legal_actions: Option<Vec<serde_json::Value>>,
    pub created_at: DateTime<Utc>,
}

/// Lobby listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub code: SessionCode,
    pub kind: GameKind,
    pub host: PlayerView,
    pub phase: &'static str,
    pub battle: bool,
    pub seats: Vec<SeatView>,
    pub observers: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(SessionCode),
    #[error("Seat unavailable: {0}")]
    SeatUnavailable(String),
    #[error("Not your turn")]
    NotYourTurn,
    #[error("Wrong participant: {0}")]
    WrongParticipant(String),
    #[error("Illegal action: {0}")]
    IllegalAction(String),
    #[error("Invalid phase: {0}")]
    InvalidPhase(String),
    #[error("Session storage poisoned")]
    StoragePoisoned,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    pub fn seat_unavailable(message: impl Into<String>) -> Self {
        SessionError::SeatUnavailable(message.into())
    }

    pub fn wrong_participant(message: impl Into<String>) -> Self {
        SessionError::WrongParticipant(message.into())
    }

    pub fn invalid_phase(message: impl Into<String>) -> Self {
        SessionError::InvalidPhase(message.into())
    }
}

impl From<RulesError> for SessionError {
    fn from(err: RulesError) -> Self {
        match err {
            RulesError::NotSeatsTurn { .. } => SessionError::NotYourTurn,
            RulesError::GameOver => SessionError::invalid_phase("game is already decided"),
            RulesError::IllegalAction(message) => SessionError::IllegalAction(message),
        }
    }
}

impl crate::errors::IntoErrorResponse for SessionError {
    fn status_code(&self) -> warp::http::StatusCode {
        use warp::http::StatusCode;
        match self {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::SeatUnavailable(_) => StatusCode::CONFLICT,
            SessionError::NotYourTurn | SessionError::WrongParticipant(_) => StatusCode::FORBIDDEN,
            SessionError::IllegalAction(_) => StatusCode::BAD_REQUEST,
            SessionError::InvalidPhase(_) => StatusCode::CONFLICT,
            SessionError::StoragePoisoned | SessionError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            SessionError::NotFound(_) => "session_not_found",
            SessionError::SeatUnavailable(_) => "seat_unavailable",
            SessionError::NotYourTurn => "not_your_turn",
            SessionError::WrongParticipant(_) => "wrong_participant",
            SessionError::IllegalAction(_) => "illegal_action",
            SessionError::InvalidPhase(_) => "invalid_phase",
            SessionError::StoragePoisoned => "session_storage_error",
            SessionError::Internal(_) => "internal_error",
        }
    }

    fn error_message(&self) -> String {
        self.to_string()
    }

    fn error_details(&self) -> Option<serde_json::Value> {
        match self {
            SessionError::NotFound(code) => Some(serde_json::json!({ "code": code })),
            _ => None,
        }
    }

    fn severity(&self) -> crate::errors::ErrorSeverity {
        use crate::errors::ErrorSeverity;
        match self {
            SessionError::StoragePoisoned => ErrorSeverity::Critical,
            SessionError::Internal(_) => ErrorSeverity::Server,
            _ => ErrorSeverity::Client,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::IntoErrorResponse;
    use gambit_engine::ttt::TttRules;
    use rand::SeedableRng;
    use warp::http::StatusCode;

    fn session() -> Session<TttRules> {
        let rules = TttRules;
        let inner = SessionInner::new(
            Identity::new("ann", "Ann"),
            rules.initial_state(),
            ChaCha8Rng::seed_from_u64(7),
        );
        Session::new("ABC234".to_string(), GameKind::TicTacToe, inner)
    }

    #[test]
    fn error_codes_match_status_table() {
        let cases = [
            (SessionError::NotFound("X".into()), StatusCode::NOT_FOUND, "session_not_found"),
            (SessionError::seat_unavailable("taken"), StatusCode::CONFLICT, "seat_unavailable"),
            (SessionError::NotYourTurn, StatusCode::FORBIDDEN, "not_your_turn"),
            (SessionError::wrong_participant("observer"), StatusCode::FORBIDDEN, "wrong_participant"),
            (SessionError::IllegalAction("occupied".into()), StatusCode::BAD_REQUEST, "illegal_action"),
            (SessionError::invalid_phase("terminal"), StatusCode::CONFLICT, "invalid_phase"),
            (SessionError::StoragePoisoned, StatusCode::INTERNAL_SERVER_ERROR, "session_storage_error"),
            (SessionError::Internal("oops".into()), StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        ];
        for (error, status, code) in cases {
            assert_eq!(error.status_code(), status);
            assert_eq!(error.error_code(), code);
        }
    }

    #[test]
    fn rules_errors_map_onto_session_errors() {
        assert!(matches!(
            SessionError::from(RulesError::NotSeatsTurn { actual: "O" }),
            SessionError::NotYourTurn
        ));
        assert!(matches!(
            SessionError::from(RulesError::illegal("cell 4 is occupied")),
            SessionError::IllegalAction(_)
        ));
    }

    #[test]
    fn disconnect_and_reconnect_track_timestamps() {
        let mut participant = Participant::human(Identity::from_id("bob"));
        assert!(participant.connected);
        assert_eq!(participant.identity.name, "bob");

        participant.mark_disconnected();
        assert!(!participant.connected);
        assert!(participant.disconnected_at.is_some());

        participant.mark_connected();
        assert!(participant.connected);
        assert!(participant.disconnected_at.is_none());
        assert!(participant.disconnected_since.is_none());
    }

    #[test]
    fn bot_participants_are_flagged() {
        let bot = Participant::bot("heuristic");
        assert!(bot.is_bot());
        assert!(bot.view().bot);
        assert!(bot.identity.id.starts_with("bot:heuristic:"));
        assert!(Identity::is_reserved_id(&bot.identity.id));
        assert_ne!(Participant::bot("heuristic").identity.id, bot.identity.id);
    }

    #[test]
    fn bot_seats_are_not_found_by_id() {
        let mut inner = SessionInner::<TttRules>::new(
            Identity::from_id("ann"),
            TttRules.initial_state(),
            rand::SeedableRng::seed_from_u64(1),
        );
        let bot = Participant::bot("random");
        let bot_id = bot.identity.id.clone();
        inner.seats[0] = Some(Participant::human(Identity::from_id("ann")));
        inner.seats[1] = Some(bot);

        assert_eq!(inner.seat_of("ann"), Some(Seat::First));
        assert_eq!(inner.seat_of(&bot_id), None);
        assert!(inner.is_bot(Seat::Second));
    }

    #[tokio::test]
    async fn snapshot_lists_seats_by_label_and_legal_actions_for_awaited_viewer() {
        let session = session();
        let rules = TttRules;
        {
            let mut inner = session.lock().expect("lock");
            inner.seats[0] = Some(Participant::human(Identity::new("ann", "Ann")));
            inner.seats[1] = Some(Participant::human(Identity::new("bob", "Bob")));
            inner.phase = Phase::Active;
        }
        let inner = session.lock().expect("lock");

        let for_x = session.snapshot(&inner, &rules, Some("ann"));
        assert_eq!(for_x.phase, "active");
        assert_eq!(for_x.seats[0].seat, "X");
        assert_eq!(for_x.awaiting, vec!["X"]);
        assert_eq!(for_x.your_seat, Some("X"));
        assert_eq!(for_x.legal_actions.as_ref().map(Vec::len), Some(9));

        let for_o = session.snapshot(&inner, &rules, Some("bob"));
        assert!(for_o.legal_actions.is_none());

        let anonymous = session.snapshot(&inner, &rules, None);
        assert!(anonymous.your_seat.is_none());
        let json = serde_json::to_value(&anonymous).expect("serialize");
        assert_eq!(json["kind"], "tic_tac_toe");
        assert!(json.get("legal_actions").is_none());
    }

    #[test]
    fn seat_lookup_and_open_seats() {
        let session = session();
        let mut inner = session.lock().expect("lock");
        assert_eq!(inner.open_seats(), vec![Seat::First, Seat::Second]);
        inner.seats[1] = Some(Participant::human(Identity::from_id("bob")));
        assert_eq!(inner.seat_of("bob"), Some(Seat::Second));
        assert_eq!(inner.seat_of("ann"), None);
        assert_eq!(inner.open_seats(), vec![Seat::First]);
        assert!(!inner.is_full());
    }
}
