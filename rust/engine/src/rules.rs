use crate::errors::RulesError;
use crate::seat::{Seat, Terminal, Turn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// The game types the lobby can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    Chess,
    RockPaperScissors,
    TicTacToe,
}

impl GameKind {
    pub const ALL: [GameKind; 3] = [
        GameKind::Chess,
        GameKind::RockPaperScissors,
        GameKind::TicTacToe,
    ];

    /// Short name used in URLs and settings keys.
    pub fn slug(self) -> &'static str {
        match self {
            GameKind::Chess => "chess",
            GameKind::RockPaperScissors => "rps",
            GameKind::TicTacToe => "ttt",
        }
    }

    pub fn from_slug(slug: &str) -> Option<GameKind> {
        GameKind::ALL.into_iter().find(|kind| kind.slug() == slug)
    }

    /// Whether both seats act in the same turn (rounds) rather than alternating.
    pub fn is_simultaneous(self) -> bool {
        matches!(self, GameKind::RockPaperScissors)
    }
}

impl std::fmt::Display for GameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.slug())
    }
}

/// Legality and terminal-condition oracle for one game type.
///
/// Implementations are pure: every method takes the state by reference and
/// `apply_action` returns a fresh state instead of mutating, so a rejected
/// action can never leave a half-applied position behind.
///
/// # Example
///
/// ```rust
/// use gambit_engine::rules::GameRules;
/// use gambit_engine::seat::{EndReason, Seat};
/// use gambit_engine::ttt::{TttMove, TttRules};
///
/// let rules = TttRules;
/// let mut state = rules.initial_state();
/// for (seat, index) in [
///     (Seat::First, 0),
///     (Seat::Second, 3),
///     (Seat::First, 1),
///     (Seat::Second, 4),
///     (Seat::First, 2),
/// ] {
///     let (next, _effect) = rules
///         .apply_action(&state, seat, &TttMove { index })
///         .expect("legal move");
///     state = next;
/// }
///
/// let terminal = rules.is_terminal(&state).expect("game over");
/// assert_eq!(terminal.outcome.winner(), Some(Seat::First));
/// assert_eq!(terminal.reason, EndReason::ThreeInRow);
/// ```
pub trait GameRules: Send + Sync + 'static {
    /// Full game state. Serialization must only expose what every room
    /// member is allowed to see.
    type State: Clone + Debug + Serialize + Send + Sync + 'static;
    /// What a participant submits on their turn.
    type Action: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Public description of a committed action, broadcast to the room.
    type Effect: Clone + Debug + Serialize + Send + Sync + 'static;

    fn kind(&self) -> GameKind;

    fn seat_label(&self, seat: Seat) -> &'static str;

    fn seat_from_label(&self, label: &str) -> Option<Seat> {
        Seat::ALL
            .into_iter()
            .find(|seat| self.seat_label(*seat).eq_ignore_ascii_case(label))
    }

    fn initial_state(&self) -> Self::State;

    /// The current turn; empty `awaiting` once the game is decided.
    fn turn(&self, state: &Self::State) -> Turn;

    /// Every action `seat` may submit right now (empty when it is not their turn).
    fn legal_actions(&self, state: &Self::State, seat: Seat) -> Vec<Self::Action>;

    fn apply_action(
        &self,
        state: &Self::State,
        seat: Seat,
        action: &Self::Action,
    ) -> Result<(Self::State, Self::Effect), RulesError>;

    fn is_terminal(&self, state: &Self::State) -> Option<Terminal>;

    /// Human-readable record of the match, when the game has one.
    fn transcript(&self, _state: &Self::State) -> Option<String> {
        None
    }
}
