//! Seats, turns and outcomes shared by every rule set.

use serde::{Deserialize, Serialize};

/// One of the two fixed seats of a session.
///
/// Rule sets give the seats their own labels (`white`/`black`, `p1`/`p2`,
/// `X`/`O`); the engine only ever reasons about `First` and `Second`.
/// `First` always moves first in alternating games.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seat {
    First,
    Second,
}

impl Seat {
    pub const ALL: [Seat; 2] = [Seat::First, Seat::Second];

    /// The opposing seat.
    pub fn other(self) -> Seat {
        match self {
            Seat::First => Seat::Second,
            Seat::Second => Seat::First,
        }
    }

    /// Index into two-element per-seat arrays.
    pub fn index(self) -> usize {
        match self {
            Seat::First => 0,
            Seat::Second => 1,
        }
    }
}

/// Whose input the game is waiting for.
///
/// `number` increases every time the turn (or round) advances and never
/// decreases within one match, so callers can tell "same turn, one more
/// pick" apart from "a new turn started".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub number: u32,
    pub awaiting: Vec<Seat>,
}

impl Turn {
    pub fn new(number: u32, awaiting: Vec<Seat>) -> Self {
        Self { number, awaiting }
    }

    /// A turn that waits for nobody (finished games).
    pub fn closed(number: u32) -> Self {
        Self {
            number,
            awaiting: Vec::new(),
        }
    }

    pub fn is_awaiting(&self, seat: Seat) -> bool {
        self.awaiting.contains(&seat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "seat")]
pub enum Outcome {
    Winner(Seat),
    Draw,
}

impl Outcome {
    pub fn winner(self) -> Option<Seat> {
        match self {
            Outcome::Winner(seat) => Some(seat),
            Outcome::Draw => None,
        }
    }
}

/// Why a match ended.
///
/// The first group is reported by rule sets; the second is decided by
/// whoever coordinates the session (clocks, players giving up, agreements).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Checkmate,
    Stalemate,
    Repetition,
    InsufficientMaterial,
    FiftyMoveRule,
    ThreeInRow,
    BoardFull,
    ScoreReached,
    RoundLimit,

    Timeout,
    Resignation,
    Abandoned,
    DrawAgreement,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Checkmate => "checkmate",
            EndReason::Stalemate => "stalemate",
            EndReason::Repetition => "repetition",
            EndReason::InsufficientMaterial => "insufficient_material",
            EndReason::FiftyMoveRule => "fifty_move_rule",
            EndReason::ThreeInRow => "three_in_row",
            EndReason::BoardFull => "board_full",
            EndReason::ScoreReached => "score_reached",
            EndReason::RoundLimit => "round_limit",
            EndReason::Timeout => "timeout",
            EndReason::Resignation => "resignation",
            EndReason::Abandoned => "abandoned",
            EndReason::DrawAgreement => "draw_agreement",
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decided match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Terminal {
    pub outcome: Outcome,
    pub reason: EndReason,
}

impl Terminal {
    pub fn win(seat: Seat, reason: EndReason) -> Self {
        Self {
            outcome: Outcome::Winner(seat),
            reason,
        }
    }

    pub fn draw(reason: EndReason) -> Self {
        Self {
            outcome: Outcome::Draw,
            reason,
        }
    }
}
