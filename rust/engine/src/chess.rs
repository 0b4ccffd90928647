//! Standard chess, with legality and draw detection delegated to `shakmaty`.

use crate::errors::RulesError;
use crate::rules::{GameKind, GameRules};
use crate::seat::{EndReason, Outcome, Seat, Terminal, Turn};
use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::san::SanPlus;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, Position, Role};
use std::collections::HashMap;

/// Half-moves without capture or pawn move after which the game is drawn.
const FIFTY_MOVE_PLIES: u32 = 100;
const REPETITION_LIMIT: u32 = 3;

/// A move in coordinate notation, e.g. `{"from": "e7", "to": "e8", "promotion": "q"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChessMove {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

impl ChessMove {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            promotion: None,
        }
    }

    pub fn with_promotion(mut self, piece: &str) -> Self {
        self.promotion = Some(piece.to_string());
        self
    }

    /// Parse long algebraic `e2e4` / `e7e8q`.
    pub fn from_uci(uci: &str) -> Option<Self> {
        if !uci.is_ascii() || !(4..=5).contains(&uci.len()) {
            return None;
        }
        Some(Self {
            from: uci[0..2].to_string(),
            to: uci[2..4].to_string(),
            promotion: uci.get(4..5).map(str::to_string),
        })
    }

    pub fn to_uci(&self) -> String {
        let mut uci = format!(
            "{}{}",
            self.from.to_ascii_lowercase(),
            self.to.to_ascii_lowercase()
        );
        if let Some(piece) = self.promotion.as_deref() {
            uci.push_str(&promotion_letter(piece));
        }
        uci
    }
}

/// "q", "Q" and "queen" all name the queen; knights go by "n".
fn promotion_letter(piece: &str) -> String {
    let lower = piece.to_ascii_lowercase();
    match lower.as_str() {
        "queen" => "q".to_string(),
        "rook" => "r".to_string(),
        "bishop" => "b".to_string(),
        "knight" => "n".to_string(),
        _ => lower,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveRecord {
    pub ply: u32,
    pub san: String,
    pub uci: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChessState {
    pub fen: String,
    pub to_move: &'static str,
    pub in_check: bool,
    pub moves: Vec<MoveRecord>,
    #[serde(skip)]
    position: Chess,
    #[serde(skip)]
    repetitions: HashMap<String, u32>,
}

impl ChessState {
    fn from_position(position: Chess) -> Self {
        let fen = fen_of(&position);
        let mut repetitions = HashMap::new();
        repetitions.insert(repetition_key(&fen), 1);
        Self {
            to_move: color_label(position.turn()),
            in_check: position.is_check(),
            fen,
            moves: Vec::new(),
            position,
            repetitions,
        }
    }

    pub fn position(&self) -> &Chess {
        &self.position
    }

    fn repetition_count(&self) -> u32 {
        self.repetitions
            .get(&repetition_key(&self.fen))
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChessEffect {
    pub san: String,
    pub uci: String,
    pub fen: String,
    pub check: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured: Option<&'static str>,
}

/// A legal move annotated with what a move-picking heuristic cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChessCandidate {
    pub action: ChessMove,
    pub capture_value: u8,
    pub gives_check: bool,
    pub target: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChessRules;

impl ChessRules {
    /// Start from an arbitrary position instead of the initial setup.
    pub fn state_from_fen(&self, fen: &str) -> Result<ChessState, RulesError> {
        let setup: Fen = fen
            .parse()
            .map_err(|err| RulesError::illegal(format!("invalid FEN: {err}")))?;
        let position: Chess = setup
            .into_position(CastlingMode::Standard)
            .map_err(|err| RulesError::illegal(format!("invalid position: {err}")))?;
        Ok(ChessState::from_position(position))
    }

    pub fn candidates(&self, state: &ChessState) -> Vec<ChessCandidate> {
        if self.is_terminal(state).is_some() {
            return Vec::new();
        }
        state
            .position
            .legal_moves()
            .iter()
            .map(|m| {
                let mut after = state.position.clone();
                after.play_unchecked(m);
                ChessCandidate {
                    action: chess_move_of(m),
                    capture_value: m.capture().map(piece_value).unwrap_or(0),
                    gives_check: after.is_check(),
                    target: m.to().to_string(),
                }
            })
            .collect()
    }

    fn find_legal(&self, state: &ChessState, action: &ChessMove) -> Option<Move> {
        let wanted = action.to_uci();
        state
            .position
            .legal_moves()
            .into_iter()
            .find(|m| m.to_uci(CastlingMode::Standard).to_string() == wanted)
    }
}

impl GameRules for ChessRules {
    type State = ChessState;
    type Action = ChessMove;
    type Effect = ChessEffect;

    fn kind(&self) -> GameKind {
        GameKind::Chess
    }

    fn seat_label(&self, seat: Seat) -> &'static str {
        match seat {
            Seat::First => "white",
            Seat::Second => "black",
        }
    }

    fn initial_state(&self) -> ChessState {
        ChessState::from_position(Chess::default())
    }

    fn turn(&self, state: &ChessState) -> Turn {
        let number = state.moves.len() as u32 + 1;
        if self.is_terminal(state).is_some() {
            Turn::closed(number)
        } else {
            Turn::new(number, vec![color_seat(state.position.turn())])
        }
    }

    fn legal_actions(&self, state: &ChessState, seat: Seat) -> Vec<ChessMove> {
        if !self.turn(state).is_awaiting(seat) {
            return Vec::new();
        }
        state
            .position
            .legal_moves()
            .iter()
            .map(chess_move_of)
            .collect()
    }

    fn apply_action(
        &self,
        state: &ChessState,
        seat: Seat,
        action: &ChessMove,
    ) -> Result<(ChessState, ChessEffect), RulesError> {
        if self.is_terminal(state).is_some() {
            return Err(RulesError::GameOver);
        }
        if color_seat(state.position.turn()) != seat {
            return Err(RulesError::NotSeatsTurn {
                actual: self.seat_label(seat),
            });
        }
        let chosen = self.find_legal(state, action).ok_or_else(|| {
            RulesError::illegal(format!("{} is not a legal move", action.to_uci()))
        })?;

        let uci = chosen.to_uci(CastlingMode::Standard).to_string();
        let captured = chosen.capture().map(role_name);
        let mut position = state.position.clone();
        let san = SanPlus::from_move_and_play_unchecked(&mut position, &chosen).to_string();

        let fen = fen_of(&position);
        let mut repetitions = state.repetitions.clone();
        *repetitions.entry(repetition_key(&fen)).or_insert(0) += 1;

        let mut moves = state.moves.clone();
        moves.push(MoveRecord {
            ply: moves.len() as u32 + 1,
            san: san.clone(),
            uci: uci.clone(),
        });

        let next = ChessState {
            fen: fen.clone(),
            to_move: color_label(position.turn()),
            in_check: position.is_check(),
            moves,
            position,
            repetitions,
        };
        let effect = ChessEffect {
            san,
            uci,
            fen,
            check: next.in_check,
            captured,
        };
        Ok((next, effect))
    }

    fn is_terminal(&self, state: &ChessState) -> Option<Terminal> {
        let position = &state.position;
        if position.is_checkmate() {
            let winner = color_seat(position.turn()).other();
            return Some(Terminal::win(winner, EndReason::Checkmate));
        }
        if position.is_stalemate() {
            return Some(Terminal::draw(EndReason::Stalemate));
        }
        if position.is_insufficient_material() {
            return Some(Terminal::draw(EndReason::InsufficientMaterial));
        }
        if state.repetition_count() >= REPETITION_LIMIT {
            return Some(Terminal::draw(EndReason::Repetition));
        }
        if position.halfmoves() >= FIFTY_MOVE_PLIES {
            return Some(Terminal::draw(EndReason::FiftyMoveRule));
        }
        None
    }

    /// PGN movetext, with the result token once the game is decided.
    fn transcript(&self, state: &ChessState) -> Option<String> {
        let mut pgn = String::new();
        for (idx, record) in state.moves.iter().enumerate() {
            if idx % 2 == 0 {
                if idx > 0 {
                    pgn.push(' ');
                }
                pgn.push_str(&format!("{}. ", idx / 2 + 1));
            } else {
                pgn.push(' ');
            }
            pgn.push_str(&record.san);
        }
        if let Some(terminal) = self.is_terminal(state) {
            let result = match terminal.outcome {
                Outcome::Winner(Seat::First) => "1-0",
                Outcome::Winner(Seat::Second) => "0-1",
                Outcome::Draw => "1/2-1/2",
            };
            if !pgn.is_empty() {
                pgn.push(' ');
            }
            pgn.push_str(result);
        }
        Some(pgn)
    }
}

fn fen_of(position: &Chess) -> String {
    Fen::from_position(position.clone(), EnPassantMode::Legal).to_string()
}

/// Placement, side to move, castling rights and en-passant square: the
/// parts of a FEN that decide whether two positions repeat.
fn repetition_key(fen: &str) -> String {
    fen.split(' ').take(4).collect::<Vec<_>>().join(" ")
}

fn color_seat(color: Color) -> Seat {
    match color {
        Color::White => Seat::First,
        Color::Black => Seat::Second,
    }
}

fn color_label(color: Color) -> &'static str {
    match color {
        Color::White => "white",
        Color::Black => "black",
    }
}

fn chess_move_of(m: &Move) -> ChessMove {
    let uci = m.to_uci(CastlingMode::Standard).to_string();
    ChessMove::from_uci(&uci).unwrap_or_else(|| ChessMove::new(&uci, ""))
}

fn piece_value(role: Role) -> u8 {
    match role {
        Role::Pawn => 1,
        Role::Knight | Role::Bishop => 3,
        Role::Rook => 5,
        Role::Queen => 9,
        Role::King => 0,
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::Pawn => "pawn",
        Role::Knight => "knight",
        Role::Bishop => "bishop",
        Role::Rook => "rook",
        Role::Queen => "queen",
        Role::King => "king",
    }
}
