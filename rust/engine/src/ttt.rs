//! Tic-tac-toe on a 3x3 board, X moves first.

use crate::errors::RulesError;
use crate::rules::{GameKind, GameRules};
use crate::seat::{EndReason, Seat, Terminal, Turn};
use serde::{Deserialize, Serialize};

pub const CELLS: usize = 9;

pub const LINES: [[u8; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    pub fn for_seat(seat: Seat) -> Mark {
        match seat {
            Seat::First => Mark::X,
            Seat::Second => Mark::O,
        }
    }

    pub fn seat(self) -> Seat {
        match self {
            Mark::X => Seat::First,
            Mark::O => Seat::Second,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TttMove {
    pub index: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TttState {
    pub board: [Option<Mark>; CELLS],
    pub to_move: Mark,
    pub moves: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_line: Option<[u8; 3]>,
}

impl TttState {
    pub fn empty_cells(&self) -> impl Iterator<Item = u8> + '_ {
        self.board
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.is_none())
            .map(|(idx, _)| idx as u8)
    }

    fn line_of(&self, mark: Mark) -> Option<[u8; 3]> {
        LINES.into_iter().find(|line| {
            line.iter()
                .all(|&idx| self.board[idx as usize] == Some(mark))
        })
    }

    fn is_full(&self) -> bool {
        self.board.iter().all(Option::is_some)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TttEffect {
    pub index: u8,
    pub mark: Mark,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_line: Option<[u8; 3]>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TttRules;

impl GameRules for TttRules {
    type State = TttState;
    type Action = TttMove;
    type Effect = TttEffect;

    fn kind(&self) -> GameKind {
        GameKind::TicTacToe
    }

    fn seat_label(&self, seat: Seat) -> &'static str {
        match seat {
            Seat::First => "X",
            Seat::Second => "O",
        }
    }

    fn initial_state(&self) -> TttState {
        TttState {
            board: [None; CELLS],
            to_move: Mark::X,
            moves: Vec::new(),
            winning_line: None,
        }
    }

    fn turn(&self, state: &TttState) -> Turn {
        let number = state.moves.len() as u32 + 1;
        if self.is_terminal(state).is_some() {
            Turn::closed(number)
        } else {
            Turn::new(number, vec![state.to_move.seat()])
        }
    }

    fn legal_actions(&self, state: &TttState, seat: Seat) -> Vec<TttMove> {
        if !self.turn(state).is_awaiting(seat) {
            return Vec::new();
        }
        state.empty_cells().map(|index| TttMove { index }).collect()
    }

    fn apply_action(
        &self,
        state: &TttState,
        seat: Seat,
        action: &TttMove,
    ) -> Result<(TttState, TttEffect), RulesError> {
        if self.is_terminal(state).is_some() {
            return Err(RulesError::GameOver);
        }
        if state.to_move.seat() != seat {
            return Err(RulesError::NotSeatsTurn {
                actual: self.seat_label(seat),
            });
        }
        let index = action.index as usize;
        if index >= CELLS {
            return Err(RulesError::illegal(format!(
                "cell {index} is off the board (0-8)"
            )));
        }
        if state.board[index].is_some() {
            return Err(RulesError::illegal(format!("cell {index} is occupied")));
        }

        let mark = state.to_move;
        let mut next = state.clone();
        next.board[index] = Some(mark);
        next.moves.push(action.index);
        next.to_move = Mark::for_seat(seat.other());
        next.winning_line = next.line_of(mark);

        let effect = TttEffect {
            index: action.index,
            mark,
            winning_line: next.winning_line,
        };
        Ok((next, effect))
    }

    fn is_terminal(&self, state: &TttState) -> Option<Terminal> {
        for mark in [Mark::X, Mark::O] {
            if state.line_of(mark).is_some() {
                return Some(Terminal::win(mark.seat(), EndReason::ThreeInRow));
            }
        }
        if state.is_full() {
            return Some(Terminal::draw(EndReason::BoardFull));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(rules: &TttRules, moves: &[u8]) -> TttState {
        let mut state = rules.initial_state();
        for &index in moves {
            let seat = state.to_move.seat();
            state = rules
                .apply_action(&state, seat, &TttMove { index })
                .expect("legal move")
                .0;
        }
        state
    }

    #[test]
    fn x_moves_first() {
        let rules = TttRules;
        let state = rules.initial_state();
        let turn = rules.turn(&state);
        assert_eq!(turn.number, 1);
        assert_eq!(turn.awaiting, vec![Seat::First]);
        assert_eq!(rules.legal_actions(&state, Seat::First).len(), 9);
        assert!(rules.legal_actions(&state, Seat::Second).is_empty());
    }

    #[test]
    fn occupied_cell_is_rejected() {
        let rules = TttRules;
        let state = play(&rules, &[4]);
        let err = rules
            .apply_action(&state, Seat::Second, &TttMove { index: 4 })
            .unwrap_err();
        assert!(matches!(err, RulesError::IllegalAction(_)));
    }

    #[test]
    fn out_of_turn_is_rejected() {
        let rules = TttRules;
        let state = rules.initial_state();
        let err = rules
            .apply_action(&state, Seat::Second, &TttMove { index: 0 })
            .unwrap_err();
        assert_eq!(err, RulesError::NotSeatsTurn { actual: "O" });
    }

    #[test]
    fn off_board_is_rejected() {
        let rules = TttRules;
        let state = rules.initial_state();
        assert!(rules
            .apply_action(&state, Seat::First, &TttMove { index: 9 })
            .is_err());
    }

    #[test]
    fn diagonal_wins_for_o() {
        let rules = TttRules;
        // X: 0, 1, 5   O: 2, 4, 6
        let state = play(&rules, &[0, 2, 1, 4, 5, 6]);
        let terminal = rules.is_terminal(&state).expect("terminal");
        assert_eq!(terminal.outcome.winner(), Some(Seat::Second));
        assert_eq!(terminal.reason, EndReason::ThreeInRow);
        assert_eq!(state.winning_line, Some([2, 4, 6]));
        assert!(rules.turn(&state).awaiting.is_empty());
    }

    #[test]
    fn full_board_without_line_is_draw() {
        let rules = TttRules;
        // X O X
        // X O O
        // O X X
        let state = play(&rules, &[0, 1, 2, 4, 3, 5, 7, 6, 8]);
        let terminal = rules.is_terminal(&state).expect("terminal");
        assert_eq!(terminal.outcome.winner(), None);
        assert_eq!(terminal.reason, EndReason::BoardFull);
    }

    #[test]
    fn finished_game_rejects_moves() {
        let rules = TttRules;
        let state = play(&rules, &[0, 3, 1, 4, 2]);
        assert_eq!(
            rules.apply_action(&state, Seat::Second, &TttMove { index: 8 }),
            Err(RulesError::GameOver)
        );
    }
}
