//! # gambit-engine: Rules for the lobby's two-seat games
//!
//! Pure, synchronous rule sets behind a single [`rules::GameRules`] trait.
//! Nothing here knows about sessions, clocks or connections: a rule set
//! answers "whose turn is it", "is this action legal and what does it
//! produce", and "is the game over, and why".
//!
//! ## Core Modules
//!
//! - [`rules`] - The `GameRules` trait and the `GameKind` catalogue
//! - [`seat`] - Seats, turns, outcomes and the closed set of end reasons
//! - [`chess`] - Standard chess on top of `shakmaty`
//! - [`rps`] - Best-of-three rock-paper-scissors with hidden picks
//! - [`ttt`] - Tic-tac-toe
//! - [`errors`] - Error types for rejected actions
//!
//! ## Quick Start
//!
//! ```rust
//! use gambit_engine::chess::{ChessMove, ChessRules};
//! use gambit_engine::rules::GameRules;
//! use gambit_engine::seat::Seat;
//!
//! let rules = ChessRules;
//! let state = rules.initial_state();
//! let (state, effect) = rules
//!     .apply_action(&state, Seat::First, &ChessMove::new("e2", "e4"))
//!     .expect("legal opening move");
//!
//! assert_eq!(effect.san, "e4");
//! assert_eq!(rules.turn(&state).awaiting, vec![Seat::Second]);
//! ```
//!
//! ## Simultaneous Turns
//!
//! Rock-paper-scissors waits for both seats at once; the turn number only
//! advances when the round resolves:
//!
//! ```rust
//! use gambit_engine::rps::{Hand, RpsPick, RpsRules};
//! use gambit_engine::rules::GameRules;
//! use gambit_engine::seat::Seat;
//!
//! let rules = RpsRules;
//! let state = rules.initial_state();
//! let (state, _) = rules
//!     .apply_action(&state, Seat::First, &RpsPick { choice: Hand::Rock })
//!     .expect("pick");
//!
//! let turn = rules.turn(&state);
//! assert_eq!(turn.number, 1);
//! assert_eq!(turn.awaiting, vec![Seat::Second]);
//! ```

pub mod chess;
pub mod errors;
pub mod rps;
pub mod rules;
pub mod seat;
pub mod ttt;

pub use errors::RulesError;
pub use rules::{GameKind, GameRules};
pub use seat::{EndReason, Outcome, Seat, Terminal, Turn};
