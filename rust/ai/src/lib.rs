//! # gambit-ai: Automatic players for lobby games
//!
//! Picks actions on behalf of a seat when nobody else will: when a turn
//! clock runs out and the game falls back to auto-play, and for bot seats.
//!
//! ## Core Components
//!
//! - [`AutoPlayer`] - Trait for choosing an action for one seat
//! - [`random`] - Uniformly random legal action, works for every game
//! - [`chess`] - Capture/check/centre heuristic for chess
//! - [`ttt`] - Win/block/centre heuristic for tic-tac-toe
//! - [`create_player`] - Factory by strategy name
//!
//! ## Quick Start
//!
//! ```rust
//! use gambit_ai::create_player;
//! use gambit_engine::chess::ChessRules;
//! use gambit_engine::rules::GameRules;
//! use gambit_engine::seat::Seat;
//!
//! let rules = ChessRules;
//! let state = rules.initial_state();
//! let player = create_player::<ChessRules>("heuristic").expect("known strategy");
//!
//! let mut rng = rand::rng();
//! let action = player
//!     .choose_action(&rules, &state, Seat::First, &mut rng)
//!     .expect("white has moves");
//! assert!(rules.legal_actions(&state, Seat::First).contains(&action));
//! ```
//!
//! ## Strategies
//!
//! - `"random"` - every game
//! - `"heuristic"` - chess and tic-tac-toe

use gambit_engine::chess::ChessRules;
use gambit_engine::rps::RpsRules;
use gambit_engine::rules::GameRules;
use gambit_engine::seat::Seat;
use gambit_engine::ttt::TttRules;
use rand::RngCore;

pub mod chess;
pub mod random;
pub mod ttt;

pub use random::RandomPlayer;

/// Chooses an action for a seat.
///
/// Implementations must only ever return an action from
/// [`GameRules::legal_actions`] for that seat, and `None` exactly when that
/// list is empty.
///
/// # Example Implementation
///
/// ```rust
/// use gambit_ai::AutoPlayer;
/// use gambit_engine::rules::GameRules;
/// use gambit_engine::seat::Seat;
/// use gambit_engine::ttt::{TttMove, TttRules, TttState};
/// use rand::RngCore;
///
/// struct LowestCell;
///
/// impl AutoPlayer<TttRules> for LowestCell {
///     fn choose_action(
///         &self,
///         rules: &TttRules,
///         state: &TttState,
///         seat: Seat,
///         _rng: &mut dyn RngCore,
///     ) -> Option<TttMove> {
///         rules.legal_actions(state, seat).into_iter().next()
///     }
///
///     fn name(&self) -> &str {
///         "lowest-cell"
///     }
/// }
/// ```
pub trait AutoPlayer<R: GameRules>: Send + Sync {
    fn choose_action(
        &self,
        rules: &R,
        state: &R::State,
        seat: Seat,
        rng: &mut dyn RngCore,
    ) -> Option<R::Action>;

    fn name(&self) -> &str;
}

/// Game types that offer named auto-play strategies.
pub trait Strategies: GameRules + Sized {
    /// Strategy names accepted by [`create_player`] for this game.
    fn strategy_names() -> &'static [&'static str];

    fn strategy(name: &str) -> Option<Box<dyn AutoPlayer<Self>>>;
}

impl Strategies for ChessRules {
    fn strategy_names() -> &'static [&'static str] {
        &["random", "heuristic"]
    }

    fn strategy(name: &str) -> Option<Box<dyn AutoPlayer<Self>>> {
        match name {
            "random" => Some(Box::new(RandomPlayer)),
            "heuristic" => Some(Box::new(chess::ChessHeuristic::default())),
            _ => None,
        }
    }
}

impl Strategies for TttRules {
    fn strategy_names() -> &'static [&'static str] {
        &["random", "heuristic"]
    }

    fn strategy(name: &str) -> Option<Box<dyn AutoPlayer<Self>>> {
        match name {
            "random" => Some(Box::new(RandomPlayer)),
            "heuristic" => Some(Box::new(ttt::TttHeuristic)),
            _ => None,
        }
    }
}

impl Strategies for RpsRules {
    fn strategy_names() -> &'static [&'static str] {
        &["random"]
    }

    fn strategy(name: &str) -> Option<Box<dyn AutoPlayer<Self>>> {
        match name {
            "random" => Some(Box::new(RandomPlayer)),
            _ => None,
        }
    }
}

/// Factory function to create automatic players by strategy name.
///
/// Returns `None` for names the game does not offer; callers decide how to
/// degrade.
///
/// # Example
///
/// ```rust
/// use gambit_ai::create_player;
/// use gambit_engine::rps::RpsRules;
///
/// assert_eq!(create_player::<RpsRules>("random").map(|p| p.name().to_string()).as_deref(), Some("random"));
/// assert!(create_player::<RpsRules>("heuristic").is_none());
/// ```
pub fn create_player<R: Strategies>(name: &str) -> Option<Box<dyn AutoPlayer<R>>> {
    R::strategy(name)
}
