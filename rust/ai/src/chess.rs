//! Chess move heuristic.
//!
//! Greedy and shallow: take the most valuable piece on offer, otherwise give
//! check, otherwise (most of the time) grab a central square, otherwise any
//! legal move.

use crate::AutoPlayer;
use gambit_engine::chess::{ChessCandidate, ChessMove, ChessRules, ChessState};
use gambit_engine::rules::GameRules;
use gambit_engine::seat::Seat;
use rand::seq::IndexedRandom;
use rand::{Rng, RngCore};

const CENTER: [&str; 8] = ["d4", "d5", "e4", "e5", "c4", "c5", "f4", "f5"];

#[derive(Debug, Clone)]
pub struct ChessHeuristic {
    /// Probability of preferring a central square when nothing tactical is on.
    center_bias: f64,
}

impl Default for ChessHeuristic {
    fn default() -> Self {
        Self { center_bias: 0.7 }
    }
}

impl ChessHeuristic {
    pub fn with_center_bias(center_bias: f64) -> Self {
        Self {
            center_bias: center_bias.clamp(0.0, 1.0),
        }
    }

    fn pick(
        candidates: &[ChessCandidate],
        rng: &mut dyn RngCore,
        center_bias: f64,
    ) -> Option<ChessMove> {
        let best_capture = candidates.iter().map(|c| c.capture_value).max().unwrap_or(0);
        if best_capture > 0 {
            let captures: Vec<&ChessCandidate> = candidates
                .iter()
                .filter(|c| c.capture_value == best_capture)
                .collect();
            return captures.choose(&mut *rng).map(|c| c.action.clone());
        }

        let checks: Vec<&ChessCandidate> = candidates.iter().filter(|c| c.gives_check).collect();
        if let Some(check) = checks.choose(&mut *rng) {
            return Some(check.action.clone());
        }

        if rng.random_bool(center_bias) {
            let central: Vec<&ChessCandidate> = candidates
                .iter()
                .filter(|c| CENTER.contains(&c.target.as_str()))
                .collect();
            if let Some(central) = central.choose(&mut *rng) {
                return Some(central.action.clone());
            }
        }

        candidates.choose(&mut *rng).map(|c| c.action.clone())
    }
}

impl AutoPlayer<ChessRules> for ChessHeuristic {
    fn choose_action(
        &self,
        rules: &ChessRules,
        state: &ChessState,
        seat: Seat,
        rng: &mut dyn RngCore,
    ) -> Option<ChessMove> {
        if !rules.turn(state).is_awaiting(seat) {
            return None;
        }
        Self::pick(&rules.candidates(state), rng, self.center_bias)
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}
