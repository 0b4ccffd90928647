//! Uniformly random legal action.

use crate::AutoPlayer;
use gambit_engine::rules::GameRules;
use gambit_engine::seat::Seat;
use rand::RngCore;
use rand::seq::IndexedRandom;

/// Picks any legal action with equal probability. Works for every game.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPlayer;

impl<R: GameRules> AutoPlayer<R> for RandomPlayer {
    fn choose_action(
        &self,
        rules: &R,
        state: &R::State,
        seat: Seat,
        rng: &mut dyn RngCore,
    ) -> Option<R::Action> {
        rules.legal_actions(state, seat).choose(rng).cloned()
    }

    fn name(&self) -> &str {
        "random"
    }
}
