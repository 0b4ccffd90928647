//! Server-side choice of actions for timed-out and bot seats.
//!
//! Wraps the strategies of `gambit_ai` so that the coordinator always gets
//! a player back: unknown strategy names degrade to uniform random play.

use gambit_ai::{create_player, AutoPlayer, RandomPlayer, Strategies};
use gambit_engine::{GameRules, Seat};
use rand::RngCore;

/// Strategy by name, falling back to random for names the game lacks.
pub fn resolve_player<R: Strategies>(name: &str) -> Box<dyn AutoPlayer<R>> {
    match create_player::<R>(name) {
        Some(player) => player,
        None => {
            tracing::warn!(
                strategy = %name,
                available = ?R::strategy_names(),
                "unknown auto-play strategy, using random"
            );
            Box::new(RandomPlayer)
        }
    }
}

/// Action for `seat` picked by `strategy`. A strategy that returns nothing,
/// or something the rules reject, is replaced by a random legal action.
pub fn choose_action<R: Strategies>(
    rules: &R,
    state: &R::State,
    seat: Seat,
    strategy: &str,
    rng: &mut dyn RngCore,
) -> Option<R::Action> {
    let player = resolve_player::<R>(strategy);
    if let Some(action) = player.choose_action(rules, state, seat, rng) {
        if rules.apply_action(state, seat, &action).is_ok() {
            return Some(action);
        }
        tracing::error!(
            strategy = %player.name(),
            ?action,
            "auto-player proposed an illegal action"
        );
        debug_assert!(false, "auto-player proposed an illegal action");
    }
    <RandomPlayer as AutoPlayer<R>>::choose_action(&RandomPlayer, rules, state, seat, rng)
}

/// Strategy names a game accepts for bots.
pub fn strategy_names<R: Strategies>() -> &'static [&'static str] {
    R::strategy_names()
}

pub fn is_known_strategy<R: GameRules + Strategies>(name: &str) -> bool {
    R::strategy_names().contains(&name)
}
