use crate::AutoPlayer;
use gambit_engine::rules::GameRules;
use gambit_engine::seat::Seat;
use gambit_engine::ttt::{LINES, Mark, TttMove, TttRules, TttState};
use rand::RngCore;
use rand::seq::IndexedRandom;

const CORNERS: [u8; 4] = [0, 2, 6, 8];
const CENTRE: u8 = 4;

/// Win if possible, else block, else centre, else a corner, else anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct TttHeuristic;

impl TttHeuristic {
    /// An empty cell that would complete a line for `mark`.
    fn completing_cell(state: &TttState, mark: Mark) -> Option<u8> {
        LINES.iter().find_map(|line| {
            let owned = line
                .iter()
                .filter(|&&idx| state.board[idx as usize] == Some(mark))
                .count();
            let empty: Vec<u8> = line
                .iter()
                .copied()
                .filter(|&idx| state.board[idx as usize].is_none())
                .collect();
            (owned == 2 && empty.len() == 1).then(|| empty[0])
        })
    }
}

impl AutoPlayer<TttRules> for TttHeuristic {
    fn choose_action(
        &self,
        rules: &TttRules,
        state: &TttState,
        seat: Seat,
        rng: &mut dyn RngCore,
    ) -> Option<TttMove> {
        let legal = rules.legal_actions(state, seat);
        if legal.is_empty() {
            return None;
        }
        let mine = Mark::for_seat(seat);
        let theirs = Mark::for_seat(seat.other());

        let preferred = Self::completing_cell(state, mine)
            .or_else(|| Self::completing_cell(state, theirs))
            .or_else(|| state.board[CENTRE as usize].is_none().then_some(CENTRE));
        if let Some(index) = preferred {
            return Some(TttMove { index });
        }

        let corners: Vec<TttMove> = legal
            .iter()
            .copied()
            .filter(|m| CORNERS.contains(&m.index))
            .collect();
        corners
            .choose(&mut *rng)
            .or_else(|| legal.choose(&mut *rng))
            .copied()
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn play(moves: &[u8]) -> TttState {
        let rules = TttRules;
        moves.iter().fold(rules.initial_state(), |state, &index| {
            let seat = state.to_move.seat();
            rules
                .apply_action(&state, seat, &TttMove { index })
                .expect("legal")
                .0
        })
    }

    fn choose(state: &TttState, seat: Seat) -> u8 {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        TttHeuristic
            .choose_action(&TttRules, state, seat, &mut rng)
            .expect("move")
            .index
    }

    #[test]
    fn completes_own_line_before_blocking() {
        // X: 0, 1   O: 3, 4   -> X to move wins at 2 rather than blocking 5.
        let state = play(&[0, 3, 1, 4]);
        assert_eq!(choose(&state, Seat::First), 2);
    }

    #[test]
    fn blocks_opponent_line() {
        // X: 0, 1   O: 4   -> O must block at 2.
        let state = play(&[0, 4, 1]);
        assert_eq!(choose(&state, Seat::Second), 2);
    }

    #[test]
    fn opens_in_the_centre() {
        let state = TttRules.initial_state();
        assert_eq!(choose(&state, Seat::First), CENTRE);
    }

    #[test]
    fn answers_centre_with_a_corner() {
        let state = play(&[4]);
        assert!(CORNERS.contains(&choose(&state, Seat::Second)));
    }
}
