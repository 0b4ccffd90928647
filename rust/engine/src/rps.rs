//! Rock-paper-scissors, best of three, both seats pick every round.
//!
//! Picks stay hidden until both seats have locked in: the serialized state
//! only says *whether* a seat has picked, never *what*.

use crate::errors::RulesError;
use crate::rules::{GameKind, GameRules};
use crate::seat::{EndReason, Seat, Terminal, Turn};
use serde::{Deserialize, Serialize};

/// Round wins needed to take the match.
pub const WINS_NEEDED: u32 = 2;
/// Resolved rounds after which the match ends regardless of score.
pub const ROUND_CAP: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hand {
    Rock,
    Paper,
    Scissors,
}

impl Hand {
    pub const ALL: [Hand; 3] = [Hand::Rock, Hand::Paper, Hand::Scissors];

    pub fn beats(self, other: Hand) -> bool {
        matches!(
            (self, other),
            (Hand::Rock, Hand::Scissors) | (Hand::Paper, Hand::Rock) | (Hand::Scissors, Hand::Paper)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpsPick {
    pub choice: Hand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundRecord {
    pub round: u32,
    pub picks: [Hand; 2],
    pub winner: Option<Seat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpsState {
    pub round: u32,
    pub scores: [u32; 2],
    pub locked: [bool; 2],
    pub rounds: Vec<RoundRecord>,
    #[serde(skip)]
    picks: [Option<Hand>; 2],
}

impl RpsState {
    fn resolved_rounds(&self) -> u32 {
        self.rounds.len() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpsEffect {
    /// A seat has picked; the choice itself is withheld.
    Locked { seat: &'static str },
    RoundResolved {
        round: u32,
        p1: Hand,
        p2: Hand,
        winner: Option<&'static str>,
        scores: [u32; 2],
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RpsRules;

impl GameRules for RpsRules {
    type State = RpsState;
    type Action = RpsPick;
    type Effect = RpsEffect;

    fn kind(&self) -> GameKind {
        GameKind::RockPaperScissors
    }

    fn seat_label(&self, seat: Seat) -> &'static str {
        match seat {
            Seat::First => "p1",
            Seat::Second => "p2",
        }
    }

    fn initial_state(&self) -> RpsState {
        RpsState {
            round: 1,
            scores: [0, 0],
            locked: [false, false],
            rounds: Vec::new(),
            picks: [None, None],
        }
    }

    fn turn(&self, state: &RpsState) -> Turn {
        if self.is_terminal(state).is_some() {
            return Turn::closed(state.round);
        }
        let awaiting = Seat::ALL
            .into_iter()
            .filter(|seat| !state.locked[seat.index()])
            .collect();
        Turn::new(state.round, awaiting)
    }

    fn legal_actions(&self, state: &RpsState, seat: Seat) -> Vec<RpsPick> {
        if !self.turn(state).is_awaiting(seat) {
            return Vec::new();
        }
        Hand::ALL.into_iter().map(|choice| RpsPick { choice }).collect()
    }

    fn apply_action(
        &self,
        state: &RpsState,
        seat: Seat,
        action: &RpsPick,
    ) -> Result<(RpsState, RpsEffect), RulesError> {
        if self.is_terminal(state).is_some() {
            return Err(RulesError::GameOver);
        }
        if state.locked[seat.index()] {
            return Err(RulesError::illegal(format!(
                "{} already picked in round {}",
                self.seat_label(seat),
                state.round
            )));
        }

        let mut next = state.clone();
        next.picks[seat.index()] = Some(action.choice);
        next.locked[seat.index()] = true;

        let (Some(p1), Some(p2)) = (next.picks[0], next.picks[1]) else {
            return Ok((
                next,
                RpsEffect::Locked {
                    seat: self.seat_label(seat),
                },
            ));
        };

        let winner = if p1.beats(p2) {
            Some(Seat::First)
        } else if p2.beats(p1) {
            Some(Seat::Second)
        } else {
            None
        };
        if let Some(seat) = winner {
            next.scores[seat.index()] += 1;
        }
        let round = next.round;
        next.rounds.push(RoundRecord {
            round,
            picks: [p1, p2],
            winner,
        });
        next.picks = [None, None];
        next.locked = [false, false];
        if self.is_terminal(&next).is_none() {
            next.round += 1;
        }

        let effect = RpsEffect::RoundResolved {
            round,
            p1,
            p2,
            winner: winner.map(|seat| self.seat_label(seat)),
            scores: next.scores,
        };
        Ok((next, effect))
    }

    fn is_terminal(&self, state: &RpsState) -> Option<Terminal> {
        for seat in Seat::ALL {
            if state.scores[seat.index()] >= WINS_NEEDED {
                return Some(Terminal::win(seat, EndReason::ScoreReached));
            }
        }
        if state.resolved_rounds() >= ROUND_CAP {
            let [first, second] = state.scores;
            return Some(match first.cmp(&second) {
                std::cmp::Ordering::Greater => Terminal::win(Seat::First, EndReason::RoundLimit),
                std::cmp::Ordering::Less => Terminal::win(Seat::Second, EndReason::RoundLimit),
                std::cmp::Ordering::Equal => Terminal::draw(EndReason::RoundLimit),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round(rules: &RpsRules, state: &RpsState, p1: Hand, p2: Hand) -> (RpsState, RpsEffect) {
        let (state, _) = rules
            .apply_action(state, Seat::First, &RpsPick { choice: p1 })
            .expect("p1 pick");
        rules
            .apply_action(&state, Seat::Second, &RpsPick { choice: p2 })
            .expect("p2 pick")
    }

    #[test]
    fn pick_is_hidden_until_round_resolves() {
        let rules = RpsRules;
        let state = rules.initial_state();
        let (state, effect) = rules
            .apply_action(&state, Seat::First, &RpsPick { choice: Hand::Rock })
            .expect("pick");

        assert_eq!(effect, RpsEffect::Locked { seat: "p1" });
        let json = serde_json::to_value(&state).expect("serialize");
        assert!(!json.to_string().contains("rock"));
        assert_eq!(json["locked"], serde_json::json!([true, false]));

        let turn = rules.turn(&state);
        assert_eq!(turn.number, 1);
        assert_eq!(turn.awaiting, vec![Seat::Second]);
    }

    #[test]
    fn double_pick_in_one_round_is_rejected() {
        let rules = RpsRules;
        let state = rules.initial_state();
        let (state, _) = rules
            .apply_action(&state, Seat::Second, &RpsPick { choice: Hand::Paper })
            .expect("pick");
        let err = rules
            .apply_action(&state, Seat::Second, &RpsPick { choice: Hand::Rock })
            .unwrap_err();
        assert!(matches!(err, RulesError::IllegalAction(_)));
    }

    #[test]
    fn resolved_round_scores_and_advances() {
        let rules = RpsRules;
        let (state, effect) = round(&rules, &rules.initial_state(), Hand::Paper, Hand::Rock);
        assert_eq!(
            effect,
            RpsEffect::RoundResolved {
                round: 1,
                p1: Hand::Paper,
                p2: Hand::Rock,
                winner: Some("p1"),
                scores: [1, 0],
            }
        );
        assert_eq!(state.round, 2);
        assert_eq!(state.locked, [false, false]);
        assert_eq!(rules.turn(&state).awaiting, Seat::ALL.to_vec());
    }

    #[test]
    fn two_wins_end_the_match() {
        let rules = RpsRules;
        let (state, _) = round(&rules, &rules.initial_state(), Hand::Rock, Hand::Paper);
        let (state, _) = round(&rules, &state, Hand::Scissors, Hand::Rock);
        let terminal = rules.is_terminal(&state).expect("terminal");
        assert_eq!(terminal.outcome.winner(), Some(Seat::Second));
        assert_eq!(terminal.reason, EndReason::ScoreReached);
        assert_eq!(state.round, 2);
        assert!(rules.turn(&state).awaiting.is_empty());
    }

    #[test]
    fn round_cap_with_equal_scores_is_draw() {
        let rules = RpsRules;
        let (state, _) = round(&rules, &rules.initial_state(), Hand::Rock, Hand::Rock);
        let (state, _) = round(&rules, &state, Hand::Rock, Hand::Paper);
        let (state, _) = round(&rules, &state, Hand::Rock, Hand::Scissors);
        let terminal = rules.is_terminal(&state).expect("terminal");
        assert_eq!(terminal.outcome.winner(), None);
        assert_eq!(terminal.reason, EndReason::RoundLimit);
        assert_eq!(state.rounds.len(), 3);
    }

    #[test]
    fn round_cap_awards_higher_score() {
        let rules = RpsRules;
        let (state, _) = round(&rules, &rules.initial_state(), Hand::Rock, Hand::Rock);
        let (state, _) = round(&rules, &state, Hand::Paper, Hand::Paper);
        let (state, _) = round(&rules, &state, Hand::Paper, Hand::Rock);
        let terminal = rules.is_terminal(&state).expect("terminal");
        assert_eq!(terminal.outcome.winner(), Some(Seat::First));
        assert_eq!(terminal.reason, EndReason::RoundLimit);
    }
}
