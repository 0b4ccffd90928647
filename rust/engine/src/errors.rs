use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RulesError {
    #[error("Illegal action: {0}")]
    IllegalAction(String),
    #[error("It's not {actual}'s turn")]
    NotSeatsTurn { actual: &'static str },
    #[error("Game is already over")]
    GameOver,
}

impl RulesError {
    pub fn illegal(reason: impl Into<String>) -> Self {
        RulesError::IllegalAction(reason.into())
    }
}
