use gambit_engine::GameKind;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error;

/// What happens to the awaited seats when a turn or round clock runs out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Play a legal action for every awaited seat.
    AutoPlay,
    /// End the match against the awaited seats.
    Forfeit,
}

impl TimeoutPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "auto_play" => Some(TimeoutPolicy::AutoPlay),
            "forfeit" => Some(TimeoutPolicy::Forfeit),
            _ => None,
        }
    }
}

/// Per game kind tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameSettings {
    /// Turn (or round) clock in seconds; 0 leaves the game untimed.
    pub turn_seconds: u64,
    pub on_timeout: TimeoutPolicy,
    /// Strategy name used for timeout fallbacks.
    pub autoplay_strategy: String,
    pub persist_history: bool,
}

impl GameSettings {
    pub fn defaults_for(kind: GameKind) -> Self {
        match kind {
            GameKind::Chess => Self {
                turn_seconds: 0,
                on_timeout: TimeoutPolicy::AutoPlay,
                autoplay_strategy: "heuristic".to_string(),
                persist_history: true,
            },
            GameKind::RockPaperScissors => Self {
                turn_seconds: 3,
                on_timeout: TimeoutPolicy::AutoPlay,
                autoplay_strategy: "random".to_string(),
                persist_history: false,
            },
            GameKind::TicTacToe => Self {
                turn_seconds: 5,
                on_timeout: TimeoutPolicy::AutoPlay,
                autoplay_strategy: "random".to_string(),
                persist_history: false,
            },
        }
    }

    fn validate(&self, kind: GameKind) -> Result<(), SettingsError> {
        if self.turn_seconds > 3600 {
            return Err(SettingsError::InvalidValue(format!(
                "{kind}.turn_seconds must be at most 3600"
            )));
        }
        if self.autoplay_strategy.trim().is_empty() {
            return Err(SettingsError::InvalidValue(format!(
                "{kind}.autoplay_strategy cannot be empty"
            )));
        }
        Ok(())
    }
}

/// Runtime-tunable settings, editable through the settings API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppSettings {
    /// Idle sessions older than this are torn down by the sweeper.
    pub session_timeout_minutes: u64,
    /// How long a seat must stay disconnected before the opponent may claim.
    pub abandon_grace_seconds: u64,
    pub bot_move_delay_ms: u64,
    pub chess: GameSettings,
    pub rps: GameSettings,
    pub ttt: GameSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            session_timeout_minutes: 30,
            abandon_grace_seconds: 60,
            bot_move_delay_ms: 500,
            chess: GameSettings::defaults_for(GameKind::Chess),
            rps: GameSettings::defaults_for(GameKind::RockPaperScissors),
            ttt: GameSettings::defaults_for(GameKind::TicTacToe),
        }
    }
}

impl AppSettings {
    pub fn game(&self, kind: GameKind) -> &GameSettings {
        match kind {
            GameKind::Chess => &self.chess,
            GameKind::RockPaperScissors => &self.rps,
            GameKind::TicTacToe => &self.ttt,
        }
    }

    fn game_mut(&mut self, kind: GameKind) -> &mut GameSettings {
        match kind {
            GameKind::Chess => &mut self.chess,
            GameKind::RockPaperScissors => &mut self.rps,
            GameKind::TicTacToe => &mut self.ttt,
        }
    }

    /// Reject values the lobby cannot run with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.session_timeout_minutes == 0 {
            return Err(SettingsError::InvalidValue(
                "session_timeout_minutes must be greater than 0".to_string(),
            ));
        }

        if self.bot_move_delay_ms > 60_000 {
            return Err(SettingsError::InvalidValue(
                "bot_move_delay_ms must be at most 60000".to_string(),
            ));
        }

        for kind in GameKind::ALL {
            self.game(kind).validate(kind)?;
        }

        Ok(())
    }
}

/// The live settings every coordinator reads when a session starts a match.
#[derive(Debug, Default)]
pub struct SettingsStore {
    current: RwLock<AppSettings>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: AppSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        Ok(Self {
            current: RwLock::new(settings),
        })
    }

    pub fn get(&self) -> Result<AppSettings, SettingsError> {
        let current = self.current.read().map_err(|_| SettingsError::StoragePoisoned)?;
        Ok(current.clone())
    }

    /// Edit a copy and publish it only if the edit and validation both pass.
    fn apply(
        &self,
        edit: impl FnOnce(&mut AppSettings) -> Result<(), SettingsError>,
    ) -> Result<AppSettings, SettingsError> {
        let mut current = self.current.write().map_err(|_| SettingsError::StoragePoisoned)?;
        let mut draft = current.clone();
        edit(&mut draft)?;
        draft.validate()?;
        *current = draft.clone();
        Ok(draft)
    }

    /// Replace everything at once.
    pub fn update(&self, settings: AppSettings) -> Result<AppSettings, SettingsError> {
        let updated = self.apply(|draft| {
            *draft = settings;
            Ok(())
        })?;
        tracing::info!("settings replaced");
        Ok(updated)
    }

    /// Set one value by key: a top-level name such as `abandon_grace_seconds`,
    /// or `<kind>.<name>` such as `rps.turn_seconds`.
    pub fn update_field(
        &self,
        field: &str,
        value: serde_json::Value,
    ) -> Result<AppSettings, SettingsError> {
        let updated = self.apply(|draft| set_field(draft, field, &value))?;
        tracing::info!(field, %value, "setting changed");
        Ok(updated)
    }

    pub fn reset(&self) -> Result<AppSettings, SettingsError> {
        self.update(AppSettings::default())
    }
}

fn set_field(
    settings: &mut AppSettings,
    field: &str,
    value: &serde_json::Value,
) -> Result<(), SettingsError> {
    let Some((kind, key)) = field.split_once('.') else {
        let slot = match field {
            "session_timeout_minutes" => &mut settings.session_timeout_minutes,
            "abandon_grace_seconds" => &mut settings.abandon_grace_seconds,
            "bot_move_delay_ms" => &mut settings.bot_move_delay_ms,
            _ => return Err(unknown_field(field)),
        };
        *slot = as_number(field, value)?;
        return Ok(());
    };

    let kind = GameKind::from_slug(kind).ok_or_else(|| unknown_field(field))?;
    let game = settings.game_mut(kind);
    let invalid = |expected: &str| SettingsError::InvalidValue(format!("{field} must be {expected}"));
    match key {
        "turn_seconds" => game.turn_seconds = as_number(field, value)?,
        "on_timeout" => {
            game.on_timeout = value
                .as_str()
                .and_then(TimeoutPolicy::parse)
                .ok_or_else(|| invalid("\"auto_play\" or \"forfeit\""))?;
        }
        "autoplay_strategy" => {
            game.autoplay_strategy = value.as_str().ok_or_else(|| invalid("a string"))?.to_string();
        }
        "persist_history" => game.persist_history = value.as_bool().ok_or_else(|| invalid("a boolean"))?,
        _ => return Err(unknown_field(field)),
    }
    Ok(())
}

fn as_number(field: &str, value: &serde_json::Value) -> Result<u64, SettingsError> {
    value
        .as_u64()
        .ok_or_else(|| SettingsError::InvalidValue(format!("{field} must be a number")))
}

fn unknown_field(field: &str) -> SettingsError {
    SettingsError::InvalidValue(format!("unknown field: {field}"))
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid settings value: {0}")]
    InvalidValue(String),
    #[error("Settings storage poisoned")]
    StoragePoisoned,
}

impl crate::errors::IntoErrorResponse for SettingsError {
    fn status_code(&self) -> warp::http::StatusCode {
        use warp::http::StatusCode;
        match self {
            SettingsError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            SettingsError::StoragePoisoned => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            SettingsError::InvalidValue(_) => "invalid_settings",
            SettingsError::StoragePoisoned => "settings_storage_error",
        }
    }

    fn error_message(&self) -> String {
        self.to_string()
    }

    fn severity(&self) -> crate::errors::ErrorSeverity {
        match self {
            SettingsError::InvalidValue(_) => crate::errors::ErrorSeverity::Client,
            SettingsError::StoragePoisoned => crate::errors::ErrorSeverity::Critical,
        }
    }
}
