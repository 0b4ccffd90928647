use super::{error_response, success_response};
use crate::settings::{AppSettings, GameSettings, SettingsError, SettingsStore};
use serde::Deserialize;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::Response;

/// `PUT /api/settings` body; absent fields keep their current value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateSettingsRequest {
    pub session_timeout_minutes: Option<u64>,
    pub abandon_grace_seconds: Option<u64>,
    pub bot_move_delay_ms: Option<u64>,
    pub chess: Option<GameSettings>,
    pub rps: Option<GameSettings>,
    pub ttt: Option<GameSettings>,
}

impl UpdateSettingsRequest {
    fn merged_over(self, mut base: AppSettings) -> AppSettings {
        base.session_timeout_minutes = self.session_timeout_minutes.unwrap_or(base.session_timeout_minutes);
        base.abandon_grace_seconds = self.abandon_grace_seconds.unwrap_or(base.abandon_grace_seconds);
        base.bot_move_delay_ms = self.bot_move_delay_ms.unwrap_or(base.bot_move_delay_ms);
        for (patch, slot) in [
            (self.chess, &mut base.chess),
            (self.rps, &mut base.rps),
            (self.ttt, &mut base.ttt),
        ] {
            if let Some(game) = patch {
                *slot = game;
            }
        }
        base
    }
}

/// `PATCH /api/settings/field` body.
#[derive(Debug, Deserialize)]
pub struct UpdateFieldRequest {
    /// Top-level key or `{kind}.{key}`, e.g. `ttt.turn_seconds`.
    pub field: String,
    pub value: serde_json::Value,
}

fn respond(result: Result<AppSettings, SettingsError>) -> Response {
    match result {
        Ok(settings) => success_response(StatusCode::OK, settings),
        Err(err) => error_response(err),
    }
}

pub async fn get_settings(store: Arc<SettingsStore>) -> Response {
    respond(store.get())
}

pub async fn update_settings(
    store: Arc<SettingsStore>,
    request: UpdateSettingsRequest,
) -> Response {
    respond(
        store
            .get()
            .and_then(|current| store.update(request.merged_over(current))),
    )
}

pub async fn update_field(store: Arc<SettingsStore>, request: UpdateFieldRequest) -> Response {
    respond(store.update_field(&request.field, request.value))
}

pub async fn reset_settings(store: Arc<SettingsStore>) -> Response {
    respond(store.reset())
}
