//! Bot battles and bot seats.

use super::{empty_response, error_response, require_identity, success_response};
use crate::autoplay;
use crate::coordinator::{BattleOptions, Coordinator};
use crate::session::{Identity, SessionCode};
use gambit_ai::Strategies;
use serde::{Deserialize, Serialize};
use warp::http::StatusCode;
use warp::reply::Response;

#[derive(Debug, Default, Deserialize)]
pub struct BotJoinRequest {
    #[serde(default)]
    pub strategy: Option<String>,
}

#[derive(Debug, Serialize)]
struct BattleCheck {
    code: SessionCode,
    battle: bool,
}

#[derive(Debug, Serialize)]
struct BattleProfiles {
    strategies: &'static [&'static str],
}

/// `POST /api/{kind}/battles`
///
/// Body (optional): `{"first": "heuristic", "second": "random", "move_delay_ms": 250}`.
pub async fn create_battle<R: Strategies>(
    coordinator: Coordinator<R>,
    identity: Option<Identity>,
    request: BattleOptions,
) -> Response {
    let host = match require_identity(identity) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    match coordinator.create_battle(host, request) {
        Ok(snapshot) => success_response(StatusCode::CREATED, snapshot),
        Err(err) => error_response(err),
    }
}

pub async fn list_battles<R: Strategies>(coordinator: Coordinator<R>) -> Response {
    success_response(StatusCode::OK, coordinator.list_battles())
}

/// `GET /api/{kind}/battles/profiles` lists the strategies a bot can use.
pub async fn battle_profiles<R: Strategies>() -> Response {
    success_response(
        StatusCode::OK,
        BattleProfiles {
            strategies: autoplay::strategy_names::<R>(),
        },
    )
}

pub async fn check_battle<R: Strategies>(coordinator: Coordinator<R>, code: SessionCode) -> Response {
    match coordinator.is_battle(&code) {
        Ok(battle) => success_response(StatusCode::OK, BattleCheck { code, battle }),
        Err(err) => error_response(err),
    }
}

/// `DELETE /api/{kind}/battles/{code}`, creator only.
pub async fn stop_battle<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Option<Identity>,
) -> Response {
    let identity = match require_identity(identity) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    match coordinator.stop_battle(&code, &identity.id) {
        Ok(()) => empty_response(StatusCode::NO_CONTENT),
        Err(err) => error_response(err),
    }
}

/// `POST /api/{kind}/sessions/{code}/bot` fills the caller's waiting
/// session with a bot.
pub async fn add_bot<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Option<Identity>,
    request: BotJoinRequest,
) -> Response {
    let identity = match require_identity(identity) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    match coordinator.add_bot(&code, &identity.id, request.strategy.as_deref()) {
        Ok(snapshot) => success_response(StatusCode::OK, snapshot),
        Err(err) => error_response(err),
    }
}
