//! REST surface of the session coordinator.
//!
//! Every handler resolves the caller from the identity headers, calls one
//! coordinator operation, and renders its result or error. Nothing here
//! touches session state directly, so REST and socket callers share one
//! consistent view of every session.

use super::{empty_response, error_response, require_identity, success_response};
use crate::coordinator::{ClaimOutcome, Coordinator, CreateOptions};
use crate::session::{Identity, SessionCode, SessionError};
use gambit_ai::Strategies;
use serde::Deserialize;
use warp::http::StatusCode;
use warp::reply::Response;

#[derive(Debug, Default, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub seat: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    /// Game-specific action, e.g. `{"from": "e2", "to": "e4"}` for chess.
    pub action: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct RespondDrawRequest {
    pub accept: bool,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub outcome: ClaimOutcome,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Parse a game-specific action out of its JSON form.
pub fn parse_action<R: Strategies>(value: serde_json::Value) -> Result<R::Action, SessionError> {
    serde_json::from_value(value)
        .map_err(|err| SessionError::IllegalAction(format!("malformed action: {err}")))
}

/// `GET /api/{kind}/sessions`
pub async fn list_sessions<R: Strategies>(coordinator: Coordinator<R>) -> Response {
    success_response(StatusCode::OK, coordinator.list_sessions())
}

/// `POST /api/{kind}/sessions`
///
/// Body (optional): `{"seat": "white" | "random", "opponent": "heuristic"}`.
/// Responds `201 Created` with the host's snapshot.
pub async fn create_session<R: Strategies>(
    coordinator: Coordinator<R>,
    identity: Option<Identity>,
    request: CreateOptions,
) -> Response {
    let host = match require_identity(identity) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    match coordinator.create_session(host, request) {
        Ok(snapshot) => success_response(StatusCode::CREATED, snapshot),
        Err(err) => error_response(err),
    }
}

/// `GET /api/{kind}/sessions/{code}`; legal actions are included when the
/// caller is seated and awaited.
pub async fn get_session<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Option<Identity>,
) -> Response {
    let viewer = identity.as_ref().map(|identity| identity.id.as_str());
    match coordinator.snapshot(&code, viewer) {
        Ok(snapshot) => success_response(StatusCode::OK, snapshot),
        Err(err) => error_response(err),
    }
}

pub async fn join_session<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Option<Identity>,
    request: JoinRequest,
) -> Response {
    with_identity(identity, |identity| {
        coordinator.take_seat(&code, identity, request.seat.as_deref())
    })
}

pub async fn submit_action<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Option<Identity>,
    request: ActionRequest,
) -> Response {
    with_identity(identity, |identity| {
        let action = parse_action::<R>(request.action)?;
        coordinator.submit_action(&code, &identity.id, action)
    })
}

pub async fn resign<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Option<Identity>,
) -> Response {
    with_identity(identity, |identity| coordinator.resign(&code, &identity.id))
}

pub async fn offer_draw<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Option<Identity>,
) -> Response {
    with_identity(identity, |identity| coordinator.offer_draw(&code, &identity.id))
}

pub async fn respond_draw<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Option<Identity>,
    request: RespondDrawRequest,
) -> Response {
    with_identity(identity, |identity| {
        coordinator.respond_draw(&code, &identity.id, request.accept)
    })
}

pub async fn claim_abandonment<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Option<Identity>,
    request: ClaimRequest,
) -> Response {
    with_identity(identity, |identity| {
        coordinator.claim_abandonment(&code, &identity.id, request.outcome)
    })
}

pub async fn continue_session<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Option<Identity>,
) -> Response {
    with_identity(identity, |identity| {
        coordinator.continue_session(&code, &identity.id)
    })
}

/// `POST …/{code}/chat`, `204 No Content` once broadcast.
pub async fn chat<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Option<Identity>,
    request: ChatRequest,
) -> Response {
    let identity = match require_identity(identity) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    match coordinator.chat(&code, &identity.id, &request.message) {
        Ok(()) => empty_response(StatusCode::NO_CONTENT),
        Err(err) => error_response(err),
    }
}

/// `DELETE /api/{kind}/sessions/{code}` tears a finished session down.
pub async fn end_session<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Option<Identity>,
) -> Response {
    let identity = match require_identity(identity) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    match coordinator.end_session(&code, &identity.id) {
        Ok(()) => empty_response(StatusCode::NO_CONTENT),
        Err(err) => error_response(err),
    }
}

fn with_identity<T, F>(identity: Option<Identity>, operation: F) -> Response
where
    T: serde::Serialize,
    F: FnOnce(Identity) -> Result<T, SessionError>,
{
    let identity = match require_identity(identity) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    match operation(identity) {
        Ok(body) => success_response(StatusCode::OK, body),
        Err(err) => error_response(err),
    }
}
