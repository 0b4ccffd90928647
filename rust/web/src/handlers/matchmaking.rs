use super::{error_response, require_identity, success_response};
use crate::matchmaking::Matchmaker;
use crate::session::Identity;
use gambit_ai::Strategies;
use serde::Serialize;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::Response;

#[derive(Debug, Serialize)]
struct LeaveBody {
    removed: bool,
}

/// `POST /api/{kind}/queue`: join, or poll while queued.
pub async fn join<R: Strategies>(
    matchmaker: Arc<Matchmaker<R>>,
    identity: Option<Identity>,
) -> Response {
    let identity = match require_identity(identity) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    match matchmaker.join(identity) {
        Ok(status) => success_response(StatusCode::OK, status),
        Err(err) => error_response(err),
    }
}

/// `GET /api/{kind}/queue`
pub async fn status<R: Strategies>(
    matchmaker: Arc<Matchmaker<R>>,
    identity: Option<Identity>,
) -> Response {
    let identity = match require_identity(identity) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    match matchmaker.status(&identity.id) {
        Ok(status) => success_response(StatusCode::OK, status),
        Err(err) => error_response(err),
    }
}

/// `DELETE /api/{kind}/queue`
pub async fn leave<R: Strategies>(
    matchmaker: Arc<Matchmaker<R>>,
    identity: Option<Identity>,
) -> Response {
    let identity = match require_identity(identity) {
        Ok(identity) => identity,
        Err(response) => return response,
    };
    match matchmaker.leave(&identity.id) {
        Ok(removed) => success_response(StatusCode::OK, LeaveBody { removed }),
        Err(err) => error_response(err),
    }
}
