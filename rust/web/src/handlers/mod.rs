pub mod battle;
pub mod game;
pub mod health;
pub mod history;
pub mod matchmaking;
pub mod settings;
pub mod socket;
pub mod sse;

use crate::errors::{IdentityRequired, IntoErrorResponse};
use crate::session::Identity;
use serde::de::DeserializeOwned;
use serde::Serialize;
use warp::http::{self, StatusCode};
use warp::hyper::body::Bytes;
use warp::reply::{self, Response};
use warp::{Filter, Rejection, Reply};

pub use battle::BotJoinRequest;
pub use game::{ActionRequest, ChatRequest, ClaimRequest, JoinRequest, RespondDrawRequest};
pub use health::{health, metrics};
pub use history::GetHistoryQuery;
pub use settings::{UpdateFieldRequest, UpdateSettingsRequest};
pub use socket::{ClientIntent, SocketQuery};
pub use sse::stream_events;

/// A request body that failed to parse.
#[derive(Debug)]
pub struct MalformedBody(pub String);

impl warp::reject::Reject for MalformedBody {}

/// Caller identity from the `x-player-id` / `x-player-name` headers.
pub fn identity() -> impl Filter<Extract = (Option<Identity>,), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-player-id")
        .and(warp::header::optional::<String>("x-player-name"))
        .map(|id: Option<String>, name: Option<String>| make_identity(id, name))
}

/// `None` for a missing, blank or reserved id.
pub(crate) fn make_identity(id: Option<String>, name: Option<String>) -> Option<Identity> {
    let id = id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty())?;
    if Identity::is_reserved_id(&id) {
        tracing::debug!(player = %id, "reserved player id refused");
        return None;
    }
    Some(match name.map(|name| name.trim().to_string()) {
        Some(name) if !name.is_empty() => Identity::new(id, name),
        _ => Identity::from_id(id),
    })
}

/// JSON body where an empty body means `T::default()`.
pub fn optional_json<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Default + Send + 'static,
{
    warp::body::bytes().and_then(|body: Bytes| async move {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        serde_json::from_slice(&body)
            .map_err(|err| warp::reject::custom(MalformedBody(err.to_string())))
    })
}

pub(crate) fn require_identity(identity: Option<Identity>) -> Result<Identity, Response> {
    identity.ok_or_else(|| IdentityRequired.into_http_response())
}

pub(crate) fn success_response<T>(status: StatusCode, body: T) -> Response
where
    T: Serialize,
{
    reply::with_status(reply::json(&body), status).into_response()
}

pub(crate) fn empty_response(status: StatusCode) -> Response {
    let mut response = Response::new(warp::hyper::Body::empty());
    *response.status_mut() = status;
    response
}

pub(crate) fn error_response(err: impl IntoErrorResponse) -> Response {
    err.into_http_response()
}

/// Map rejections that escaped every route onto the JSON error format.
pub async fn handle_rejection(rejection: Rejection) -> Result<Response, std::convert::Infallible> {
    use crate::errors::ErrorResponse;

    let (status, error, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not_found", "no such route".to_string())
    } else if let Some(MalformedBody(message)) = rejection.find::<MalformedBody>() {
        (StatusCode::BAD_REQUEST, "invalid_request", message.clone())
    } else if let Some(err) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
    } else if let Some(err) = rejection.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            "method not allowed".to_string(),
        )
    } else if rejection.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "unsupported_media_type",
            "expected a JSON body".to_string(),
        )
    } else {
        tracing::error!(rejection = ?rejection, "unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "unhandled rejection".to_string(),
        )
    };

    let mut response = ErrorResponse::new(error, message).into_response(status);
    if status == StatusCode::METHOD_NOT_ALLOWED {
        response
            .headers_mut()
            .insert(http::header::ALLOW, http::HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE"));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_requires_a_non_empty_id() {
        assert!(make_identity(None, Some("Ann".into())).is_none());
        assert!(make_identity(Some("  ".into()), None).is_none());
        assert_eq!(
            make_identity(Some("ann".into()), None),
            Some(Identity::from_id("ann"))
        );
        assert_eq!(
            make_identity(Some("ann".into()), Some(" Ann ".into())),
            Some(Identity::new("ann", "Ann"))
        );
    }

    #[test]
    fn bot_ids_cannot_be_claimed_by_clients() {
        assert!(make_identity(Some("bot:random".into()), None).is_none());
        assert!(make_identity(Some(" bot:heuristic:1a2b3c4d ".into()), Some("Mallory".into())).is_none());
        assert!(make_identity(Some("robot".into()), None).is_some());
    }

    #[tokio::test]
    async fn identity_filter_drops_reserved_ids() {
        let identity = warp::test::request()
            .header("x-player-id", "bot:random")
            .filter(&identity())
            .await
            .expect("filter");
        assert!(identity.is_none());
    }

    #[tokio::test]
    async fn optional_json_accepts_empty_bodies() {
        #[derive(Debug, Default, serde::Deserialize, PartialEq)]
        struct Body {
            seat: Option<String>,
        }

        let filter = optional_json::<Body>();
        let empty = warp::test::request()
            .method("POST")
            .filter(&filter)
            .await
            .expect("empty body");
        assert_eq!(empty, Body::default());

        let parsed = warp::test::request()
            .method("POST")
            .body(r#"{"seat":"X"}"#)
            .filter(&filter)
            .await
            .expect("json body");
        assert_eq!(parsed.seat.as_deref(), Some("X"));

        assert!(warp::test::request()
            .method("POST")
            .body("{not json")
            .filter(&filter)
            .await
            .is_err());
    }
}
