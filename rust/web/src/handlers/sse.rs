use super::error_response;
use crate::coordinator::Coordinator;
use crate::events::RoomEvent;
use crate::registry::normalize_code;
use crate::session::{Identity, SessionCode};
use gambit_ai::Strategies;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::StreamExt;
use warp::http;
use warp::reply::{self, Response};
use warp::sse;
use warp::Reply;

const KEEP_ALIVE_EVERY: Duration = Duration::from_secs(15);

/// `GET /api/{kind}/sessions/{code}/events`
///
/// Read-only room feed: a personal snapshot first, then every room event
/// until the session is torn down. Subscribing does not join the room.
pub async fn stream_events<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Option<Identity>,
) -> Response {
    let code = normalize_code(&code);
    let subscription = coordinator.bus().subscribe(code.clone());
    let viewer = identity.as_ref().map(|identity| identity.id.as_str());
    let snapshot = match coordinator.snapshot(&code, viewer) {
        Ok(snapshot) => snapshot,
        Err(err) => return error_response(err),
    };

    let initial = RoomEvent::SessionSnapshot {
        code,
        snapshot: Box::new(snapshot),
    };
    let stream = tokio_stream::once(initial).chain(subscription.into_stream());
    let stream = stream.map(|event| Ok::<_, Infallible>(render_event(&event)));

    let feed = sse::keep_alive()
        .interval(KEEP_ALIVE_EVERY)
        .text(":ping\n")
        .stream(stream);
    reply::with_header(sse::reply(feed), http::header::CACHE_CONTROL, "no-cache").into_response()
}

fn render_event(event: &RoomEvent) -> sse::Event {
    match serde_json::to_string(event) {
        Ok(json) => sse::Event::default().event(event.name()).data(json),
        Err(err) => {
            tracing::error!(event = event.name(), error = %err, "room event not serializable");
            let body = serde_json::json!({ "type": "error", "error": "internal_error" });
            sse::Event::default().event("error").data(body.to_string())
        }
    }
}
