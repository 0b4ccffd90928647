//! Realtime room connection.
//!
//! A socket joins the room as an observer (or reconnects its seat), gets a
//! personal snapshot, and from then on receives every room event. Intents
//! go through the same coordinator operations as the REST surface; a
//! rejected intent is answered with an `error` frame on the issuing socket
//! only. Closing the socket releases its room connection.

use super::game::parse_action;
use super::{error_response, make_identity};
use crate::coordinator::{ClaimOutcome, Coordinator};
use crate::errors::{IdentityRequired, IntoErrorResponse};
use crate::events::RoomEvent;
use crate::registry::normalize_code;
use crate::session::{Identity, SessionCode, SessionError, SnapshotView};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use gambit_ai::Strategies;
use serde::Deserialize;
use warp::reply::Response;
use warp::ws::{Message, WebSocket, Ws};
use warp::Reply;

/// Browsers cannot set headers on a socket handshake, so identity travels
/// in the query string.
#[derive(Debug, Default, Deserialize)]
pub struct SocketQuery {
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Client to server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientIntent {
    BecomeParticipant {
        #[serde(default)]
        seat: Option<String>,
    },
    SubmitAction {
        action: serde_json::Value,
    },
    Resign,
    OfferDraw,
    RespondDraw {
        accept: bool,
    },
    ClaimAbandonment {
        outcome: ClaimOutcome,
    },
    ContinueSession,
    EndSession,
    Chat {
        message: String,
    },
    /// Ask for a fresh personal snapshot.
    Snapshot,
    LeaveRoom,
}

enum IntentReply {
    /// Nothing personal to send; room events carry the outcome.
    Quiet,
    Snapshot(SnapshotView),
    Leave,
}

/// `GET /ws/{kind}/{code}?player_id=…&name=…`
///
/// Identity and session existence are checked before the upgrade so a bad
/// request gets a plain JSON error instead of a socket that closes at once.
pub fn upgrade<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    query: SocketQuery,
    ws: Ws,
) -> Response {
    let Some(identity) = make_identity(query.player_id, query.name) else {
        return IdentityRequired.into_http_response();
    };
    let code = normalize_code(&code);
    if let Err(err) = coordinator.snapshot(&code, None) {
        return error_response(err);
    }

    ws.on_upgrade(move |socket| run_socket(coordinator, code, identity, socket))
        .into_response()
}

async fn run_socket<R: Strategies>(
    coordinator: Coordinator<R>,
    code: SessionCode,
    identity: Identity,
    socket: WebSocket,
) {
    let (mut tx, mut rx) = socket.split();
    let mut subscription = coordinator.bus().subscribe(code.clone());

    let snapshot = match coordinator.join_room(&code, &identity) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            let _ = send_event(&mut tx, &error_event(&code, &err)).await;
            let _ = tx.close().await;
            return;
        }
    };
    tracing::info!(code = %code, player = %identity.id, "socket joined room");

    if send_event(&mut tx, &snapshot_event(&code, snapshot)).await.is_ok() {
        loop {
            tokio::select! {
                event = subscription.receiver.recv() => {
                    let Some(event) = event else {
                        // Session torn down.
                        break;
                    };
                    if send_event(&mut tx, &event).await.is_err() {
                        break;
                    }
                }
                message = rx.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(err)) => {
                            tracing::debug!(code = %code, player = %identity.id, error = %err, "socket read failed");
                            break;
                        }
                        None => break,
                    };
                    if message.is_close() {
                        break;
                    }
                    let Ok(text) = message.to_str() else {
                        continue;
                    };
                    let reply = match handle_intent(&coordinator, &code, &identity, text) {
                        Ok(reply) => reply,
                        Err(event) => {
                            if send_event(&mut tx, &event).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    };
                    match reply {
                        IntentReply::Quiet => {}
                        IntentReply::Snapshot(snapshot) => {
                            if send_event(&mut tx, &snapshot_event(&code, snapshot)).await.is_err() {
                                break;
                            }
                        }
                        IntentReply::Leave => break,
                    }
                }
            }
        }
    }

    drop(subscription);
    if let Err(err) = coordinator.leave_room(&code, &identity.id) {
        tracing::debug!(code = %code, player = %identity.id, error = %err, "leave after socket close");
    }
    let _ = tx.close().await;
    tracing::info!(code = %code, player = %identity.id, "socket left room");
}

/// Run one intent; the error side is the frame for the issuing socket.
fn handle_intent<R: Strategies>(
    coordinator: &Coordinator<R>,
    code: &str,
    identity: &Identity,
    text: &str,
) -> Result<IntentReply, RoomEvent> {
    let intent: ClientIntent = serde_json::from_str(text).map_err(|err| RoomEvent::Error {
        code: code.to_string(),
        error: "invalid_request".to_string(),
        message: format!("malformed intent: {err}"),
    })?;
    tracing::debug!(code = %code, player = %identity.id, intent = ?intent, "socket intent");

    let player_id = identity.id.as_str();
    let result = match intent {
        ClientIntent::BecomeParticipant { seat } => coordinator
            .take_seat(code, identity.clone(), seat.as_deref())
            .map(IntentReply::Snapshot),
        ClientIntent::SubmitAction { action } => parse_action::<R>(action)
            .and_then(|action| coordinator.submit_action(code, player_id, action))
            .map(|_| IntentReply::Quiet),
        ClientIntent::Resign => coordinator.resign(code, player_id).map(|_| IntentReply::Quiet),
        ClientIntent::OfferDraw => coordinator
            .offer_draw(code, player_id)
            .map(|_| IntentReply::Quiet),
        ClientIntent::RespondDraw { accept } => coordinator
            .respond_draw(code, player_id, accept)
            .map(|_| IntentReply::Quiet),
        ClientIntent::ClaimAbandonment { outcome } => coordinator
            .claim_abandonment(code, player_id, outcome)
            .map(|_| IntentReply::Quiet),
        ClientIntent::ContinueSession => coordinator
            .continue_session(code, player_id)
            .map(|_| IntentReply::Quiet),
        ClientIntent::EndSession => coordinator
            .end_session(code, player_id)
            .map(|()| IntentReply::Quiet),
        ClientIntent::Chat { message } => coordinator
            .chat(code, player_id, &message)
            .map(|()| IntentReply::Quiet),
        ClientIntent::Snapshot => coordinator
            .snapshot(code, Some(player_id))
            .map(IntentReply::Snapshot),
        ClientIntent::LeaveRoom => Ok(IntentReply::Leave),
    };
    result.map_err(|err| error_event(code, &err))
}

fn snapshot_event(code: &str, snapshot: SnapshotView) -> RoomEvent {
    RoomEvent::SessionSnapshot {
        code: code.to_string(),
        snapshot: Box::new(snapshot),
    }
}

fn error_event(code: &str, err: &SessionError) -> RoomEvent {
    tracing::debug!(code = %code, error = err.error_code(), "intent rejected");
    RoomEvent::Error {
        code: code.to_string(),
        error: err.error_code().to_string(),
        message: err.error_message(),
    }
}

async fn send_event(
    tx: &mut SplitSink<WebSocket, Message>,
    event: &RoomEvent,
) -> Result<(), warp::Error> {
    match serde_json::to_string(event) {
        Ok(json) => tx.send(Message::text(json)).await,
        Err(err) => {
            tracing::error!(event = event.name(), error = %err, "failed to serialize room event");
            Ok(())
        }
    }
}
