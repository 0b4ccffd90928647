#![allow(dead_code)]

use gambit_web::{AppContext, WebServer};
use serde_json::Value;
use std::time::Duration;
use warp::http::StatusCode;
use warp::{Filter, Reply};

/// A context with untimed games and instant bots, so flows never race a clock.
pub fn untimed_context() -> AppContext {
    let context = AppContext::new_for_tests();
    let settings = context.settings();
    for field in ["chess.turn_seconds", "rps.turn_seconds", "ttt.turn_seconds", "bot_move_delay_ms"] {
        settings
            .update_field(field, serde_json::json!(0))
            .expect("update settings");
    }
    context
}

pub fn routes(
    context: &AppContext,
) -> impl Filter<Extract = (warp::reply::Response,), Error = std::convert::Infallible> + Clone + 'static
{
    WebServer::routes(context)
}

/// Issue a request as `player` and decode the JSON body (`Null` when empty).
pub async fn call<F>(
    routes: &F,
    method: &str,
    path: &str,
    player: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value)
where
    F: Filter + 'static,
    F::Extract: Reply + Send,
{
    let mut request = warp::test::request().method(method).path(path);
    if let Some(player) = player {
        request = request.header("x-player-id", player);
    }
    if let Some(body) = body {
        request = request
            .header("content-type", "application/json")
            .body(body.to_string());
    }
    let response = request.reply(routes).await;
    let status = response.status();
    let json = if response.body().is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(response.body()).expect("json body")
    };
    (status, json)
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
