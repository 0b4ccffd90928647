mod common;

use common::{call, routes, untimed_context};
use gambit_web::{AppContext, WebServer};
use serde_json::{json, Value};
use std::time::Duration;
use warp::hyper::body::HttpBody;
use warp::hyper::{Body, Client, Method, Request, StatusCode};
use warp::test::WsClient;

async fn next_of_type(client: &mut WsClient, kind: &str) -> Value {
    let wait = async {
        loop {
            let message = client.recv().await.expect("frame");
            let Ok(text) = message.to_str() else {
                continue;
            };
            let frame: Value = serde_json::from_str(text).expect("json frame");
            if frame["type"] == kind {
                return frame;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("frame in time")
}

#[tokio::test]
async fn socket_players_share_one_room_with_rest_callers() {
    let context = untimed_context();
    context
        .settings()
        .update_field("abandon_grace_seconds", json!(0))
        .expect("grace");
    let routes = routes(&context);

    let (_, created) = call(&routes, "POST", "/api/chess/sessions", Some("ann"), None).await;
    let code = created["code"].as_str().expect("code").to_string();

    let mut ann = warp::test::ws()
        .path(&format!("/ws/chess/{code}?player_id=ann&name=Ann"))
        .handshake(routes.clone())
        .await
        .expect("ann handshake");
    let welcome = next_of_type(&mut ann, "session_snapshot").await;
    assert_eq!(welcome["snapshot"]["your_seat"], "white");

    let mut bob = warp::test::ws()
        .path(&format!("/ws/chess/{code}?player_id=bob&name=Bob"))
        .handshake(routes.clone())
        .await
        .expect("bob handshake");
    next_of_type(&mut bob, "session_snapshot").await;
    bob.send_text(json!({ "type": "become_participant" }).to_string())
        .await;
    let seated = next_of_type(&mut bob, "session_snapshot").await;
    assert_eq!(seated["snapshot"]["your_seat"], "black");
    assert_eq!(seated["snapshot"]["phase"], "active");

    ann.send_text(
        json!({ "type": "submit_action", "action": { "from": "e2", "to": "e4" } }).to_string(),
    )
    .await;
    let applied = next_of_type(&mut bob, "action_applied").await;
    assert_eq!(applied["seat"], "white");
    assert_eq!(applied["automatic"], false);
    let own = next_of_type(&mut ann, "action_applied").await;
    assert_eq!(own["seat"], "white");

    // The same room is reachable over REST.
    let (status, _) = call(
        &routes,
        "POST",
        &format!("/api/chess/sessions/{code}/actions"),
        Some("bob"),
        Some(json!({ "action": { "from": "e7", "to": "e5" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let applied = next_of_type(&mut ann, "action_applied").await;
    assert_eq!(applied["seat"], "black");

    ann.send_text(json!({ "type": "leave_room" }).to_string()).await;
    let gone = next_of_type(&mut bob, "participant_disconnected").await;
    assert_eq!(gone["seat"], "white");

    bob.send_text(json!({ "type": "claim_abandonment", "outcome": "win" }).to_string())
        .await;
    let terminal = next_of_type(&mut bob, "session_terminal").await;
    assert_eq!(terminal["result"]["winner"], "black");
    assert_eq!(terminal["result"]["reason"], "abandoned");

    let (_, records) = call(&routes, "GET", "/api/history?player=ann", None, None).await;
    assert_eq!(records.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn live_server_serves_rest_and_event_streams() {
    let server = WebServer::from_context(AppContext::new_for_tests());
    let handle = server.start().await.expect("server starts");
    let base = format!("http://{}", handle.address());
    let client = Client::new();

    let health = client
        .get(format!("{base}/health").parse().expect("uri"))
        .await
        .expect("health");
    assert_eq!(health.status(), StatusCode::OK);
    let body = warp::hyper::body::to_bytes(health.into_body())
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(body["status"], "ok");

    let create = Request::builder()
        .method(Method::POST)
        .uri(format!("{base}/api/ttt/sessions"))
        .header("x-player-id", "ann")
        .header("x-player-name", "Ann")
        .body(Body::empty())
        .expect("request");
    let created = client.request(create).await.expect("create");
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = warp::hyper::body::to_bytes(created.into_body())
        .await
        .expect("body");
    let created: Value = serde_json::from_slice(&created).expect("json");
    let code = created["code"].as_str().expect("code").to_string();

    let events = client
        .get(format!("{base}/api/ttt/sessions/{code}/events").parse().expect("uri"))
        .await
        .expect("events");
    assert_eq!(events.status(), StatusCode::OK);
    let mut stream = events.into_body();

    let first = tokio::time::timeout(Duration::from_secs(5), stream.data())
        .await
        .expect("first chunk in time")
        .expect("chunk")
        .expect("chunk bytes");
    let first = String::from_utf8_lossy(&first).to_string();
    assert!(first.contains("session_snapshot"));
    assert!(first.contains(&code));

    let chat = Request::builder()
        .method(Method::POST)
        .uri(format!("{base}/api/ttt/sessions/{code}/chat"))
        .header("x-player-id", "ann")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "message": "anyone?" }).to_string()))
        .expect("request");
    let posted = client.request(chat).await.expect("chat");
    assert_eq!(posted.status(), StatusCode::NO_CONTENT);

    let mut seen = String::new();
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(chunk)) = stream.data().await {
            seen.push_str(&String::from_utf8_lossy(&chunk));
            if seen.contains("anyone?") {
                return true;
            }
        }
        false
    })
    .await
    .expect("chat event in time");
    assert!(found);

    // The event stream never ends on its own; dropping the handle aborts
    // the server instead of waiting for it.
    drop(stream);
    drop(handle);
}

#[tokio::test]
async fn server_shuts_down_gracefully() {
    let handle = WebServer::from_context(AppContext::new_for_tests())
        .start()
        .await
        .expect("server starts");
    let uri = format!("http://{}/api/metrics", handle.address());
    let response = Client::new()
        .get(uri.parse().expect("uri"))
        .await
        .expect("metrics");
    assert_eq!(response.status(), StatusCode::OK);
    drop(response);

    tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
        .await
        .expect("shutdown in time")
        .expect("clean shutdown");
}
