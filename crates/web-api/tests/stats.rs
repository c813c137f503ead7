mod support;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use support::{login, next_named, send, TestServer};

#[tokio::test]
async fn health_check_is_ok() {
    let server = TestServer::start().await;
    let response = Client::new()
        .get(server.http_url("/health"))
        .send()
        .await
        .expect("health request");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn top_chatters_ranks_by_message_count() {
    let server = TestServer::start().await;
    let mut observer = server.connect().await;

    for (name, messages) in [("amy", 1), ("ben", 2)] {
        let mut socket = server.connect().await;
        assert!(login(&mut socket, name).await);
        for i in 0..messages {
            send(
                &mut socket,
                json!({"event": "chat-message", "data": {"text": format!("{name}{i}")}}),
            )
            .await;
            next_named(&mut observer, "chat-message").await;
        }
    }

    let body: Value = Client::new()
        .get(server.http_url("/api/v1/stats/top-chatters"))
        .send()
        .await
        .expect("stats request")
        .json()
        .await
        .expect("stats json");
    assert_eq!(
        body,
        json!([{"username": "ben", "count": 2}, {"username": "amy", "count": 1}])
    );
}

#[tokio::test]
async fn top_chatters_rejects_zero_limit() {
    let server = TestServer::start().await;
    let response = Client::new()
        .get(server.http_url("/api/v1/stats/top-chatters?limit=0"))
        .send()
        .await
        .expect("stats request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("error json");
    assert_eq!(body["code"], "BAD_REQUEST");
}
