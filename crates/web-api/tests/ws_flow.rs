mod support;

use serde_json::json;
use support::{assert_silent, login, next_event, next_named, send, TestServer};

#[tokio::test]
async fn login_and_chat_reach_every_session() {
    let server = TestServer::start().await;
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;

    assert!(login(&mut alice, "alice").await);
    let welcome = next_event(&mut bob).await;
    assert_eq!(
        welcome,
        json!({"event": "service-message", "data": {"text": "User \"alice\" logged in", "type": "login"}})
    );
    assert_eq!(
        next_event(&mut bob).await,
        json!({"event": "user-login", "data": {"username": "alice"}})
    );

    assert!(login(&mut bob, "bob").await);
    assert_eq!(
        next_named(&mut alice, "user-login").await["data"]["username"],
        "bob"
    );

    send(&mut bob, json!({"event": "chat-message", "data": {"text": "hi"}})).await;
    let expected = json!({
        "event": "chat-message",
        "data": {"text": "hi", "username": "bob", "type": "chat-message"}
    });
    assert_eq!(next_named(&mut alice, "chat-message").await, expected);
    assert_eq!(next_named(&mut bob, "chat-message").await, expected);
}

#[tokio::test]
async fn private_login_confirmation_precedes_result() {
    let server = TestServer::start().await;
    let mut erin = server.connect().await;

    send(&mut erin, json!({"event": "user-login", "data": {"username": "erin"}})).await;
    assert_eq!(
        next_event(&mut erin).await,
        json!({"event": "service-message", "data": {"text": "You logged in as \"erin\"", "type": "login"}})
    );
    assert_eq!(
        next_event(&mut erin).await,
        json!({"event": "login-result", "data": {"accepted": true}})
    );
}

#[tokio::test]
async fn duplicate_and_blank_names_are_rejected() {
    let server = TestServer::start().await;
    let mut first = server.connect().await;
    let mut second = server.connect().await;

    assert!(login(&mut first, "alice").await);
    assert!(!login(&mut second, "alice").await);
    assert!(!login(&mut second, "   ").await);
    assert!(login(&mut second, "alice2").await);
}

#[tokio::test]
async fn chat_before_login_is_reported_to_sender_only() {
    let server = TestServer::start().await;
    let mut observer = server.connect().await;
    let mut anonymous = server.connect().await;

    send(&mut anonymous, json!({"event": "chat-message", "data": {"text": "hi"}})).await;
    let error = next_event(&mut anonymous).await;
    assert_eq!(error["event"], "error");
    assert_eq!(error["data"]["code"], "INVALID_STATE");
    assert_eq!(error["data"]["retryable"], false);

    assert_silent(&mut observer).await;
}

#[tokio::test]
async fn malformed_frames_get_an_error_event() {
    let server = TestServer::start().await;
    let mut socket = server.connect().await;

    send(&mut socket, json!({"event": "no-such-event"})).await;
    let error = next_event(&mut socket).await;
    assert_eq!(error["event"], "error");
    assert_eq!(error["data"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn newcomer_replays_history_of_departed_user() {
    let server = TestServer::start().await;
    let mut observer = server.connect().await;
    let mut carol = server.connect().await;

    assert!(login(&mut carol, "carol").await);
    send(&mut carol, json!({"event": "chat-message", "data": {"text": "hi"}})).await;
    next_named(&mut observer, "chat-message").await;
    carol.close(None).await.expect("close");
    next_named(&mut observer, "user-logout").await;

    let (mut newcomer, replay) = server.connect_with_replay().await;
    assert_eq!(replay.len(), 3, "replay: {replay:?}");
    assert_eq!(
        replay[0],
        json!({"event": "service-message", "data": {"text": "User \"carol\" logged in", "type": "login"}})
    );
    let chat = &replay[1];
    assert_eq!(chat["event"], "chat-message");
    assert_eq!(chat["data"]["text"], "hi");
    assert_eq!(chat["data"]["username"], "carol");
    assert_eq!(chat["data"]["type"], "chat");
    assert!(chat["data"]["date"].is_string());
    assert_eq!(
        replay[2],
        json!({"event": "service-message", "data": {"text": "User \"carol\" disconnected", "type": "logout"}})
    );
    assert_silent(&mut newcomer).await;
}

#[tokio::test]
async fn newcomer_receives_presence_snapshot() {
    let server = TestServer::start().await;
    let mut alice = server.connect().await;
    assert!(login(&mut alice, "alice").await);

    let (_newcomer, replay) = server.connect_with_replay().await;
    assert_eq!(
        replay,
        vec![
            json!({"event": "user-login", "data": {"username": "alice"}}),
            json!({"event": "service-message", "data": {"text": "User \"alice\" logged in", "type": "login"}}),
        ]
    );
}

#[tokio::test]
async fn typing_state_clears_when_typist_disconnects() {
    let server = TestServer::start().await;
    let mut observer = server.connect().await;
    let mut dave = server.connect().await;

    assert!(login(&mut dave, "dave").await);
    send(&mut dave, json!({"event": "start-typing"})).await;
    assert_eq!(
        next_named(&mut observer, "update-typing").await,
        json!({"event": "update-typing", "data": [{"username": "dave"}]})
    );

    dave.close(None).await.expect("close");
    next_named(&mut observer, "user-logout").await;
    assert_eq!(
        next_named(&mut observer, "update-typing").await,
        json!({"event": "update-typing", "data": []})
    );
}

#[tokio::test]
async fn name_is_free_again_after_disconnect() {
    let server = TestServer::start().await;
    let mut observer = server.connect().await;

    let mut first = server.connect().await;
    assert!(login(&mut first, "alice").await);
    first.close(None).await.expect("close");
    next_named(&mut observer, "user-logout").await;

    let mut second = server.connect().await;
    assert!(login(&mut second, "alice").await);
}
