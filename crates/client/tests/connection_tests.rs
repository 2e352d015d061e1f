mod common;

use std::time::Duration;

use chatdesk_client::ws::{ConnectionState, ReconnectConfig, StreamConnection};
use chatdesk_shared::{ClientCommand, ServerEvent, CLOSE_ABNORMAL, CLOSE_NORMAL};
use common::{MemoryConnector, STREAM_URL};
use serde_json::json;
use tokio::time::{sleep, Instant};

fn is_error(state: &ConnectionState) -> bool {
    matches!(state, ConnectionState::Error { .. })
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_five_failed_attempts() {
    let (connector, _ends) = MemoryConnector::new();
    connector.set_accepting(false);
    let conn = StreamConnection::new(connector.clone(), ReconnectConfig::default());
    let mut state = conn.watch_state();

    conn.connect(STREAM_URL);
    state.wait_for(is_error).await.unwrap();
    assert_eq!(connector.dials(), 5);
    assert_eq!(conn.attempts(), 5);

    // Nothing reconnects on its own once in the error state.
    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.dials(), 5);
    assert!(is_error(&conn.state()));

    conn.reset_reconnection();
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.attempts(), 0);

    connector.set_accepting(true);
    conn.retry();
    state.wait_for(ConnectionState::is_connected).await.unwrap();
    assert_eq!(connector.dials(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_stops_with_the_connection() {
    let (connector, mut ends) = MemoryConnector::new();
    let conn = StreamConnection::new(connector.clone(), ReconnectConfig::default());
    let mut state = conn.watch_state();

    conn.connect(STREAM_URL);
    let mut end = ends.recv().await.unwrap();
    assert_eq!(end.url, STREAM_URL);
    state.wait_for(ConnectionState::is_connected).await.unwrap();

    let started = Instant::now();
    let ping = end.from_client.recv().await.unwrap();
    assert_eq!(ping, r#"{"message_type":"ping"}"#);
    assert!(started.elapsed() >= Duration::from_secs(30));

    end.close(CLOSE_NORMAL);
    state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await
        .unwrap();

    // The outbound side is released, so no further pings can arrive.
    assert_eq!(end.from_client.recv().await, None);
    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.dials(), 1);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_abnormal_close_reconnects_after_delay() {
    let (connector, mut ends) = MemoryConnector::new();
    let conn = StreamConnection::new(connector.clone(), ReconnectConfig::default());
    let mut state = conn.watch_state();

    conn.connect(STREAM_URL);
    let first = ends.recv().await.unwrap();
    state.wait_for(ConnectionState::is_connected).await.unwrap();

    let dropped_at = Instant::now();
    first.close(CLOSE_ABNORMAL);
    let _second = ends.recv().await.unwrap();
    assert!(dropped_at.elapsed() >= Duration::from_secs(3));

    state.wait_for(ConnectionState::is_connected).await.unwrap();
    assert_eq!(conn.attempts(), 0);
    assert_eq!(connector.dials(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_blank_url_stays_disconnected() {
    let (connector, _ends) = MemoryConnector::new();
    let conn = StreamConnection::new(connector.clone(), ReconnectConfig::default());

    conn.connect("   ");
    sleep(Duration::from_secs(10)).await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(connector.dials(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_final() {
    let (connector, mut ends) = MemoryConnector::new();
    let conn = StreamConnection::new(connector.clone(), ReconnectConfig::default());
    let mut state = conn.watch_state();

    conn.connect(STREAM_URL);
    let mut end = ends.recv().await.unwrap();
    state.wait_for(ConnectionState::is_connected).await.unwrap();

    conn.disconnect();
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(end.from_client.recv().await, None);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.dials(), 1);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_open_is_ignored() {
    let (connector, mut ends) = MemoryConnector::new();
    let conn = StreamConnection::new(connector.clone(), ReconnectConfig::default());
    let mut state = conn.watch_state();

    conn.connect(STREAM_URL);
    let _end = ends.recv().await.unwrap();
    state.wait_for(ConnectionState::is_connected).await.unwrap();

    conn.connect(STREAM_URL);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(connector.dials(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_send_requires_open_connection() {
    let (connector, mut ends) = MemoryConnector::new();
    let conn = StreamConnection::new(connector.clone(), ReconnectConfig::default());
    let subscribe = ClientCommand::SubscribeConversation {
        conversation_id: "c1".into(),
    };
    assert!(!conn.send(&subscribe));

    let mut state = conn.watch_state();
    conn.connect(STREAM_URL);
    let mut end = ends.recv().await.unwrap();
    state.wait_for(ConnectionState::is_connected).await.unwrap();

    assert!(conn.send(&subscribe));
    assert_eq!(
        end.next_command().await,
        Some(json!({"message_type": "subscribe_conversation", "conversation_id": "c1"}))
    );
}

#[tokio::test(start_paused = true)]
async fn test_events_reach_every_subscriber() {
    let (connector, mut ends) = MemoryConnector::new();
    let conn = StreamConnection::new(connector.clone(), ReconnectConfig::default());
    let mut first = conn.subscribe();
    let mut second = conn.subscribe();
    let mut state = conn.watch_state();

    conn.connect(STREAM_URL);
    let end = ends.recv().await.unwrap();
    state.wait_for(ConnectionState::is_connected).await.unwrap();

    end.push("pong", json!(null));
    end.push(
        "new_message",
        json!({"id": "m1", "conversation_id": "c1", "sender_type": "user", "message": "halo"}),
    );
    end.push("error", json!({"message": "subscription refused"}));

    for rx in [&mut first, &mut second] {
        match rx.recv().await.unwrap() {
            ServerEvent::NewMessage(msg) => assert_eq!(msg.id, "m1"),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerEvent::Error {
                message: "subscription refused".into()
            }
        );
    }
}
