mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chatdesk_client::api_client::AttachmentUpload;
use chatdesk_client::cache::TtlCache;
use chatdesk_client::session::{ChatSession, SessionOptions};
use chatdesk_client::state::ChatSnapshot;
use chatdesk_client::storage::Storage;
use chatdesk_client::ws::{ReconnectConfig, StreamConnection};
use chatdesk_shared::{ApiError, MessageType, CLOSE_ABNORMAL};
use common::{conversation, message, FakeApi, MemoryConnector, ServerEnd, STREAM_URL};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

struct Harness {
    api: Arc<FakeApi>,
    conn: StreamConnection,
    ends: mpsc::UnboundedReceiver<ServerEnd>,
    session: ChatSession,
    snapshots: watch::Receiver<ChatSnapshot>,
}

impl Harness {
    fn start(api: Arc<FakeApi>) -> Self {
        let (connector, ends) = MemoryConnector::new();
        let conn = StreamConnection::new(connector, ReconnectConfig::default());
        let session = ChatSession::spawn(api.clone(), conn.clone(), SessionOptions::default());
        let snapshots = session.watch();
        Self {
            api,
            conn,
            ends,
            session,
            snapshots,
        }
    }

    async fn connect(&mut self) -> ServerEnd {
        self.conn.connect(STREAM_URL);
        let end = self.ends.recv().await.unwrap();
        self.until(|s| s.connection.is_connected()).await;
        end
    }

    async fn until(&mut self, check: impl FnMut(&ChatSnapshot) -> bool) -> ChatSnapshot {
        self.snapshots.wait_for(check).await.unwrap().clone()
    }

    async fn open(&mut self, conversation_id: &str) -> ChatSnapshot {
        self.session.select(conversation_id);
        let id = conversation_id.to_string();
        self.until(move |s| s.selected_id.as_deref() == Some(id.as_str()) && s.messages_loaded)
            .await
    }
}

fn subscribe(conversation_id: &str) -> Value {
    json!({"message_type": "subscribe_conversation", "conversation_id": conversation_id})
}

fn unsubscribe(conversation_id: &str) -> Value {
    json!({"message_type": "unsubscribe_conversation", "conversation_id": conversation_id})
}

#[tokio::test(start_paused = true)]
async fn test_stream_echo_replaces_optimistic_message() {
    let api = FakeApi::with_conversations(vec![conversation("c1", "Budi")]);
    api.history
        .lock()
        .unwrap()
        .insert("c1".into(), vec![message("m0", "c1", "user", "hi")]);
    let mut h = Harness::start(api);
    let mut end = h.connect().await;

    h.session.load_conversations();
    h.until(|s| s.conversations.len() == 1).await;
    let snap = h.open("c1").await;
    assert_eq!(snap.messages.len(), 1);
    assert_eq!(snap.selected.as_ref().map(|c| c.unread_count_admin), Some(0));
    assert_eq!(end.next_command().await, Some(subscribe("c1")));

    h.session.send("Hello there");
    let snap = h
        .until(|s| s.messages.len() == 2 && s.pending_sends == 0)
        .await;
    let optimistic = &snap.messages[1];
    assert!(optimistic.temp_id.is_some());
    assert!(optimistic.is_settled());
    assert_eq!(h.api.sent()[0].message, "Hello there");

    end.push(
        "new_message",
        json!({
            "id": "m1",
            "conversation_id": "c1",
            "sender_type": "admin",
            "message": "Hello there",
            "created_at": chrono::Utc::now().to_rfc3339(),
        }),
    );
    let snap = h.until(|s| s.messages.iter().any(|m| m.id == "m1")).await;
    assert_eq!(snap.messages.len(), 2);
    assert_eq!(snap.messages[1].id, "m1");
    assert!(snap.messages[1].temp_id.is_none());
    assert_eq!(
        snap.selected.and_then(|c| c.last_message).as_deref(),
        Some("Hello there")
    );
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_message_is_dropped_after_timeout() {
    let api = FakeApi::with_conversations(vec![conversation("c1", "Budi")]);
    api.stall_sends.store(true, Ordering::SeqCst);
    let mut h = Harness::start(api);
    h.open("c1").await;

    let started = Instant::now();
    h.session.send("anyone there?");
    h.until(|s| s.pending_sends == 1 && s.messages.len() == 1 && s.messages[0].is_pending())
        .await;

    let snap = h
        .until(|s| s.pending_sends == 0 && s.messages.is_empty())
        .await;
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(snap.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_timeout_sends_again() {
    let api = FakeApi::with_conversations(vec![conversation("c1", "Budi")]);
    api.stall_sends.store(true, Ordering::SeqCst);
    let mut h = Harness::start(api);
    h.open("c1").await;

    h.session.send("anyone there?");
    let snap = h.until(|s| s.messages.len() == 1).await;
    let temp_id = snap.messages[0].temp_id.clone().unwrap();
    h.until(|s| s.pending_sends == 0 && s.messages.is_empty())
        .await;

    h.api.stall_sends.store(false, Ordering::SeqCst);
    h.session.retry(temp_id.clone());
    let snap = h
        .until(|s| s.messages.len() == 1 && s.messages[0].is_settled() && s.pending_sends == 0)
        .await;
    assert_eq!(snap.messages[0].temp_id.as_deref(), Some(temp_id.as_str()));
    assert_eq!(snap.messages[0].message, "anyone there?");

    let sent = h.api.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1], sent[0]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_keeps_content_and_position() {
    let api = FakeApi::with_conversations(vec![conversation("c1", "Budi")]);
    api.reply_to_next_send(Err(ApiError::Network("offline".into())));
    let mut h = Harness::start(api);
    h.open("c1").await;

    h.session.send("first");
    let snap = h
        .until(|s| s.messages.len() == 1 && s.messages[0].is_failed())
        .await;
    let temp_id = snap.messages[0].temp_id.clone().unwrap();
    let composed_at = snap.messages[0].created_at;
    // A failed send is shown on the message, not as a banner.
    assert!(snap.last_error.is_none());

    h.session.send("second");
    h.until(|s| s.messages.len() == 2 && s.messages[1].is_settled())
        .await;

    let mut record = message("m-first", "c1", "admin", "first");
    record.created_at = composed_at;
    h.api.reply_to_next_send(Ok(Some(record)));
    h.session.retry(temp_id);
    let snap = h.until(|s| s.messages[0].id == "m-first").await;
    assert_eq!(snap.messages[0].message, "first");
    assert_eq!(snap.messages[1].message, "second");
    assert_eq!(snap.pending_sends, 0);

    let sent = h.api.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2], sent[0]);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_waits_for_selection_to_settle() {
    let api = FakeApi::with_conversations(vec![]);
    let mut h = Harness::start(api);
    let mut end = h.connect().await;

    let started = Instant::now();
    h.session.select("c1");
    h.session.select("c2");
    assert_eq!(end.next_command().await, Some(subscribe("c2")));
    assert!(started.elapsed() >= Duration::from_secs(1));

    h.session.select("c3");
    assert_eq!(end.next_command().await, Some(unsubscribe("c2")));
    assert_eq!(end.next_command().await, Some(subscribe("c3")));

    h.session.deselect();
    assert_eq!(end.next_command().await, Some(unsubscribe("c3")));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resubscribes_open_conversation() {
    let api = FakeApi::with_conversations(vec![conversation("c1", "Budi")]);
    let mut h = Harness::start(api);
    let mut first = h.connect().await;
    h.open("c1").await;
    assert_eq!(first.next_command().await, Some(subscribe("c1")));

    first.close(CLOSE_ABNORMAL);
    let mut second = h.ends.recv().await.unwrap();
    assert_eq!(second.next_command().await, Some(subscribe("c1")));
}

#[tokio::test(start_paused = true)]
async fn test_resolve_success_and_failure() {
    let api = FakeApi::with_conversations(vec![conversation("c1", "Budi")]);
    let mut h = Harness::start(api);
    h.session.load_conversations();
    h.until(|s| s.conversations.len() == 1).await;

    h.session.set_resolved("c1", true);
    h.until(|s| s.conversations[0].resolved).await;

    *h.api.resolve_error.lock().unwrap() = Some(ApiError::Http {
        status: 500,
        body: "boom".into(),
    });
    h.session.set_resolved("c1", false);
    let snap = h.until(|s| s.last_error.is_some()).await;
    assert!(snap.conversations[0].resolved);
    assert!(snap
        .last_error
        .as_deref()
        .is_some_and(|e| e.starts_with("Failed to update conversation")));
    assert_eq!(h.api.resolve_calls.load(Ordering::SeqCst), 2);

    h.session.dismiss_error();
    h.until(|s| s.last_error.is_none()).await;
}

#[tokio::test(start_paused = true)]
async fn test_user_message_reopens_resolved_conversation() {
    let mut resolved = conversation("c1", "Budi");
    resolved.resolved = true;
    let api = FakeApi::with_conversations(vec![resolved]);
    let mut h = Harness::start(api);
    let end = h.connect().await;
    h.session.load_conversations();
    h.until(|s| s.conversations.len() == 1).await;

    end.push(
        "new_message",
        json!({"id": "m7", "conversation_id": "c1", "sender_type": "user", "message": "need help again"}),
    );
    let snap = h.until(|s| !s.conversations[0].resolved).await;
    let conv = &snap.conversations[0];
    assert_eq!(conv.unread_count_admin, 3);
    assert_eq!(conv.last_message.as_deref(), Some("need help again"));
    assert_eq!(conv.last_message_sender.as_deref(), Some("user"));
}

#[tokio::test(start_paused = true)]
async fn test_update_for_unknown_conversation_adds_it() {
    let api = FakeApi::with_conversations(vec![conversation("c1", "Budi")]);
    let mut h = Harness::start(api);
    let end = h.connect().await;
    h.session.load_conversations();
    h.until(|s| s.conversations.len() == 1).await;

    end.push(
        "conversation_update",
        json!({"conversation_id": "c9", "user_name": "Sari", "status": "open"}),
    );
    let snap = h.until(|s| s.conversations.len() == 2).await;
    assert_eq!(snap.conversations[0].id, "c9");
    assert_eq!(snap.conversations[0].display_name(), "Sari");

    // A later reload from the backend does not drop it.
    h.session.refresh();
    let snap = h.until(|s| s.conversations_revision == 2).await;
    assert!(snap.conversations.iter().any(|c| c.id == "c9"));
}

#[tokio::test(start_paused = true)]
async fn test_attachment_is_sent_after_upload() {
    let api = FakeApi::with_conversations(vec![conversation("c1", "Budi")]);
    let mut h = Harness::start(api);
    h.open("c1").await;

    h.session.send_attachment(
        AttachmentUpload {
            file_name: "receipt.png".into(),
            content_type: "image/png".into(),
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
        },
        "see receipt",
    );
    let snap = h.until(|s| s.messages.len() == 1).await;
    let msg = &snap.messages[0];
    assert_eq!(msg.message_type, MessageType::Image);
    assert_eq!(msg.attachment_url.as_deref(), Some("/uploads/receipt.png"));
    assert_eq!(msg.message, "see receipt");
    assert_eq!(h.api.uploads.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_loaded_lists_are_written_to_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let mut api = FakeApi::default();
    *api.conversations.get_mut().unwrap() = vec![conversation("c1", "Budi")];
    api.history
        .get_mut()
        .unwrap()
        .insert("c1".into(), vec![message("m0", "c1", "user", "hi")]);
    let (connector, _ends) = MemoryConnector::new();
    let conn = StreamConnection::new(connector, ReconnectConfig::default());
    let options = SessionOptions {
        cache: Some(TtlCache::new(Storage::at(tmp.path()))),
        ..SessionOptions::default()
    };
    let session = ChatSession::spawn(Arc::new(api), conn, options);
    let mut snapshots = session.watch();

    session.load_conversations();
    session.select("c1");
    snapshots
        .wait_for(|s| s.conversations.len() == 1 && s.messages_loaded && s.messages.len() == 1)
        .await
        .unwrap();

    let reader = TtlCache::new(Storage::at(tmp.path()));
    let cached = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let conversations = reader.conversations().unwrap_or_default();
            let messages = reader.messages("c1").unwrap_or_default();
            if conversations.len() == 1 && messages.len() == 1 {
                return (conversations, messages);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(cached.0[0].id, "c1");
    assert_eq!(cached.1[0].id, "m0");

    session.shutdown().await;
}
