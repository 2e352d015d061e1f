//! In-memory transport and backend shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chatdesk_client::api_client::{AttachmentUpload, ChatApi};
use chatdesk_client::delivery::OutgoingMessage;
use chatdesk_client::ws::{ConnectionError, Connector, Frame, Link};
use chatdesk_shared::{ApiError, ChatMessage, Conversation, UploadedFile};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub const STREAM_URL: &str = "ws://localhost:8000/ws/chat?session_key=k&auth_seed=s";

/// Backend side of one accepted connection.
pub struct ServerEnd {
    pub url: String,
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<Frame>,
}

impl ServerEnd {
    pub fn push(&self, message_type: &str, data: Value) {
        let frame = json!({ "message_type": message_type, "data": data }).to_string();
        let _ = self.to_client.send(Frame::Text(frame));
    }

    pub fn close(&self, code: u16) {
        let _ = self.to_client.send(Frame::Closed {
            code,
            reason: String::new(),
        });
    }

    /// Next control message the client sent, skipping heartbeats.
    pub async fn next_command(&mut self) -> Option<Value> {
        while let Some(text) = self.from_client.recv().await {
            let value: Value = serde_json::from_str(&text).ok()?;
            if value["message_type"] != "ping" {
                return Some(value);
            }
        }
        None
    }
}

/// Connector that hands each accepted connection to the test.
pub struct MemoryConnector {
    accepting: AtomicBool,
    dials: AtomicUsize,
    ends: mpsc::UnboundedSender<ServerEnd>,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (ends, ends_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            accepting: AtomicBool::new(true),
            dials: AtomicUsize::new(0),
            ends,
        });
        (connector, ends_rx)
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Link, ConnectionError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ConnectionError::Open {
                url: url.to_string(),
                reason: "connection refused".into(),
            });
        }
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let (to_client, incoming) = mpsc::unbounded_channel();
        let _ = self.ends.send(ServerEnd {
            url: url.to_string(),
            from_client,
            to_client,
        });
        Ok(Link { outgoing, incoming })
    }
}

/// Scriptable chat backend.
#[derive(Default)]
pub struct FakeApi {
    pub conversations: Mutex<Vec<Conversation>>,
    /// Newest first, as the backend pages them.
    pub history: Mutex<HashMap<String, Vec<ChatMessage>>>,
    pub sent: Mutex<Vec<OutgoingMessage>>,
    /// Replies for successive sends; `Ok(None)` once exhausted.
    pub send_replies: Mutex<VecDeque<Result<Option<ChatMessage>, ApiError>>>,
    /// Sends never complete while set.
    pub stall_sends: AtomicBool,
    pub resolve_error: Mutex<Option<ApiError>>,
    pub resolve_calls: AtomicUsize,
    pub uploads: Mutex<Vec<AttachmentUpload>>,
}

impl FakeApi {
    pub fn with_conversations(list: Vec<Conversation>) -> Arc<Self> {
        let api = Self::default();
        *api.conversations.lock().unwrap() = list;
        Arc::new(api)
    }

    pub fn reply_to_next_send(&self, reply: Result<Option<ChatMessage>, ApiError>) {
        self.send_replies.lock().unwrap().push_back(reply);
    }

    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        _page: u32,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        let history = self.history.lock().unwrap();
        Ok(history
            .get(conversation_id)
            .map(|page| page.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<Option<ChatMessage>, ApiError> {
        self.sent.lock().unwrap().push(message.clone());
        if self.stall_sends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.send_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(None))
    }

    async fn upload_attachment(&self, upload: AttachmentUpload) -> Result<UploadedFile, ApiError> {
        let file_type = upload.content_type.clone();
        let file_name = upload.file_name.clone();
        self.uploads.lock().unwrap().push(upload);
        Ok(UploadedFile {
            file_url: format!("/uploads/{file_name}"),
            file_type,
        })
    }

    async fn set_resolved(&self, _conversation_id: &str, _resolved: bool) -> Result<(), ApiError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        match self.resolve_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

pub fn conversation(id: &str, user_name: &str) -> Conversation {
    serde_json::from_value(json!({
        "id": id,
        "user_name": user_name,
        "status": "open",
        "unread_count_admin": 2,
    }))
    .unwrap()
}

pub fn message(id: &str, conversation_id: &str, sender_type: &str, text: &str) -> ChatMessage {
    serde_json::from_value(json!({
        "id": id,
        "conversation_id": conversation_id,
        "sender_type": sender_type,
        "message": text,
        "created_at": chrono::Utc::now().to_rfc3339(),
    }))
    .unwrap()
}
