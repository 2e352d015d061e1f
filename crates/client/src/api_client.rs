//! HTTP API client for the chat backend.

use std::sync::Arc;

use async_trait::async_trait;
use chatdesk_shared::{ApiEnvelope, ApiError, ChatMessage, Conversation, UploadedFile};
use reqwest::{multipart, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::credentials::{Credential, CredentialProvider};
use crate::delivery::OutgoingMessage;

/// A file to upload as a message attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    pub file_name: String,
    /// MIME type, e.g. `image/png`.
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Chat REST operations. Every call reads the current credential.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    /// One page of messages, newest first.
    async fn list_messages(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, ApiError>;

    /// Post a message. The backend may or may not echo the stored record.
    async fn send_message(&self, message: &OutgoingMessage) -> Result<Option<ChatMessage>, ApiError>;

    async fn upload_attachment(&self, upload: AttachmentUpload) -> Result<UploadedFile, ApiError>;

    async fn set_resolved(&self, conversation_id: &str, resolved: bool) -> Result<(), ApiError>;
}

/// HTTP client for the chat endpoints.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

/// List payloads arrive either bare or wrapped in an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Conversations { conversations: Vec<T> },
    Messages { messages: Vec<T> },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Bare(items) => items,
            Listing::Conversations { conversations } => conversations,
            Listing::Messages { messages } => messages,
        }
    }
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    session_key: &'a str,
    #[serde(flatten)]
    message: &'a OutgoingMessage,
}

#[derive(Serialize)]
struct ResolveBody<'a> {
    session_key: &'a str,
    resolved: u8,
}

impl ApiClient {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            credentials,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn credential(&self) -> Result<Credential, ApiError> {
        self.credentials.credential().ok_or(ApiError::MissingCredential)
    }

    /// GET and unwrap the response envelope.
    pub async fn get_json<TRes: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<TRes>, ApiError> {
        let resp = self
            .client
            .get(self.url(path))
            .query(query)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        read_envelope(resp).await
    }

    /// POST a JSON body and unwrap the response envelope.
    pub async fn post_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<Option<TRes>, ApiError> {
        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        read_envelope(resp).await
    }
}

async fn read_envelope<TRes: DeserializeOwned>(resp: reqwest::Response) -> Result<Option<TRes>, ApiError> {
    let status = resp.status().as_u16();
    let is_success = resp.status().is_success();
    let text = resp
        .text()
        .await
        .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

    if !is_success {
        return Err(ApiError::from_status(status, text));
    }
    parse_envelope(&text)
}

/// Decode a response body, treating `success: false` as a rejection.
pub(crate) fn parse_envelope<TRes: DeserializeOwned>(text: &str) -> Result<Option<TRes>, ApiError> {
    let text = if text.trim().is_empty() { "null" } else { text };
    let envelope: Option<ApiEnvelope<TRes>> =
        serde_json::from_str(text).map_err(|e| ApiError::Deserialize(e.to_string()))?;
    let Some(envelope) = envelope else {
        return Err(ApiError::Deserialize("empty response body".to_string()));
    };
    if !envelope.success {
        return Err(ApiError::Rejected(
            envelope
                .message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "request failed".to_string()),
        ));
    }
    Ok(envelope.data)
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let cred = self.credential()?;
        let listing: Option<Listing<Conversation>> = self
            .get_json("/api/chat/conversations", &[("session_key", cred.session_key)])
            .await?;
        Ok(listing.map(Listing::into_vec).unwrap_or_default())
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        let cred = self.credential()?;
        let path = format!("/api/chat/conversations/{conversation_id}/messages");
        let listing: Option<Listing<ChatMessage>> = self
            .get_json(
                &path,
                &[
                    ("session_key", cred.session_key),
                    ("page", page.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(listing.map(Listing::into_vec).unwrap_or_default())
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<Option<ChatMessage>, ApiError> {
        let cred = self.credential()?;
        let body = SendMessageBody {
            session_key: &cred.session_key,
            message,
        };
        let data: Option<Value> = self.post_json("/api/chat/messages", &body).await?;
        // Anything that isn't a full message record counts as "no record".
        Ok(data.and_then(|value| serde_json::from_value(value).ok()))
    }

    async fn upload_attachment(&self, upload: AttachmentUpload) -> Result<UploadedFile, ApiError> {
        let cred = self.credential()?;
        let part = multipart::Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str(&upload.content_type)
            .map_err(|e| ApiError::Network(format!("invalid content type: {e}")))?;
        let form = multipart::Form::new()
            .text("session_key", cred.session_key)
            .part("file", part);

        let resp = self
            .client
            .post(self.url("/api/chat/upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        read_envelope::<UploadedFile>(resp)
            .await?
            .ok_or_else(|| ApiError::Deserialize("upload response carried no file".to_string()))
    }

    async fn set_resolved(&self, conversation_id: &str, resolved: bool) -> Result<(), ApiError> {
        let cred = self.credential()?;
        let path = format!("/api/chat/conversations/{conversation_id}/resolve");
        let body = ResolveBody {
            session_key: &cred.session_key,
            resolved: u8::from(resolved),
        };
        let _: Option<Value> = self.post_json(&path, &body).await?;
        Ok(())
    }
}
