//! Chatdesk client
//!
//! Real-time chat core of the support console: the live event stream with
//! reconnection, the conversation and message stores, optimistic sending,
//! and operator alerts.

pub mod api_client;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod delivery;
pub mod logging;
pub mod notify;
pub mod session;
pub mod state;
pub mod storage;
pub mod stores;
pub mod ws;

pub use api_client::{ApiClient, AttachmentUpload, ChatApi};
pub use cache::TtlCache;
pub use config::{ChatConfig, ChatTimings, ConfigError};
pub use credentials::{Credential, CredentialProvider, StaticCredentials, StoredCredentials};
pub use delivery::{Operator, OutgoingMessage};
pub use notify::{DispatcherOptions, NotificationDispatcher, NotificationSettings};
pub use session::{ChatSession, SessionOptions};
pub use state::{ChatAction, ChatSnapshot, ChatState, Effect};
pub use storage::Storage;
pub use ws::{ConnectionState, ReconnectConfig, StreamConnection};
