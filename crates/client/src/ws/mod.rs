//! Real-time chat stream.
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────────────┐
//!   │   StreamConnection   │  reconnect policy, heartbeat, fan-out
//!   └──────────────────────┘
//!              │ Connector::connect
//!              ▼
//!   ┌──────────────────────┐
//!   │ TungsteniteConnector │  one physical WebSocket per Link
//!   └──────────────────────┘
//!              │ broadcast<ServerEvent>
//!      ┌───────┴────────┐
//!      ▼                ▼
//!  ChatSession   NotificationDispatcher
//! ```
//!
//! Consumers never touch frames directly; they subscribe to typed events and
//! watch the connection state.

mod connection;
mod stream;

pub use connection::{
    ConnectionError, ConnectionState, Connector, Frame, Link, ReconnectConfig, TungsteniteConnector,
};
pub use stream::StreamConnection;
