//! Stream transport types and the connector seam.
//!
//! A [`Connector`] opens one physical connection and hands back a [`Link`]:
//! a sender for outbound text frames and a receiver for inbound frames. The
//! reconnect policy in [`super::StreamConnection`] sits on top of it, so the
//! same policy drives the native transport and in-memory test transports.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::ChatTimings;

/// Connection state for the chat stream
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Reconnection gave up; cleared by an explicit reset.
    Error { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error { .. } => "error",
        }
    }
}

/// Configuration for auto-reconnect and keepalive behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Abnormal closes tolerated before giving up
    pub max_attempts: u32,
    /// Fixed delay before each reconnect
    pub delay: Duration,
    /// Interval between application-level pings
    pub heartbeat_interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&ChatTimings::default())
    }
}

impl From<&ChatTimings> for ReconnectConfig {
    fn from(timings: &ChatTimings) -> Self {
        Self {
            max_attempts: timings.max_reconnect_attempts,
            delay: timings.reconnect_delay,
            heartbeat_interval: timings.heartbeat_interval,
        }
    }
}

/// Inbound item from a live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// The connection ended. Transports report `1006` when no close frame arrived.
    Closed { code: u16, reason: String },
}

/// One open connection. Dropping `outgoing` asks the transport to close cleanly.
#[derive(Debug)]
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<Frame>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to open {url}: {reason}")]
    Open { url: String, reason: String },
}

/// Opens physical connections to the chat stream.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Link, ConnectionError>;
}

mod connection_native;
pub use connection_native::TungsteniteConnector;
