//! Native WebSocket transport using tokio-tungstenite.

use async_trait::async_trait;
use chatdesk_shared::CLOSE_ABNORMAL;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};

use super::{ConnectionError, Connector, Frame, Link};

/// Close code reported when the peer sent a close frame without a status.
const CLOSE_NO_STATUS: u16 = 1005;

/// Opens real WebSocket connections.
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Link, ConnectionError> {
        let (ws_stream, _response) = connect_async(url).await.map_err(|e| ConnectionError::Open {
            url: redact_query(url),
            reason: e.to_string(),
        })?;

        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();

        // Read task
        tokio::spawn(async move {
            let closed = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        tracing::trace!(len = text.len(), "stream frame received");
                        if in_tx.send(Frame::Text(text.as_str().to_owned())).is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => Frame::Closed {
                                code: u16::from(frame.code),
                                reason: frame.reason.to_string(),
                            },
                            None => Frame::Closed {
                                code: CLOSE_NO_STATUS,
                                reason: String::new(),
                            },
                        };
                    }
                    Some(Ok(_)) => {
                        // Pong is handled automatically by tungstenite; binary is unused.
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "stream read error");
                        break Frame::Closed {
                            code: CLOSE_ABNORMAL,
                            reason: e.to_string(),
                        };
                    }
                    None => {
                        break Frame::Closed {
                            code: CLOSE_ABNORMAL,
                            reason: "connection ended without close frame".to_string(),
                        }
                    }
                }
            };
            let _ = in_tx.send(closed);
        });

        // Write task
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(Message::text(text)).await {
                    tracing::warn!(error = %e, "stream send failed");
                    return;
                }
            }
            // Sender dropped: close cleanly.
            let close = CloseFrame {
                code: CloseCode::Normal,
                reason: Default::default(),
            };
            let _ = write.send(Message::Close(Some(close))).await;
        });

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

/// Strip the query string so credentials never reach the logs.
fn redact_query(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?<redacted>"),
        None => url.to_string(),
    }
}
