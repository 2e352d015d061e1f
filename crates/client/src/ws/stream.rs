//! Managed chat stream connection with heartbeat and bounded auto-reconnect.

use std::sync::{Arc, Mutex, MutexGuard};

use chatdesk_shared::{ClientCommand, ServerEvent, CLOSE_ABNORMAL, CLOSE_NORMAL};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use super::connection::{ConnectionState, Connector, Frame, Link, ReconnectConfig, TungsteniteConnector};

const EVENT_BUFFER: usize = 256;

/// Handle to the chat stream. Cheap to clone; all clones share one connection.
///
/// Inbound frames are parsed into [`ServerEvent`]s and fanned out to every
/// [`subscribe`](Self::subscribe)r. Each live connection owns its heartbeat,
/// so pings stop the moment that connection ends.
#[derive(Clone)]
pub struct StreamConnection {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    config: ReconnectConfig,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ServerEvent>,
    shared: Mutex<Shared>,
}

#[derive(Default)]
struct Shared {
    url: String,
    attempts: u32,
    reconnect_enabled: bool,
    /// Bumped whenever a connection instance is superseded; stale tasks compare against it.
    generation: u64,
    outgoing: Option<mpsc::UnboundedSender<String>>,
    link_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl StreamConnection {
    pub fn new(connector: Arc<dyn Connector>, config: ReconnectConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                state,
                events,
                shared: Mutex::new(Shared::default()),
            }),
        }
    }

    /// Connection backed by a real WebSocket.
    pub fn native(config: ReconnectConfig) -> Self {
        Self::new(Arc::new(TungsteniteConnector), config)
    }

    /// Open the stream at `url`.
    ///
    /// A blank URL means the credential isn't ready yet and leaves the
    /// connection disconnected. Does nothing while already connected or connecting.
    pub fn connect(&self, url: &str) {
        let url = url.trim();
        if url.is_empty() {
            tracing::debug!("no stream url yet, staying disconnected");
            return;
        }

        let mut shared = self.inner.lock();
        if matches!(
            *self.inner.state.borrow(),
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            tracing::debug!("stream already open, ignoring connect");
            return;
        }
        shared.url = url.to_string();
        shared.reconnect_enabled = true;
        open(&self.inner, &mut shared);
    }

    /// Close the stream intentionally. No reconnect follows.
    pub fn disconnect(&self) {
        let mut shared = self.inner.lock();
        shared.reconnect_enabled = false;
        shared.generation += 1;
        if let Some(timer) = shared.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(task) = shared.link_task.take() {
            task.abort();
        }
        // Dropping the last sender makes the transport send a normal close.
        shared.outgoing = None;
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!("stream disconnected");
    }

    /// Zero the attempt counter and re-enable reconnection, without connecting.
    pub fn reset_reconnection(&self) {
        let mut shared = self.inner.lock();
        shared.attempts = 0;
        shared.reconnect_enabled = true;
        if matches!(*self.inner.state.borrow(), ConnectionState::Error { .. }) {
            self.inner.set_state(ConnectionState::Disconnected);
        }
    }

    /// Reset reconnection and connect again to the last URL.
    pub fn retry(&self) {
        self.reset_reconnection();
        let url = self.inner.lock().url.clone();
        self.connect(&url);
    }

    /// Send a control message. Returns false unless the stream is connected.
    pub fn send(&self, command: &ClientCommand) -> bool {
        let json = match serde_json::to_string(command) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode control message");
                return false;
            }
        };
        let shared = self.inner.lock();
        if !self.inner.state.borrow().is_connected() {
            tracing::debug!(?command, "stream not connected, dropping control message");
            return false;
        }
        match &shared.outgoing {
            Some(tx) => tx.send(json).is_ok(),
            None => false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Receive every inbound event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    /// Consecutive abnormal closes since the last successful open or reset.
    pub fn attempts(&self) -> u32 {
        self.inner.lock().attempts
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(from = current.label(), to = state.label(), "stream state changed");
            *current = state;
            true
        });
    }

    fn dispatch(&self, text: &str) {
        match ServerEvent::parse(text) {
            Ok(ServerEvent::Pong) => tracing::trace!("pong"),
            Ok(event) => {
                tracing::debug!(kind = event.kind(), "stream event");
                // No subscribers is fine.
                let _ = self.events.send(event);
            }
            Err(e) => tracing::warn!(error = %e, "dropping unreadable stream frame"),
        }
    }
}

/// Start a new connection instance, tearing down any previous one.
fn open(inner: &Arc<Inner>, shared: &mut Shared) {
    shared.generation += 1;
    let generation = shared.generation;
    if let Some(task) = shared.link_task.take() {
        task.abort();
    }
    if let Some(timer) = shared.reconnect_timer.take() {
        timer.abort();
    }
    shared.outgoing = None;

    inner.set_state(ConnectionState::Connecting);
    tracing::info!(attempt = shared.attempts, "opening chat stream");
    let task = tokio::spawn(run_connection(inner.clone(), generation, shared.url.clone()));
    shared.link_task = Some(task);
}

async fn run_connection(inner: Arc<Inner>, generation: u64, url: String) {
    let link = match inner.connector.connect(&url).await {
        Ok(link) => link,
        Err(e) => {
            tracing::warn!(error = %e, "chat stream failed to open");
            handle_close(&inner, generation, CLOSE_ABNORMAL, e.to_string());
            return;
        }
    };
    let Link {
        outgoing,
        mut incoming,
    } = link;

    {
        let mut shared = inner.lock();
        if shared.generation != generation {
            return;
        }
        shared.attempts = 0;
        shared.outgoing = Some(outgoing.clone());
        inner.set_state(ConnectionState::Connected);
    }
    tracing::info!("chat stream connected");

    let ping = match serde_json::to_string(&ClientCommand::Ping) {
        Ok(ping) => ping,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode ping");
            return;
        }
    };
    let period = inner.config.heartbeat_interval;
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let (code, reason) = loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if outgoing.send(ping.clone()).is_err() {
                    break (CLOSE_ABNORMAL, "transport stopped accepting frames".to_string());
                }
                tracing::trace!("ping");
            }
            frame = incoming.recv() => match frame {
                Some(Frame::Text(text)) => inner.dispatch(&text),
                Some(Frame::Closed { code, reason }) => break (code, reason),
                None => break (CLOSE_ABNORMAL, "transport ended".to_string()),
            },
        }
    };
    handle_close(&inner, generation, code, reason);
}

/// Apply the reconnect policy after a connection instance ended.
fn handle_close(inner: &Arc<Inner>, generation: u64, code: u16, reason: String) {
    let mut shared = inner.lock();
    if shared.generation != generation {
        return;
    }
    shared.outgoing = None;
    shared.link_task = None;
    inner.set_state(ConnectionState::Disconnected);

    if code == CLOSE_NORMAL || !shared.reconnect_enabled {
        tracing::info!(code, %reason, "chat stream closed");
        return;
    }

    shared.attempts += 1;
    if shared.attempts >= inner.config.max_attempts {
        tracing::warn!(code, %reason, attempts = shared.attempts, "giving up on chat stream");
        inner.set_state(ConnectionState::Error {
            reason: format!("connection lost after {} attempts: {reason}", shared.attempts),
        });
        return;
    }

    let delay = inner.config.delay;
    tracing::info!(code, %reason, attempt = shared.attempts, ?delay, "chat stream dropped, reconnecting");
    let timer_inner = inner.clone();
    shared.reconnect_timer = Some(tokio::spawn(async move {
        sleep(delay).await;
        let mut shared = timer_inner.lock();
        if shared.generation != generation || !shared.reconnect_enabled {
            return;
        }
        shared.reconnect_timer = None;
        open(&timer_inner, &mut shared);
    }));
}
