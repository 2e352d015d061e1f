//! Chat session actor.
//!
//! One task owns the [`ChatState`] and serializes every input: commands from
//! the handle, events from the stream, connection state changes, and the
//! completions of REST calls and timers it spawned. Observers read published
//! [`ChatSnapshot`]s.

use std::collections::HashMap;
use std::sync::Arc;

use chatdesk_shared::{ChatMessage, ClientCommand, Conversation, ServerEvent, UploadedFile};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::api_client::{AttachmentUpload, ChatApi};
use crate::cache::TtlCache;
use crate::config::ChatTimings;
use crate::delivery::{new_temp_id, Operator, OutgoingMessage};
use crate::state::{ChatAction, ChatSnapshot, ChatState, Effect};
use crate::ws::{ConnectionState, StreamConnection};

/// Construction options for [`ChatSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub timings: ChatTimings,
    pub operator: Operator,
    /// Messages fetched per history page.
    pub page_size: u32,
    pub cache: Option<TtlCache>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timings: ChatTimings::default(),
            operator: Operator::default(),
            page_size: 50,
            cache: None,
        }
    }
}

enum Command {
    LoadConversations,
    Refresh,
    Select(Option<String>),
    Send(String),
    SendAttachment {
        upload: AttachmentUpload,
        caption: String,
    },
    Retry(String),
    SetResolved {
        conversation_id: String,
        resolved: bool,
    },
    DismissError,
    Shutdown(oneshot::Sender<()>),
}

enum Internal {
    Action(ChatAction),
    SubscribeDue(String),
    Uploaded {
        conversation_id: String,
        caption: String,
        file: UploadedFile,
    },
}

/// Owned snapshot handed to the cache writer.
enum PersistJob {
    Conversations(Vec<Conversation>),
    Messages {
        conversation_id: String,
        messages: Vec<ChatMessage>,
    },
}

/// Writes cache entries on the blocking pool so file I/O never stalls the
/// actor. Jobs queued behind a write collapse to the newest per key.
async fn persist_loop(cache: TtlCache, mut jobs: mpsc::UnboundedReceiver<PersistJob>) {
    while let Some(job) = jobs.recv().await {
        let mut conversations = None;
        let mut messages = HashMap::new();
        let mut next = Some(job);
        while let Some(job) = next.take() {
            match job {
                PersistJob::Conversations(list) => conversations = Some(list),
                PersistJob::Messages {
                    conversation_id,
                    messages: list,
                } => {
                    messages.insert(conversation_id, list);
                }
            }
            next = jobs.try_recv().ok();
        }

        let cache = cache.clone();
        let written = tokio::task::spawn_blocking(move || {
            if let Some(list) = conversations {
                cache.store_conversations(&list);
            }
            for (conversation_id, list) in messages {
                cache.store_messages(&conversation_id, &list);
            }
        })
        .await;
        if let Err(e) = written {
            warn!(error = %e, "cache write did not complete");
        }
    }
    debug!("cache writer stopped");
}

/// Handle to a running chat session.
pub struct ChatSession {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<ChatSnapshot>,
    task: JoinHandle<()>,
}

impl ChatSession {
    /// Start the session actor on the current runtime.
    pub fn spawn(api: Arc<dyn ChatApi>, connection: StreamConnection, options: SessionOptions) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (internal, internal_rx) = mpsc::unbounded_channel();
        let state = ChatState::new(options.operator.clone(), options.timings.echo_window);
        let (snapshots_tx, snapshots) = watch::channel(state.snapshot());
        let events = connection.subscribe();
        let connection_state = connection.watch_state();
        let persist = options.cache.clone().map(|cache| {
            let (jobs, job_rx) = mpsc::unbounded_channel();
            tokio::spawn(persist_loop(cache, job_rx));
            jobs
        });

        let actor = SessionActor {
            state,
            api,
            connection,
            cache: options.cache,
            persist,
            timings: options.timings,
            page_size: options.page_size,
            internal,
            snapshots: snapshots_tx,
            subscribed: None,
        };
        let task = tokio::spawn(actor.run(command_rx, internal_rx, events, connection_state));

        Self {
            commands,
            snapshots,
            task,
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("chat session is no longer running");
        }
    }

    /// Load the conversation list (cache first, then the backend).
    pub fn load_conversations(&self) {
        self.command(Command::LoadConversations);
    }

    /// Re-poll the conversation list and the open conversation.
    pub fn refresh(&self) {
        self.command(Command::Refresh);
    }

    pub fn select(&self, conversation_id: impl Into<String>) {
        self.command(Command::Select(Some(conversation_id.into())));
    }

    pub fn deselect(&self) {
        self.command(Command::Select(None));
    }

    /// Send text to the open conversation. A leading `@` makes it an admin note.
    pub fn send(&self, text: impl Into<String>) {
        self.command(Command::Send(text.into()));
    }

    /// Upload a file and send it to the open conversation.
    pub fn send_attachment(&self, upload: AttachmentUpload, caption: impl Into<String>) {
        self.command(Command::SendAttachment {
            upload,
            caption: caption.into(),
        });
    }

    /// Re-send a failed message with its original content.
    pub fn retry(&self, temp_id: impl Into<String>) {
        self.command(Command::Retry(temp_id.into()));
    }

    pub fn set_resolved(&self, conversation_id: impl Into<String>, resolved: bool) {
        self.command(Command::SetResolved {
            conversation_id: conversation_id.into(),
            resolved,
        });
    }

    pub fn dismiss_error(&self) {
        self.command(Command::DismissError);
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshots.clone()
    }

    /// Unsubscribe from the open conversation and stop the actor.
    pub async fn shutdown(self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Shutdown(done)).is_ok() {
            let _ = finished.await;
        }
        let _ = self.task.await;
    }
}

struct SessionActor {
    state: ChatState,
    api: Arc<dyn ChatApi>,
    connection: StreamConnection,
    /// Read side; seeds lists before the backend answers.
    cache: Option<TtlCache>,
    /// Write side, drained by [`persist_loop`].
    persist: Option<mpsc::UnboundedSender<PersistJob>>,
    timings: ChatTimings,
    page_size: u32,
    internal: mpsc::UnboundedSender<Internal>,
    snapshots: watch::Sender<ChatSnapshot>,
    /// Conversation the stream is currently subscribed to.
    subscribed: Option<String>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
        mut events: broadcast::Receiver<ServerEvent>,
        mut connection_state: watch::Receiver<ConnectionState>,
    ) {
        let initial = connection_state.borrow_and_update().clone();
        self.on_connection_state(initial);
        self.publish();

        let mut events_open = true;
        let mut state_open = true;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(done)) => {
                        self.teardown();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(message) = internal.recv() => self.handle_internal(message),
                event = events.recv(), if events_open => match event {
                    Ok(event) => self.dispatch(ChatAction::Stream(event)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session fell behind the stream, reloading");
                        self.refresh();
                    }
                    Err(broadcast::error::RecvError::Closed) => events_open = false,
                },
                changed = connection_state.changed(), if state_open => match changed {
                    Ok(()) => {
                        let current = connection_state.borrow_and_update().clone();
                        self.on_connection_state(current);
                    }
                    Err(_) => state_open = false,
                },
            }
            self.publish();
        }
        debug!("chat session stopped");
    }

    fn publish(&self) {
        let snapshot = self.state.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }

    fn dispatch(&mut self, action: ChatAction) {
        for effect in self.state.apply(action) {
            self.run_effect(effect);
        }
    }

    fn post(&self, message: Internal) {
        // The actor holds a sender itself, so this only fails during shutdown.
        let _ = self.internal.send(message);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::LoadConversations => {
                if self.state.conversations().is_empty() {
                    if let Some(cached) = self.cache.as_ref().and_then(TtlCache::conversations) {
                        debug!(count = cached.len(), "seeding conversations from cache");
                        self.dispatch(ChatAction::ConversationsLoaded(cached));
                    }
                }
                self.fetch_conversations();
            }
            Command::Refresh => self.refresh(),
            Command::Select(id) => self.dispatch(ChatAction::Select(id)),
            Command::Send(text) => {
                let Some(conversation_id) = self.state.selected_id() else {
                    debug!("no conversation open, nothing to send to");
                    return;
                };
                let Some(message) = OutgoingMessage::compose(conversation_id, &text) else {
                    return;
                };
                self.start_send(message);
            }
            Command::SendAttachment { upload, caption } => {
                let Some(conversation_id) = self.state.selected_id().map(str::to_string) else {
                    debug!("no conversation open, dropping attachment");
                    return;
                };
                let api = self.api.clone();
                let tx = self.internal.clone();
                tokio::spawn(async move {
                    let message = match api.upload_attachment(upload).await {
                        Ok(file) => Internal::Uploaded {
                            conversation_id,
                            caption,
                            file,
                        },
                        Err(e) => Internal::Action(ChatAction::RequestFailed(format!(
                            "Failed to upload attachment: {e}"
                        ))),
                    };
                    let _ = tx.send(message);
                });
            }
            Command::Retry(temp_id) => self.dispatch(ChatAction::RetryStarted {
                temp_id,
                created_at: Utc::now(),
            }),
            Command::SetResolved {
                conversation_id,
                resolved,
            } => {
                let api = self.api.clone();
                let tx = self.internal.clone();
                tokio::spawn(async move {
                    let action = match api.set_resolved(&conversation_id, resolved).await {
                        Ok(()) => ChatAction::ResolveSucceeded {
                            conversation_id,
                            resolved,
                        },
                        Err(e) => ChatAction::ResolveFailed {
                            conversation_id,
                            error: e.to_string(),
                        },
                    };
                    let _ = tx.send(Internal::Action(action));
                });
            }
            Command::DismissError => self.dispatch(ChatAction::DismissError),
            Command::Shutdown(_) => {}
        }
    }

    fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Action(action) => self.dispatch(action),
            Internal::SubscribeDue(conversation_id) => self.subscribe_now(conversation_id),
            Internal::Uploaded {
                conversation_id,
                caption,
                file,
            } => {
                let message = OutgoingMessage::with_attachment(conversation_id, &caption, &file);
                self.start_send(message);
            }
        }
    }

    fn start_send(&mut self, message: OutgoingMessage) {
        self.dispatch(ChatAction::SendStarted {
            temp_id: new_temp_id(),
            message,
            created_at: Utc::now(),
        });
    }

    fn refresh(&mut self) {
        self.fetch_conversations();
        if let Some(id) = self.state.selected_id().map(str::to_string) {
            self.fetch_messages(id);
        }
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        let connected = state.is_connected();
        self.dispatch(ChatAction::ConnectionChanged(state));
        // A new connection starts with no subscriptions.
        self.subscribed = None;
        if connected {
            if let Some(id) = self.state.selected_id().map(str::to_string) {
                self.run_effect(Effect::Subscribe(id));
            }
        }
    }

    fn subscribe_now(&mut self, conversation_id: String) {
        if self.state.selected_id() != Some(conversation_id.as_str()) {
            debug!(%conversation_id, "selection changed before subscribing");
            return;
        }
        if self.subscribed.as_deref() == Some(conversation_id.as_str()) {
            return;
        }
        let command = ClientCommand::SubscribeConversation {
            conversation_id: conversation_id.clone(),
        };
        if self.connection.send(&command) {
            info!(%conversation_id, "subscribed to conversation");
            self.subscribed = Some(conversation_id);
        } else {
            debug!(%conversation_id, "stream not connected, subscribing once it is");
        }
    }

    fn unsubscribe(&mut self, conversation_id: String) {
        if self.subscribed.as_deref() != Some(conversation_id.as_str()) {
            return;
        }
        self.subscribed = None;
        let command = ClientCommand::UnsubscribeConversation {
            conversation_id: conversation_id.clone(),
        };
        if self.connection.send(&command) {
            info!(%conversation_id, "unsubscribed from conversation");
        }
    }

    fn teardown(&mut self) {
        if let Some(id) = self.subscribed.clone() {
            self.unsubscribe(id);
        }
    }

    fn fetch_conversations(&self) {
        let api = self.api.clone();
        let tx = self.internal.clone();
        tokio::spawn(async move {
            let action = match api.list_conversations().await {
                Ok(list) => ChatAction::ConversationsLoaded(list),
                Err(e) => {
                    warn!(error = %e, "failed to load conversations");
                    ChatAction::RequestFailed(format!("Failed to load conversations: {e}"))
                }
            };
            let _ = tx.send(Internal::Action(action));
        });
    }

    fn fetch_messages(&self, conversation_id: String) {
        let api = self.api.clone();
        let tx = self.internal.clone();
        let page_size = self.page_size;
        tokio::spawn(async move {
            let action = match api.list_messages(&conversation_id, 1, page_size).await {
                Ok(mut messages) => {
                    // Newest first on the wire.
                    messages.reverse();
                    ChatAction::MessagesLoaded {
                        conversation_id,
                        messages,
                    }
                }
                Err(e) => {
                    warn!(%conversation_id, error = %e, "failed to load messages");
                    ChatAction::RequestFailed(format!("Failed to load messages: {e}"))
                }
            };
            let _ = tx.send(Internal::Action(action));
        });
    }

    fn persist(&self, job: impl FnOnce(&ChatState) -> Option<PersistJob>) {
        let Some(jobs) = &self.persist else {
            return;
        };
        if let Some(job) = job(&self.state) {
            if jobs.send(job).is_err() {
                warn!("cache writer is gone, dropping write");
            }
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Subscribe(conversation_id) => {
                let tx = self.internal.clone();
                let delay = self.timings.subscribe_delay;
                tokio::spawn(async move {
                    sleep(delay).await;
                    let _ = tx.send(Internal::SubscribeDue(conversation_id));
                });
            }
            Effect::Unsubscribe(conversation_id) => self.unsubscribe(conversation_id),
            Effect::LoadMessages(conversation_id) => {
                if let Some(cached) = self.cache.as_ref().and_then(|c| c.messages(&conversation_id)) {
                    debug!(%conversation_id, count = cached.len(), "seeding messages from cache");
                    self.post(Internal::Action(ChatAction::MessagesLoaded {
                        conversation_id: conversation_id.clone(),
                        messages: cached,
                    }));
                }
                self.fetch_messages(conversation_id);
            }
            Effect::Deliver { temp_id, message } => {
                let api = self.api.clone();
                let tx = self.internal.clone();
                tokio::spawn(async move {
                    let action = match api.send_message(&message).await {
                        Ok(record) => ChatAction::SendSucceeded { temp_id, record },
                        Err(e) => ChatAction::SendFailed {
                            temp_id,
                            error: e.to_string(),
                        },
                    };
                    let _ = tx.send(Internal::Action(action));
                });
            }
            Effect::ExpirePending { temp_id, attempt } => {
                let tx = self.internal.clone();
                let timeout = self.timings.pending_timeout;
                tokio::spawn(async move {
                    sleep(timeout).await;
                    let _ = tx.send(Internal::Action(ChatAction::PendingExpired { temp_id, attempt }));
                });
            }
            Effect::PersistConversations => {
                self.persist(|state| {
                    Some(PersistJob::Conversations(state.conversations().items().to_vec()))
                });
            }
            Effect::PersistMessages(conversation_id) => {
                self.persist(|state| {
                    let messages = state.messages();
                    (messages.conversation_id() == Some(conversation_id.as_str())).then(|| {
                        PersistJob::Messages {
                            messages: messages.messages().to_vec(),
                            conversation_id,
                        }
                    })
                });
            }
        }
    }
}
