//! Chat state reducer.
//!
//! `ChatState` is owned by exactly one task (the session actor). Every input,
//! whether a stream event, a REST completion, a timer or a user command, is
//! folded in through [`ChatState::apply`], which returns the side effects the
//! owner must run. Nothing in here performs I/O.

use std::collections::{HashMap, VecDeque};

use chatdesk_shared::{ChatMessage, Conversation, DeliveryState, ServerEvent};
use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::delivery::{Operator, OutgoingMessage};
use crate::stores::{ConversationList, MergeOutcome, MessageList, UpdateOutcome};
use crate::ws::ConnectionState;

/// Inputs to the reducer.
#[derive(Debug, Clone)]
pub enum ChatAction {
    ConversationsLoaded(Vec<Conversation>),
    /// History for one conversation, oldest first.
    MessagesLoaded {
        conversation_id: String,
        messages: Vec<ChatMessage>,
    },
    Stream(ServerEvent),
    Select(Option<String>),
    SendStarted {
        temp_id: String,
        message: OutgoingMessage,
        created_at: DateTime<Utc>,
    },
    SendSucceeded {
        temp_id: String,
        record: Option<ChatMessage>,
    },
    SendFailed {
        temp_id: String,
        error: String,
    },
    /// Re-send a failed message. One already dropped by cleanup is sent
    /// again as a fresh message stamped `created_at`.
    RetryStarted {
        temp_id: String,
        created_at: DateTime<Utc>,
    },
    PendingExpired {
        temp_id: String,
        attempt: u32,
    },
    ResolveSucceeded {
        conversation_id: String,
        resolved: bool,
    },
    ResolveFailed {
        conversation_id: String,
        error: String,
    },
    /// A load or upload failed; surfaced as the session's last error.
    RequestFailed(String),
    ConnectionChanged(ConnectionState),
    DismissError,
}

/// Side effects requested by the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Subscribe to the conversation after the settling delay.
    Subscribe(String),
    Unsubscribe(String),
    LoadMessages(String),
    Deliver {
        temp_id: String,
        message: OutgoingMessage,
    },
    /// Drop the optimistic entry if it is still pending when the timeout fires.
    ExpirePending {
        temp_id: String,
        attempt: u32,
    },
    PersistConversations,
    PersistMessages(String),
}

/// Bookkeeping for one in-flight or failed send.
#[derive(Debug, Clone)]
struct PendingSend {
    message: OutgoingMessage,
    /// Local copy, kept so a settle can update the preview after a switch.
    optimistic: ChatMessage,
    /// Increments on each retry; stale expiry timers are ignored.
    attempt: u32,
    delivery: DeliveryState,
}

/// Sends dropped by the unconfirmed-message timeout that a retry can revive.
const ABANDONED_CAP: usize = 32;

/// Read-only view published to observers after each transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSnapshot {
    pub conversations: Vec<Conversation>,
    pub selected_id: Option<String>,
    pub selected: Option<Conversation>,
    pub messages: Vec<ChatMessage>,
    pub messages_loaded: bool,
    pub connection: ConnectionState,
    pub last_error: Option<String>,
    pub pending_sends: usize,
    /// Bumped each time the conversation list is reloaded from the backend.
    pub conversations_revision: u64,
}

#[derive(Debug, Clone)]
pub struct ChatState {
    conversations: ConversationList,
    selected: Option<String>,
    messages: MessageList,
    pending: HashMap<String, PendingSend>,
    abandoned: VecDeque<(String, OutgoingMessage)>,
    connection: ConnectionState,
    last_error: Option<String>,
    operator: Operator,
    echo_window: chrono::Duration,
    conversations_revision: u64,
}

impl ChatState {
    pub fn new(operator: Operator, echo_window: std::time::Duration) -> Self {
        Self {
            conversations: ConversationList::default(),
            selected: None,
            messages: MessageList::default(),
            pending: HashMap::new(),
            abandoned: VecDeque::new(),
            connection: ConnectionState::Disconnected,
            last_error: None,
            operator,
            echo_window: chrono::Duration::from_std(echo_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(10)),
            conversations_revision: 0,
        }
    }

    pub fn conversations(&self) -> &ConversationList {
        &self.conversations
    }

    pub fn messages(&self) -> &MessageList {
        &self.messages
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// The selected conversation, read from the list so both views always agree.
    pub fn selected_conversation(&self) -> Option<&Conversation> {
        self.selected.as_deref().and_then(|id| self.conversations.get(id))
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_pending_send(&self, temp_id: &str) -> bool {
        self.pending.contains_key(temp_id)
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            conversations: self.conversations.items().to_vec(),
            selected_id: self.selected.clone(),
            selected: self.selected_conversation().cloned(),
            messages: self.messages.messages().to_vec(),
            messages_loaded: self.messages.is_loaded(),
            connection: self.connection.clone(),
            last_error: self.last_error.clone(),
            pending_sends: self.pending.len(),
            conversations_revision: self.conversations_revision,
        }
    }

    pub fn apply(&mut self, action: ChatAction) -> Vec<Effect> {
        match action {
            ChatAction::ConversationsLoaded(list) => {
                debug!(count = list.len(), "conversations loaded");
                self.conversations.replace_all(list);
                if let Some(id) = self.selected.clone() {
                    self.conversations.clear_unread_admin(&id);
                }
                self.conversations_revision += 1;
                vec![Effect::PersistConversations]
            }
            ChatAction::MessagesLoaded {
                conversation_id,
                messages,
            } => {
                if self.selected.as_deref() != Some(conversation_id.as_str()) {
                    debug!(%conversation_id, "dropping history for a conversation no longer open");
                    return Vec::new();
                }
                debug!(%conversation_id, count = messages.len(), "messages loaded");
                self.messages.set_history(messages, self.echo_window);
                self.forget_reconciled();
                vec![Effect::PersistMessages(conversation_id)]
            }
            ChatAction::Stream(event) => self.apply_event(event),
            ChatAction::Select(id) => self.select(id),
            ChatAction::SendStarted {
                temp_id,
                message,
                created_at,
            } => self.start_send(temp_id, message, created_at),
            ChatAction::SendSucceeded { temp_id, record } => self.settle(&temp_id, record),
            ChatAction::SendFailed { temp_id, error } => {
                warn!(%temp_id, %error, "message delivery failed");
                if let Some(entry) = self.pending.get_mut(&temp_id) {
                    entry.delivery = DeliveryState::Failed;
                    self.messages.mark_failed(&temp_id);
                }
                Vec::new()
            }
            ChatAction::RetryStarted {
                temp_id,
                created_at,
            } => {
                let Some(entry) = self.pending.get_mut(&temp_id) else {
                    let Some(pos) = self.abandoned.iter().position(|(id, _)| *id == temp_id) else {
                        debug!(%temp_id, "nothing to retry");
                        return Vec::new();
                    };
                    let Some((_, message)) = self.abandoned.remove(pos) else {
                        return Vec::new();
                    };
                    debug!(%temp_id, "re-sending message dropped by cleanup");
                    return self.start_send(temp_id, message, created_at);
                };
                entry.attempt += 1;
                entry.delivery = DeliveryState::Pending;
                let attempt = entry.attempt;
                let message = entry.message.clone();
                self.messages.mark_pending(&temp_id);
                vec![
                    Effect::Deliver {
                        temp_id: temp_id.clone(),
                        message,
                    },
                    Effect::ExpirePending { temp_id, attempt },
                ]
            }
            ChatAction::PendingExpired { temp_id, attempt } => {
                let still_pending = self.pending.get(&temp_id).is_some_and(|entry| {
                    entry.attempt == attempt && entry.delivery == DeliveryState::Pending
                });
                if still_pending {
                    debug!(%temp_id, "dropping unconfirmed message");
                    if let Some(entry) = self.pending.remove(&temp_id) {
                        if self.abandoned.len() == ABANDONED_CAP {
                            self.abandoned.pop_front();
                        }
                        self.abandoned.push_back((temp_id.clone(), entry.message));
                    }
                    self.messages.remove_temp(&temp_id);
                }
                Vec::new()
            }
            ChatAction::ResolveSucceeded {
                conversation_id,
                resolved,
            } => {
                self.conversations.set_resolved(&conversation_id, resolved);
                vec![Effect::PersistConversations]
            }
            ChatAction::ResolveFailed {
                conversation_id,
                error,
            } => {
                warn!(%conversation_id, %error, "resolve failed");
                self.last_error = Some(format!("Failed to update conversation: {error}"));
                Vec::new()
            }
            ChatAction::RequestFailed(error) => {
                self.last_error = Some(error);
                Vec::new()
            }
            ChatAction::ConnectionChanged(state) => {
                self.connection = state;
                Vec::new()
            }
            ChatAction::DismissError => {
                self.last_error = None;
                Vec::new()
            }
        }
    }

    fn start_send(
        &mut self,
        temp_id: String,
        message: OutgoingMessage,
        created_at: DateTime<Utc>,
    ) -> Vec<Effect> {
        let optimistic = message.to_optimistic(&temp_id, &self.operator, created_at);
        if self.selected.as_deref() == Some(message.conversation_id.as_str()) {
            self.messages.push_optimistic(optimistic.clone());
        }
        self.pending.insert(
            temp_id.clone(),
            PendingSend {
                message: message.clone(),
                optimistic,
                attempt: 0,
                delivery: DeliveryState::Pending,
            },
        );
        vec![
            Effect::Deliver {
                temp_id: temp_id.clone(),
                message,
            },
            Effect::ExpirePending { temp_id, attempt: 0 },
        ]
    }

    fn select(&mut self, id: Option<String>) -> Vec<Effect> {
        if id == self.selected {
            return Vec::new();
        }
        let mut effects = Vec::new();
        if let Some(previous) = self.selected.take() {
            effects.push(Effect::Unsubscribe(previous));
        }

        match id {
            Some(id) => {
                debug!(conversation_id = %id, "conversation selected");
                self.conversations.clear_unread_admin(&id);
                self.messages = MessageList::for_conversation(id.clone());
                self.selected = Some(id.clone());
                effects.push(Effect::PersistConversations);
                effects.push(Effect::LoadMessages(id.clone()));
                effects.push(Effect::Subscribe(id));
            }
            None => {
                self.messages = MessageList::default();
            }
        }
        effects
    }

    fn settle(&mut self, temp_id: &str, record: Option<ChatMessage>) -> Vec<Effect> {
        let Some(entry) = self.pending.remove(temp_id) else {
            // Already reconciled by the stream echo or dropped by cleanup.
            if let Some(record) = record {
                return self.record_delivered(record);
            }
            return Vec::new();
        };

        match record {
            Some(record) => {
                self.messages.replace_temp(temp_id, record.clone());
                self.record_delivered(record)
            }
            None => {
                self.messages.settle_temp(temp_id);
                let mut settled = entry.optimistic;
                settled.delivery = DeliveryState::Settled;
                self.conversations
                    .record_message(&settled, self.selected.as_deref());
                vec![Effect::PersistConversations]
            }
        }
    }

    /// Fold a server-confirmed outgoing record into the list and preview.
    fn record_delivered(&mut self, record: ChatMessage) -> Vec<Effect> {
        let conversation_id = record.conversation_id.clone();
        self.conversations
            .record_message(&record, self.selected.as_deref());
        let mut effects = vec![Effect::PersistConversations];
        if self.selected.as_deref() == Some(conversation_id.as_str()) {
            self.messages.merge_incoming(record, self.echo_window);
            effects.push(Effect::PersistMessages(conversation_id));
        }
        effects
    }

    fn apply_event(&mut self, event: ServerEvent) -> Vec<Effect> {
        match event {
            ServerEvent::NewMessage(msg) => {
                let conversation_id = msg.conversation_id.clone();
                let mut effects = Vec::new();
                if self
                    .conversations
                    .record_message(&msg, self.selected.as_deref())
                {
                    effects.push(Effect::PersistConversations);
                } else {
                    debug!(%conversation_id, "message for a conversation not in the list");
                }
                if self.selected.as_deref() == Some(conversation_id.as_str()) {
                    self.merge_stream_message(msg);
                    effects.push(Effect::PersistMessages(conversation_id));
                }
                effects
            }
            ServerEvent::ExistingMessages(batch) => {
                let Some(selected) = self.selected.clone() else {
                    return Vec::new();
                };
                let mut merged_any = false;
                for msg in batch.into_iter().filter(|m| m.conversation_id == selected) {
                    self.merge_stream_message(msg);
                    merged_any = true;
                }
                if merged_any {
                    vec![Effect::PersistMessages(selected)]
                } else {
                    Vec::new()
                }
            }
            ServerEvent::ConversationUpdate(update) => {
                let outcome = self.conversations.apply_update(&update);
                if outcome == UpdateOutcome::Created {
                    debug!(conversation_id = %update.id, "new conversation");
                }
                if self.selected.as_deref() == Some(update.id.as_str()) {
                    self.conversations.clear_unread_admin(&update.id);
                }
                vec![Effect::PersistConversations]
            }
            ServerEvent::Error { message } => {
                warn!(%message, "stream reported an error");
                self.last_error = Some(message);
                Vec::new()
            }
            ServerEvent::ConnectionEstablished(_) => {
                debug!("stream session established");
                Vec::new()
            }
            ServerEvent::SubscriptionConfirmed { conversation_id } => {
                debug!(?conversation_id, "subscription confirmed");
                Vec::new()
            }
            ServerEvent::Pong => Vec::new(),
            ServerEvent::Unknown(kind) => {
                trace!(%kind, "ignoring stream event");
                Vec::new()
            }
        }
    }

    fn merge_stream_message(&mut self, msg: ChatMessage) {
        match self.messages.merge_incoming(msg, self.echo_window) {
            MergeOutcome::Reconciled { temp_id } => {
                trace!(%temp_id, "optimistic message confirmed by stream");
                self.pending.remove(&temp_id);
            }
            MergeOutcome::Duplicate => trace!("duplicate message ignored"),
            MergeOutcome::Inserted => {}
        }
    }

    /// Drop bookkeeping for sends whose list entry a history merge replaced.
    fn forget_reconciled(&mut self) {
        let messages = &self.messages;
        let selected = self.selected.as_deref();
        self.pending.retain(|temp_id, entry| {
            Some(entry.message.conversation_id.as_str()) != selected
                || messages.find_by_temp_id(temp_id).is_some()
        });
    }
}
