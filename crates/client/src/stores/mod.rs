//! Client-side stores for chat state.

pub mod conversations;
pub mod messages;

pub use conversations::{merge_conversations, ConversationList, UpdateOutcome};
pub use messages::{merge_messages, MergeOutcome, MessageList};
