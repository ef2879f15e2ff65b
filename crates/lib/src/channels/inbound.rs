//! Inbound chat event as seen by the dispatch engine.

/// What kind of conversation an event came from. Only group-like
/// conversations can trigger replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    Private,
    Group,
    Channel,
}

/// One inbound message, already decoded by the transport. The transport
/// guarantees `is_from_self` and `kind` are populated correctly; the
/// engine's early gates depend on them.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Conversation key (e.g. Telegram chat id as a decimal string).
    pub conversation_id: String,
    pub sender_first_name: String,
    /// Public handle without the leading `@`, when the sender has one.
    pub sender_username: Option<String>,
    /// Conversation title; absent for private conversations.
    pub conversation_title: Option<String>,
    pub text: String,
    pub message_id: i64,
    pub is_from_self: bool,
    pub kind: ConversationKind,
}

impl InboundEvent {
    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }
}
