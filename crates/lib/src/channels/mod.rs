//! Chat transport boundary.
//!
//! Inbound events flow from a channel connector (e.g. Telegram) into the
//! dispatch engine; replies go back out through the [`SendPort`] trait.
//! The engine itself never talks to a chat network directly.

mod inbound;
mod send;
mod telegram;

pub use inbound::{ConversationKind, InboundEvent};
pub use send::{SendError, SendPort};
pub use telegram::{TelegramChannel, TelegramUpdate};
