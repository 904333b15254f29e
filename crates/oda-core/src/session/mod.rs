//! Session domain module.
//!
//! # Module Structure
//!
//! - `message`: Conversation message types (`Message`, `MessageRole`, `MessageStatus`)
//! - `conversation`: Ordered history with tail-only rollback (`ConversationLog`)
//! - `state`: Controller lifecycle (`SessionState`)
//! - `event`: Observer notifications (`SessionEvent`)

mod conversation;
mod event;
mod message;
mod state;

pub use conversation::ConversationLog;
pub use event::SessionEvent;
pub use message::{Message, MessageId, MessageRole, MessageStatus};
pub use state::SessionState;
