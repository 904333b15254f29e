use serde::{Deserialize, Serialize};

use super::message::{Message, MessageId};
use super::state::SessionState;
use crate::error::OdaError;
use crate::progress::Progress;

/// Notifications published by a session controller to its observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// Resource loading progress during initialization.
    Progress(Progress),
    MessageAppended {
        message: Message,
    },
    /// A streaming reply received an increment.
    MessageUpdated {
        id: MessageId,
        delta: String,
        content: String,
    },
    /// A streaming reply was frozen (complete or cancelled).
    MessageFinalized {
        message: Message,
    },
    /// A message was rolled back after a failure.
    MessageRemoved {
        id: MessageId,
    },
    HistoryCleared,
    Error {
        error: OdaError,
    },
}
