//! Ordered conversation history with tail-only rollback.

use serde::{Deserialize, Serialize};

use super::message::{Message, MessageId, MessageStatus};
use crate::error::{OdaError, Result};

/// Append-ordered history of one session.
///
/// Only the tail may change after it is appended: a pending (streaming)
/// assistant reply can grow and be finalized, and the most recent entry can
/// be rolled back by id. Nothing may be appended behind a pending reply, so
/// at most one pending message exists at any time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `message` to the end of the log.
    ///
    /// `created_at` is raised to the previous entry's timestamp if the clock
    /// went backwards.
    ///
    /// # Errors
    ///
    /// `HistoryConflict` while a pending reply is still the tail.
    pub fn append(&mut self, mut message: Message) -> Result<&Message> {
        if let Some(last) = self.messages.last() {
            if last.is_pending() {
                return Err(OdaError::history_conflict(format!(
                    "cannot append while message {} is still streaming",
                    last.id
                )));
            }
            if message.created_at < last.created_at {
                message.created_at = last.created_at;
            }
        }
        self.messages.push(message);
        self.last()
            .ok_or_else(|| OdaError::internal("log empty after append"))
    }

    /// Removes the most recent entry, which must be `id`.
    ///
    /// # Errors
    ///
    /// `HistoryConflict` if `id` is not the tail; the log is left untouched.
    pub fn remove_last(&mut self, id: MessageId) -> Result<Message> {
        self.check_tail(id)?;
        self.messages
            .pop()
            .ok_or_else(|| OdaError::internal("log empty after tail check"))
    }

    /// Appends `delta` to the pending tail reply `id`.
    pub fn append_to_tail(&mut self, id: MessageId, delta: &str) -> Result<&Message> {
        let tail = self.pending_tail_mut(id)?;
        tail.content.push_str(delta);
        Ok(&*tail)
    }

    /// Freezes the pending tail reply `id` with its final `status`.
    pub fn finalize_tail(&mut self, id: MessageId, status: MessageStatus) -> Result<&Message> {
        if status == MessageStatus::Streaming {
            return Err(OdaError::internal("a finalized message cannot be streaming"));
        }
        let tail = self.pending_tail_mut(id)?;
        tail.status = status;
        Ok(&*tail)
    }

    /// Owned copy of the history in append order.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The pending reply, if one is streaming.
    pub fn pending(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.is_pending())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    fn check_tail(&self, id: MessageId) -> Result<()> {
        match self.messages.last() {
            Some(last) if last.id == id => Ok(()),
            Some(last) => Err(OdaError::history_conflict(format!(
                "message {} is not the most recent entry (tail is {})",
                id, last.id
            ))),
            None => Err(OdaError::history_conflict(format!(
                "message {id} not found: log is empty"
            ))),
        }
    }

    fn pending_tail_mut(&mut self, id: MessageId) -> Result<&mut Message> {
        self.check_tail(id)?;
        match self.messages.last_mut() {
            Some(tail) if tail.is_pending() => Ok(tail),
            _ => Err(OdaError::history_conflict(format!(
                "message {id} is not streaming"
            ))),
        }
    }
}
