use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of one session controller.
///
/// Only the controller mutates this; collaborators read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Generating,
    /// Initialization failed; `initialize` may be retried
    Errored,
}

impl SessionState {
    pub fn is_ready(self) -> bool {
        self == SessionState::Ready
    }

    pub fn is_generating(self) -> bool {
        self == SessionState::Generating
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initializing => "initializing",
            SessionState::Ready => "ready",
            SessionState::Generating => "generating",
            SessionState::Errored => "errored",
        };
        f.write_str(name)
    }
}
