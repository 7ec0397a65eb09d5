use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one in-flight turn: a user message and the answer streamed for it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnKey {
    pub user_id: String,
    pub turn_id: String,
}

impl TurnKey {
    pub fn new(user_id: impl Into<String>, turn_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            turn_id: turn_id.into(),
        }
    }
}

impl fmt::Display for TurnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.user_id, self.turn_id)
    }
}

/// A user message received from the chat surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub user_id: String,
    /// Chat-surface message id; doubles as the turn id
    pub turn_id: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(
        user_id: impl Into<String>,
        turn_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            turn_id: turn_id.into(),
            text: text.into(),
        }
    }

    pub fn turn_key(&self) -> TurnKey {
        TurnKey::new(self.user_id.clone(), self.turn_id.clone())
    }
}
