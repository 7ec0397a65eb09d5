use serde::{Deserialize, Serialize};

/// Event kind that closes an answer stream
pub const MESSAGE_END_EVENT: &str = "message_end";

/// One parsed event line of an answer stream
///
/// Only the fields the bridge needs are kept: the kind tag, the incremental
/// answer text, the conversation id and the terminal marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,

    /// Error text carried by `error` events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub terminal: bool,
}

impl StreamEvent {
    pub fn new(event: impl Into<String>) -> Self {
        let event = event.into();
        let terminal = event == MESSAGE_END_EVENT;
        Self {
            event,
            answer: None,
            conversation_id: None,
            message_id: None,
            task_id: None,
            message: None,
            terminal,
        }
    }

    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.answer = Some(answer.into());
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Answer text, if present and non-empty
    pub fn answer_delta(&self) -> Option<&str> {
        self.answer.as_deref().filter(|text| !text.is_empty())
    }
}
