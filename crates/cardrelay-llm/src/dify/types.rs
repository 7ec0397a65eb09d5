use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::streaming::StreamEvent;
use crate::traits::TurnRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Streaming,
    Blocking,
}

/// Body of `POST /chat-messages`
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessageRequest {
    pub inputs: Map<String, Value>,
    pub query: String,
    pub user: String,
    pub response_mode: ResponseMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl From<TurnRequest> for ChatMessageRequest {
    fn from(request: TurnRequest) -> Self {
        Self {
            inputs: request.inputs,
            query: request.query,
            user: request.user_id,
            response_mode: ResponseMode::Streaming,
            conversation_id: request.conversation_id.filter(|id| !id.is_empty()),
        }
    }
}

/// Raw event object carried by each `data:` line of the chat stream
#[derive(Debug, Clone, Deserialize)]
pub struct DifyStreamChunk {
    pub event: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}

impl From<DifyStreamChunk> for StreamEvent {
    fn from(chunk: DifyStreamChunk) -> Self {
        let mut event = StreamEvent::new(chunk.event);
        event.answer = chunk.answer;
        event.conversation_id = chunk.conversation_id.filter(|id| !id.is_empty());
        event.message_id = chunk.message_id;
        event.task_id = chunk.task_id;
        event.message = match (chunk.code, chunk.message) {
            (Some(code), Some(message)) => Some(format!("{}: {}", code, message)),
            (None, message) => message,
            (code, None) => code,
        };
        event
    }
}
