use crate::error::Result;
use crate::streaming::StreamEvent;
use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use std::pin::Pin;

/// Parsed events of one streaming answer, in arrival order
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Conversational AI backend that answers one user turn as an event stream
///
/// The returned stream is lazy: events are read from the network as the
/// caller polls it.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send_turn(&self, request: TurnRequest) -> Result<EventStream>;
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_id: String,
    pub query: String,
    /// Absent starts a fresh conversation
    pub conversation_id: Option<String>,
    pub inputs: Map<String, Value>,
}

impl TurnRequest {
    pub fn new(user_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            query: query.into(),
            conversation_id: None,
            inputs: Map::new(),
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: Option<String>) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }
}
