use cardrelay_types::InboundMessage;
use serde::Deserialize;
use serde_json::Value;

pub const MESSAGE_RECEIVE_EVENT: &str = "im.message.receive_v1";

/// Outer shape shared by the URL-verification handshake and v2 event callbacks
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    #[serde(default)]
    pub challenge: Option<String>,
    /// Present on the handshake and on v1 callbacks
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub header: Option<EventHeader>,
    #[serde(default)]
    pub event: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct EventHeader {
    #[serde(default)]
    pub event_id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl EventEnvelope {
    pub fn verification_token(&self) -> Option<&str> {
        self.header
            .as_ref()
            .and_then(|header| header.token.as_deref())
            .or(self.token.as_deref())
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header.as_ref().map(|header| header.event_type.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageReceiveEvent {
    pub sender: EventSender,
    pub message: ReceivedMessage,
}

#[derive(Debug, Deserialize)]
pub struct EventSender {
    pub sender_id: SenderId,
}

#[derive(Debug, Deserialize)]
pub struct SenderId {
    #[serde(default)]
    pub open_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub message_type: String,
    /// JSON-encoded body, `{"text": ".."}` for text messages
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    text: String,
}

impl MessageReceiveEvent {
    /// The user message this event carries, if it is a non-empty text message
    pub fn into_inbound(self) -> Result<Option<InboundMessage>, serde_json::Error> {
        if self.message.message_type != "text" {
            return Ok(None);
        }
        let Some(open_id) = self.sender.sender_id.open_id else {
            return Ok(None);
        };

        let content: TextContent = serde_json::from_str(&self.message.content)?;
        let text = content.text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        Ok(Some(InboundMessage::new(open_id, self.message.message_id, text)))
    }
}
