use serde_json::{json, Value};
use uuid::Uuid;

/// Element that streamed answer text is written into
pub const MARKDOWN_ELEMENT_ID: &str = "markdown_1";

/// Layout of the streaming card shown while an answer is generated
#[derive(Debug, Clone)]
pub struct CardTemplate {
    pub title: String,
    pub summary: String,
}

impl CardTemplate {
    pub fn new(title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            summary: summary.into(),
        }
    }

    /// Schema 2.0 card in streaming mode with one empty markdown element
    pub fn streaming_card(&self) -> Value {
        json!({
            "schema": "2.0",
            "header": {
                "title": {"tag": "plain_text", "content": self.title}
            },
            "config": {
                "streaming_mode": true,
                "summary": {"content": self.summary}
            },
            "body": {
                "elements": [
                    {"tag": "markdown", "content": "", "element_id": MARKDOWN_ELEMENT_ID}
                ]
            }
        })
    }

    /// Body for `POST /cardkit/v1/cards`; the card itself travels as a JSON string
    pub fn create_request(&self) -> Value {
        json!({
            "type": "card_json",
            "data": self.streaming_card().to_string()
        })
    }
}

/// Body for `POST /im/v1/messages` that shows an existing card to a user
pub fn card_message(receive_id: &str, card_id: &str) -> Value {
    let content = json!({"type": "card", "data": {"card_id": card_id}});
    json!({
        "receive_id": receive_id,
        "msg_type": "interactive",
        "content": content.to_string()
    })
}

/// Body for a full-text element content update
pub fn content_update(content: &str, sequence: u64) -> Value {
    json!({
        "content": content,
        "sequence": sequence,
        "uuid": Uuid::new_v4().to_string()
    })
}
