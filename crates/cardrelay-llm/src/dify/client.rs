// Dify chat-messages client (HTTP direct, no SDK)

use crate::buffer_utils::{parse_sse_stream, SseLineParser};
use crate::config::BackendConfig;
use crate::dify::types::{ChatMessageRequest, DifyStreamChunk};
use crate::error::{BackendError, Result};
use crate::streaming::StreamEvent;
use crate::traits::{ChatBackend, EventStream, TurnRequest};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

/// Streaming client for the Dify `chat-messages` endpoint
pub struct DifyClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl DifyClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key))
                .map_err(|_| BackendError::InvalidConfig("Invalid API key format".to_string()))?,
        );

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn chat_messages_url(&self) -> String {
        format!("{}/chat-messages", self.base_url)
    }
}

#[async_trait]
impl ChatBackend for DifyClient {
    async fn send_turn(&self, request: TurnRequest) -> Result<EventStream> {
        let user_id = request.user_id.clone();
        let resuming = request.conversation_id.is_some();
        let body = ChatMessageRequest::from(request);

        tracing::debug!(user_id = %user_id, resuming, "Sending turn to chat backend");

        let response = self
            .http_client
            .post(self.chat_messages_url())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!(user_id = %user_id, status = %status, "Chat backend rejected turn");
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(parse_sse_stream(response.bytes_stream(), DifyLineParser))
    }
}

/// Parses Dify `data:` payloads into `StreamEvent`s
pub struct DifyLineParser;

impl SseLineParser for DifyLineParser {
    fn parse_data_line(&self, data: &str) -> Result<Option<StreamEvent>> {
        let chunk: DifyStreamChunk =
            serde_json::from_str(data).map_err(|e| BackendError::Parse {
                line: data.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Some(chunk.into()))
    }
}
