use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use cardrelay_core::PlaceholderService;
use cardrelay_types::Placeholder;
use chrono::Utc;
use lru::LruCache;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::card::{card_message, content_update, CardTemplate, MARKDOWN_ELEMENT_ID};
use super::token::TokenCache;
use crate::config::FeishuConfig;

/// Cards whose full text is kept for element updates
const TRANSCRIPT_CAPACITY: usize = 1024;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TenantToken {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: String,
    tenant_access_token: Option<String>,
    #[serde(default)]
    expire: u64,
}

#[derive(Debug, Deserialize)]
struct CreatedCard {
    card_id: String,
}

/// Everything pushed to one card so far
#[derive(Debug, Default)]
struct Transcript {
    text: String,
    sequence: u64,
}

/// Placeholder cards backed by the Feishu CardKit and IM APIs
///
/// Updates arrive as deltas; the element API replaces content, so the client
/// keeps each card's transcript and sends the full text with an increasing
/// sequence number.
pub struct FeishuClient {
    http: Client,
    endpoint: String,
    app_id: String,
    app_secret: String,
    template: CardTemplate,
    token: TokenCache,
    transcripts: Mutex<LruCache<String, Transcript>>,
}

impl FeishuClient {
    pub fn new(
        config: &FeishuConfig,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build Feishu HTTP client")?;
        let capacity = NonZeroUsize::new(TRANSCRIPT_CAPACITY).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            http,
            endpoint: config.api_endpoint.trim_end_matches('/').to_string(),
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            template: CardTemplate::new(config.card_title.clone(), config.card_summary.clone()),
            token: TokenCache::new(),
            transcripts: Mutex::new(LruCache::new(capacity)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    async fn access_token(&self) -> anyhow::Result<String> {
        self.token.get_or_refresh(|| self.fetch_token()).await
    }

    async fn fetch_token(&self) -> anyhow::Result<(String, Duration)> {
        let response = self
            .http
            .post(self.url("/auth/v3/tenant_access_token/internal"))
            .json(&json!({"app_id": self.app_id, "app_secret": self.app_secret}))
            .send()
            .await
            .context("Tenant token request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("Tenant token request returned {}", status);
        }

        let body: TenantToken = response
            .json()
            .await
            .context("Invalid tenant token response")?;
        if body.code != 0 {
            bail!("Tenant token rejected: {} {}", body.code, body.msg);
        }
        let token = body
            .tenant_access_token
            .context("Tenant token missing from response")?;

        debug!(expire_secs = body.expire, "Fetched tenant access token");
        Ok((token, Duration::from_secs(body.expire)))
    }

    /// Send an authorized request and unwrap the `{code, msg, data}` envelope
    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> anyhow::Result<Option<T>> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .context("Feishu request failed")?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.token.invalidate().await;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Feishu returned {}: {}", status, body);
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .context("Invalid Feishu response body")?;
        if envelope.code != 0 {
            bail!("Feishu error {}: {}", envelope.code, envelope.msg);
        }
        Ok(envelope.data)
    }

    /// Append a delta and return the full text with its sequence number
    fn append_transcript(&self, card_id: &str, text: &str) -> (String, u64) {
        let mut transcripts = self.transcripts();
        let transcript = transcripts.get_or_insert_mut(card_id.to_string(), Transcript::default);
        transcript.text.push_str(text);
        transcript.sequence += 1;
        (transcript.text.clone(), transcript.sequence)
    }

    fn transcripts(&self) -> MutexGuard<'_, LruCache<String, Transcript>> {
        self.transcripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PlaceholderService for FeishuClient {
    async fn create_placeholder(&self) -> anyhow::Result<Placeholder> {
        let started = Instant::now();
        let request = self
            .http
            .post(self.url("/cardkit/v1/cards"))
            .json(&self.template.create_request());

        let created: CreatedCard = self
            .call(request)
            .await?
            .context("Card id missing from response")?;

        info!(
            placeholder_id = %created.card_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Created card"
        );
        Ok(Placeholder::ready(created.card_id, Utc::now()))
    }

    async fn deliver_placeholder(&self, user_id: &str, placeholder: &Placeholder) -> bool {
        let Some(card_id) = placeholder.id.as_deref() else {
            warn!(user_id, "Cannot deliver a card without an id");
            return false;
        };

        let request = self
            .http
            .post(self.url("/im/v1/messages?receive_id_type=open_id"))
            .json(&card_message(user_id, card_id));

        match self.call::<Value>(request).await {
            Ok(_) => {
                debug!(user_id, placeholder_id = card_id, "Card delivered");
                true
            }
            Err(err) => {
                warn!(user_id, placeholder_id = card_id, error = %err, "Card delivery failed");
                false
            }
        }
    }

    async fn update_placeholder_content(&self, placeholder_id: &str, text: &str) -> bool {
        let (content, sequence) = self.append_transcript(placeholder_id, text);
        let path = format!(
            "/cardkit/v1/cards/{}/elements/{}/content",
            placeholder_id, MARKDOWN_ELEMENT_ID
        );
        let request = self
            .http
            .put(self.url(&path))
            .json(&content_update(&content, sequence));

        match self.call::<Value>(request).await {
            Ok(_) => true,
            Err(err) => {
                warn!(placeholder_id, sequence, error = %err, "Card content update failed");
                false
            }
        }
    }
}
