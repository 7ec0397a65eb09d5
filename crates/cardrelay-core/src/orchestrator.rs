use std::sync::Arc;

use cardrelay_llm::{ChatBackend, TurnRequest};
use cardrelay_types::{InboundMessage, Placeholder, TurnKey};
use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::pool::PlaceholderPool;
use crate::reader::{ReadSummary, StreamReader};
use crate::session::SessionStore;
use crate::traits::PlaceholderService;
use crate::turns::{TurnHandle, TurnRegistry};

/// The two concurrent halves of one turn
pub struct TurnTasks {
    pub key: TurnKey,
    pub placeholder: JoinHandle<Result<Placeholder>>,
    pub upstream: JoinHandle<Result<ReadSummary>>,
}

/// Starts turns: one task shows a placeholder, the other streams the answer into it
pub struct TurnOrchestrator {
    pool: Arc<PlaceholderPool>,
    sessions: Arc<SessionStore>,
    turns: Arc<TurnRegistry>,
    placeholders: Arc<dyn PlaceholderService>,
    backend: Arc<dyn ChatBackend>,
    config: RelayConfig,
}

impl TurnOrchestrator {
    pub fn new(
        placeholders: Arc<dyn PlaceholderService>,
        backend: Arc<dyn ChatBackend>,
        config: RelayConfig,
    ) -> Self {
        let pool = Arc::new(PlaceholderPool::new(
            Arc::clone(&placeholders),
            config.pool.clone(),
        ));
        let sessions = Arc::new(SessionStore::new(&config.session));
        let turns = Arc::new(TurnRegistry::new(
            Arc::clone(&placeholders),
            config.buffer.clone(),
        ));

        Self {
            pool,
            sessions,
            turns,
            placeholders,
            backend,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<PlaceholderPool> {
        &self.pool
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn turns(&self) -> &Arc<TurnRegistry> {
        &self.turns
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Launch both halves of a turn and return without waiting for either
    pub fn handle_message(&self, message: InboundMessage) -> TurnTasks {
        let key = message.turn_key();
        let handle = self.turns.get_or_create(&key);
        info!(turn = %key, chars = message.text.chars().count(), "Starting turn");

        let placeholder = {
            let pool = Arc::clone(&self.pool);
            let service = Arc::clone(&self.placeholders);
            let handle = handle.clone();
            tokio::spawn(async move {
                let result = present_placeholder(pool, service, handle).await;
                if let Err(err) = &result {
                    error!(error = %err, "Placeholder task failed");
                }
                result
            })
        };

        let upstream = {
            let backend = Arc::clone(&self.backend);
            let sessions = Arc::clone(&self.sessions);
            let config = self.config.clone();
            tokio::spawn(async move {
                let result = stream_answer(backend, sessions, handle, message, config).await;
                if let Err(err) = &result {
                    error!(error = %err, "Upstream task failed");
                }
                result
            })
        };

        TurnTasks {
            key,
            placeholder,
            upstream,
        }
    }
}

/// Acquire, bind and deliver a placeholder, with one retry on a fresh one
async fn present_placeholder(
    pool: Arc<PlaceholderPool>,
    service: Arc<dyn PlaceholderService>,
    handle: TurnHandle,
) -> Result<Placeholder> {
    let key = handle.key().clone();

    let mut placeholder = claim(&pool, &key).await?;
    if !service.deliver_placeholder(&key.user_id, &placeholder).await {
        warn!(turn = %key, placeholder_id = ?placeholder.id, "Placeholder delivery failed, retrying with a fresh one");
        placeholder.mark_failed(Utc::now());

        placeholder = claim(&pool, &key).await?;
        if !service.deliver_placeholder(&key.user_id, &placeholder).await {
            placeholder.mark_failed(Utc::now());
            return Err(RelayError::PlaceholderDeliveryFailed {
                user_id: key.user_id.clone(),
            });
        }
    }

    // Delivered and bound: from here on the card only receives streamed content
    placeholder.mark_updating(Utc::now());
    if let Some(id) = placeholder.id.clone() {
        handle.mark_placeholder_ready(id).await;
    }
    info!(turn = %key, placeholder_id = ?placeholder.id, "Placeholder delivered");
    Ok(placeholder)
}

async fn claim(pool: &Arc<PlaceholderPool>, key: &TurnKey) -> Result<Placeholder> {
    let mut placeholder = pool.acquire().await?;
    placeholder.bind(key.clone(), Utc::now());
    Ok(placeholder)
}

/// Resolve the session, open the upstream stream and feed it to the reader
async fn stream_answer(
    backend: Arc<dyn ChatBackend>,
    sessions: Arc<SessionStore>,
    handle: TurnHandle,
    message: InboundMessage,
    config: RelayConfig,
) -> Result<ReadSummary> {
    let conversation_id = match sessions.get(&message.user_id) {
        Some(session) if sessions.is_expired(&session) => {
            sessions.remove(&message.user_id);
            None
        }
        Some(session) => sessions.update(&session).conversation_id,
        None => None,
    };

    let request = TurnRequest::new(message.user_id.clone(), message.text.clone())
        .with_conversation_id(conversation_id);

    let stream = match backend.send_turn(request).await {
        Ok(stream) => stream,
        Err(err) => {
            handle.finish().await;
            return Err(match RelayError::from(err) {
                RelayError::StreamParseFailed(reason) => RelayError::UpstreamRequestFailed(reason),
                other => other,
            });
        }
    };

    StreamReader::new(handle, sessions, &config.buffer, &config.session)
        .consume(stream)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, SessionConfig};
    use crate::testing::{answer, message_end, MockPlaceholderService, Script, ScriptedBackend};
    use cardrelay_llm::BackendError;
    use cardrelay_types::PlaceholderStatus;

    fn config() -> RelayConfig {
        RelayConfig {
            pool: PoolConfig::default().with_target_size(5),
            ..RelayConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_streams_into_delivered_placeholder() {
        let service = Arc::new(MockPlaceholderService::new());
        let backend = Arc::new(
            ScriptedBackend::new()
                .with_events(vec![answer("Hi", "conv_1"), message_end("conv_1")]),
        );
        let orchestrator = TurnOrchestrator::new(service.clone(), backend.clone(), config());
        orchestrator.pool().initialize(5).await;

        let tasks = orchestrator.handle_message(InboundMessage::new("ou_1", "om_1", "hello"));
        let placeholder = tasks.placeholder.await.unwrap().unwrap();
        let summary = tasks.upstream.await.unwrap().unwrap();

        assert_eq!(placeholder.owner, Some(TurnKey::new("ou_1", "om_1")));
        assert_eq!(placeholder.status, PlaceholderStatus::Updating);
        assert!(summary.completed);
        assert_eq!(service.deliveries(), vec![("ou_1".to_string(), "card_1".to_string())]);
        assert_eq!(service.content_of("card_1"), "Hi");
        assert_eq!(backend.requests()[0].query, "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_retries_with_fresh_placeholder() {
        let service = Arc::new(MockPlaceholderService::new().with_delivery_results(vec![false, true]));
        let backend = Arc::new(ScriptedBackend::new().with_events(vec![message_end("conv_1")]));
        let orchestrator = TurnOrchestrator::new(service.clone(), backend, config());
        orchestrator.pool().initialize(5).await;

        let tasks = orchestrator.handle_message(InboundMessage::new("ou_1", "om_1", "hello"));
        let placeholder = tasks.placeholder.await.unwrap().unwrap();

        assert_eq!(placeholder.id.as_deref(), Some("card_2"));
        assert_eq!(service.deliveries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_fails_after_retry() {
        let service = Arc::new(MockPlaceholderService::new().with_delivery_results(vec![false, false]));
        let backend = Arc::new(ScriptedBackend::new().with_events(vec![message_end("conv_1")]));
        let orchestrator = TurnOrchestrator::new(service.clone(), backend, config());
        orchestrator.pool().initialize(5).await;

        let tasks = orchestrator.handle_message(InboundMessage::new("ou_1", "om_1", "hello"));
        let err = tasks.placeholder.await.unwrap().unwrap_err();

        assert!(matches!(err, RelayError::PlaceholderDeliveryFailed { .. }));
        assert_eq!(service.deliveries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_session_supplies_conversation_id() {
        let service = Arc::new(MockPlaceholderService::new());
        let backend = Arc::new(ScriptedBackend::new().with_events(vec![message_end("conv_9")]));
        let config = RelayConfig {
            session: SessionConfig::default().with_reset_on_turn_end(false),
            ..config()
        };
        let orchestrator = TurnOrchestrator::new(service, backend.clone(), config);
        orchestrator.sessions().create("ou_1", "conv_9");

        let tasks = orchestrator.handle_message(InboundMessage::new("ou_1", "om_1", "again"));
        tasks.upstream.await.unwrap().unwrap();

        assert_eq!(backend.requests()[0].conversation_id.as_deref(), Some("conv_9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_request_is_upstream_failure() {
        let service = Arc::new(MockPlaceholderService::new());
        let backend = Arc::new(ScriptedBackend::new().with_script(Script::Reject(BackendError::Status {
            status: 500,
            body: "boom".to_string(),
        })));
        let orchestrator = TurnOrchestrator::new(service, backend, config());

        let tasks = orchestrator.handle_message(InboundMessage::new("ou_1", "om_1", "hello"));
        let err = tasks.upstream.await.unwrap().unwrap_err();

        assert!(matches!(err, RelayError::UpstreamRequestFailed(_)));
    }
}
