use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use cardrelay_core::TurnOrchestrator;
use lru::LruCache;

use crate::config::Config;

/// Message ids remembered for redelivery detection
const SEEN_MESSAGES_CAPACITY: usize = 4096;

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<TurnOrchestrator>,
    seen_messages: Arc<Mutex<LruCache<String, ()>>>,
}

impl AppState {
    pub fn new(config: Config, orchestrator: TurnOrchestrator) -> Self {
        let capacity = NonZeroUsize::new(SEEN_MESSAGES_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            seen_messages: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// False if this chat-surface message id was already accepted
    ///
    /// The chat surface retries events it considers unacknowledged; a retry
    /// must not start a second turn.
    pub fn first_delivery(&self, message_id: &str) -> bool {
        let mut seen = self
            .seen_messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        seen.put(message_id.to_string(), ()).is_none()
    }
}
