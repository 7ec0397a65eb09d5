//! In-memory collaborators for exercising the relay without a chat surface
//! or an AI backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cardrelay_llm::{BackendError, ChatBackend, EventStream, StreamEvent, TurnRequest};
use cardrelay_types::Placeholder;
use chrono::Utc;
use futures::StreamExt;

use crate::traits::PlaceholderService;

/// Records every call and hands out `card_<n>` ids
#[derive(Debug, Default)]
pub struct MockPlaceholderService {
    created: AtomicUsize,
    pending_failures: AtomicUsize,
    reject_updates: AtomicBool,
    update_delay_ms: AtomicU64,
    updates_in_flight: AtomicUsize,
    max_updates_in_flight: AtomicUsize,
    delivery_results: Mutex<VecDeque<bool>>,
    deliveries: Mutex<Vec<(String, String)>>,
    updates: Mutex<Vec<(String, String)>>,
}

impl MockPlaceholderService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` creation calls
    pub fn fail_next_creates(&self, count: usize) {
        self.pending_failures.fetch_add(count, Ordering::SeqCst);
    }

    /// Queue delivery outcomes; deliveries succeed once the queue is empty
    pub fn with_delivery_results(self, results: Vec<bool>) -> Self {
        lock(&self.delivery_results).extend(results);
        self
    }

    pub fn reject_updates(&self, reject: bool) {
        self.reject_updates.store(reject, Ordering::SeqCst);
    }

    /// Make every content update take `delay` to complete
    pub fn with_update_delay(self, delay: Duration) -> Self {
        self.update_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Highest number of content updates seen running at once
    pub fn max_concurrent_updates(&self) -> usize {
        self.max_updates_in_flight.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// `(user_id, placeholder_id)` per delivery attempt
    pub fn deliveries(&self) -> Vec<(String, String)> {
        lock(&self.deliveries).clone()
    }

    /// `(placeholder_id, text)` per update call
    pub fn updates(&self) -> Vec<(String, String)> {
        lock(&self.updates).clone()
    }

    /// Everything pushed to one placeholder, in order
    pub fn content_of(&self, placeholder_id: &str) -> String {
        lock(&self.updates)
            .iter()
            .filter(|(id, _)| id == placeholder_id)
            .map(|(_, text)| text.as_str())
            .collect()
    }
}

#[async_trait]
impl PlaceholderService for MockPlaceholderService {
    async fn create_placeholder(&self) -> anyhow::Result<Placeholder> {
        let should_fail = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            anyhow::bail!("card creation rejected");
        }

        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Placeholder::ready(format!("card_{n}"), Utc::now()))
    }

    async fn deliver_placeholder(&self, user_id: &str, placeholder: &Placeholder) -> bool {
        let id = placeholder.id.clone().unwrap_or_default();
        lock(&self.deliveries).push((user_id.to_string(), id));
        lock(&self.delivery_results).pop_front().unwrap_or(true)
    }

    async fn update_placeholder_content(&self, placeholder_id: &str, text: &str) -> bool {
        let running = self.updates_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_updates_in_flight.fetch_max(running, Ordering::SeqCst);
        lock(&self.updates).push((placeholder_id.to_string(), text.to_string()));

        let delay = self.update_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.updates_in_flight.fetch_sub(1, Ordering::SeqCst);
        !self.reject_updates.load(Ordering::SeqCst)
    }
}

/// One scripted reply per `send_turn` call
pub enum Script {
    Events(Vec<Result<StreamEvent, BackendError>>),
    Reject(BackendError),
}

/// Replays scripted event streams in call order
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<TurnRequest>>,
    event_delay: Duration,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            event_delay: Duration::ZERO,
        }
    }

    pub fn with_events(self, events: Vec<StreamEvent>) -> Self {
        lock(&self.scripts).push_back(Script::Events(events.into_iter().map(Ok).collect()));
        self
    }

    pub fn with_script(self, script: Script) -> Self {
        lock(&self.scripts).push_back(script);
        self
    }

    /// Pause before yielding each event
    pub fn with_event_delay(mut self, delay: Duration) -> Self {
        self.event_delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        lock(&self.requests).clone()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn send_turn(&self, request: TurnRequest) -> cardrelay_llm::Result<EventStream> {
        lock(&self.requests).push(request);

        let script = lock(&self.scripts)
            .pop_front()
            .unwrap_or(Script::Events(Vec::new()));

        match script {
            Script::Reject(err) => Err(err),
            Script::Events(events) => {
                let delay = self.event_delay;
                let stream = futures::stream::iter(events).then(move |event| async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    event
                });
                Ok(Box::pin(stream))
            }
        }
    }
}

/// Shorthand for an answer fragment event
pub fn answer(text: &str, conversation_id: &str) -> StreamEvent {
    StreamEvent::new("agent_message")
        .with_answer(text)
        .with_conversation_id(conversation_id)
}

/// Shorthand for the terminal event
pub fn message_end(conversation_id: &str) -> StreamEvent {
    StreamEvent::new(cardrelay_llm::MESSAGE_END_EVENT).with_conversation_id(conversation_id)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
