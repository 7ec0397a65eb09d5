//! Per-turn coalescing.
//!
//! Each turn owns a [`TurnBuffer`] inside a dedicated task. Producers talk to
//! it through a [`TurnHandle`] over a bounded channel, so appends, readiness,
//! forced flushes and the idle deadline are all handled by one owner.
//!
//! A buffer that sits idle for `max_timeout` flushes what it can and exits.
//! The next append through the handle starts a new generation that inherits
//! the placeholder binding. All generations of a turn share one flush lock,
//! so placeholder updates never interleave or reorder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;

use cardrelay_types::TurnKey;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::buffer::TurnBuffer;
use crate::config::BufferConfig;
use crate::traits::PlaceholderService;

enum BufferCommand {
    Append(String),
    ForceFlush,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushReason {
    Throttle,
    Boundary,
    Timeout,
    Close,
}

impl FlushReason {
    fn as_str(self) -> &'static str {
        match self {
            FlushReason::Throttle => "throttle",
            FlushReason::Boundary => "boundary",
            FlushReason::Timeout => "timeout",
            FlushReason::Close => "close",
        }
    }
}

/// State shared by every buffer generation of one turn
#[derive(Default)]
struct TurnShared {
    flush_lock: Mutex<()>,
    /// Text left behind by a buffer that expired before a placeholder was bound
    parked: StdMutex<String>,
}

impl TurnShared {
    fn parked(&self) -> MutexGuard<'_, String> {
        self.parked.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct BufferSlot {
    tx: mpsc::Sender<BufferCommand>,
    task: JoinHandle<()>,
}

struct TurnState {
    key: TurnKey,
    service: Arc<dyn PlaceholderService>,
    config: BufferConfig,
    shared: Arc<TurnShared>,
    placeholder: watch::Sender<Option<String>>,
    slot: Mutex<Option<BufferSlot>>,
    generations: AtomicU64,
    finished: AtomicBool,
}

impl TurnState {
    /// Sender for the live buffer, starting a new generation when `spawn` is set
    async fn sender(&self, spawn: bool) -> Option<mpsc::Sender<BufferCommand>> {
        let mut slot = self.slot.lock().await;
        if let Some(current) = slot.as_ref() {
            if !current.tx.is_closed() {
                return Some(current.tx.clone());
            }
        }
        if !spawn {
            return None;
        }

        let fresh = self.spawn_buffer();
        let tx = fresh.tx.clone();
        *slot = Some(fresh);
        Some(tx)
    }

    fn spawn_buffer(&self) -> BufferSlot {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        let coalescer = Coalescer {
            generation,
            buffer: TurnBuffer::new(self.key.clone(), self.config.flush_interval()),
            placeholder: self.placeholder.subscribe(),
            placeholder_open: true,
            service: Arc::clone(&self.service),
            shared: Arc::clone(&self.shared),
            max_timeout: self.config.max_timeout(),
            ready_grace: self.config.ready_grace(),
            rx,
        };
        let task = tokio::spawn(coalescer.run());

        BufferSlot { tx, task }
    }

    fn has_parked_text(&self) -> bool {
        !self.shared.parked().is_empty()
    }
}

/// Owns one buffer generation
struct Coalescer {
    generation: u64,
    buffer: TurnBuffer,
    placeholder: watch::Receiver<Option<String>>,
    placeholder_open: bool,
    service: Arc<dyn PlaceholderService>,
    shared: Arc<TurnShared>,
    max_timeout: Duration,
    ready_grace: Duration,
    rx: mpsc::Receiver<BufferCommand>,
}

impl Coalescer {
    async fn run(mut self) {
        self.adopt_parked_text().await;
        self.refresh_readiness();
        debug!(turn = %self.buffer.key(), generation = self.generation, "Turn buffer started");

        let mut deadline = (!self.buffer.is_empty()).then(|| Instant::now() + self.max_timeout);
        if self.buffer.should_flush() {
            self.flush(FlushReason::Throttle).await;
        }

        let exit = loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(BufferCommand::Append(text)) => {
                        self.buffer.append(&text);
                        deadline = Some(Instant::now() + self.max_timeout);
                        if self.buffer.should_flush() {
                            self.flush(FlushReason::Throttle).await;
                        }
                    }
                    Some(BufferCommand::ForceFlush) => self.flush(FlushReason::Boundary).await,
                    Some(BufferCommand::Close) => {
                        self.close().await;
                        break "closed";
                    }
                    None => {
                        self.close().await;
                        break "released";
                    }
                },
                changed = self.placeholder.changed(), if self.placeholder_open && !self.buffer.is_placeholder_ready() => {
                    if changed.is_err() {
                        self.placeholder_open = false;
                        continue;
                    }
                    self.refresh_readiness();
                    if self.buffer.should_flush() {
                        self.flush(FlushReason::Throttle).await;
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    break self.expire().await;
                }
            }
        };

        debug!(
            turn = %self.buffer.key(),
            generation = self.generation,
            exit,
            "Turn buffer destroyed"
        );
    }

    /// Wait out any generation still expiring, then take over its text
    async fn adopt_parked_text(&mut self) {
        let shared = Arc::clone(&self.shared);
        let _guard = shared.flush_lock.lock().await;
        let parked = std::mem::take(&mut *shared.parked());
        if !parked.is_empty() {
            self.buffer.append(&parked);
        }
    }

    fn refresh_readiness(&mut self) {
        if self.placeholder.borrow().is_some() {
            self.buffer.mark_placeholder_ready();
        }
    }

    /// Idle deadline reached: stop accepting commands, flush or park, exit
    ///
    /// A `Close` already queued behind the deadline turns this into a close.
    async fn expire(&mut self) -> &'static str {
        let shared = Arc::clone(&self.shared);
        let guard = shared.flush_lock.lock().await;

        if self.drain() {
            drop(guard);
            self.close().await;
            return "closed";
        }
        if self.buffer.is_empty() {
            return "expired";
        }

        self.refresh_readiness();
        if !self.buffer.is_placeholder_ready() {
            let text = self.buffer.get_and_clear();
            shared.parked().push_str(&text);
            debug!(turn = %self.buffer.key(), "Parking answer text until a placeholder is bound");
            return "expired";
        }

        self.deliver(FlushReason::Timeout).await;
        "expired"
    }

    /// Final flush, giving a late placeholder a bounded chance to arrive
    async fn close(&mut self) {
        self.drain();
        self.refresh_readiness();

        if !self.buffer.is_empty() && !self.buffer.is_placeholder_ready() {
            let outcome = tokio::time::timeout(
                self.ready_grace,
                self.placeholder.wait_for(|id| id.is_some()),
            )
            .await
            .map(|waited| waited.is_ok());
            if matches!(outcome, Ok(true)) {
                self.buffer.mark_placeholder_ready();
            }
        }

        self.flush(FlushReason::Close).await;
    }

    /// Close the channel and take in queued text. True if a `Close` was queued.
    fn drain(&mut self) -> bool {
        self.rx.close();
        let mut closing = false;
        while let Ok(command) = self.rx.try_recv() {
            match command {
                BufferCommand::Append(text) => self.buffer.append(&text),
                BufferCommand::ForceFlush => {}
                BufferCommand::Close => closing = true,
            }
        }
        closing
    }

    async fn flush(&mut self, reason: FlushReason) {
        if self.buffer.is_empty() {
            return;
        }
        if !self.buffer.is_placeholder_ready() {
            if reason == FlushReason::Close {
                let dropped = self.buffer.get_and_clear();
                warn!(
                    turn = %self.buffer.key(),
                    chars = dropped.chars().count(),
                    "Dropping answer text, no placeholder was bound"
                );
            }
            return;
        }

        let shared = Arc::clone(&self.shared);
        let _guard = shared.flush_lock.lock().await;
        self.deliver(reason).await;
    }

    /// Push buffered text to the placeholder. Caller holds the flush lock.
    async fn deliver(&mut self, reason: FlushReason) {
        let bound = self.placeholder.borrow().clone();
        let Some(placeholder_id) = bound else {
            return;
        };
        if self.buffer.is_empty() {
            return;
        }

        let text = self.buffer.get_and_clear();
        let started = Instant::now();
        if self
            .service
            .update_placeholder_content(&placeholder_id, &text)
            .await
        {
            debug!(
                turn = %self.buffer.key(),
                placeholder_id = %placeholder_id,
                reason = reason.as_str(),
                chars = text.chars().count(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Flushed answer text"
            );
        } else {
            warn!(
                turn = %self.buffer.key(),
                placeholder_id = %placeholder_id,
                reason = reason.as_str(),
                "Placeholder update rejected"
            );
        }
    }
}

/// Cloneable entry point to one turn's coalescer
#[derive(Clone)]
pub struct TurnHandle {
    state: Arc<TurnState>,
}

impl TurnHandle {
    fn new(key: TurnKey, service: Arc<dyn PlaceholderService>, config: BufferConfig) -> Self {
        let (placeholder, _) = watch::channel(None);
        Self {
            state: Arc::new(TurnState {
                key,
                service,
                config,
                shared: Arc::new(TurnShared::default()),
                placeholder,
                slot: Mutex::new(None),
                generations: AtomicU64::new(0),
                finished: AtomicBool::new(false),
            }),
        }
    }

    pub fn key(&self) -> &TurnKey {
        &self.state.key
    }

    /// Queue an answer fragment, starting a buffer if none is live
    pub async fn append(&self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if self.is_finished() {
            debug!(turn = %self.state.key, "Ignoring fragment for finished turn");
            return;
        }

        let mut command = BufferCommand::Append(fragment.to_string());
        // A buffer may expire between lookup and send; the second pass gets a fresh one
        for _ in 0..2 {
            let Some(tx) = self.state.sender(true).await else {
                break;
            };
            match tx.send(command).await {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => command = returned,
            }
        }
        warn!(turn = %self.state.key, "Dropping fragment, turn buffer unavailable");
    }

    /// Bind the turn's placeholder; buffered text becomes flushable
    pub async fn mark_placeholder_ready(&self, placeholder_id: impl Into<String>) {
        let placeholder_id = placeholder_id.into();
        debug!(turn = %self.state.key, placeholder_id = %placeholder_id, "Placeholder ready");
        self.state.placeholder.send_replace(Some(placeholder_id));

        if !self.is_finished() && self.state.has_parked_text() {
            self.state.sender(true).await;
        }
    }

    /// Flush now, ignoring the throttle interval
    pub async fn force_flush(&self) {
        if let Some(tx) = self.state.sender(false).await {
            let _ = tx.send(BufferCommand::ForceFlush).await;
        }
    }

    /// Flush the remainder and destroy the buffer; later fragments are ignored
    pub async fn finish(&self) {
        self.state.finished.store(true, Ordering::SeqCst);

        // A buffer expiring as Close arrives may park its text; close again until none is left
        loop {
            let slot = {
                let mut slot = self.state.slot.lock().await;
                let live = slot.as_ref().is_some_and(|current| !current.tx.is_closed());
                if !live && self.state.has_parked_text() {
                    *slot = Some(self.state.spawn_buffer());
                }
                slot.take()
            };

            let Some(BufferSlot { tx, task }) = slot else {
                break;
            };
            let _ = tx.send(BufferCommand::Close).await;
            drop(tx);
            if let Err(err) = task.await {
                warn!(turn = %self.state.key, error = %err, "Turn buffer task failed");
            }
            if !self.state.has_parked_text() {
                break;
            }
        }
    }

    pub fn placeholder_id(&self) -> Option<String> {
        self.state.placeholder.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::SeqCst)
    }

    pub async fn has_live_buffer(&self) -> bool {
        self.state
            .slot
            .lock()
            .await
            .as_ref()
            .is_some_and(|current| !current.tx.is_closed())
    }

    /// Number of buffers started for this turn so far
    pub fn generation(&self) -> u64 {
        self.state.generations.load(Ordering::SeqCst)
    }
}

/// Create-or-fetch lookup of in-flight turns
///
/// Holds weak references only; a turn disappears once its last handle drops.
pub struct TurnRegistry {
    turns: StdMutex<HashMap<TurnKey, Weak<TurnState>>>,
    service: Arc<dyn PlaceholderService>,
    config: BufferConfig,
}

impl TurnRegistry {
    pub fn new(service: Arc<dyn PlaceholderService>, config: BufferConfig) -> Self {
        Self {
            turns: StdMutex::new(HashMap::new()),
            service,
            config,
        }
    }

    pub fn get_or_create(&self, key: &TurnKey) -> TurnHandle {
        let mut turns = self.turns();
        turns.retain(|_, state| state.strong_count() > 0);

        if let Some(state) = turns.get(key).and_then(Weak::upgrade) {
            return TurnHandle { state };
        }

        let handle = TurnHandle::new(key.clone(), Arc::clone(&self.service), self.config.clone());
        turns.insert(key.clone(), Arc::downgrade(&handle.state));
        handle
    }

    pub fn get(&self, key: &TurnKey) -> Option<TurnHandle> {
        self.turns()
            .get(key)
            .and_then(Weak::upgrade)
            .map(|state| TurnHandle { state })
    }

    pub fn active_turns(&self) -> usize {
        self.turns()
            .values()
            .filter(|state| state.strong_count() > 0)
            .count()
    }

    fn turns(&self) -> MutexGuard<'_, HashMap<TurnKey, Weak<TurnState>>> {
        self.turns.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPlaceholderService;

    fn registry(service: Arc<MockPlaceholderService>) -> TurnRegistry {
        TurnRegistry::new(service, BufferConfig::default())
    }

    fn key() -> TurnKey {
        TurnKey::new("ou_1", "om_1")
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn texts(service: &MockPlaceholderService) -> Vec<String> {
        service.updates().into_iter().map(|(_, text)| text).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_fragments_coalesce_until_timeout() {
        let service = Arc::new(MockPlaceholderService::new());
        let handle = registry(service.clone()).get_or_create(&key());
        handle.mark_placeholder_ready("card_1").await;

        handle.append("Hel").await;
        tokio::time::sleep(ms(30)).await;
        handle.append("lo").await;
        tokio::time::sleep(ms(40)).await;
        handle.append(" world").await;
        tokio::time::sleep(ms(10)).await;
        assert_eq!(texts(&service), vec!["Hel"]);

        tokio::time::sleep(ms(400)).await;
        assert_eq!(texts(&service), vec!["Hel", "lo world"]);
        assert_eq!(service.content_of("card_1"), "Hello world");
        assert!(!handle.has_live_buffer().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_after_interval_flushes_immediately() {
        let service = Arc::new(MockPlaceholderService::new());
        let handle = registry(service.clone()).get_or_create(&key());
        handle.mark_placeholder_ready("card_1").await;

        handle.append("a").await;
        tokio::time::sleep(ms(50)).await;
        handle.append("b").await;
        tokio::time::sleep(ms(60)).await;
        handle.append("c").await;
        tokio::time::sleep(ms(1)).await;

        assert_eq!(texts(&service), vec!["a", "bc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_buffer_expires_and_parks_text() {
        let service = Arc::new(MockPlaceholderService::new());
        let handle = registry(service.clone()).get_or_create(&key());

        handle.append("Hel").await;
        tokio::time::sleep(ms(350)).await;

        assert!(!handle.has_live_buffer().await);
        assert!(service.updates().is_empty());

        handle.mark_placeholder_ready("card_1").await;
        tokio::time::sleep(ms(1)).await;

        assert_eq!(texts(&service), vec!["Hel"]);
        assert_eq!(handle.generation(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readiness_mid_stream_flushes_backlog() {
        let service = Arc::new(MockPlaceholderService::new());
        let handle = registry(service.clone()).get_or_create(&key());

        handle.append("Hel").await;
        handle.append("lo").await;
        tokio::time::sleep(ms(50)).await;
        assert!(service.updates().is_empty());

        handle.mark_placeholder_ready("card_1").await;
        tokio::time::sleep(ms(1)).await;

        assert_eq!(texts(&service), vec!["Hello"]);
        assert_eq!(handle.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_flush_bypasses_throttle() {
        let service = Arc::new(MockPlaceholderService::new());
        let handle = registry(service.clone()).get_or_create(&key());
        handle.mark_placeholder_ready("card_1").await;

        handle.append("a").await;
        handle.append("b").await;
        handle.force_flush().await;
        tokio::time::sleep(ms(1)).await;

        assert_eq!(texts(&service), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_flush_waits_for_placeholder() {
        let service = Arc::new(MockPlaceholderService::new());
        let handle = registry(service.clone()).get_or_create(&key());

        handle.append("a").await;
        handle.force_flush().await;
        tokio::time::sleep(ms(1)).await;

        assert!(service.updates().is_empty());
        assert!(handle.has_live_buffer().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_flushes_remainder_and_ignores_later_fragments() {
        let service = Arc::new(MockPlaceholderService::new());
        let handle = registry(service.clone()).get_or_create(&key());
        handle.mark_placeholder_ready("card_1").await;

        handle.append("a").await;
        handle.append("b").await;
        handle.finish().await;

        assert_eq!(texts(&service), vec!["a", "b"]);
        assert!(!handle.has_live_buffer().await);

        handle.append("late").await;
        tokio::time::sleep(ms(500)).await;
        assert_eq!(texts(&service), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_waits_for_late_placeholder() {
        let service = Arc::new(MockPlaceholderService::new());
        let handle = registry(service.clone()).get_or_create(&key());
        handle.append("answer").await;

        let late = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            late.mark_placeholder_ready("card_1").await;
        });
        handle.finish().await;

        assert_eq!(service.updates(), vec![("card_1".to_string(), "answer".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_without_placeholder_drops_text() {
        let service = Arc::new(MockPlaceholderService::new());
        let handle = registry(service.clone()).get_or_create(&key());
        handle.append("answer").await;

        handle.finish().await;

        assert!(service.updates().is_empty());
        assert!(!handle.has_live_buffer().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_buffer_is_recreated_with_binding() {
        let service = Arc::new(MockPlaceholderService::new());
        let handle = registry(service.clone()).get_or_create(&key());
        handle.mark_placeholder_ready("card_1").await;

        handle.append("a").await;
        tokio::time::sleep(ms(400)).await;
        assert!(!handle.has_live_buffer().await);

        handle.append("b").await;
        tokio::time::sleep(ms(1)).await;

        assert_eq!(texts(&service), vec!["a", "b"]);
        assert_eq!(handle.generation(), 2);
        assert!(handle.has_live_buffer().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_at_idle_deadline_keeps_text() {
        for offset in [299, 300, 301] {
            let service = Arc::new(MockPlaceholderService::new());
            let handle = registry(service.clone()).get_or_create(&key());
            handle.append("x").await;
            tokio::time::sleep(ms(offset)).await;

            let late = handle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ms(20)).await;
                late.mark_placeholder_ready("card_1").await;
            });
            handle.finish().await;

            assert_eq!(service.content_of("card_1"), "x", "finish {offset}ms after append");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_queued_behind_expiry_still_waits_for_placeholder() {
        let service = Arc::new(MockPlaceholderService::new());
        let handle = registry(service.clone()).get_or_create(&key());
        handle.append("x").await;

        // Hold the flush lock so the deadline fires while Close is still queued
        let guard = handle.state.shared.flush_lock.lock().await;
        tokio::time::sleep(ms(301)).await;
        let closing = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.finish().await })
        };
        tokio::time::sleep(ms(1)).await;
        drop(guard);

        tokio::time::sleep(ms(20)).await;
        handle.mark_placeholder_ready("card_1").await;
        closing.await.unwrap();

        assert_eq!(service.updates(), vec![("card_1".to_string(), "x".to_string())]);
        assert!(!handle.has_live_buffer().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_updates_never_overlap_across_generations() {
        let service = Arc::new(MockPlaceholderService::new().with_update_delay(ms(250)));
        let registry = TurnRegistry::new(
            service.clone(),
            BufferConfig::default().with_flush_interval_ms(400),
        );
        let handle = registry.get_or_create(&key());
        handle.mark_placeholder_ready("card_1").await;

        // "a" flushes at once, "b" waits for the idle deadline at 1500ms
        handle.append("a").await;
        tokio::time::sleep(ms(300)).await;
        handle.append("b").await;

        // "c" lands on a new generation while "b" is still being delivered
        tokio::time::sleep(ms(1300)).await;
        handle.append("c").await;
        tokio::time::sleep(ms(500)).await;

        assert_eq!(texts(&service), vec!["a", "b", "c"]);
        assert_eq!(service.max_concurrent_updates(), 1);
        assert_eq!(handle.generation(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_update_keeps_buffer_running() {
        let service = Arc::new(MockPlaceholderService::new());
        let handle = registry(service.clone()).get_or_create(&key());
        handle.mark_placeholder_ready("card_1").await;

        service.reject_updates(true);
        handle.append("a").await;
        tokio::time::sleep(ms(1)).await;
        assert_eq!(texts(&service), vec!["a"]);

        service.reject_updates(false);
        tokio::time::sleep(ms(150)).await;
        handle.append("b").await;
        tokio::time::sleep(ms(1)).await;

        assert_eq!(texts(&service), vec!["a", "b"]);
        assert!(handle.has_live_buffer().await);
        assert_eq!(handle.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_shares_handles_per_turn() {
        let service = Arc::new(MockPlaceholderService::new());
        let registry = registry(service);

        let first = registry.get_or_create(&key());
        let again = registry.get_or_create(&key());
        let other = registry.get_or_create(&TurnKey::new("ou_1", "om_2"));

        first.mark_placeholder_ready("card_1").await;
        assert_eq!(again.placeholder_id().as_deref(), Some("card_1"));
        assert!(other.placeholder_id().is_none());
        assert_eq!(registry.active_turns(), 2);

        drop(first);
        drop(again);
        assert_eq!(registry.active_turns(), 1);
        assert!(registry.get(&key()).is_none());
    }
}
