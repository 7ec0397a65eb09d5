use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cardrelay_types::Placeholder;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{PoolConfig, MIN_POOL_SIZE};
use crate::error::{RelayError, Result};
use crate::traits::PlaceholderService;

/// Pre-created placeholders, handed out first-in first-out
///
/// Every successful `acquire` schedules one background replacement so the
/// pool drifts back to its target without blocking the caller.
pub struct PlaceholderPool {
    service: Arc<dyn PlaceholderService>,
    config: PoolConfig,
    target: AtomicUsize,
    queue: Mutex<VecDeque<Placeholder>>,
    pending_replacements: AtomicUsize,
    cancel: CancellationToken,
}

impl PlaceholderPool {
    pub fn new(service: Arc<dyn PlaceholderService>, config: PoolConfig) -> Self {
        let target = config.effective_target();
        Self {
            service,
            config,
            target: AtomicUsize::new(target),
            queue: Mutex::new(VecDeque::with_capacity(target)),
            pending_replacements: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Fill the pool up to `target_size` (never below the floor)
    ///
    /// Returns the number of placeholders added. Individual creation
    /// failures are logged and skipped.
    pub async fn initialize(&self, target_size: usize) -> usize {
        let target = target_size.max(MIN_POOL_SIZE);
        self.target.store(target, Ordering::SeqCst);

        info!(target, "Initializing placeholder pool");
        let started = Instant::now();
        let added = self.fill().await;
        info!(
            added,
            size = self.size(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Placeholder pool initialized"
        );
        added
    }

    /// Discard every pooled placeholder and refill from scratch
    pub async fn rebuild(&self) -> usize {
        let discarded = {
            let mut queue = self.queue();
            let discarded = queue.len();
            queue.clear();
            discarded
        };
        info!(discarded, "Rebuilding placeholder pool");
        self.fill().await
    }

    /// Take the oldest ready placeholder, or create one directly if the pool is empty
    pub async fn acquire(self: &Arc<Self>) -> Result<Placeholder> {
        loop {
            let popped = self.queue().pop_front();
            let Some(placeholder) = popped else { break };

            self.spawn_replacement();
            if placeholder.is_expired() {
                debug!(placeholder_id = ?placeholder.id, "Discarding expired placeholder");
                continue;
            }

            debug!(placeholder_id = ?placeholder.id, remaining = self.size(), "Acquired pooled placeholder");
            return Ok(placeholder);
        }

        warn!("Placeholder pool empty, creating placeholder directly");
        self.create_with_retry()
            .await
            .map_err(|err| RelayError::PoolExhausted {
                attempts: self.config.attempts(),
                reason: err.to_string(),
            })
    }

    pub fn size(&self) -> usize {
        self.queue().len()
    }

    pub fn target(&self) -> usize {
        self.target.load(Ordering::SeqCst)
    }

    /// Background replacements still in flight
    pub fn pending_replacements(&self) -> usize {
        self.pending_replacements.load(Ordering::SeqCst)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop in-progress fills and rebuilds
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn fill(&self) -> usize {
        let mut added = 0;
        loop {
            if self.cancel.is_cancelled() {
                info!(size = self.size(), "Placeholder fill cancelled");
                break;
            }
            if self.size() >= self.target() {
                break;
            }

            match self.create_with_retry().await {
                Ok(placeholder) => {
                    if self.offer(placeholder) {
                        added += 1;
                        debug!(size = self.size(), target = self.target(), "Pooled new placeholder");
                    }
                }
                Err(err) => {
                    error!(error = %err, "Skipping placeholder slot after repeated failures");
                }
            }

            if !self.pause(self.config.creation_delay()).await {
                break;
            }
        }
        added
    }

    /// Create one placeholder, retrying with a fixed interval
    async fn create_with_retry(&self) -> anyhow::Result<Placeholder> {
        let attempts = self.config.attempts();
        let mut last_error = None;

        for attempt in 1..=attempts {
            if attempt > 1 && !self.pause(self.config.retry_interval()).await {
                anyhow::bail!("placeholder creation cancelled");
            }

            match self.service.create_placeholder().await {
                Ok(placeholder) if placeholder.id.is_some() => return Ok(placeholder),
                Ok(_) => {
                    warn!(attempt, attempts, "Chat surface returned a placeholder without an id");
                    last_error = Some(anyhow::anyhow!("placeholder created without an id"));
                }
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "Placeholder creation failed");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("placeholder creation failed")))
    }

    /// Queue a placeholder unless the pool is already at target
    fn offer(&self, placeholder: Placeholder) -> bool {
        let target = self.target();
        let mut queue = self.queue();
        if queue.len() >= target || !placeholder.is_poolable() {
            debug!(placeholder_id = ?placeholder.id, "Discarding surplus placeholder");
            return false;
        }
        queue.push_back(placeholder);
        true
    }

    fn spawn_replacement(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        self.pending_replacements.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            match pool.create_with_retry().await {
                Ok(placeholder) => {
                    pool.offer(placeholder);
                }
                Err(err) => {
                    warn!(error = %err, "Replacement placeholder failed, retrying once");
                    match pool.create_with_retry().await {
                        Ok(placeholder) => {
                            pool.offer(placeholder);
                        }
                        Err(err) => error!(error = %err, "Replacement placeholder retry failed"),
                    }
                }
            }
            pool.pending_replacements.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Sleep unless cancelled first; false means cancelled
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Placeholder>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
