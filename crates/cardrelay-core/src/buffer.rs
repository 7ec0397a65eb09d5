use std::time::Duration;

use cardrelay_types::TurnKey;
use tokio::time::Instant;

const INITIAL_CAPACITY: usize = 1024;

/// Accumulated, not yet flushed answer text for one turn
///
/// Pure state: the coalescer task that owns it decides when to flush.
#[derive(Debug)]
pub struct TurnBuffer {
    key: TurnKey,
    text: String,
    placeholder_ready: bool,
    last_flush: Option<Instant>,
    min_interval: Duration,
}

impl TurnBuffer {
    pub fn new(key: TurnKey, min_interval: Duration) -> Self {
        Self {
            key,
            text: String::with_capacity(INITIAL_CAPACITY),
            placeholder_ready: false,
            last_flush: None,
            min_interval,
        }
    }

    pub fn append(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    /// Non-empty, placeholder ready, and outside the throttle window
    pub fn should_flush(&self) -> bool {
        self.should_flush_at(Instant::now())
    }

    pub fn should_flush_at(&self, now: Instant) -> bool {
        if self.text.is_empty() || !self.placeholder_ready {
            return false;
        }
        match self.last_flush {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
        }
    }

    /// Take the accumulated text and stamp the flush time
    pub fn get_and_clear(&mut self) -> String {
        self.last_flush = Some(Instant::now());
        std::mem::replace(&mut self.text, String::with_capacity(INITIAL_CAPACITY))
    }

    pub fn mark_placeholder_ready(&mut self) {
        self.placeholder_ready = true;
    }

    pub fn is_placeholder_ready(&self) -> bool {
        self.placeholder_ready
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn last_flush(&self) -> Option<Instant> {
        self.last_flush
    }

    pub fn key(&self) -> &TurnKey {
        &self.key
    }
}
