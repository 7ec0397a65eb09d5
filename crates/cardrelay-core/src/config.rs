use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The pool never runs below this many ready placeholders
pub const MIN_POOL_SIZE: usize = 5;

/// Runtime tuning for the relay core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub target_size: usize,
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
    pub creation_delay_ms: u64,
    /// Cron expression (with seconds) for the full rebuild
    pub rebuild_cron: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target_size: 20,
            max_attempts: 3,
            retry_interval_ms: 1000,
            creation_delay_ms: 100,
            rebuild_cron: "0 0 0 * * *".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn with_target_size(mut self, target_size: usize) -> Self {
        self.target_size = target_size;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_interval_ms(mut self, retry_interval_ms: u64) -> Self {
        self.retry_interval_ms = retry_interval_ms;
        self
    }

    pub fn with_creation_delay_ms(mut self, creation_delay_ms: u64) -> Self {
        self.creation_delay_ms = creation_delay_ms;
        self
    }

    /// Target clamped to the pool floor
    pub fn effective_target(&self) -> usize {
        self.target_size.max(MIN_POOL_SIZE)
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn creation_delay(&self) -> Duration {
        Duration::from_millis(self.creation_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Minimum spacing between throttled flushes
    pub flush_interval_ms: u64,
    /// Idle deadline, as a multiple of the flush interval
    pub max_timeout_factor: u32,
    pub channel_capacity: usize,
    /// How long a closing turn waits for its placeholder before dropping text
    pub ready_grace_ms: u64,
    /// Event kinds whose `answer` is appended to the turn buffer
    pub answer_events: Vec<String>,
    /// Event kinds that end the turn
    pub terminal_events: Vec<String>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 100,
            max_timeout_factor: 3,
            channel_capacity: 256,
            ready_grace_ms: 10_000,
            answer_events: vec!["agent_message".to_string(), "message".to_string()],
            terminal_events: vec!["message_end".to_string()],
        }
    }
}

impl BufferConfig {
    pub fn with_flush_interval_ms(mut self, flush_interval_ms: u64) -> Self {
        self.flush_interval_ms = flush_interval_ms;
        self
    }

    pub fn with_max_timeout_factor(mut self, factor: u32) -> Self {
        self.max_timeout_factor = factor;
        self
    }

    pub fn with_answer_events(mut self, events: Vec<String>) -> Self {
        self.answer_events = events;
        self
    }

    pub fn with_terminal_events(mut self, events: Vec<String>) -> Self {
        self.terminal_events = events;
        self
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        self.flush_interval() * self.max_timeout_factor.max(1)
    }

    pub fn ready_grace(&self) -> Duration {
        Duration::from_millis(self.ready_grace_ms)
    }

    pub fn is_answer_event(&self, event: &str) -> bool {
        self.answer_events.iter().any(|kind| kind == event)
    }

    pub fn is_terminal_event(&self, event: &str) -> bool {
        self.terminal_events.iter().any(|kind| kind == event)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub capacity: usize,
    pub ttl_hours: i64,
    /// Drop the conversation id when a turn completes
    pub reset_on_turn_end: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_hours: 12,
            reset_on_turn_end: true,
        }
    }
}

impl SessionConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_reset_on_turn_end(mut self, reset: bool) -> Self {
        self.reset_on_turn_end = reset;
        self
    }

    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.ttl_hours)
    }
}
