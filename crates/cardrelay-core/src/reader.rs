use std::sync::Arc;

use cardrelay_llm::{EventStream, StreamEvent};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::{BufferConfig, SessionConfig};
use crate::error::{RelayError, Result};
use crate::session::SessionStore;
use crate::turns::TurnHandle;

/// How the reader treats one upstream event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Carries answer text for the buffer
    Answer,
    /// Any other non-terminal event; forces a flush
    Boundary,
    /// Ends the turn
    Terminal,
}

impl EventKind {
    pub fn classify(event: &StreamEvent, config: &BufferConfig) -> Self {
        if event.terminal || config.is_terminal_event(&event.event) {
            EventKind::Terminal
        } else if config.is_answer_event(&event.event) {
            EventKind::Answer
        } else {
            EventKind::Boundary
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadSummary {
    pub events: usize,
    pub answer_chars: usize,
    pub conversation_id: Option<String>,
    /// A terminal event was seen
    pub completed: bool,
}

/// Consumes one turn's upstream event stream
pub struct StreamReader {
    handle: TurnHandle,
    sessions: Arc<SessionStore>,
    buffer: BufferConfig,
    reset_on_turn_end: bool,
}

impl StreamReader {
    pub fn new(
        handle: TurnHandle,
        sessions: Arc<SessionStore>,
        buffer: &BufferConfig,
        session: &SessionConfig,
    ) -> Self {
        Self {
            handle,
            sessions,
            buffer: buffer.clone(),
            reset_on_turn_end: session.reset_on_turn_end,
        }
    }

    /// Read events in order until the stream ends or a terminal event arrives
    ///
    /// The turn's buffer is always closed on return. A malformed event fails
    /// this turn only.
    pub async fn consume(self, mut stream: EventStream) -> Result<ReadSummary> {
        let turn = self.handle.key().clone();
        let mut summary = ReadSummary::default();

        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                Err(err) => {
                    warn!(turn = %turn, error = %err, "Upstream stream failed");
                    self.handle.finish().await;
                    return Err(RelayError::from(err));
                }
            };
            summary.events += 1;

            if let Some(conversation_id) = event.conversation_id.as_deref() {
                self.sessions
                    .upsert_conversation(&turn.user_id, conversation_id);
                summary.conversation_id = Some(conversation_id.to_string());
            }

            match EventKind::classify(&event, &self.buffer) {
                EventKind::Answer => {
                    if let Some(delta) = event.answer_delta() {
                        summary.answer_chars += delta.chars().count();
                        self.handle.append(delta).await;
                    }
                }
                EventKind::Boundary => {
                    if event.event == "error" {
                        warn!(
                            turn = %turn,
                            upstream_message = event.message.as_deref().unwrap_or_default(),
                            "Upstream reported an error event"
                        );
                    } else {
                        debug!(turn = %turn, event = %event.event, "Stream boundary");
                    }
                    self.handle.force_flush().await;
                }
                EventKind::Terminal => {
                    self.handle.finish().await;
                    if self.reset_on_turn_end {
                        self.sessions.remove(&turn.user_id);
                    }
                    summary.completed = true;
                    info!(
                        turn = %turn,
                        events = summary.events,
                        answer_chars = summary.answer_chars,
                        "Turn completed"
                    );
                    return Ok(summary);
                }
            }
        }

        warn!(turn = %turn, events = summary.events, "Upstream stream ended without a terminal event");
        self.handle.finish().await;
        Ok(summary)
    }
}
