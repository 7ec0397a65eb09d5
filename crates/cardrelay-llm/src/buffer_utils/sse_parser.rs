use futures::{Stream, StreamExt};
use std::fmt::Display;

use super::buffering::CircularLineBuffer;
use crate::error::{BackendError, Result};
use crate::streaming::StreamEvent;
use crate::traits::EventStream;

/// Strategy pattern for parsing different SSE payload shapes
pub trait SseLineParser: Send {
    /// Parse the payload of a `data:` line. `Ok(None)` skips the line.
    fn parse_data_line(&self, data: &str) -> Result<Option<StreamEvent>>;

    /// Check if this payload signals end of stream
    fn is_done_marker(&self, data: &str) -> bool {
        data == "[DONE]"
    }
}

/// Generic SSE stream parser using circular buffer
///
/// Accepts any chunked byte stream (a `reqwest` body in production, an
/// in-memory stream in tests). Non-`data:` lines (`event:`, comments, blank
/// separators) are skipped. A transport error ends the stream after being
/// yielded; a malformed line is yielded as `BackendError::Parse` and the
/// caller decides whether to continue.
pub fn parse_sse_stream<S, B, E, P>(byte_stream: S, parser: P) -> EventStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
    P: SseLineParser + 'static,
{
    Box::pin(async_stream::stream! {
        let mut byte_chunks = Box::pin(byte_stream);
        let mut buffer = CircularLineBuffer::with_capacity(4096);

        while let Some(chunk_result) = byte_chunks.next().await {
            match chunk_result {
                Ok(bytes) => {
                    buffer.extend(bytes.as_ref());

                    while let Some(line_result) = buffer.next_line() {
                        match line_result {
                            Ok(line) => {
                                let Some(data) = data_payload(&line) else {
                                    continue;
                                };
                                if parser.is_done_marker(data) {
                                    return;
                                }
                                match parser.parse_data_line(data) {
                                    Ok(Some(event)) => yield Ok(event),
                                    Ok(None) => {}
                                    Err(e) => yield Err(e),
                                }
                            }
                            Err(e) => yield Err(e),
                        }
                    }
                }
                Err(e) => {
                    yield Err(BackendError::Stream(e.to_string()));
                    return;
                }
            }
        }

        // Body ended without a trailing newline
        if let Some(line_result) = buffer.take_remainder() {
            match line_result {
                Ok(line) => {
                    if let Some(data) = data_payload(&line) {
                        if !parser.is_done_marker(data) {
                            match parser.parse_data_line(data) {
                                Ok(Some(event)) => yield Ok(event),
                                Ok(None) => {}
                                Err(e) => yield Err(e),
                            }
                        }
                    }
                }
                Err(e) => yield Err(e),
            }
        }
    })
}

fn data_payload(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        None
    } else {
        Some(data)
    }
}
