pub mod error;
pub mod traits;
pub mod streaming;
pub mod buffer_utils;
pub mod config;
pub mod dify;

pub use error::{BackendError, Result};
pub use traits::{ChatBackend, EventStream, TurnRequest};
pub use streaming::{StreamEvent, MESSAGE_END_EVENT};
pub use buffer_utils::{parse_sse_stream, CircularLineBuffer, SseLineParser};
pub use config::BackendConfig;
pub use dify::{DifyClient, DifyLineParser};
