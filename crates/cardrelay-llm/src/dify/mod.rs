mod client;
mod types;

pub use client::{DifyClient, DifyLineParser};
pub use types::{ChatMessageRequest, DifyStreamChunk, ResponseMode};
