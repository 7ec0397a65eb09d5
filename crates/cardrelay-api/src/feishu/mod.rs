//! Feishu (Lark) open-platform glue: tenant tokens, streaming cards and
//! webhook event payloads.

pub mod card;
pub mod client;
pub mod events;
pub mod token;

pub use client::FeishuClient;
