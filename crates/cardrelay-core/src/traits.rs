use async_trait::async_trait;
use cardrelay_types::Placeholder;

/// Chat-surface operations on placeholder cards
///
/// Implemented by the vendor glue (Feishu cards in production, in-memory
/// doubles in tests). The core never builds vendor payloads itself.
#[async_trait]
pub trait PlaceholderService: Send + Sync {
    /// Create an unbound card upstream. The returned placeholder must carry an id.
    async fn create_placeholder(&self) -> anyhow::Result<Placeholder>;

    /// Show the card to the user. `false` means the card is no longer usable.
    async fn deliver_placeholder(&self, user_id: &str, placeholder: &Placeholder) -> bool;

    /// Push coalesced answer text to a delivered card
    async fn update_placeholder_content(&self, placeholder_id: &str, text: &str) -> bool;
}
