use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::TurnKey;

/// Hours a card stays usable on the chat surface after creation
pub const PLACEHOLDER_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStatus {
    Creating,
    Ready,
    Updating,
    Failed,
}

/// A chat-surface card that is shown first and filled with streamed text later
///
/// A placeholder is either unbound (pooled, `Ready`, no owner) or bound to
/// exactly one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placeholder {
    /// Assigned by the chat surface once created; absent while queued
    pub id: Option<String>,
    pub owner: Option<TurnKey>,
    pub status: PlaceholderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Placeholder {
    /// A placeholder whose creation request has not completed yet
    pub fn creating(now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            owner: None,
            status: PlaceholderStatus::Creating,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::hours(PLACEHOLDER_TTL_HOURS),
        }
    }

    /// A freshly created, unbound placeholder
    pub fn ready(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        let mut placeholder = Self::creating(now);
        placeholder.mark_ready(id, now);
        placeholder
    }

    pub fn mark_ready(&mut self, id: impl Into<String>, now: DateTime<Utc>) {
        self.id = Some(id.into());
        self.status = PlaceholderStatus::Ready;
        self.updated_at = now;
    }

    pub fn mark_updating(&mut self, now: DateTime<Utc>) {
        self.status = PlaceholderStatus::Updating;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.status = PlaceholderStatus::Failed;
        self.updated_at = now;
    }

    /// Claim the placeholder for a turn. Returns false if it is already owned.
    pub fn bind(&mut self, owner: TurnKey, now: DateTime<Utc>) -> bool {
        if self.owner.is_some() {
            return false;
        }
        self.owner = Some(owner);
        self.updated_at = now;
        true
    }

    pub fn is_bound(&self) -> bool {
        self.owner.is_some()
    }

    pub fn is_ready(&self) -> bool {
        self.status == PlaceholderStatus::Ready
    }

    /// Ready, unbound and carrying an id: the only shape the pool may hand out
    pub fn is_poolable(&self) -> bool {
        self.is_ready() && !self.is_bound() && self.id.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
