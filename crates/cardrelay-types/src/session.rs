use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Sliding expiry window, pushed forward on every access
pub const SESSION_TTL_HOURS: i64 = 12;

/// Associates a user with an ongoing conversation on the AI backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    /// Opaque token from the AI backend; absent until the first answer
    pub conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        user_id: impl Into<String>,
        conversation_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            conversation_id,
            created_at: now,
            last_access: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
        }
    }

    /// Refresh last access; expiry is always `last_access + ttl`
    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.last_access = now;
        self.expires_at = now + ttl;
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
