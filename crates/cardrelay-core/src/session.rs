use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use cardrelay_types::Session;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use tracing::debug;

use crate::config::SessionConfig;

/// Bounded user → session map with a sliding TTL
///
/// Expired sessions are never returned; they are evicted when read. Once
/// the capacity is reached the least recently used session is dropped.
pub struct SessionStore {
    cache: Mutex<LruCache<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl: config.ttl(),
        }
    }

    pub fn get(&self, user_id: &str) -> Option<Session> {
        self.get_at(user_id, Utc::now())
    }

    pub fn get_at(&self, user_id: &str, now: DateTime<Utc>) -> Option<Session> {
        let mut cache = self.cache();
        let expired = cache.get(user_id)?.is_expired_at(now);
        if expired {
            debug!(user_id, "Evicting expired session");
            cache.pop(user_id);
            return None;
        }
        cache.get(user_id).cloned()
    }

    /// Start a session, replacing any previous one for the user
    pub fn create(&self, user_id: &str, conversation_id: impl Into<String>) -> Session {
        self.create_at(user_id, conversation_id, Utc::now())
    }

    pub fn create_at(
        &self,
        user_id: &str,
        conversation_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Session {
        let mut session = Session::new(user_id, Some(conversation_id.into()), now);
        session.touch(now, self.ttl);
        self.cache().put(user_id.to_string(), session.clone());
        session
    }

    /// Store the session with a refreshed access time
    pub fn update(&self, session: &Session) -> Session {
        self.update_at(session, Utc::now())
    }

    pub fn update_at(&self, session: &Session, now: DateTime<Utc>) -> Session {
        let mut updated = session.clone();
        updated.touch(now, self.ttl);
        self.cache().put(updated.user_id.clone(), updated.clone());
        updated
    }

    pub fn remove(&self, user_id: &str) -> Option<Session> {
        self.cache().pop(user_id)
    }

    pub fn is_expired(&self, session: &Session) -> bool {
        session.is_expired()
    }

    /// Create the user's session, or point the existing one at `conversation_id`
    pub fn upsert_conversation(&self, user_id: &str, conversation_id: &str) -> Session {
        self.upsert_conversation_at(user_id, conversation_id, Utc::now())
    }

    pub fn upsert_conversation_at(
        &self,
        user_id: &str,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> Session {
        match self.get_at(user_id, now) {
            Some(mut session) => {
                session.conversation_id = Some(conversation_id.to_string());
                self.update_at(&session, now)
            }
            None => self.create_at(user_id, conversation_id, now),
        }
    }

    pub fn len(&self) -> usize {
        self.cache().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache().is_empty()
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<String, Session>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
