//! Bounded in-memory checkpoint storage for turn sessions.
//!
//! Checkpoints idle for longer than the TTL are dropped on access and by
//! [`CheckpointStorage::purge_expired`]. When more than `max_sessions`
//! checkpoints are held, the least recently used ones are evicted on save.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use graph_flow::{Session, SessionStorage};

/// Idle time after which a conversation is forgotten - 30 minutes (default)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;

/// Checkpoints kept before the least recently used is evicted (default)
pub const DEFAULT_MAX_SESSIONS: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointLimits {
    pub ttl: Duration,
    pub max_sessions: usize,
}

impl Default for CheckpointLimits {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

struct Checkpoint {
    session: Session,
    touched: Instant,
}

pub struct CheckpointStorage {
    sessions: DashMap<String, Checkpoint>,
    limits: CheckpointLimits,
}

impl Default for CheckpointStorage {
    fn default() -> Self {
        Self::new(CheckpointLimits::default())
    }
}

impl CheckpointStorage {
    pub fn new(limits: CheckpointLimits) -> Self {
        Self {
            sessions: DashMap::new(),
            limits: CheckpointLimits {
                max_sessions: limits.max_sessions.max(1),
                ..limits
            },
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop every checkpoint idle for longer than the TTL.
    pub fn purge_expired(&self) -> usize {
        let before = self.sessions.len();
        let ttl = self.limits.ttl;
        self.sessions
            .retain(|_, checkpoint| checkpoint.touched.elapsed() <= ttl);
        before.saturating_sub(self.sessions.len())
    }

    fn evict_over_capacity(&self, keep: &str) -> usize {
        let mut evicted = 0;
        while self.sessions.len() > self.limits.max_sessions {
            let oldest = self
                .sessions
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.touched)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(id) => {
                    self.sessions.remove(&id);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }
}

#[async_trait]
impl SessionStorage for CheckpointStorage {
    async fn save(&self, session: Session) -> graph_flow::Result<()> {
        let id = session.id.clone();
        self.sessions.insert(
            id.clone(),
            Checkpoint {
                session,
                touched: Instant::now(),
            },
        );

        let evicted = self.evict_over_capacity(&id);
        if evicted > 0 {
            tracing::debug!("[turn] Evicted {} least recently used checkpoint(s)", evicted);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> graph_flow::Result<Option<Session>> {
        if let Some(mut checkpoint) = self.sessions.get_mut(id) {
            if checkpoint.touched.elapsed() <= self.limits.ttl {
                checkpoint.touched = Instant::now();
                return Ok(Some(checkpoint.session.clone()));
            }
        } else {
            return Ok(None);
        }

        self.sessions.remove(id);
        tracing::debug!("[turn] Checkpoint for session {} expired", id);
        Ok(None)
    }

    async fn delete(&self, id: &str) -> graph_flow::Result<()> {
        self.sessions.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> Session {
        Session::new_from_task(id.to_string(), "router")
    }

    fn limits(ttl: Duration, max_sessions: usize) -> CheckpointLimits {
        CheckpointLimits { ttl, max_sessions }
    }

    #[tokio::test]
    async fn test_save_get_delete() {
        let storage = CheckpointStorage::default();

        storage.save(session("s1")).await.unwrap();
        assert_eq!(storage.get("s1").await.unwrap().map(|s| s.id), Some("s1".to_string()));
        assert!(storage.get("s2").await.unwrap().is_none());

        storage.delete("s1").await.unwrap();
        assert!(storage.get("s1").await.unwrap().is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_least_recently_used_is_evicted() {
        let storage = CheckpointStorage::new(limits(Duration::from_secs(60), 2));

        storage.save(session("s1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        storage.save(session("s2")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // Reading s1 makes s2 the oldest
        assert!(storage.get("s1").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(5)).await;
        storage.save(session("s3")).await.unwrap();

        assert_eq!(storage.len(), 2);
        assert!(storage.get("s2").await.unwrap().is_none());
        assert!(storage.get("s1").await.unwrap().is_some());
        assert!(storage.get("s3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_idle_checkpoints_expire() {
        let storage = CheckpointStorage::new(limits(Duration::from_millis(20), 10));

        storage.save(session("s1")).await.unwrap();
        storage.save(session("s2")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(storage.get("s1").await.unwrap().is_none());
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.purge_expired(), 1);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_zero_capacity_still_keeps_current_session() {
        let storage = CheckpointStorage::new(limits(Duration::from_secs(60), 0));

        storage.save(session("s1")).await.unwrap();
        storage.save(session("s2")).await.unwrap();

        assert_eq!(storage.len(), 1);
        assert!(storage.get("s2").await.unwrap().is_some());
    }
}
