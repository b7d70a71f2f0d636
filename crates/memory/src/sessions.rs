//! In-memory session store, one session per user.

use async_trait::async_trait;
use chrono::Utc;
use conclave_core::error::StoreError;
use conclave_core::session::{MAX_RECENT_TASKS, Session};
use conclave_core::store::{SessionStore, StoreResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    by_user: Arc<RwLock<HashMap<String, Uuid>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify(&self, id: Uuid, f: impl FnOnce(&mut Session)) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("session", id))?;
        f(session);
        Ok(())
    }
}

fn push_unique(ids: &mut Vec<Uuid>, id: Uuid) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(&self, user_id: &str) -> StoreResult<Session> {
        // Lock order: by_user, then sessions.
        let mut by_user = self.by_user.write().await;
        let mut sessions = self.sessions.write().await;
        if let Some(session) = by_user.get(user_id).and_then(|id| sessions.get(id)) {
            return Ok(session.clone());
        }
        let session = Session::new(user_id);
        by_user.insert(user_id.to_string(), session.id);
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Session>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn touch(&self, id: Uuid) -> StoreResult<()> {
        self.modify(id, |s| s.last_activity_at = Utc::now()).await
    }

    async fn add_active_task(&self, id: Uuid, task_id: Uuid) -> StoreResult<()> {
        self.modify(id, |s| {
            if !s.active_task_ids.contains(&task_id) {
                s.active_task_ids.push(task_id);
                s.total_tasks += 1;
            }
        })
        .await
    }

    async fn remove_active_task(&self, id: Uuid, task_id: Uuid) -> StoreResult<()> {
        self.modify(id, |s| s.active_task_ids.retain(|t| *t != task_id))
            .await
    }

    async fn add_recent_task(&self, id: Uuid, task_id: Uuid) -> StoreResult<()> {
        self.modify(id, |s| {
            s.recent_task_ids.retain(|t| *t != task_id);
            s.recent_task_ids.push(task_id);
            let overflow = s.recent_task_ids.len().saturating_sub(MAX_RECENT_TASKS);
            s.recent_task_ids.drain(..overflow);
        })
        .await
    }

    async fn remove_recent_task(&self, id: Uuid, task_id: Uuid) -> StoreResult<()> {
        self.modify(id, |s| s.recent_task_ids.retain(|t| *t != task_id))
            .await
    }

    async fn add_active_daemon(&self, id: Uuid, daemon_id: Uuid) -> StoreResult<()> {
        self.modify(id, |s| push_unique(&mut s.active_daemon_ids, daemon_id))
            .await
    }

    async fn remove_active_daemon(&self, id: Uuid, daemon_id: Uuid) -> StoreResult<()> {
        self.modify(id, |s| s.active_daemon_ids.retain(|d| *d != daemon_id))
            .await
    }

    async fn increment_stats(&self, id: Uuid, success: bool) -> StoreResult<()> {
        self.modify(id, |s| {
            if success {
                s.completed_tasks += 1;
            } else {
                s.failed_tasks += 1;
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_session_per_user() {
        let store = InMemorySessionStore::new();
        let a = store.get_or_create("alice").await.unwrap();
        let again = store.get_or_create("alice").await.unwrap();
        let b = store.get_or_create("bob").await.unwrap();
        assert_eq!(a.id, again.id);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn recent_tasks_are_capped_and_deduplicated() {
        let store = InMemorySessionStore::new();
        let s = store.get_or_create("u").await.unwrap();
        let ids: Vec<Uuid> = (0..MAX_RECENT_TASKS + 3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            store.add_recent_task(s.id, *id).await.unwrap();
        }
        store.add_recent_task(s.id, ids[5]).await.unwrap();

        let s = store.get(s.id).await.unwrap().unwrap();
        assert_eq!(s.recent_task_ids.len(), MAX_RECENT_TASKS);
        assert_eq!(*s.recent_task_ids.last().unwrap(), ids[5]);
        assert!(!s.recent_task_ids.contains(&ids[0]));
    }

    #[tokio::test]
    async fn active_tasks_count_toward_total_once() {
        let store = InMemorySessionStore::new();
        let s = store.get_or_create("u").await.unwrap();
        let task = Uuid::new_v4();
        store.add_active_task(s.id, task).await.unwrap();
        store.add_active_task(s.id, task).await.unwrap();
        store.increment_stats(s.id, true).await.unwrap();
        store.remove_active_task(s.id, task).await.unwrap();

        let s = store.get(s.id).await.unwrap().unwrap();
        assert_eq!(s.total_tasks, 1);
        assert_eq!(s.completed_tasks, 1);
        assert!(s.active_task_ids.is_empty());
    }
}
