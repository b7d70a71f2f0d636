//! In-memory daemon store.

use async_trait::async_trait;
use chrono::Utc;
use conclave_core::daemon::{Daemon, DaemonMessage, DaemonStatus, WorkingMemoryEntry};
use conclave_core::error::StoreError;
use conclave_core::store::{DaemonStore, StoreResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct InMemoryDaemonStore {
    daemons: Arc<RwLock<HashMap<Uuid, Daemon>>>,
}

impl InMemoryDaemonStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify(&self, id: Uuid, f: impl FnOnce(&mut Daemon)) -> StoreResult<()> {
        let mut daemons = self.daemons.write().await;
        let daemon = daemons
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("daemon", id))?;
        f(daemon);
        Ok(())
    }
}

#[async_trait]
impl DaemonStore for InMemoryDaemonStore {
    async fn create(&self, daemon: Daemon) -> StoreResult<()> {
        self.daemons.write().await.insert(daemon.id, daemon);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Daemon>> {
        Ok(self.daemons.read().await.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: DaemonStatus,
        current_action: &str,
        progress: f64,
    ) -> StoreResult<()> {
        self.modify(id, |d| {
            let now = Utc::now();
            if status == DaemonStatus::Executing && d.started_at.is_none() {
                d.started_at = Some(now);
            }
            if matches!(status, DaemonStatus::Completed | DaemonStatus::Failed) {
                d.completed_at = Some(now);
            }
            d.status = status;
            d.current_action = current_action.to_string();
            d.progress = progress.clamp(0.0, 1.0);
        })
        .await
    }

    async fn set_iterations(&self, id: Uuid, iterations: usize) -> StoreResult<()> {
        self.modify(id, |d| d.iterations = iterations).await
    }

    async fn add_working_memory(&self, id: Uuid, entry: WorkingMemoryEntry) -> StoreResult<()> {
        self.modify(id, |d| d.working_memory.push(entry)).await
    }

    async fn append_messages(&self, id: Uuid, messages: Vec<DaemonMessage>) -> StoreResult<()> {
        self.modify(id, |d| d.messages.extend(messages)).await
    }

    async fn active_for_user(&self, user_id: &str) -> StoreResult<Vec<Daemon>> {
        let daemons = self.daemons.read().await;
        let mut active: Vec<Daemon> = daemons
            .values()
            .filter(|d| d.user_id == user_id && d.status.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|d| d.created_at);
        Ok(active)
    }

    async fn cleanup_stale(&self) -> StoreResult<usize> {
        let mut daemons = self.daemons.write().await;
        let now = Utc::now();
        let mut cleaned = 0;
        for d in daemons.values_mut().filter(|d| d.status == DaemonStatus::Executing) {
            d.status = DaemonStatus::Failed;
            d.current_action = "interrupted by restart".into();
            d.completed_at = Some(now);
            cleaned += 1;
        }
        if cleaned > 0 {
            info!(count = cleaned, "Marked stale daemons as failed");
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn daemon(user: &str) -> Daemon {
        Daemon::new(Uuid::new_v4(), user, Uuid::new_v4(), "researcher", "dig")
    }

    #[tokio::test]
    async fn status_updates_stamp_start_and_completion() {
        let store = InMemoryDaemonStore::new();
        let d = daemon("u");
        let id = d.id;
        store.create(d).await.unwrap();

        store.update_status(id, DaemonStatus::Executing, "Initializing...", 0.0).await.unwrap();
        let d = store.get(id).await.unwrap().unwrap();
        assert!(d.started_at.is_some());
        assert!(d.completed_at.is_none());

        store.update_status(id, DaemonStatus::Completed, "Completed", 1.0).await.unwrap();
        let d = store.get(id).await.unwrap().unwrap();
        assert!(d.completed_at.is_some());
        assert_eq!(d.current_action, "Completed");
    }

    #[tokio::test]
    async fn active_for_user_skips_idle_and_other_users() {
        let store = InMemoryDaemonStore::new();
        let mine = daemon("alice");
        let idle = daemon("alice");
        let theirs = daemon("bob");
        let (mine_id, theirs_id) = (mine.id, theirs.id);
        for d in [mine, idle, theirs] {
            store.create(d).await.unwrap();
        }
        store.update_status(mine_id, DaemonStatus::Executing, "x", 0.1).await.unwrap();
        store.update_status(theirs_id, DaemonStatus::Executing, "y", 0.1).await.unwrap();

        let active = store.active_for_user("alice").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, mine_id);
    }

    #[tokio::test]
    async fn cleanup_stale_fails_executing_daemons() {
        let store = InMemoryDaemonStore::new();
        let d = daemon("u");
        let id = d.id;
        store.create(d).await.unwrap();
        store.update_status(id, DaemonStatus::Executing, "working", 0.5).await.unwrap();

        assert_eq!(store.cleanup_stale().await.unwrap(), 1);
        let d = store.get(id).await.unwrap().unwrap();
        assert_eq!(d.status, DaemonStatus::Failed);
        assert_eq!(d.current_action, "interrupted by restart");
        assert_eq!(store.cleanup_stale().await.unwrap(), 0);
    }
}
