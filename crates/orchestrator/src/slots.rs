//! Per-user concurrency slots and the registry of running daemons.
//!
//! A slot is a semaphore permit. Acquiring one registers the daemon's
//! cancellation token; both are released together when the [`SlotGuard`]
//! drops, which happens exactly once per launch, unwinding included.
//! A user's semaphore is evicted when their last permit comes back, so the
//! map only holds users with a daemon in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

struct Running {
    user_id: String,
    cancel: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<Uuid, Running>>>;
type Users = Arc<Mutex<HashMap<String, Arc<Semaphore>>>>;

pub struct SlotManager {
    cap: usize,
    users: Users,
    running: Registry,
}

impl SlotManager {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            users: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    fn semaphore(&self, user_id: &str) -> Arc<Semaphore> {
        lock_users(&self.users)
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.cap)))
            .clone()
    }

    /// Take a slot for `daemon_id` without waiting. The daemon's token is a
    /// child of `parent`, so cancelling the request cancels the daemon too.
    pub fn try_acquire(
        &self,
        user_id: &str,
        daemon_id: Uuid,
        parent: &CancellationToken,
    ) -> Option<SlotGuard> {
        let permit = match self.semaphore(user_id).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!(user_id = %user_id, cap = self.cap, "Daemon slots exhausted");
                evict_idle(&self.users, user_id);
                return None;
            }
        };

        let cancel = parent.child_token();
        lock(&self.running).insert(
            daemon_id,
            Running {
                user_id: user_id.to_string(),
                cancel: cancel.clone(),
            },
        );
        debug!(user_id = %user_id, daemon_id = %daemon_id, "Daemon slot acquired");

        Some(SlotGuard {
            daemon_id,
            user_id: user_id.to_string(),
            cancel,
            running: self.running.clone(),
            users: self.users.clone(),
            permit: Some(permit),
        })
    }

    /// Daemons currently holding a slot for `user_id`.
    pub fn in_use(&self, user_id: &str) -> usize {
        lock_users(&self.users)
            .get(user_id)
            .map_or(0, |sem| self.cap - sem.available_permits())
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        lock_users(&self.users).len()
    }

    /// Cancel a running daemon. Returns false when it holds no slot.
    pub fn cancel(&self, daemon_id: Uuid) -> bool {
        match lock(&self.running).get(&daemon_id) {
            Some(running) => {
                running.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running daemon of `user_id`; returns how many.
    pub fn cancel_user(&self, user_id: &str) -> usize {
        let running = lock(&self.running);
        running
            .values()
            .filter(|r| r.user_id == user_id)
            .inspect(|r| r.cancel.cancel())
            .count()
    }

    pub fn is_running(&self, daemon_id: Uuid) -> bool {
        lock(&self.running).contains_key(&daemon_id)
    }
}

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<Uuid, Running>> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

fn lock_users(users: &Users) -> MutexGuard<'_, HashMap<String, Arc<Semaphore>>> {
    users.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drop the user's semaphore once nothing but the map refers to it. Every
/// outstanding permit and every in-progress acquire holds a clone.
fn evict_idle(users: &Users, user_id: &str) {
    let mut users = lock_users(users);
    if users
        .get(user_id)
        .is_some_and(|sem| Arc::strong_count(sem) == 1)
    {
        users.remove(user_id);
        debug!(user_id = %user_id, "Idle slot semaphore evicted");
    }
}

/// A held slot. Dropping it unregisters the daemon and frees the permit.
pub struct SlotGuard {
    daemon_id: Uuid,
    user_id: String,
    cancel: CancellationToken,
    running: Registry,
    users: Users,
    permit: Option<OwnedSemaphorePermit>,
}

impl SlotGuard {
    pub fn daemon_id(&self) -> Uuid {
        self.daemon_id
    }

    /// The daemon's cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        lock(&self.running).remove(&self.daemon_id);
        drop(self.permit.take());
        evict_idle(&self.users, &self.user_id);
        debug!(daemon_id = %self.daemon_id, "Daemon slot released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_is_enforced_per_user() {
        let slots = SlotManager::new(2);
        let root = CancellationToken::new();

        let a = slots.try_acquire("alice", Uuid::new_v4(), &root);
        let b = slots.try_acquire("alice", Uuid::new_v4(), &root);
        assert!(a.is_some() && b.is_some());
        assert!(slots.try_acquire("alice", Uuid::new_v4(), &root).is_none());
        assert_eq!(slots.in_use("alice"), 2);

        // Other users have their own budget.
        assert!(slots.try_acquire("bob", Uuid::new_v4(), &root).is_some());

        drop(a);
        assert_eq!(slots.in_use("alice"), 1);
        assert!(slots.try_acquire("alice", Uuid::new_v4(), &root).is_some());
    }

    #[test]
    fn drop_unregisters_the_daemon() {
        let slots = SlotManager::new(5);
        let id = Uuid::new_v4();
        let guard = slots.try_acquire("u", id, &CancellationToken::new()).unwrap();
        assert!(slots.is_running(id));
        assert_eq!(guard.daemon_id(), id);

        drop(guard);
        assert!(!slots.is_running(id));
        assert!(!slots.cancel(id));
    }

    #[test]
    fn cancel_reaches_the_daemon_token() {
        let slots = SlotManager::new(5);
        let id = Uuid::new_v4();
        let guard = slots.try_acquire("u", id, &CancellationToken::new()).unwrap();
        let token = guard.token();

        assert!(slots.cancel(id));
        assert!(token.is_cancelled());
    }

    #[test]
    fn request_cancellation_propagates_to_children() {
        let slots = SlotManager::new(5);
        let request = CancellationToken::new();
        let a = slots.try_acquire("u", Uuid::new_v4(), &request).unwrap();
        let b = slots.try_acquire("u", Uuid::new_v4(), &request).unwrap();

        request.cancel();
        assert!(a.token().is_cancelled());
        assert!(b.token().is_cancelled());
    }

    #[test]
    fn cancel_user_only_touches_that_user() {
        let slots = SlotManager::new(5);
        let root = CancellationToken::new();
        let mine = slots.try_acquire("alice", Uuid::new_v4(), &root).unwrap();
        let theirs = slots.try_acquire("bob", Uuid::new_v4(), &root).unwrap();

        assert_eq!(slots.cancel_user("alice"), 1);
        assert!(mine.token().is_cancelled());
        assert!(!theirs.token().is_cancelled());
    }

    #[test]
    fn idle_users_are_evicted() {
        let slots = SlotManager::new(2);
        let root = CancellationToken::new();

        let a = slots.try_acquire("alice", Uuid::new_v4(), &root).unwrap();
        let b = slots.try_acquire("alice", Uuid::new_v4(), &root).unwrap();
        let c = slots.try_acquire("bob", Uuid::new_v4(), &root).unwrap();
        assert_eq!(slots.tracked_users(), 2);

        // Alice still has a daemon in flight.
        drop(a);
        assert_eq!(slots.tracked_users(), 2);
        assert_eq!(slots.in_use("alice"), 1);

        drop(b);
        drop(c);
        assert_eq!(slots.tracked_users(), 0);

        // Querying an unknown user does not create an entry.
        assert_eq!(slots.in_use("carol"), 0);
        assert_eq!(slots.tracked_users(), 0);

        // A returning user starts from a full budget.
        let again = slots.try_acquire("alice", Uuid::new_v4(), &root);
        assert!(again.is_some());
        assert_eq!(slots.in_use("alice"), 1);
    }

    #[tokio::test]
    async fn panicking_holder_still_releases() {
        let slots = Arc::new(SlotManager::new(1));
        let guard = slots
            .try_acquire("u", Uuid::new_v4(), &CancellationToken::new())
            .unwrap();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            panic!("daemon blew up");
        });
        assert!(handle.await.is_err());

        assert_eq!(slots.in_use("u"), 0);
        assert!(slots.try_acquire("u", Uuid::new_v4(), &CancellationToken::new()).is_some());
    }
}
