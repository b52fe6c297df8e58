//! Per-guest exclusive sections.
//!
//! Every state-changing operation on a guest (scan, checkin, checkout, forced
//! checkout, purge) runs while holding that guest's lock. The locks are fair
//! (`tokio::sync::Mutex` queues waiters in FIFO order), so concurrent scans
//! of the same guest are applied in arrival order. Distinct guests never
//! contend.

use crate::models::guest::GuestId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct GuestLocks {
    locks: DashMap<GuestId, Arc<Mutex<()>>>,
}

/// Proof that the holder owns a guest's exclusive section.
#[derive(Debug)]
pub struct GuestGuard {
    guest: GuestId,
    _guard: OwnedMutexGuard<()>,
}

impl GuestGuard {
    pub fn guest(&self) -> &GuestId {
        &self.guest
    }
}

impl GuestLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the guest's exclusive section.
    pub async fn lock(&self, guest: &GuestId) -> GuestGuard {
        // Clone the Arc out before awaiting so no DashMap shard guard is held
        // across the await point.
        let mutex = self
            .locks
            .entry(guest.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        GuestGuard {
            guest: guest.clone(),
            _guard: mutex.lock_owned().await,
        }
    }

    /// Drop the lock entry of a guest that no longer exists. Holders and
    /// waiters keep their own `Arc` and are unaffected.
    pub fn forget(&self, guest: &GuestId) {
        self.locks.remove(guest);
    }

    /// Drop entries nobody holds or waits for.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn gid(c: char) -> GuestId {
        GuestId::parse(&c.to_string().repeat(32)).unwrap()
    }

    #[tokio::test]
    async fn same_guest_waits_in_arrival_order() {
        let locks = Arc::new(GuestLocks::new());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let first = locks.lock(&gid('a')).await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let locks = locks.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let _g = locks.lock(&gid('a')).await;
                order.lock().unwrap().push(i);
            }));
            // let each task enqueue before the next one starts
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        drop(first);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn distinct_guests_do_not_block() {
        let locks = GuestLocks::new();
        let _a = locks.lock(&gid('a')).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&gid('b'))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let locks = GuestLocks::new();
        let held = locks.lock(&gid('a')).await;
        drop(locks.lock(&gid('b')).await);
        assert_eq!(locks.prune_idle(), 1);
        assert_eq!(locks.len(), 1);
        drop(held);
    }
}
