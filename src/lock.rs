use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::{Error, Result};

/// Record lock identity: database name and key bytes
pub(crate) type LockKey = (String, Vec<u8>);

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct LockTable {
    /// Current owner of every granted lock
    owners: HashMap<LockKey, u64>,
    /// Transactions waiting for each lock, oldest first
    queues: HashMap<LockKey, VecDeque<u64>>,
    /// Locks held per transaction, released together
    held: HashMap<u64, Vec<LockKey>>,
    /// Wait-for graph: waiting transaction to the owner it waits on
    waits_for: HashMap<u64, u64>,
}

impl LockTable {
    /// Follow the wait-for chain from `owner`; reaching `requester` means
    /// granting the wait would close a cycle.
    fn would_deadlock(&self, requester: u64, owner: u64) -> bool {
        let mut current = owner;
        for _ in 0..=self.waits_for.len() {
            if current == requester {
                return true;
            }
            match self.waits_for.get(&current) {
                Some(&next) => current = next,
                None => return false,
            }
        }
        false
    }

    fn grant(&mut self, txn: u64, key: LockKey) {
        self.owners.insert(key.clone(), txn);
        self.held.entry(txn).or_default().push(key);
        self.waits_for.remove(&txn);
    }

    /// Take `txn` out of the wait queue of `key`.
    fn dequeue(&mut self, txn: u64, key: &LockKey) {
        if let Some(queue) = self.queues.get_mut(key) {
            queue.retain(|&t| t != txn);
            if queue.is_empty() {
                self.queues.remove(key);
            }
        }
        self.waits_for.remove(&txn);
    }

    /// Pass a freed lock to its oldest waiter. The others now wait on it.
    fn hand_off(&mut self, key: LockKey) {
        self.owners.remove(&key);
        let Some(queue) = self.queues.get_mut(&key) else {
            return;
        };
        let Some(next) = queue.pop_front() else {
            self.queues.remove(&key);
            return;
        };
        let rest: Vec<u64> = queue.iter().copied().collect();
        if queue.is_empty() {
            self.queues.remove(&key);
        }
        for waiter in rest {
            self.waits_for.insert(waiter, next);
        }
        debug!("lock handed to waiting txn {}", next);
        self.grant(next, key);
    }
}

/// Exclusive record locks with wait-for-graph deadlock detection.
/// Freed locks go to waiters in arrival order.
#[derive(Debug)]
pub(crate) struct LockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    timeout: Duration,
}

impl LockManager {
    pub(crate) fn new(timeout: Duration) -> Self {
        LockManager {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Take the lock on `key` for `txn`, blocking while another transaction
    /// holds it. Returns true when the lock is newly granted, false when
    /// `txn` already held it.
    pub(crate) fn acquire(&self, txn: u64, key: LockKey) -> Result<bool> {
        let deadline = Instant::now() + self.timeout;
        let mut table = lock(&self.table);
        let mut queued = false;
        loop {
            let current = table.owners.get(&key).copied();
            let owner = match current {
                None => {
                    table.dequeue(txn, &key);
                    table.grant(txn, key);
                    return Ok(true);
                }
                // Handed over by `release_all` while we slept
                Some(owner) if owner == txn => return Ok(queued),
                Some(owner) => owner,
            };

            if table.would_deadlock(txn, owner) {
                table.dequeue(txn, &key);
                warn!("txn {} chosen as deadlock victim waiting on txn {}", txn, owner);
                return Err(Error::Deadlock);
            }

            let now = Instant::now();
            if now >= deadline {
                table.dequeue(txn, &key);
                return Err(Error::LockTimeout);
            }

            if !queued {
                table.queues.entry(key.clone()).or_default().push_back(txn);
                queued = true;
            }
            table.waits_for.insert(txn, owner);
            debug!("txn {} waits for txn {}", txn, owner);
            table = self
                .released
                .wait_timeout(table, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Drop every lock held by `txn`, handing each to its oldest waiter,
    /// and wake waiters.
    pub(crate) fn release_all(&self, txn: u64) {
        let mut table = lock(&self.table);
        table.waits_for.remove(&txn);
        table.queues.retain(|_, queue| {
            queue.retain(|&t| t != txn);
            !queue.is_empty()
        });
        if let Some(keys) = table.held.remove(&txn) {
            for key in keys {
                table.hand_off(key);
            }
            self.released.notify_all();
        }
    }

    #[cfg(test)]
    fn held_count(&self, txn: u64) -> usize {
        lock(&self.table).held.get(&txn).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn key(k: &str) -> LockKey {
        ("db".to_string(), k.as_bytes().to_vec())
    }

    #[test]
    fn test_reacquire_is_not_new() {
        let locks = LockManager::new(Duration::from_millis(100));
        assert!(locks.acquire(1, key("a")).unwrap());
        assert!(!locks.acquire(1, key("a")).unwrap());
        assert_eq!(locks.held_count(1), 1);
        locks.release_all(1);
        assert_eq!(locks.held_count(1), 0);
    }

    #[test]
    fn test_wait_times_out() {
        let locks = LockManager::new(Duration::from_millis(20));
        locks.acquire(1, key("a")).unwrap();
        assert!(matches!(locks.acquire(2, key("a")), Err(Error::LockTimeout)));
    }

    #[test]
    fn test_waiter_granted_after_release() {
        let locks = Arc::new(LockManager::new(Duration::from_secs(5)));
        locks.acquire(1, key("a")).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.acquire(2, key("a")))
        };
        thread::sleep(Duration::from_millis(20));
        locks.release_all(1);
        assert!(waiter.join().unwrap().unwrap());
    }

    #[test]
    fn test_cycle_is_reported_as_deadlock() {
        let locks = Arc::new(LockManager::new(Duration::from_secs(5)));
        let barrier = Arc::new(Barrier::new(2));
        locks.acquire(1, key("a")).unwrap();
        locks.acquire(2, key("b")).unwrap();

        // txn 1 blocks on "b"; txn 2 then asks for "a" and closes the cycle.
        let first = {
            let locks = Arc::clone(&locks);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                locks.acquire(1, key("b"))
            })
        };
        barrier.wait();
        thread::sleep(Duration::from_millis(50));
        let second = locks.acquire(2, key("a"));
        assert!(matches!(second, Err(Error::Deadlock)));

        locks.release_all(2);
        assert!(first.join().unwrap().unwrap());
    }

    #[test]
    fn test_freed_lock_goes_to_oldest_waiter() {
        let locks = Arc::new(LockManager::new(Duration::from_secs(5)));
        locks.acquire(1, key("a")).unwrap();

        let spawn_waiter = |txn: u64| {
            let locks = Arc::clone(&locks);
            let handle = thread::spawn(move || locks.acquire(txn, key("a")));
            thread::sleep(Duration::from_millis(30));
            handle
        };
        let second = spawn_waiter(2);
        let third = spawn_waiter(3);

        locks.release_all(1);
        assert!(second.join().unwrap().unwrap());
        assert_eq!(locks.held_count(2), 1);
        assert_eq!(locks.held_count(3), 0);

        locks.release_all(2);
        assert!(third.join().unwrap().unwrap());
        assert_eq!(locks.held_count(3), 1);
    }

    #[test]
    fn test_released_lock_cannot_be_taken_ahead_of_waiter() {
        let locks = Arc::new(LockManager::new(Duration::from_millis(200)));
        locks.acquire(1, key("a")).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.acquire(2, key("a")))
        };
        thread::sleep(Duration::from_millis(30));

        // A fresh request right after the release queues behind txn 2
        locks.release_all(1);
        assert!(matches!(locks.acquire(3, key("a")), Err(Error::LockTimeout)));
        assert!(waiter.join().unwrap().unwrap());
        assert_eq!(locks.held_count(2), 1);
    }
}
