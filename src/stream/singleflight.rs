//! Keyed request coalescing
//!
//! [`SingleFlight`] runs at most one piece of work per key at a time. The first
//! caller for a key becomes the leader and performs the work; callers arriving
//! while it is in flight wait on a one-shot completion signal and receive a
//! clone of the leader's result.
//!
//! If the leader is dropped before finishing (its request was cancelled), the
//! waiters wake up and one of them takes over as the new leader.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

type Slot<T> = Arc<watch::Sender<Option<T>>>;

/// In-flight work keyed by `K`, producing `T`
pub struct SingleFlight<K, T> {
    calls: Mutex<HashMap<K, Slot<T>>>,
}

enum Role<T> {
    Leader(Slot<T>),
    Waiter(watch::Receiver<Option<T>>),
}

/// Removes the in-flight entry when the leader finishes or is dropped
struct LeaderGuard<'a, K: Eq + Hash, T> {
    flight: &'a SingleFlight<K, T>,
    key: &'a K,
    slot: &'a Slot<T>,
}

impl<K: Eq + Hash, T> Drop for LeaderGuard<'_, K, T> {
    fn drop(&mut self) {
        let mut calls = self.flight.calls.lock();
        if calls.get(self.key).is_some_and(|s| Arc::ptr_eq(s, self.slot)) {
            calls.remove(self.key);
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys with work in flight
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    /// Run `work` for `key`, or join the run already in flight
    pub async fn run<F, Fut>(&self, key: &K, work: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut work = Some(work);

        loop {
            let role = {
                let mut calls = self.calls.lock();
                match calls.get(key) {
                    Some(slot) => Role::Waiter(slot.subscribe()),
                    None => {
                        let (tx, _rx) = watch::channel(None);
                        let slot = Arc::new(tx);
                        calls.insert(key.clone(), slot.clone());
                        Role::Leader(slot)
                    }
                }
            };

            match role {
                Role::Leader(slot) => {
                    let _guard = LeaderGuard {
                        flight: self,
                        key,
                        slot: &slot,
                    };
                    let work = work.take().expect("leader runs its work once");
                    let result = work().await;
                    slot.send_replace(Some(result.clone()));
                    return result;
                }
                Role::Waiter(mut rx) => {
                    match rx.wait_for(Option::is_some).await {
                        Ok(value) => {
                            if let Some(result) = value.as_ref() {
                                return result.clone();
                            }
                        }
                        // Leader dropped without a result; compete to lead again
                        Err(_) => continue,
                    }
                }
            }
        }
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
