//! Deduplicating async loader
//!
//! At most one load per key is in flight at any time. Concurrent callers
//! for the same key receive clones of the same shared future; the producer
//! runs once per loading episode on the runtime's workers.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::runtime::Handle;

use crate::core::LoadError;

/// Shared handle to one in-flight (or finished) load
pub type LoadFuture<V> = Shared<BoxFuture<'static, Result<V, LoadError>>>;

type Registry<K, V> = Arc<Mutex<HashMap<K, LoadFuture<V>>>>;

/// Removes the in-flight entry when the load task finishes or unwinds
struct InFlightGuard<K: Eq + Hash, V> {
    registry: Registry<K, V>,
    key: K,
}

impl<K: Eq + Hash, V> Drop for InFlightGuard<K, V> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

/// "At most one in-flight load per key" primitive
pub struct DedupLoader<K, V> {
    /// Loads currently running, keyed by what they produce
    in_flight: Registry<K, V>,
    /// Runtime the producers are spawned on
    runtime: Handle,
}

impl<K, V> DedupLoader<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(runtime: Handle) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            runtime,
        }
    }

    /// Join the in-flight load for `key`, or start one with `producer`.
    ///
    /// `producer` is only called when nothing is in flight for `key`. It runs
    /// while the registry is locked, so it must only build the future and
    /// leave any work (including nested loads) to the future itself.
    pub fn load<F, Fut>(&self, key: K, producer: F) -> LoadFuture<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, LoadError>> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock();
        if let Some(pending) = in_flight.get(&key) {
            return pending.clone();
        }

        let guard = InFlightGuard {
            registry: Arc::clone(&self.in_flight),
            key: key.clone(),
        };
        let work = producer();
        let handle = self.runtime.spawn(async move {
            let _guard = guard;
            work.await
        });

        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(LoadError::from(e)),
            }
        }
        .boxed()
        .shared();

        in_flight.insert(key, future.clone());
        future
    }

    /// Check if a load for `key` is currently running
    pub fn is_pending(&self, key: &K) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    /// Get the number of loads currently running
    pub fn pending_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}
