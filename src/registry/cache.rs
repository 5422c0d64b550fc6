//! Request Cache (C3): process-scoped memoization of C1/C2 responses,
//! doubling as the fan-out coalescer for concurrent registry I/O.
//!
//! Modeled as a mapping from key to a future-like handle that subsequent
//! lookups join, per the cache-as-concurrency-primitive design note: an
//! in-flight fill is represented by a `tokio::sync::broadcast` sender that
//! later lookups subscribe to instead of issuing a second request.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

use crate::utils::error::PmtError;

/// A cache key: an operation name plus its arguments, joined the same way
/// across lookups and fills.
pub type CacheKey = String;

enum Slot<V> {
    Filling(broadcast::Sender<Result<V, String>>),
    Ready(V),
}

/// Process-scoped memoization layer in front of C1/C2.
///
/// Safe for concurrent readers; serializes concurrent fills of the same
/// key so a fan-out of bundle inspections never issues the same network
/// call twice. Values are cloned out on read so callers cannot mutate the
/// cached copy; there is no eviction and no persistence across
/// invocations.
pub struct RequestCache<V> {
    slots: Mutex<HashMap<CacheKey, Slot<V>>>,
}

impl<V> Default for RequestCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RequestCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `key`, computing it with `fill` if
    /// absent. Concurrent callers for the same key join the single
    /// in-flight fill rather than issuing their own.
    pub async fn get_or_fill<F, Fut>(&self, key: CacheKey, fill: F) -> Result<V, PmtError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<V, PmtError>>,
    {
        let mut receiver = {
            let mut slots = self.slots.lock().await;
            match slots.get(&key) {
                Some(Slot::Ready(value)) => return Ok(value.clone()),
                Some(Slot::Filling(sender)) => Some(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    slots.insert(key.clone(), Slot::Filling(sender));
                    None
                }
            }
        };

        if let Some(receiver) = receiver.as_mut() {
            return join_inflight(receiver).await;
        }

        let result = fill().await;
        let mut slots = self.slots.lock().await;
        let Some(Slot::Filling(sender)) = slots.remove(&key) else {
            unreachable!("slot must still be Filling: only the filler removes it");
        };

        match &result {
            Ok(value) => {
                slots.insert(key, Slot::Ready(value.clone()));
                let _ = sender.send(Ok(value.clone()));
            }
            Err(err) => {
                // Failed fills are not cached: a transient registry error
                // should not poison subsequent lookups for the process
                // lifetime.
                let _ = sender.send(Err(err.to_string()));
            }
        }

        result
    }
}

async fn join_inflight<V: Clone>(
    receiver: &mut broadcast::Receiver<Result<V, String>>,
) -> Result<V, PmtError> {
    match receiver.recv().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(message)) => Err(PmtError::registry_unavailable(message)),
        Err(_) => Err(PmtError::registry_unavailable(
            "in-flight registry request was dropped before completing",
        )),
    }
}

/// Builds the cache key for a given operation name and arguments, keeping
/// key construction in one place so callers can't accidentally collide two
/// different operations.
#[must_use]
pub fn key(operation: &str, args: &[&str]) -> CacheKey {
    let mut key = String::from(operation);
    for arg in args {
        key.push('\u{1f}');
        key.push_str(arg);
    }
    key
}

/// Shared handle to a [`RequestCache`], threaded through the resolver and
/// its bounded fan-out.
pub type SharedCache<V> = Arc<RequestCache<V>>;
