//! Per-evaluation memoization of backend queries.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::trace;

use super::{BackendError, QueryRequest, RawSeries};

/// Deterministic identity of a query: backend name plus the resolved request
/// (absolute times, sorted tags, options).
#[derive(Debug, Clone, Serialize)]
pub struct CacheKey<'a> {
    pub backend: &'a str,
    pub request: &'a QueryRequest,
}

impl<'a> CacheKey<'a> {
    pub fn new(backend: &'a str, request: &'a QueryRequest) -> Self {
        CacheKey { backend, request }
    }

    pub fn encode(&self) -> Result<String, BackendError> {
        serde_json::to_string(self).map_err(|e| BackendError::InvalidQuery {
            query: self.request.to_string(),
            message: e.to_string(),
        })
    }
}

type Slot<V> = Arc<OnceLock<Result<V, BackendError>>>;

/// Computes each key at most once for the lifetime of the cache.
///
/// Concurrent callers of the same key block until the first compute finishes
/// and then share its outcome, errors included.
pub struct Cache<V = Vec<RawSeries>> {
    slots: Mutex<HashMap<String, Slot<V>>>,
}

impl<V> Default for Cache<V> {
    fn default() -> Self {
        Cache {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> Cache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`, running `compute` only if no caller has
    /// yet. The flag is true when the value came from the cache.
    pub fn get<F>(&self, key: &str, compute: F) -> (Result<V, BackendError>, bool)
    where
        F: FnOnce() -> Result<V, BackendError>,
    {
        let slot = {
            let mut slots = self.slots.lock();
            slots.entry(key.to_string()).or_default().clone()
        };

        let mut computed = false;
        let value = slot
            .get_or_init(|| {
                computed = true;
                compute()
            })
            .clone();
        trace!(key, hit = !computed, "cache lookup");
        (value, !computed)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
