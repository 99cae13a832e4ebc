//! Read-through cache keyed by file path.
//!
//! Datasets and configuration files are read at most once per cache
//! lifetime. Values are handed out behind `Arc` so callers cannot mutate a
//! cached table that a later caller will receive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Memoizes loads of `T` by path.
#[derive(Debug)]
pub struct ReadCache<T> {
    entries: Mutex<HashMap<PathBuf, Arc<T>>>,
    loads: AtomicUsize,
}

impl<T> ReadCache<T> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Return the cached value for `path`, running `load` only on a miss.
    ///
    /// A failed load is not cached, so the next call retries it.
    pub fn get_or_try_load<E, F>(&self, path: &Path, load: F) -> Result<Arc<T>, E>
    where
        F: FnOnce(&Path) -> Result<T, E>,
    {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(value) = entries.get(path) {
            tracing::debug!(path = %path.display(), "read cache hit");
            return Ok(Arc::clone(value));
        }

        tracing::debug!(path = %path.display(), "read cache miss");
        let value = Arc::new(load(path)?);
        self.loads.fetch_add(1, Ordering::Relaxed);
        entries.insert(path.to_path_buf(), Arc::clone(&value));
        Ok(value)
    }

    /// Number of loads that actually ran (cache misses that succeeded).
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl<T> Default for ReadCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
