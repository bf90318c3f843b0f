//! Memoizing layer over the Epidata client.
//!
//! Persists responses as a single JSON map keyed by request fingerprint, so
//! repeated runs over the same training window never refetch. Writes are
//! debounced to at most one per window (two seconds unless configured
//! otherwise) to bound I/O cost under bursty request patterns.

use std::collections::HashMap;
use std::fs;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::cache::{fingerprint, CacheLocation};
use crate::client::{ApiResponse, CovidcastRequest, EpidataClient};
use crate::Result;

/// Default minimum wall-clock gap between two physical writes of the
/// backing file, used by [`ResponseCache::new`]. See
/// `CacheConfig::persist_debounce_secs` for the config knob.
pub const PERSIST_DEBOUNCE: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
struct CacheState {
    map: HashMap<String, ApiResponse>,
    loaded: bool,
    dirty: bool,
    last_persist: Option<Instant>,
}

/// Request memoization wrapped around any [`EpidataClient`].
///
/// The cache is itself an `EpidataClient`, so the orchestrator hands it to
/// the ensemble builder in place of the raw HTTP client for the duration of
/// one run. The backing file is loaded lazily on first use and the load is
/// fail-open: a missing or corrupt file starts the run with an empty map
/// rather than failing the caller. Failure envelopes from the API are cached
/// like successes; transport errors propagate uncached.
pub struct ResponseCache<'a> {
    inner: &'a dyn EpidataClient,
    location: CacheLocation,
    debounce: Duration,
    state: Mutex<CacheState>,
}

impl<'a> ResponseCache<'a> {
    pub fn new(inner: &'a dyn EpidataClient, location: CacheLocation) -> Self {
        Self::with_debounce(inner, location, PERSIST_DEBOUNCE)
    }

    /// Like [`Self::new`] with an explicit debounce window. Zero disables
    /// debouncing and writes on every new entry.
    pub fn with_debounce(
        inner: &'a dyn EpidataClient,
        location: CacheLocation,
        debounce: Duration,
    ) -> Self {
        Self { inner, location, debounce, state: Mutex::new(CacheState::default()) }
    }

    /// Number of cached responses currently in memory.
    pub fn len(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        self.load(&mut state);
        state.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the in-memory map to disk now, ignoring the debounce window.
    ///
    /// Called at the end of a run so entries fetched inside the final
    /// debounce window are not lost. A write failure downgrades the cache to
    /// a no-op for the next run; it never fails the pipeline.
    pub fn flush(&self) {
        // A client panic inside `fetch` poisons the lock, and flush then
        // runs again from Drop during unwinding. A second panic there would
        // abort, so recover the guard; the map itself is never left half
        // updated (inserts happen only after the inner call returns).
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.dirty {
            self.write(&mut state);
        }
    }

    fn load(&self, state: &mut CacheState) {
        if state.loaded {
            return;
        }
        state.loaded = true;
        // The fail-open policy lives here and only here: any read error
        // means "start empty".
        match self.read_backing_file() {
            Ok(map) => {
                log::debug!(
                    "loaded {} cached responses from {}",
                    map.len(),
                    self.location.path().display()
                );
                state.map = map;
            }
            Err(e) => {
                log::debug!(
                    "starting with empty response cache ({}): {e}",
                    self.location.path().display()
                );
            }
        }
    }

    fn read_backing_file(&self) -> Result<HashMap<String, ApiResponse>> {
        let content = fs::read_to_string(self.location.path())?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Debounced persist: at most one physical write per debounce window.
    fn persist(&self, state: &mut CacheState) {
        if let Some(last) = state.last_persist {
            if last.elapsed() < self.debounce {
                return;
            }
        }
        self.write(state);
    }

    fn write(&self, state: &mut CacheState) {
        // The window opens even if the write fails, so a persistently broken
        // disk does not turn every request into a write attempt.
        state.last_persist = Some(Instant::now());
        if let Err(e) = self.write_backing_file(&state.map) {
            log::warn!(
                "failed to persist response cache {}: {e}",
                self.location.path().display()
            );
        } else {
            log::debug!(
                "persisted {} responses to {}",
                state.map.len(),
                self.location.path().display()
            );
            state.dirty = false;
        }
    }

    fn write_backing_file(&self, map: &HashMap<String, ApiResponse>) -> Result<()> {
        self.location.ensure_dir()?;
        fs::write(self.location.path(), serde_json::to_string(map)?)?;
        Ok(())
    }
}

impl EpidataClient for ResponseCache<'_> {
    fn fetch(&self, request: &CovidcastRequest) -> Result<ApiResponse> {
        let key = fingerprint(request)?;
        let mut state = self.state.lock().unwrap();
        self.load(&mut state);
        if let Some(cached) = state.map.get(&key) {
            log::trace!("response cache hit {key}");
            return Ok(cached.clone());
        }
        let response = self.inner.fetch(request)?;
        state.map.insert(key, response.clone());
        state.dirty = true;
        self.persist(&mut state);
        Ok(response)
    }
}

impl Drop for ResponseCache<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}
