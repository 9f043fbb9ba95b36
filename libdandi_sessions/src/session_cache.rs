use fxhash::FxHashMap;
use std::sync::{Arc, Mutex, OnceLock};

use super::error::SessionError;
use super::remote::StoreOpener;
use super::session::Session;

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Empty,
    Ready(Arc<Session>),
    /// Construction failed; the slot is dropped from the map and callers must fetch a new one
    Retired,
}

/// A slot is claimed by whoever constructs its session; everyone else waits on the slot lock
type Slot = Arc<Mutex<SlotState>>;

/// Memoizes constructed sessions by their exact source URL.
///
/// Construction is single-flight per key: concurrent requests for the same new URL wait for
/// one construction instead of racing. Entries live as long as the cache and are never
/// evicted. Failed constructions are not stored, so a later call retries.
#[derive(Debug, Default)]
pub struct SessionCache {
    slots: Mutex<FxHashMap<String, Slot>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Result<Slot, SessionError> {
        let mut slots = self.slots.lock().map_err(|_| SessionError::CachePoisoned)?;
        Ok(slots.entry(key.to_string()).or_default().clone())
    }

    /// Remove slot from the map, unless key was already given a fresh one
    fn retire(&self, key: &str, slot: &Slot) -> Result<(), SessionError> {
        let mut slots = self.slots.lock().map_err(|_| SessionError::CachePoisoned)?;
        if slots.get(key).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            slots.remove(key);
        }
        Ok(())
    }

    /// Return the cached session for key, or construct, store, and return one
    pub fn get_or_load<F>(&self, key: &str, construct: F) -> Result<Arc<Session>, SessionError>
    where
        F: Fn(&str) -> Result<Session, SessionError>,
    {
        loop {
            // The map lock is released here so other keys are not blocked by this construction
            let slot = self.slot(key)?;
            let mut state = slot.lock().map_err(|_| SessionError::CachePoisoned)?;
            let retired = match &*state {
                SlotState::Ready(session) => return Ok(session.clone()),
                SlotState::Retired => true,
                SlotState::Empty => false,
            };
            if retired {
                drop(state);
                self.retire(key, &slot)?;
                continue;
            }
            match construct(key) {
                Ok(session) => {
                    let session = Arc::new(session);
                    *state = SlotState::Ready(session.clone());
                    return Ok(session);
                }
                Err(e) => {
                    *state = SlotState::Retired;
                    // Never take the map lock while holding a slot lock
                    drop(state);
                    self.retire(key, &slot)?;
                    return Err(e);
                }
            }
        }
    }

    /// Number of constructed sessions
    pub fn len(&self) -> usize {
        match self.slots.lock() {
            Ok(slots) => slots
                .values()
                .filter(|slot| matches!(slot.lock().as_deref(), Ok(SlotState::Ready(_))))
                .count(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        match self.slots.lock() {
            Ok(slots) => slots
                .get(key)
                .is_some_and(|slot| matches!(slot.lock().as_deref(), Ok(SlotState::Ready(_)))),
            Err(_) => false,
        }
    }
}

static SESSION_CACHE: OnceLock<SessionCache> = OnceLock::new();

/// The process-wide session cache
pub fn global_cache() -> &'static SessionCache {
    SESSION_CACHE.get_or_init(SessionCache::new)
}

/// Load the session at nwb_url, reusing the process-wide cached instance when there is one
pub fn load_session(nwb_url: &str, opener: &StoreOpener) -> Result<Arc<Session>, SessionError> {
    global_cache().get_or_load(nwb_url, |url| Session::open(url, opener))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::synthetic_store;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn build(key: &str) -> Result<Session, SessionError> {
        Session::from_store(key, Arc::new(synthetic_store(2, &[], 3)))
    }

    #[test]
    fn test_same_url_returns_same_instance() {
        let cache = SessionCache::new();
        let first = cache.get_or_load("https://a.org/1", build).unwrap();
        let second = cache.get_or_load("https://a.org/1", build).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_different_urls_return_distinct_instances() {
        let cache = SessionCache::new();
        let first = cache.get_or_load("https://a.org/1", build).unwrap();
        let second = cache.get_or_load("https://a.org/2", build).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.get_source(), "https://a.org/2");
        assert!(cache.contains("https://a.org/1"));
        assert!(cache.contains("https://a.org/2"));
        assert!(!cache.contains("https://a.org/3"));
    }

    #[test]
    fn test_failures_are_not_cached() {
        let cache = SessionCache::new();
        let result = cache.get_or_load("https://a.org/1", |_| Err(SessionError::NoAcquisitions));
        assert!(matches!(result, Err(SessionError::NoAcquisitions)));
        assert!(cache.is_empty());
        assert!(cache.slots.lock().unwrap().is_empty());
        assert!(cache.get_or_load("https://a.org/1", build).is_ok());
        assert!(cache.contains("https://a.org/1"));
    }

    #[test]
    fn test_waiters_retry_after_a_failed_construction() {
        let cache = SessionCache::new();
        let attempts = AtomicUsize::new(0);
        let results: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        cache
                            .get_or_load("https://a.org/flaky", |key| {
                                std::thread::sleep(std::time::Duration::from_millis(10));
                                match attempts.fetch_add(1, Ordering::SeqCst) {
                                    0 => Err(SessionError::NoAcquisitions),
                                    _ => build(key),
                                }
                            })
                            .is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        // One caller sees the failure, the rest share the single successful construction
        assert_eq!(results.iter().filter(|ok| !**ok).count(), 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.slots.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_callers_construct_once() {
        let cache = SessionCache::new();
        let constructions = AtomicUsize::new(0);
        let sessions: Vec<Arc<Session>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        cache
                            .get_or_load("https://a.org/shared", |key| {
                                constructions.fetch_add(1, Ordering::SeqCst);
                                std::thread::sleep(std::time::Duration::from_millis(20));
                                build(key)
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    }

    #[test]
    fn test_global_cache_is_shared() {
        let first = global_cache()
            .get_or_load("memory://global-cache-test", build)
            .unwrap();
        let second = global_cache()
            .get_or_load("memory://global-cache-test", |_| Err(SessionError::NoAcquisitions))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
