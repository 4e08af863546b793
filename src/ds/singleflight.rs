//! Per-key coalescing of concurrent loads.
//!
//! A [`FlightGroup`] guarantees that for any key, at most one load closure
//! runs at a time within the process. Callers that arrive while a load for
//! the same key is in flight block until it finishes and receive a clone of
//! the same result, success or failure. The in-flight record is removed
//! once the result is published, so a later call starts a fresh load (there
//! is no result caching here; that is the cache's job).

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// An in-flight (or just-completed) call.
struct Call<T, E> {
    result: Mutex<Option<Result<T, E>>>,
    done: Condvar,
}

impl<T, E> Call<T, E> {
    fn new() -> Self {
        Call {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }
}

/// Deduplicates concurrent calls per key.
///
/// # Example
///
/// ```
/// use meshcache::ds::singleflight::FlightGroup;
///
/// let flight: FlightGroup<u32, String> = FlightGroup::new();
/// let value = flight.run("key", || Ok(42)).unwrap();
/// assert_eq!(value, 42);
/// ```
pub struct FlightGroup<T, E> {
    calls: Mutex<FxHashMap<String, Arc<Call<T, E>>>>,
}

impl<T, E> FlightGroup<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Creates an empty flight group.
    pub fn new() -> Self {
        FlightGroup {
            calls: Mutex::new(FxHashMap::default()),
        }
    }

    /// Runs `f` for `key`, or waits for the in-flight run of `f` for the
    /// same key and returns its result.
    ///
    /// Exactly one closure executes per in-flight window; every caller in
    /// that window observes the identical result.
    pub fn run<F>(&self, key: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let call = {
            let mut calls = self.calls.lock();
            if let Some(existing) = calls.get(key) {
                let existing = existing.clone();
                drop(calls);
                // Wait for the owner to publish.
                let mut slot = existing.result.lock();
                while slot.is_none() {
                    existing.done.wait(&mut slot);
                }
                return slot.as_ref().cloned().unwrap();
            }
            let call = Arc::new(Call::new());
            calls.insert(key.to_string(), call.clone());
            call
        };

        // This thread owns the flight.
        let result = f();

        {
            let mut slot = call.result.lock();
            *slot = Some(result.clone());
            call.done.notify_all();
        }
        // Remove after publishing: waiters holding the Arc still read the
        // result; new arrivals start a fresh flight.
        self.calls.lock().remove(key);

        result
    }
}

impl<T, E> Default for FlightGroup<T, E>
where
    T: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> std::fmt::Debug for FlightGroup<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightGroup")
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use crate::ds::singleflight::FlightGroup;

    #[test]
    fn single_caller_gets_result() {
        let flight: FlightGroup<String, String> = FlightGroup::new();
        let value = flight.run("k", || Ok("value".to_string())).unwrap();
        assert_eq!(value, "value");
    }

    #[test]
    fn errors_are_shared_not_cached() {
        let flight: FlightGroup<u32, String> = FlightGroup::new();
        let err = flight.run("k", || Err("boom".to_string())).unwrap_err();
        assert_eq!(err, "boom");

        // The failed flight was cleared; the next run executes again.
        let ok = flight.run("k", || Ok(1)).unwrap();
        assert_eq!(ok, 1);
    }

    #[test]
    fn concurrent_callers_share_one_execution() {
        let flight: Arc<FlightGroup<u64, String>> = Arc::new(FlightGroup::new());
        let executions = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let flight = flight.clone();
                let executions = executions.clone();
                let gate = gate.clone();
                thread::spawn(move || {
                    gate.wait();
                    flight.run("shared", || {
                        executions.fetch_add(1, Ordering::SeqCst);
                        // Hold the flight open so the others pile up on it.
                        thread::sleep(Duration::from_millis(50));
                        Ok(7)
                    })
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), 7);
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_keys_do_not_coalesce() {
        let flight: Arc<FlightGroup<String, String>> = Arc::new(FlightGroup::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let flight = flight.clone();
                let executions = executions.clone();
                thread::spawn(move || {
                    let key = format!("key-{i}");
                    flight.run(&key, || {
                        executions.fetch_add(1, Ordering::SeqCst);
                        Ok(key.clone())
                    })
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(executions.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn sequential_runs_execute_each_time() {
        let flight: FlightGroup<usize, String> = FlightGroup::new();
        let mut seen = 0;
        for i in 0..3 {
            seen = flight.run("k", || Ok(i)).unwrap();
        }
        assert_eq!(seen, 2);
    }
}
