//! Bulk operations over a group.
//!
//! `get_many` fans keys out over a bounded pool of worker threads, each key
//! under its own child timeout, and reports per-key results: one slow or
//! failing key never aborts the rest. `set_many` and `remove_many` are
//! plain loops; they are pure in-memory lock operations with no I/O worth
//! overlapping.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::byteview::ByteView;
use crate::context::Context;
use crate::error::GetError;
use crate::group::Group;
use crate::sink::AllocatingByteSliceSink;

/// Worker cap for `get_many`.
const DEFAULT_CONCURRENCY: usize = 100;

/// Per-key deadline within a batch.
const PER_KEY_TIMEOUT: Duration = Duration::from_secs(10);

impl Group {
    /// Fetches many keys concurrently.
    ///
    /// Returns the values that loaded and, separately, the per-key errors.
    /// Every key gets a child context bounded by a 10-second timeout (and
    /// by `ctx`, which cancels the whole batch).
    pub fn get_many(
        &self,
        ctx: &Context,
        keys: &[String],
    ) -> (FxHashMap<String, Vec<u8>>, FxHashMap<String, GetError>) {
        let values = Mutex::new(FxHashMap::default());
        let errors = Mutex::new(FxHashMap::default());
        if keys.is_empty() {
            return (values.into_inner(), errors.into_inner());
        }

        let next = AtomicUsize::new(0);
        let workers = keys.len().min(DEFAULT_CONCURRENCY);

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    if i >= keys.len() {
                        break;
                    }
                    let key = &keys[i];
                    let key_ctx = ctx.child_with_timeout(PER_KEY_TIMEOUT);

                    let mut out = Vec::new();
                    let mut sink = AllocatingByteSliceSink::new(&mut out);
                    match self.get(&key_ctx, key, &mut sink) {
                        Ok(()) => {
                            values.lock().insert(key.clone(), out);
                        }
                        Err(err) => {
                            errors.lock().insert(key.clone(), err);
                        }
                    }
                });
            }
        });

        (values.into_inner(), errors.into_inner())
    }

    /// Inserts many values directly into the main shard.
    pub fn set_many(&self, items: Vec<(String, ByteView)>) {
        for (key, value) in items {
            self.set(&key, value);
        }
    }

    /// Removes many keys from both shards. Best-effort; never errors.
    pub fn remove_many<S: AsRef<str>>(&self, keys: &[S]) {
        for key in keys {
            self.remove(key.as_ref());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::byteview::ByteView;
    use crate::context::Context;
    use crate::error::BoxError;
    use crate::group::new_group;
    use crate::sink::Sink;

    #[test]
    fn get_many_returns_values_and_errors_separately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let group = new_group(
            "unit-batch-get",
            1 << 20,
            move |_ctx: &Context, key: &str, dest: &mut dyn Sink| -> Result<(), BoxError> {
                counter.fetch_add(1, Ordering::SeqCst);
                if key.starts_with("bad") {
                    return Err("not found".into());
                }
                dest.set_string(&format!("v-{key}"))?;
                Ok(())
            },
        );

        let keys: Vec<String> = vec![
            "a".to_string(),
            "bad-1".to_string(),
            "b".to_string(),
            "bad-2".to_string(),
        ];
        let (values, errors) = group.get_many(&Context::background(), &keys);

        assert_eq!(values.len(), 2);
        assert_eq!(values["a"], b"v-a");
        assert_eq!(values["b"], b"v-b");
        assert_eq!(errors.len(), 2);
        assert!(errors.contains_key("bad-1"));
        assert!(errors.contains_key("bad-2"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn get_many_with_no_keys_is_empty() {
        let group = new_group(
            "unit-batch-empty",
            1 << 20,
            |_: &Context, _: &str, dest: &mut dyn Sink| -> Result<(), BoxError> {
                dest.set_string("x")?;
                Ok(())
            },
        );
        let (values, errors) = group.get_many(&Context::background(), &[]);
        assert!(values.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn set_many_then_remove_many() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let group = new_group(
            "unit-batch-set",
            1 << 20,
            move |_: &Context, key: &str, dest: &mut dyn Sink| -> Result<(), BoxError> {
                counter.fetch_add(1, Ordering::SeqCst);
                dest.set_string(&format!("origin-{key}"))?;
                Ok(())
            },
        );

        group.set_many(vec![
            ("k1".to_string(), ByteView::from("v1")),
            ("k2".to_string(), ByteView::from("v2")),
        ]);

        let keys = vec!["k1".to_string(), "k2".to_string()];
        let (values, errors) = group.get_many(&Context::background(), &keys);
        assert!(errors.is_empty());
        assert_eq!(values["k1"], b"v1");
        assert_eq!(values["k2"], b"v2");
        // Both were served from cache.
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        group.remove_many(&["k1", "k2"]);
        let (_, errors) = group.get_many(&Context::background(), &keys);
        assert!(errors.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
