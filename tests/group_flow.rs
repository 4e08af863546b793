//! End-to-end lookup-path scenarios for `Group`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use meshcache::{
    new_group, ByteView, ByteViewSink, BoxError, CacheKind, Context, PeerError, PeerPicker,
    RemotePeer, Sink, StringSink,
};
use meshcache::wire::{GetRequest, GetResponse};

/// Getter over a fixed color table, counting origin invocations.
fn color_getter(
    calls: Arc<AtomicUsize>,
) -> impl Fn(&Context, &str, &mut dyn Sink) -> Result<(), BoxError> + Send + Sync {
    move |_ctx: &Context, key: &str, dest: &mut dyn Sink| -> Result<(), BoxError> {
        calls.fetch_add(1, Ordering::SeqCst);
        match key {
            "red" => dest.set_string("#FF0000")?,
            "green" => dest.set_string("#00FF00")?,
            other => return Err(format!("no such color: {other}").into()),
        }
        Ok(())
    }
}

#[test]
fn single_node_miss_then_hit() {
    let calls = Arc::new(AtomicUsize::new(0));
    let group = new_group("colors", 1 << 20, color_getter(calls.clone()));
    let ctx = Context::background();

    let mut out = String::new();
    group
        .get(&ctx, "red", &mut StringSink::new(&mut out))
        .unwrap();
    assert_eq!(out, "#FF0000");

    let stats = group.stats();
    assert_eq!(stats.gets, 1);
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(stats.local_loads, 1);

    let mut out = String::new();
    group
        .get(&ctx, "red", &mut StringSink::new(&mut out))
        .unwrap();
    assert_eq!(out, "#FF0000");

    let stats = group.stats();
    assert_eq!(stats.gets, 2);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.local_loads, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_gets_dedupe_to_one_origin_load() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let group = new_group(
        "dedup",
        1 << 20,
        move |_ctx: &Context, _key: &str, dest: &mut dyn Sink| -> Result<(), BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            // Stay in flight long enough for every thread to pile up.
            thread::sleep(Duration::from_millis(100));
            dest.set_string("#FF0000")?;
            Ok(())
        },
    );

    let threads = 100;
    let gate = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let group = group.clone();
            let gate = gate.clone();
            thread::spawn(move || {
                gate.wait();
                let mut out = String::new();
                group
                    .get(&Context::background(), "red", &mut StringSink::new(&mut out))
                    .unwrap();
                out
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), "#FF0000");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(group.stats().loads_deduped, 1);
    assert_eq!(group.stats().local_loads, 1);
}

#[test]
fn missing_key_is_not_negatively_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let group = new_group("missing", 1 << 20, color_getter(calls.clone()));
    let ctx = Context::background();

    for attempt in 1..=2 {
        let mut out = String::new();
        let err = group
            .get(&ctx, "purple", &mut StringSink::new(&mut out))
            .unwrap_err();
        assert!(err.to_string().contains("no such color"));
        assert!(out.is_empty(), "sink populated on error");
        assert_eq!(calls.load(Ordering::SeqCst), attempt);
    }
    assert_eq!(group.stats().local_load_errs, 2);
}

#[test]
fn eviction_keeps_total_within_budget() {
    // Each entry costs 2 (key) + 14 (value) = 16 bytes; budget fits two.
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let group = new_group(
        "budget32",
        32,
        move |_ctx: &Context, _key: &str, dest: &mut dyn Sink| -> Result<(), BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            dest.set_bytes(&[0u8; 14])?;
            Ok(())
        },
    );
    let ctx = Context::background();

    for key in ["k1", "k2", "k3"] {
        let mut view = ByteView::new();
        group
            .get(&ctx, key, &mut ByteViewSink::new(&mut view))
            .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let total = group.cache_stats(CacheKind::Main).bytes + group.cache_stats(CacheKind::Hot).bytes;
    assert!(total <= 32, "cache exceeds budget: {total}");

    // k2 and k3 survived; k1 (the oldest single-access key) was evicted.
    let mut view = ByteView::new();
    group
        .get(&ctx, "k2", &mut ByteViewSink::new(&mut view))
        .unwrap();
    group
        .get(&ctx, "k3", &mut ByteViewSink::new(&mut view))
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3, "k2/k3 should be cache hits");

    group
        .get(&ctx, "k1", &mut ByteViewSink::new(&mut view))
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4, "k1 should have been evicted");
}

#[test]
fn warm_keys_survive_a_sequential_scan() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    // Budget fits roughly four 30-byte entries.
    let group = new_group(
        "scan",
        128,
        move |_ctx: &Context, _key: &str, dest: &mut dyn Sink| -> Result<(), BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            dest.set_bytes(&[7u8; 24])?;
            Ok(())
        },
    );
    let ctx = Context::background();

    // Two accesses make "hot" resident.
    let mut view = ByteView::new();
    group
        .get(&ctx, "hot", &mut ByteViewSink::new(&mut view))
        .unwrap();
    group
        .get(&ctx, "hot", &mut ByteViewSink::new(&mut view))
        .unwrap();
    let after_warmup = calls.load(Ordering::SeqCst);
    assert_eq!(after_warmup, 1);

    // One-shot scan over 26 keys, each far larger than the budget allows
    // to keep simultaneously.
    for c in b'a'..=b'z' {
        let key = format!("scan-{}", c as char);
        group
            .get(&ctx, &key, &mut ByteViewSink::new(&mut view))
            .unwrap();
    }

    // The scan never displaced the resident key.
    group
        .get(&ctx, "hot", &mut ByteViewSink::new(&mut view))
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), after_warmup + 26);
}

// ---------------------------------------------------------------------------
// Two-node scenarios with a pinned peer
// ---------------------------------------------------------------------------

/// Peer stub that always owns every key and serves a fixed value.
struct PinnedPeer {
    calls: AtomicUsize,
    value: &'static [u8],
}

impl RemotePeer for PinnedPeer {
    fn get(&self, _ctx: &Context, _req: &GetRequest) -> Result<GetResponse, PeerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GetResponse {
            value: bytes::Bytes::from_static(self.value),
        })
    }
}

struct PinnedPicker {
    peer: Arc<PinnedPeer>,
}

impl PeerPicker for PinnedPicker {
    fn pick_peer(&self, _key: &str) -> Option<Arc<dyn RemotePeer>> {
        Some(self.peer.clone())
    }
}

#[test]
fn hot_keys_get_replicated_from_their_remote_owner() {
    let group = new_group(
        "hotrep",
        1 << 20,
        |_: &Context, _: &str, _: &mut dyn Sink| -> Result<(), BoxError> {
            panic!("origin must not be consulted while the peer answers")
        },
    );
    let peer = Arc::new(PinnedPeer {
        calls: AtomicUsize::new(0),
        value: b"#REMOTE",
    });
    group.register_peer_picker(Arc::new(PinnedPicker { peer: peer.clone() }));

    let ctx = Context::background();
    // Drive the key well past the sketch's hotness threshold (10).
    for _ in 0..15 {
        let mut view = ByteView::new();
        group
            .get(&ctx, "x", &mut ByteViewSink::new(&mut view))
            .unwrap();
        assert_eq!(view, "#REMOTE");
    }

    let fetched_during_warmup = peer.calls.load(Ordering::SeqCst);
    assert!(fetched_during_warmup >= 1);
    assert!(
        group.cache_stats(CacheKind::Hot).items >= 1,
        "hot shard never received the replica"
    );

    // Once replicated, lookups are satisfied locally.
    for _ in 0..5 {
        let mut view = ByteView::new();
        group
            .get(&ctx, "x", &mut ByteViewSink::new(&mut view))
            .unwrap();
        assert_eq!(view, "#REMOTE");
    }
    assert_eq!(peer.calls.load(Ordering::SeqCst), fetched_during_warmup);
    assert!(group.stats().peer_loads >= 1);
}

/// Peer that always fails, forcing the origin fallback.
struct FailingPeer;

impl RemotePeer for FailingPeer {
    fn get(&self, _ctx: &Context, _req: &GetRequest) -> Result<GetResponse, PeerError> {
        Err(PeerError::new("connection refused"))
    }
}

struct FailingPicker;

impl PeerPicker for FailingPicker {
    fn pick_peer(&self, _key: &str) -> Option<Arc<dyn RemotePeer>> {
        Some(Arc::new(FailingPeer))
    }
}

#[test]
fn peer_errors_degrade_to_origin_loads() {
    let calls = Arc::new(AtomicUsize::new(0));
    let group = new_group("peerfail", 1 << 20, color_getter(calls.clone()));
    group.register_peer_picker(Arc::new(FailingPicker));

    let mut out = String::new();
    group
        .get(&Context::background(), "red", &mut StringSink::new(&mut out))
        .unwrap();
    assert_eq!(out, "#FF0000");

    let stats = group.stats();
    assert_eq!(stats.peer_errors, 1);
    assert_eq!(stats.peer_loads, 0);
    assert_eq!(stats.local_loads, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn canceled_load_fails_every_waiter_then_recovers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let group = new_group(
        "cancel-flight",
        1 << 20,
        move |ctx: &Context, _key: &str, dest: &mut dyn Sink| -> Result<(), BoxError> {
            counter.fetch_add(1, Ordering::SeqCst);
            // Simulate a slow origin that honors cancellation.
            for _ in 0..50 {
                if ctx.is_canceled() {
                    return Err("load interrupted".into());
                }
                thread::sleep(Duration::from_millis(10));
            }
            dest.set_string("late")?;
            Ok(())
        },
    );

    let (ctx, cancel) = Context::with_cancel();
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let group = group.clone();
            let ctx = ctx.clone();
            thread::spawn(move || {
                let mut out = String::new();
                group.get(&ctx, "slow", &mut StringSink::new(&mut out))
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    cancel.cancel();

    for waiter in waiters {
        let result = waiter.join().unwrap();
        assert!(result.is_err(), "canceled load must fail its waiters");
    }
    // One coalesced attempt ran; nothing was admitted.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(group.cache_stats(CacheKind::Main).items, 0);

    // A later call starts a fresh, successful attempt.
    let quick = new_group(
        "cancel-flight-2",
        1 << 20,
        |_: &Context, _: &str, dest: &mut dyn Sink| -> Result<(), BoxError> {
            dest.set_string("fresh")?;
            Ok(())
        },
    );
    let mut out = String::new();
    quick
        .get(&Context::background(), "slow", &mut StringSink::new(&mut out))
        .unwrap();
    assert_eq!(out, "fresh");
}
