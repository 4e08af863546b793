//! Cancellation contexts for load operations.
//!
//! A [`Context`] is a clonable token passed down through `Group::get` into
//! the user `Getter` and remote peer calls. Loaders must check it at their
//! own blocking points; the group checks it around the load and converts a
//! trip into [`GetError::Canceled`](crate::error::GetError::Canceled) for
//! every coalesced waiter in the same flight window. No cache admission
//! happens for a canceled load.
//!
//! Contexts form a chain: a child derived with
//! [`child_with_timeout`](Context::child_with_timeout) is canceled when its
//! own deadline passes or when any ancestor is canceled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::GetError;

#[derive(Debug)]
struct Shared {
    canceled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<Arc<Shared>>,
}

impl Shared {
    fn tripped(&self) -> bool {
        if self.canceled.load(Ordering::Acquire) {
            return true;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        match &self.parent {
            Some(parent) => parent.tripped(),
            None => false,
        }
    }
}

/// A cancellation token with an optional deadline.
///
/// The default context ([`Context::background`]) never cancels.
///
/// # Example
///
/// ```
/// use meshcache::Context;
///
/// let (ctx, cancel) = Context::with_cancel();
/// assert!(!ctx.is_canceled());
/// cancel.cancel();
/// assert!(ctx.is_canceled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    inner: Option<Arc<Shared>>,
}

impl Context {
    /// Returns a context that is never canceled.
    #[inline]
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a context together with a handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let shared = Arc::new(Shared {
            canceled: AtomicBool::new(false),
            deadline: None,
            parent: None,
        });
        (
            Context {
                inner: Some(shared.clone()),
            },
            CancelHandle { shared },
        )
    }

    /// Returns a context that cancels itself after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Context {
            inner: Some(Arc::new(Shared {
                canceled: AtomicBool::new(false),
                deadline: Some(Instant::now() + timeout),
                parent: None,
            })),
        }
    }

    /// Derives a child that cancels after `timeout` or when `self` cancels,
    /// whichever comes first.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Context {
            inner: Some(Arc::new(Shared {
                canceled: AtomicBool::new(false),
                deadline: Some(Instant::now() + timeout),
                parent: self.inner.clone(),
            })),
        }
    }

    /// Returns `true` once the context has been canceled or its deadline
    /// (or any ancestor's) has passed.
    pub fn is_canceled(&self) -> bool {
        match &self.inner {
            Some(shared) => shared.tripped(),
            None => false,
        }
    }

    /// Returns the cancellation error if the context has tripped.
    pub fn error(&self) -> Option<GetError> {
        if self.is_canceled() {
            Some(GetError::Canceled)
        } else {
            None
        }
    }
}

/// Cancels the [`Context`] it was created with.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl CancelHandle {
    /// Cancels the associated context. Idempotent.
    pub fn cancel(&self) {
        self.shared.canceled.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
