//! Error types for the meshcache library.
//!
//! ## Key Components
//!
//! - [`GetError`]: Returned by `Group::get` and friends. Clonable so that a
//!   single failed load can be fanned out to every coalesced waiter.
//! - [`PeerError`]: Opaque transport failure reported by a remote peer.
//! - [`SinkError`]: Returned by [`Sink`](crate::sink::Sink) setters.
//! - [`WireError`]: Returned when decoding a peer message fails.
//!
//! Programming errors (duplicate group registration, double picker
//! registration) are not represented here; they panic at the point of
//! misuse.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Boxed error type used at the `Getter` boundary.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// GetError
// ---------------------------------------------------------------------------

/// Error returned by a cache lookup that had to load and failed.
///
/// All callers coalesced onto the same in-flight load observe the same
/// `GetError` value, so the origin failure is stored behind an `Arc`.
#[derive(Debug, Clone)]
pub enum GetError {
    /// The origin loader (the user-supplied `Getter`) failed.
    Origin(Arc<BoxError>),
    /// The sink rejected the loaded value.
    Sink(SinkError),
    /// The caller's context was canceled or its deadline passed before the
    /// load completed.
    Canceled,
}

impl GetError {
    /// Wraps an origin-load failure.
    #[inline]
    pub fn origin(err: impl Into<BoxError>) -> Self {
        GetError::Origin(Arc::new(err.into()))
    }

    /// Returns `true` for cancellation/deadline errors.
    #[inline]
    pub fn is_canceled(&self) -> bool {
        matches!(self, GetError::Canceled)
    }
}

impl fmt::Display for GetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GetError::Origin(err) => write!(f, "origin load failed: {err}"),
            GetError::Sink(err) => write!(f, "sink rejected value: {err}"),
            GetError::Canceled => f.write_str("context canceled"),
        }
    }
}

impl Error for GetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            GetError::Origin(err) => Some(err.as_ref().as_ref()),
            GetError::Sink(err) => Some(err),
            GetError::Canceled => None,
        }
    }
}

// ---------------------------------------------------------------------------
// PeerError
// ---------------------------------------------------------------------------

/// Opaque transport-level failure from a remote peer.
///
/// The group never inspects the contents; a peer failure is counted and the
/// load falls back to the origin within the same flight window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerError(String);

impl PeerError {
    /// Creates a new `PeerError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for PeerError {}

// ---------------------------------------------------------------------------
// SinkError
// ---------------------------------------------------------------------------

/// Error produced by a [`Sink`](crate::sink::Sink) setter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkError(String);

impl SinkError {
    /// Creates a new `SinkError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for SinkError {}

impl From<WireError> for SinkError {
    fn from(err: WireError) -> Self {
        SinkError::new(err.message())
    }
}

// ---------------------------------------------------------------------------
// WireError
// ---------------------------------------------------------------------------

/// Error produced while decoding a peer protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireError(String);

impl WireError {
    /// Creates a new `WireError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for WireError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
