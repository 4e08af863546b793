//! Write-once targets used by a `Getter` to deliver a value.
//!
//! A [`Sink`] receives the value produced for a key (from the origin
//! loader, a remote peer, or the local cache) in whichever shape the caller
//! wants it: a `String`, an owned byte vector, a truncated byte prefix, a
//! decoded peer message, or a [`ByteView`] directly. Every sink also exposes
//! the frozen [`ByteView`] of whatever was set, which is what the cache
//! admits.
//!
//! [`Sink::set_view`] is the zero-copy fast path: sinks that can accept a
//! shared view (like [`ByteViewSink`] and [`AllocatingByteSliceSink`])
//! override it; everything else falls back to a byte copy.

use crate::byteview::ByteView;
use crate::error::SinkError;
use crate::wire;

/// Receives the value of a `get` call.
///
/// A `Getter` must call exactly one of the setters on success. Calling a
/// setter replaces any previously set value.
pub trait Sink {
    /// Sets the value to the given string.
    fn set_string(&mut self, s: &str) -> Result<(), SinkError>;

    /// Sets the value to a copy of `b`.
    fn set_bytes(&mut self, b: &[u8]) -> Result<(), SinkError>;

    /// Sets the value to the wire encoding of `m`.
    fn set_proto(&mut self, m: &dyn wire::Message) -> Result<(), SinkError>;

    /// Sets the value from a shared view without copying where possible.
    ///
    /// The default implementation copies via [`set_bytes`](Sink::set_bytes).
    fn set_view(&mut self, v: ByteView) -> Result<(), SinkError> {
        self.set_bytes(v.as_slice())
    }

    /// Returns the frozen view of the value set so far.
    ///
    /// Used by the cache to extract the value for admission after the
    /// `Getter` returns.
    fn view(&self) -> Result<ByteView, SinkError>;
}

// ---------------------------------------------------------------------------
// StringSink
// ---------------------------------------------------------------------------

/// Sink that populates a caller-provided `String`.
///
/// Values that are not valid UTF-8 are rejected with a [`SinkError`].
pub struct StringSink<'a> {
    dst: &'a mut String,
    v: ByteView,
}

impl<'a> StringSink<'a> {
    /// Creates a sink writing into `dst`.
    pub fn new(dst: &'a mut String) -> Self {
        Self {
            dst,
            v: ByteView::new(),
        }
    }
}

impl Sink for StringSink<'_> {
    fn set_string(&mut self, s: &str) -> Result<(), SinkError> {
        self.v = ByteView::from(s);
        *self.dst = s.to_string();
        Ok(())
    }

    fn set_bytes(&mut self, b: &[u8]) -> Result<(), SinkError> {
        let s = std::str::from_utf8(b)
            .map_err(|_| SinkError::new("string sink requires UTF-8 value"))?;
        self.set_string(s)
    }

    fn set_proto(&mut self, m: &dyn wire::Message) -> Result<(), SinkError> {
        let buf = m.encode_to_vec();
        self.set_bytes(&buf)
    }

    fn view(&self) -> Result<ByteView, SinkError> {
        Ok(self.v.clone())
    }
}

// ---------------------------------------------------------------------------
// ByteViewSink
// ---------------------------------------------------------------------------

/// Sink that populates a caller-provided [`ByteView`]; the zero-copy path.
pub struct ByteViewSink<'a> {
    dst: &'a mut ByteView,
}

impl<'a> ByteViewSink<'a> {
    /// Creates a sink writing into `dst`.
    pub fn new(dst: &'a mut ByteView) -> Self {
        Self { dst }
    }
}

impl Sink for ByteViewSink<'_> {
    fn set_string(&mut self, s: &str) -> Result<(), SinkError> {
        *self.dst = ByteView::from(s);
        Ok(())
    }

    fn set_bytes(&mut self, b: &[u8]) -> Result<(), SinkError> {
        *self.dst = ByteView::from(b);
        Ok(())
    }

    fn set_proto(&mut self, m: &dyn wire::Message) -> Result<(), SinkError> {
        *self.dst = ByteView::from(m.encode_to_vec());
        Ok(())
    }

    fn set_view(&mut self, v: ByteView) -> Result<(), SinkError> {
        *self.dst = v;
        Ok(())
    }

    fn view(&self) -> Result<ByteView, SinkError> {
        Ok(self.dst.clone())
    }
}

// ---------------------------------------------------------------------------
// AllocatingByteSliceSink
// ---------------------------------------------------------------------------

/// Sink that fills a caller-provided `Vec<u8>` with an owned copy.
pub struct AllocatingByteSliceSink<'a> {
    dst: &'a mut Vec<u8>,
    v: ByteView,
}

impl<'a> AllocatingByteSliceSink<'a> {
    /// Creates a sink writing into `dst`.
    pub fn new(dst: &'a mut Vec<u8>) -> Self {
        Self {
            dst,
            v: ByteView::new(),
        }
    }
}

impl Sink for AllocatingByteSliceSink<'_> {
    fn set_string(&mut self, s: &str) -> Result<(), SinkError> {
        self.set_bytes(s.as_bytes())
    }

    fn set_bytes(&mut self, b: &[u8]) -> Result<(), SinkError> {
        self.v = ByteView::from(b);
        *self.dst = b.to_vec();
        Ok(())
    }

    fn set_proto(&mut self, m: &dyn wire::Message) -> Result<(), SinkError> {
        let buf = m.encode_to_vec();
        *self.dst = buf.clone();
        self.v = ByteView::from(buf);
        Ok(())
    }

    // The caller gets its own copy; the cache keeps the shared view.
    fn set_view(&mut self, v: ByteView) -> Result<(), SinkError> {
        *self.dst = v.to_vec();
        self.v = v;
        Ok(())
    }

    fn view(&self) -> Result<ByteView, SinkError> {
        Ok(self.v.clone())
    }
}

// ---------------------------------------------------------------------------
// TruncatingByteSliceSink
// ---------------------------------------------------------------------------

/// Sink that writes at most the destination's current length and shrinks it
/// to the number of bytes actually written.
pub struct TruncatingByteSliceSink<'a> {
    dst: &'a mut Vec<u8>,
    v: ByteView,
}

impl<'a> TruncatingByteSliceSink<'a> {
    /// Creates a sink writing into the first `dst.len()` bytes of `dst`.
    pub fn new(dst: &'a mut Vec<u8>) -> Self {
        Self {
            dst,
            v: ByteView::new(),
        }
    }
}

impl Sink for TruncatingByteSliceSink<'_> {
    fn set_string(&mut self, s: &str) -> Result<(), SinkError> {
        self.set_bytes(s.as_bytes())
    }

    fn set_bytes(&mut self, b: &[u8]) -> Result<(), SinkError> {
        self.v = ByteView::from(b);
        let n = self.v.copy_to(self.dst);
        self.dst.truncate(n);
        Ok(())
    }

    fn set_proto(&mut self, m: &dyn wire::Message) -> Result<(), SinkError> {
        let buf = m.encode_to_vec();
        self.set_bytes(&buf)
    }

    fn view(&self) -> Result<ByteView, SinkError> {
        Ok(self.v.clone())
    }
}

// ---------------------------------------------------------------------------
// ProtoSink
// ---------------------------------------------------------------------------

/// Sink that decodes the value into a caller-provided wire message.
pub struct ProtoSink<'a, M> {
    dst: &'a mut M,
    v: ByteView,
}

impl<'a, M> ProtoSink<'a, M>
where
    M: wire::Message + Default,
{
    /// Creates a sink decoding into `dst`.
    pub fn new(dst: &'a mut M) -> Self {
        Self {
            dst,
            v: ByteView::new(),
        }
    }
}

impl<M> Sink for ProtoSink<'_, M>
where
    M: wire::Message + Default,
{
    fn set_string(&mut self, s: &str) -> Result<(), SinkError> {
        self.set_bytes(s.as_bytes())
    }

    fn set_bytes(&mut self, b: &[u8]) -> Result<(), SinkError> {
        *self.dst = M::decode(b)?;
        self.v = ByteView::from(b);
        Ok(())
    }

    fn set_proto(&mut self, m: &dyn wire::Message) -> Result<(), SinkError> {
        let buf = m.encode_to_vec();
        *self.dst = M::decode(&buf)?;
        self.v = ByteView::from(buf);
        Ok(())
    }

    fn view(&self) -> Result<ByteView, SinkError> {
        Ok(self.v.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
