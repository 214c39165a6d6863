//! Request/response instrumentation wrappers.
//!
//! `CountedBody` decorates the inbound body and tracks how many bytes the
//! downstream consumer actually read. `ResponseRecord` is the shared
//! side-channel capturing the first finalized status code and the bytes
//! written for one request; `RecordingBody` feeds it while the relayed
//! response streams out and fires an exactly-once completion hook when the
//! stream finishes (or is dropped by a disconnecting client).
use std::{
    pin::Pin,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use axum::body::Body;
use bytes::Bytes;
use http::StatusCode;
use http_body::{Body as HttpBody, Frame, SizeHint};

/// Shared cumulative byte counter for a wrapped body.
#[derive(Debug, Clone, Default)]
pub struct BodyCounter(Arc<AtomicU64>);

impl BodyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes observed so far. Equals the total body size once the body has
    /// been fully drained or closed.
    pub fn num_bytes(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::AcqRel);
    }
}

/// Byte-counting decorator around the inbound request body.
///
/// Owns the original body exclusively for the request's lifetime and counts
/// every data frame the downstream consumer pulls through it.
pub struct CountedBody {
    inner: Body,
    counter: BodyCounter,
}

impl CountedBody {
    /// Wrap a body, returning the replacement body and the shared counter.
    pub fn wrap(body: Body) -> (Body, BodyCounter) {
        let counter = BodyCounter::new();
        let wrapped = Body::new(CountedBody {
            inner: body,
            counter: counter.clone(),
        });
        (wrapped, counter)
    }
}

impl HttpBody for CountedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(Some(Ok(frame))) = &poll {
            if let Some(data) = frame.data_ref() {
                this.counter.add(data.len() as u64);
            }
        }
        poll
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[derive(Debug)]
struct RecordInner {
    /// Guarded by a mutex: an explicit finalize and an implicit
    /// finalize-on-first-write can race.
    status: Mutex<Option<StatusCode>>,
    bytes: AtomicU64,
}

/// Per-request capture of the finalized status code and bytes written.
///
/// Status capture is "first finalization wins": once a status has been
/// recorded, later attempts with a different code are no-ops. Byte writes
/// always pass through and are always counted.
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    inner: Arc<RecordInner>,
}

impl ResponseRecord {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RecordInner {
                status: Mutex::new(None),
                bytes: AtomicU64::new(0),
            }),
        }
    }

    /// Record `status` if no status has been finalized yet. Returns whether
    /// this call won the finalization.
    pub fn finalize(&self, status: StatusCode) -> bool {
        let mut slot = match self.inner.status.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            *slot = Some(status);
            true
        } else {
            false
        }
    }

    /// The first finalized status, if any finalization happened.
    pub fn status(&self) -> Option<StatusCode> {
        match self.inner.status.lock() {
            Ok(slot) => *slot,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Cumulative bytes written through the wrapped response body.
    pub fn num_bytes(&self) -> u64 {
        self.inner.bytes.load(Ordering::Acquire)
    }

    pub(crate) fn add_bytes(&self, n: u64) {
        self.inner.bytes.fetch_add(n, Ordering::AcqRel);
    }
}

impl Default for ResponseRecord {
    fn default() -> Self {
        Self::new()
    }
}

type CompletionHook = Box<dyn FnOnce(&ResponseRecord) + Send + 'static>;

/// Byte-counting decorator around the outbound response body.
///
/// Streaming a data frame before any explicit status commits `200 OK`,
/// mirroring the implicit commit a raw writer performs on first flush. The
/// completion hook runs exactly once, at end of stream or on drop.
pub struct RecordingBody {
    inner: Body,
    record: ResponseRecord,
    completion: Option<CompletionHook>,
}

impl RecordingBody {
    pub fn wrap(
        body: Body,
        record: ResponseRecord,
        on_complete: impl FnOnce(&ResponseRecord) + Send + 'static,
    ) -> Body {
        Body::new(RecordingBody {
            inner: body,
            record,
            completion: Some(Box::new(on_complete)),
        })
    }

    fn complete(&mut self) {
        if let Some(hook) = self.completion.take() {
            hook(&self.record);
        }
    }
}

impl HttpBody for RecordingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_frame(cx);
        match &poll {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.record.finalize(StatusCode::OK);
                    this.record.add_bytes(data.len() as u64);
                }
            }
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => this.complete(),
            Poll::Pending => {}
        }
        poll
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for RecordingBody {
    fn drop(&mut self) {
        self.complete();
    }
}
