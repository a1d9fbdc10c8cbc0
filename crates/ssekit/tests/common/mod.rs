//! Common test utilities for integration tests
//!
//! A recording [`ResponseWriter`] whose observations outlive the writer
//! itself (the connection owns the writer once upgraded).

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use ssekit::{Flusher, ResponseWriter, WriteDeadliner};
use tokio::io::AsyncWrite;

/// Everything a [`RecordingWriter`] saw.
#[derive(Debug, Default)]
pub struct Recorded {
    pub body: Vec<u8>,
    pub headers: HeaderMap,
    pub status: Option<StatusCode>,
    pub flushes: usize,
    pub deadlines: Vec<Instant>,
    pub shutdown: bool,
}

/// Shared view into a writer's recording.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    inner: Arc<Mutex<Recorded>>,
    fail_writes: Arc<AtomicBool>,
}

impl Recorder {
    pub fn body(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().body).into_owned()
    }

    pub fn headers(&self) -> HeaderMap {
        self.inner.lock().headers.clone()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.inner.lock().status
    }

    pub fn flushes(&self) -> usize {
        self.inner.lock().flushes
    }

    pub fn deadlines(&self) -> Vec<Instant> {
        self.inner.lock().deadlines.clone()
    }

    pub fn was_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }

    /// Make every following write fail with `BrokenPipe`.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn count(&self, needle: &str) -> usize {
        self.body().matches(needle).count()
    }
}

/// A response writer that records instead of sending.
#[derive(Debug)]
pub struct RecordingWriter {
    recorder: Recorder,
    headers: HeaderMap,
    flush: bool,
    deadline: bool,
}

impl RecordingWriter {
    /// A writer supporting both flush and write deadlines.
    pub fn new() -> (Self, Recorder) {
        Self::with_capabilities(true, true)
    }

    pub fn with_capabilities(flush: bool, deadline: bool) -> (Self, Recorder) {
        let recorder = Recorder::default();
        let writer = Self {
            recorder: recorder.clone(),
            headers: HeaderMap::new(),
            flush,
            deadline,
        };
        (writer, recorder)
    }
}

impl AsyncWrite for RecordingWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.recorder.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "client gone")));
        }
        self.recorder.inner.lock().body.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.recorder.inner.lock().shutdown = true;
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl Flusher for RecordingWriter {
    async fn flush(&mut self) -> io::Result<()> {
        self.recorder.inner.lock().flushes += 1;
        Ok(())
    }
}

impl WriteDeadliner for RecordingWriter {
    fn set_write_deadline(&mut self, deadline: Instant) -> io::Result<()> {
        self.recorder.inner.lock().deadlines.push(deadline);
        Ok(())
    }
}

impl ResponseWriter for RecordingWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        let mut recorded = self.recorder.inner.lock();
        recorded.status = Some(status);
        recorded.headers = self.headers.clone();
    }

    fn as_flusher(&mut self) -> Option<&mut dyn Flusher> {
        if self.flush { Some(self) } else { None }
    }

    fn as_deadliner(&mut self) -> Option<&mut dyn WriteDeadliner> {
        if self.deadline { Some(self) } else { None }
    }
}

/// Middleware-style wrapper with no capabilities of its own.
#[derive(Debug)]
pub struct Passthrough<W> {
    pub inner: W,
}

impl<W: ResponseWriter> AsyncWrite for Passthrough<W> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl<W: ResponseWriter> ResponseWriter for Passthrough<W> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_status(&mut self, status: StatusCode) {
        self.inner.write_status(status);
    }

    fn inner_mut(&mut self) -> Option<&mut dyn ResponseWriter> {
        Some(&mut self.inner)
    }
}
