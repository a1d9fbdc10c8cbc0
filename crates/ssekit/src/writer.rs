//! The response sink abstraction and capability discovery.
//!
//! A [`ResponseWriter`] is the byte sink of an HTTP response plus its header
//! map and status. Middleware commonly wraps the real writer, so optional
//! capabilities ([`Flusher`], [`WriteDeadliner`]) are looked up through the
//! chain of wrappers exposed by [`ResponseWriter::inner_mut`]. For each
//! capability the innermost layer that offers it is used.

use std::io;
use std::time::Instant;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use tokio::io::AsyncWrite;

/// Upper bound on how many wrapper layers are inspected.
pub const MAX_UNWRAP_DEPTH: usize = 32;

/// An HTTP response being streamed to a client.
pub trait ResponseWriter: AsyncWrite + Unpin + Send {
    /// Response headers. Changes after [`write_status`](Self::write_status) have no effect.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commit the status line and headers.
    fn write_status(&mut self, status: StatusCode);

    /// This layer's flush capability.
    fn as_flusher(&mut self) -> Option<&mut dyn Flusher> {
        None
    }

    /// This layer's write-deadline capability.
    fn as_deadliner(&mut self) -> Option<&mut dyn WriteDeadliner> {
        None
    }

    /// The writer this layer wraps, if any.
    fn inner_mut(&mut self) -> Option<&mut dyn ResponseWriter> {
        None
    }
}

/// Pushes buffered response bytes to the client.
#[async_trait]
pub trait Flusher: Send {
    /// Flush everything written so far.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the bytes could not be delivered.
    async fn flush(&mut self) -> io::Result<()>;
}

/// Bounds how long subsequent writes may block.
pub trait WriteDeadliner: Send {
    /// Fail writes that have not completed by `deadline`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot honor deadlines right now.
    fn set_write_deadline(&mut self, deadline: Instant) -> io::Result<()>;
}

/// Where in a wrapper chain each capability was found.
///
/// Depth 0 is the outermost writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Depth of the innermost flushing layer.
    pub flusher: Option<usize>,
    /// Depth of the innermost deadline-capable layer.
    pub deadliner: Option<usize>,
}

impl Capabilities {
    /// Walk the wrapper chain and record the deepest layer for each capability.
    ///
    /// The walk stops at a layer without an inner writer, at a layer that
    /// returns itself, or after [`MAX_UNWRAP_DEPTH`] layers.
    pub fn probe(writer: &mut dyn ResponseWriter) -> Self {
        let mut caps = Self::default();
        let mut current = writer;

        for depth in 0..MAX_UNWRAP_DEPTH {
            if current.as_flusher().is_some() {
                caps.flusher = Some(depth);
            }
            if current.as_deadliner().is_some() {
                caps.deadliner = Some(depth);
            }

            let here = layer_ptr(current);
            let Some(inner) = current.inner_mut() else {
                break;
            };
            // A single-field wrapper shares its inner writer's address, so the
            // type must match too before this counts as a self-reference.
            if std::ptr::eq(layer_ptr(inner), here) {
                break;
            }
            current = inner;
        }

        caps
    }
}

/// The layer `depth` levels below `writer`.
pub fn layer_at(writer: &mut dyn ResponseWriter, depth: usize) -> Option<&mut dyn ResponseWriter> {
    let mut current = writer;
    for _ in 0..depth {
        current = current.inner_mut()?;
    }
    Some(current)
}

fn layer_ptr<'a>(writer: &(dyn ResponseWriter + 'a)) -> *const (dyn ResponseWriter + 'a) {
    writer
}
