//! Channel-backed [`ResponseWriter`] for axum handlers.
//!
//! axum builds a response from a body stream rather than handing out a
//! writer. [`channel`] bridges the two: the [`ChannelWriter`] half is given to
//! [`upgrade`](crate::upgrade), the [`ResponseHandle`] half is awaited in the
//! handler and returned as the response.
//!
//! ```rust,ignore
//! async fn events() -> Response {
//!     let (mut writer, handle) = ssekit::channel(64);
//!     let signal = CancellationToken::new();
//!     writer.cancel_on_disconnect(signal.clone());
//!
//!     tokio::spawn(async move {
//!         let conn = ssekit::upgrade(signal, writer, SseConfig::default()).await?;
//!         conn.send_data(&SendContext::background(), &json!({"hello": "world"})).await
//!     });
//!
//!     handle.into_response().await
//! }
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, StatusCode};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard, PollSender};
use tracing::debug;

use crate::writer::{Flusher, ResponseWriter, WriteDeadliner};

/// Status and headers, sent once when the response is committed.
#[derive(Debug)]
struct Head {
    status: StatusCode,
    headers: HeaderMap,
}

/// Create a writer/response pair. `capacity` bounds the number of buffered
/// frames before writes apply backpressure.
pub fn channel(capacity: usize) -> (ChannelWriter, ResponseHandle) {
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::channel(capacity.max(1));

    let writer = ChannelWriter {
        headers: HeaderMap::new(),
        head: Some(head_tx),
        body: PollSender::new(body_tx),
        deadline: None,
        disconnect_guard: None,
    };
    let handle = ResponseHandle {
        head: head_rx,
        body: body_rx,
    };
    (writer, handle)
}

/// Writing half of [`channel`].
pub struct ChannelWriter {
    headers: HeaderMap,
    head: Option<oneshot::Sender<Head>>,
    body: PollSender<Bytes>,
    deadline: Option<Pin<Box<Sleep>>>,
    disconnect_guard: Option<DropGuard>,
}

impl ChannelWriter {
    /// Cancel `signal` once the response body is dropped (client went away).
    ///
    /// The watcher task stops when this writer is shut down or dropped.
    pub fn cancel_on_disconnect(&mut self, signal: CancellationToken) {
        let Some(sender) = self.body.get_ref().cloned() else {
            signal.cancel();
            return;
        };

        let released = CancellationToken::new();
        self.disconnect_guard = Some(released.clone().drop_guard());

        tokio::spawn(async move {
            tokio::select! {
                () = sender.closed() => {
                    debug!("sse client disconnected");
                    signal.cancel();
                }
                () = released.cancelled() => {}
            }
        });
    }

    fn commit(&mut self, status: StatusCode) {
        if let Some(head) = self.head.take() {
            let headers = mem::take(&mut self.headers);
            // The handle may already be gone; writes will report it.
            let _ = head.send(Head { status, headers });
        }
    }
}

impl std::fmt::Debug for ChannelWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("committed", &self.head.is_none())
            .field("closed", &self.body.is_closed())
            .finish_non_exhaustive()
    }
}

fn disconnected() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "sse client disconnected")
}

impl AsyncWrite for ChannelWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.commit(StatusCode::OK);

        match this.body.poll_reserve(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(_)) => return Poll::Ready(Err(disconnected())),
            Poll::Pending => {
                if let Some(deadline) = this.deadline.as_mut() {
                    if deadline.as_mut().poll(cx).is_ready() {
                        this.body.abort_send();
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "sse write deadline exceeded",
                        )));
                    }
                }
                return Poll::Pending;
            }
        }

        if this.body.send_item(Bytes::copy_from_slice(buf)).is_err() {
            return Poll::Ready(Err(disconnected()));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.commit(StatusCode::OK);
        this.body.close();
        this.disconnect_guard = None;
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl Flusher for ChannelWriter {
    async fn flush(&mut self) -> io::Result<()> {
        // Every write is handed to the body stream immediately.
        Ok(())
    }
}

impl WriteDeadliner for ChannelWriter {
    fn set_write_deadline(&mut self, deadline: Instant) -> io::Result<()> {
        let at = tokio::time::Instant::from_std(deadline);
        match self.deadline.as_mut() {
            Some(sleep) => sleep.as_mut().reset(at),
            None => self.deadline = Some(Box::pin(tokio::time::sleep_until(at))),
        }
        Ok(())
    }
}

impl ResponseWriter for ChannelWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_status(&mut self, status: StatusCode) {
        self.commit(status);
    }

    fn as_flusher(&mut self) -> Option<&mut dyn Flusher> {
        Some(self)
    }

    fn as_deadliner(&mut self) -> Option<&mut dyn WriteDeadliner> {
        Some(self)
    }
}

/// Response half of [`channel`].
#[derive(Debug)]
pub struct ResponseHandle {
    head: oneshot::Receiver<Head>,
    body: mpsc::Receiver<Bytes>,
}

impl ResponseHandle {
    /// Wait for the writer to commit its status and headers, then build a
    /// streaming response.
    ///
    /// If the writer is dropped without committing, a 500 response is returned.
    pub async fn into_response(self) -> Response {
        let Ok(head) = self.head.await else {
            debug!("sse writer dropped before committing a response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };

        let stream = ReceiverStream::new(self.body).map(Ok::<_, Infallible>);
        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = head.status;
        *response.headers_mut() = head.headers;
        response
    }
}
