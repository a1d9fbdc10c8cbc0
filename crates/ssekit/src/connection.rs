//! Server-side SSE connection.
//!
//! [`upgrade`] turns a [`ResponseWriter`] into a long-lived event stream and
//! returns a cheaply cloneable [`Connection`]. All writes (events, comments,
//! heartbeats, the farewell event) are serialized through one async mutex, so
//! frames from concurrent senders never interleave.
//!
//! Two background tasks are spawned per connection:
//! - a heartbeat task writing keep-alive comments at a fixed interval
//! - a watcher that closes the connection when the request signal is canceled
//!
//! Both exit once the connection is closed.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::TimeDelta;
use futures::{Stream, StreamExt};
use http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::clock::Clock;
use crate::config::SseConfig;
use crate::context::SendContext;
use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::event::{Event, RawData};
use crate::writer::{Capabilities, Flusher, ResponseWriter, WriteDeadliner, layer_at};

/// MIME type of an event stream.
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Tells nginx-style proxies not to buffer the response.
const X_ACCEL_BUFFERING: &str = "x-accel-buffering";

/// The response sink and what it can do.
struct WriterState {
    encoder: Encoder<Box<dyn ResponseWriter>>,
    caps: Capabilities,
}

impl WriterState {
    fn writer(&mut self) -> &mut dyn ResponseWriter {
        &mut **self.encoder.get_mut()
    }

    fn flusher(&mut self) -> Option<&mut dyn Flusher> {
        let depth = self.caps.flusher?;
        layer_at(self.writer(), depth)?.as_flusher()
    }

    fn deadliner(&mut self) -> Option<&mut dyn WriteDeadliner> {
        let depth = self.caps.deadliner?;
        layer_at(self.writer(), depth)?.as_deadliner()
    }

    fn apply_deadline(&mut self, deadline: Option<Instant>) {
        let Some(deadline) = deadline else {
            return;
        };
        if let Some(deadliner) = self.deadliner() {
            if let Err(err) = deadliner.set_write_deadline(deadline) {
                trace!(error = %err, "failed to set write deadline");
            }
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self.flusher() {
            Some(flusher) => flusher.flush().await,
            None => Ok(()),
        }
    }

    async fn write_event(&mut self, event: &Event) -> Result<()> {
        self.encoder.encode_event(event).await?;
        self.flush().await?;
        Ok(())
    }

    async fn write_comment(&mut self, comment: &str) -> Result<()> {
        self.encoder.encode_comment(comment).await?;
        self.flush().await?;
        Ok(())
    }
}

struct Shared {
    state: Mutex<WriterState>,
    closed: CancellationToken,
    write_timeout: Duration,
    close_event: Option<Event>,
    clock: Arc<dyn Clock>,
}

impl Shared {
    /// `now + write_timeout`, or `None` if that is not representable.
    fn default_deadline(&self) -> Option<Instant> {
        self.clock.now().checked_add(self.write_timeout)
    }
}

/// A live SSE stream.
///
/// Clones share the same underlying stream. Every method is safe to call
/// concurrently.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

/// Upgrade an HTTP response to an SSE stream.
///
/// Sets the event-stream headers (then appends `config.headers`), commits
/// `config.status`, writes the initial `retry` frame if configured and
/// flushes. The connection closes itself when `signal` is canceled.
///
/// # Errors
///
/// - [`Error::Config`] / [`Error::Validation`] if `config` is invalid
/// - [`Error::FlushUnsupported`] if no layer of `writer` can flush
/// - [`Error::Io`] if the initial write or flush fails
#[instrument(skip_all, fields(status = %config.status))]
pub async fn upgrade<W>(signal: CancellationToken, writer: W, config: SseConfig) -> Result<Connection>
where
    W: ResponseWriter + 'static,
{
    config.validate()?;

    let mut writer: Box<dyn ResponseWriter> = Box::new(writer);
    let caps = Capabilities::probe(&mut *writer);
    if caps.flusher.is_none() {
        return Err(Error::FlushUnsupported);
    }
    trace!(?caps, "probed response writer");

    set_stream_headers(writer.headers_mut(), &config.headers);
    writer.write_status(config.status);

    let mut state = WriterState {
        encoder: Encoder::new(writer),
        caps,
    };

    if !config.retry_delay.is_zero() {
        let retry = TimeDelta::from_std(config.retry_delay).unwrap_or(TimeDelta::MAX);
        state
            .encoder
            .encode_event(&Event::new().with_retry(retry))
            .await?;
    }
    state.flush().await?;

    let conn = Connection {
        shared: Arc::new(Shared {
            state: Mutex::new(state),
            closed: CancellationToken::new(),
            write_timeout: config.write_timeout,
            close_event: config.close_event,
            clock: config.clock,
        }),
    };

    let period = config.heartbeat_interval;
    if !period.is_zero() {
        if let Some(start) = tokio::time::Instant::now().checked_add(period) {
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tokio::spawn(heartbeat_loop(
                conn.clone(),
                IntervalStream::new(interval),
                signal.clone(),
                config.heartbeat_comment,
            ));
        }
    }

    tokio::spawn(watch_signal(conn.clone(), signal));

    debug!("sse connection upgraded");
    Ok(conn)
}

fn set_stream_headers(headers: &mut HeaderMap, extra: &HeaderMap) {
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static(X_ACCEL_BUFFERING),
        HeaderValue::from_static("no"),
    );

    for (name, value) in extra {
        headers.append(name, value.clone());
    }
}

impl Connection {
    /// Write one event and flush it.
    ///
    /// Waits for any in-flight write to finish first; the wait is abandoned
    /// if `ctx` is canceled.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if the connection is closed
    /// - [`Error::Canceled`] / [`Error::DeadlineExceeded`] if `ctx` is done
    /// - [`Error::Validation`] if the event is invalid (nothing is written)
    /// - [`Error::Io`] if the write or flush fails
    pub async fn send_event(&self, ctx: &SendContext, event: &Event) -> Result<()> {
        let mut state = self.lock(ctx).await?;
        self.check(ctx)?;
        state.apply_deadline(self.deadline_for(ctx));
        state.write_event(event).await
    }

    /// Send a JSON-encoded payload as a default event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `payload` cannot be encoded, otherwise
    /// as [`send_event`](Self::send_event).
    pub async fn send_data<T: Serialize + ?Sized>(&self, ctx: &SendContext, payload: &T) -> Result<()> {
        let event = Event::json(payload)?;
        self.send_event(ctx, &event).await
    }

    /// Send pre-encoded bytes as a default event.
    ///
    /// The payload must be single-line UTF-8; use [`send_event`](Self::send_event)
    /// with [`Event::with_split`] for multi-line text.
    ///
    /// # Errors
    ///
    /// As [`send_event`](Self::send_event).
    pub async fn send_raw(&self, ctx: &SendContext, payload: impl Into<RawData>) -> Result<()> {
        let event = Event::raw(payload);
        self.send_event(ctx, &event).await
    }

    /// Write a comment line and flush it.
    ///
    /// # Errors
    ///
    /// As [`send_event`](Self::send_event), minus validation.
    pub async fn send_comment(&self, ctx: &SendContext, comment: &str) -> Result<()> {
        let mut state = self.lock(ctx).await?;
        self.check(ctx)?;
        state.apply_deadline(self.deadline_for(ctx));
        state.write_comment(comment).await
    }

    /// Close the connection. Idempotent.
    ///
    /// The first call sends the configured farewell event (best effort,
    /// bounded by the write timeout), marks the connection closed and shuts
    /// the writer down. Later calls return immediately.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        let mut state = self.shared.state.lock().await;
        if self.shared.closed.is_cancelled() {
            return;
        }

        let timeout = self.shared.write_timeout;
        if let Some(event) = &self.shared.close_event {
            state.apply_deadline(self.shared.default_deadline());
            match tokio::time::timeout(timeout, state.write_event(event)).await {
                Ok(Ok(())) => trace!("close event sent"),
                Ok(Err(err)) => debug!(error = %err, "close event not delivered"),
                Err(_) => debug!(?timeout, "close event timed out"),
            }
        }

        self.shared.closed.cancel();

        match tokio::time::timeout(timeout, state.encoder.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => trace!(error = %err, "writer shutdown failed"),
            Err(_) => trace!("writer shutdown timed out"),
        }

        debug!("sse connection closed");
    }

    /// Whether [`close`](Self::close) has completed its first run.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        self.shared.closed.cancelled().await;
    }

    async fn lock(&self, ctx: &SendContext) -> Result<MutexGuard<'_, WriterState>> {
        tokio::select! {
            biased;
            state = self.shared.state.lock() => Ok(state),
            () = ctx.cancelled() => Err(Error::Canceled),
        }
    }

    fn check(&self, ctx: &SendContext) -> Result<()> {
        if self.shared.closed.is_cancelled() {
            return Err(Error::Closed);
        }
        if ctx.is_cancelled() {
            return Err(Error::Canceled);
        }
        if let Some(deadline) = ctx.deadline() {
            if deadline <= self.shared.clock.now() {
                return Err(Error::DeadlineExceeded);
            }
        }
        Ok(())
    }

    fn deadline_for(&self, ctx: &SendContext) -> Option<Instant> {
        ctx.deadline().or_else(|| self.shared.default_deadline())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("closed", &self.is_closed())
            .field("write_timeout", &self.shared.write_timeout)
            .field("close_event", &self.shared.close_event.is_some())
            .finish_non_exhaustive()
    }
}

/// Write a keep-alive comment on every tick until the connection closes or
/// `signal` fires. A failed heartbeat closes the connection.
async fn heartbeat_loop<S>(conn: Connection, mut ticks: S, signal: CancellationToken, comment: String)
where
    S: Stream + Unpin,
{
    loop {
        tokio::select! {
            tick = ticks.next() => {
                if tick.is_none() {
                    break;
                }
                let mut ctx = SendContext::new().with_cancellation(signal.clone());
                if let Some(deadline) = conn.shared.default_deadline() {
                    ctx = ctx.with_deadline(deadline);
                }
                match conn.send_comment(&ctx, &comment).await {
                    Ok(()) => {}
                    Err(err) if is_shutdown(&err) => {
                        debug!(error = %err, "heartbeat stopped");
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "heartbeat failed, closing sse connection");
                        conn.close().await;
                        break;
                    }
                }
                trace!("heartbeat sent");
            }
            () = conn.shared.closed.cancelled() => break,
            () = signal.cancelled() => break,
        }
    }
}

/// The connection is closed or closing; nothing is wrong with the stream.
fn is_shutdown(err: &Error) -> bool {
    matches!(err, Error::Closed | Error::Canceled)
}

async fn watch_signal(conn: Connection, signal: CancellationToken) {
    tokio::select! {
        () = signal.cancelled() => {
            debug!("request signal canceled, closing sse connection");
            conn.close().await;
        }
        () = conn.shared.closed.cancelled() => {}
    }
}
