//! Frame serialization.
//!
//! Frames are rendered into a [`BytesMut`] first and handed to the sink with a
//! single `write_all`, so a validation or JSON failure never leaves a partial
//! frame on the wire.

use bytes::{BufMut, BytesMut};
use chrono::TimeDelta;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Result, ValidationError};
use crate::event::{Data, Event};

const ID_PREFIX: &[u8] = b"id: ";
const RETRY_PREFIX: &[u8] = b"retry: ";
const EVENT_PREFIX: &[u8] = b"event: ";
const DATA_PREFIX: &[u8] = b"data: ";
const COMMENT_PREFIX: &[u8] = b": ";

/// Append one complete frame for `event` to `buf`.
///
/// Fields are written in the order `id`, `retry`, `event`, `data`, followed by
/// the blank terminator line. On error `buf` is left as it was.
///
/// # Errors
///
/// Returns a [`ValidationError`] if the event is invalid or its JSON payload
/// cannot be serialized.
pub fn write_event(buf: &mut BytesMut, event: &Event) -> std::result::Result<(), ValidationError> {
    event.validate()?;

    let start = buf.len();

    if !event.id.is_empty() {
        put_field(buf, ID_PREFIX, event.id.as_bytes());
    }

    if event.retry > TimeDelta::zero() {
        let millis = event.retry.num_milliseconds().to_string();
        put_field(buf, RETRY_PREFIX, millis.as_bytes());
    }

    if !event.has_default_type() {
        put_field(buf, EVENT_PREFIX, event.event_type.as_bytes());
    }

    match &event.data {
        None => {}
        Some(Data::Raw(raw)) => write_raw(buf, raw.as_bytes(), event.split),
        Some(Data::Json(value)) => {
            buf.put_slice(DATA_PREFIX);
            if let Err(err) = serde_json::to_writer((&mut *buf).writer(), value) {
                buf.truncate(start);
                return Err(ValidationError::JsonEncoding(err));
            }
            buf.put_u8(b'\n');
        }
    }

    buf.put_u8(b'\n');
    Ok(())
}

/// Append a comment line (`: <text>`) to `buf`.
///
/// Comments are ignored by clients and mostly used as keep-alives. The text is
/// written as-is; callers must not pass line breaks.
pub fn write_comment(buf: &mut BytesMut, comment: &str) {
    put_field(buf, COMMENT_PREFIX, comment.as_bytes());
}

fn put_field(buf: &mut BytesMut, prefix: &[u8], value: &[u8]) {
    buf.reserve(prefix.len() + value.len() + 1);
    buf.put_slice(prefix);
    buf.put_slice(value);
    buf.put_u8(b'\n');
}

fn write_raw(buf: &mut BytesMut, payload: &[u8], split: bool) {
    if payload.is_empty() {
        return;
    }

    if !split {
        put_field(buf, DATA_PREFIX, payload);
        return;
    }

    for line in Lines::new(payload) {
        put_field(buf, DATA_PREFIX, line);
    }
}

/// Iterator over lines terminated by CR, LF or CRLF.
///
/// A trailing terminator does not produce an empty final line.
struct Lines<'a> {
    rest: &'a [u8],
}

impl<'a> Lines<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { rest: payload }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }

        match self.rest.iter().position(|&b| b == b'\r' || b == b'\n') {
            Some(pos) => {
                let line = &self.rest[..pos];
                let skip = if self.rest[pos] == b'\r' && self.rest.get(pos + 1) == Some(&b'\n') {
                    2
                } else {
                    1
                };
                self.rest = &self.rest[pos + skip..];
                Some(line)
            }
            None => {
                let line = self.rest;
                self.rest = &[];
                Some(line)
            }
        }
    }
}

/// Writes SSE frames to an async sink.
///
/// The encoder does not flush; connection-level code decides when buffered
/// bytes must reach the client.
#[derive(Debug)]
pub struct Encoder<W> {
    writer: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> Encoder<W> {
    /// Create an encoder writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Validate and write one event frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`](crate::Error::Validation) before any byte
    /// is written if the event is invalid, or [`Error::Io`](crate::Error::Io)
    /// if the sink fails.
    pub async fn encode_event(&mut self, event: &Event) -> Result<()> {
        self.buf.clear();
        write_event(&mut self.buf, event)?;
        self.writer.write_all(&self.buf).await?;
        Ok(())
    }

    /// Write an event that may be absent.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::NilEvent`] when `event` is `None`, otherwise
    /// behaves like [`encode_event`](Self::encode_event).
    pub async fn encode_optional(&mut self, event: Option<&Event>) -> Result<()> {
        let event = event.ok_or(ValidationError::NilEvent)?;
        self.encode_event(event).await
    }

    /// Write a single comment line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the sink fails.
    pub async fn encode_comment(&mut self, comment: &str) -> Result<()> {
        self.buf.clear();
        write_comment(&mut self.buf, comment);
        self.writer.write_all(&self.buf).await?;
        Ok(())
    }

    /// Shut down the underlying sink.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the sink fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Borrow the sink.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Mutably borrow the sink.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Recover the sink.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
