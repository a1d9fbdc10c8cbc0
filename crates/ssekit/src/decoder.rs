//! Pull-style decoder over an [`AsyncRead`] source.

use bytes::BytesMut;
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::codec::SseCodec;
use crate::error::DecodeError;
use crate::event::Event;

const READ_CHUNK: usize = 8 * 1024;

/// Reads SSE frames from a byte source.
///
/// Parsing state (`id`, `retry`, BOM handling) persists across calls, so one
/// decoder should be used for the whole stream.
#[derive(Debug)]
pub struct Decoder<R> {
    reader: R,
    buf: BytesMut,
    codec: SseCodec,
    eof: bool,
}

impl<R: AsyncRead + Unpin> Decoder<R> {
    /// Create a decoder reading from `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(READ_CHUNK),
            codec: SseCodec::new(),
            eof: false,
        }
    }

    /// Read the next event into `event`.
    ///
    /// `event` is reset first and reused, so a caller can drive a long stream
    /// through a single value.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::Eof`] when the stream ends on a frame boundary
    /// - [`DecodeError::UnexpectedEof`] when it ends inside a frame
    /// - [`DecodeError::Io`] when the reader fails
    pub async fn decode(&mut self, event: &mut Event) -> Result<(), DecodeError> {
        event.clear();

        loop {
            if self.codec.decode_into(&mut self.buf, self.eof, event) {
                return Ok(());
            }

            if self.eof {
                if self.codec.has_pending_frame() {
                    // Drop the partial frame so a further call reports a clean end.
                    self.codec.reset_frame();
                    return Err(DecodeError::UnexpectedEof);
                }
                return Err(DecodeError::Eof);
            }

            self.buf.reserve(READ_CHUNK);
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                trace!("event stream reached end of input");
                self.eof = true;
            }
        }
    }

    /// Read the next event, mapping a clean end of stream to `None`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnexpectedEof`] or [`DecodeError::Io`].
    pub async fn next_event(&mut self) -> Result<Option<Event>, DecodeError> {
        let mut event = Event::default();
        match self.decode(&mut event).await {
            Ok(()) => Ok(Some(event)),
            Err(DecodeError::Eof) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Convert the decoder into a stream of events.
    ///
    /// The stream ends after a clean end of input or after yielding the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Event, DecodeError>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut decoder = state?;
            match decoder.next_event().await {
                Ok(Some(event)) => Some((Ok(event), Some(decoder))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    /// Most recent valid `retry` seen, or zero.
    pub fn retry_delay(&self) -> std::time::Duration {
        self.codec.retry().to_std().unwrap_or_default()
    }

    /// Most recent valid `id` seen, or empty. Ids containing NUL or invalid
    /// UTF-8 are skipped.
    pub fn last_event_id(&self) -> &str {
        self.codec.last_event_id()
    }

    /// Borrow the reader.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Recover the reader. Buffered but unparsed bytes are lost.
    pub fn into_inner(self) -> R {
        self.reader
    }
}
