//! Incremental `text/event-stream` codec.
//!
//! [`SseCodec`] is a push parser: callers append bytes to a [`BytesMut`] and
//! the codec consumes complete lines, yielding an [`Event`] every time a blank
//! line closes a frame that carried at least one `data` line. It plugs into
//! [`tokio_util::codec::FramedRead`] / [`FramedWrite`](tokio_util::codec::FramedWrite)
//! and backs the pull-style [`Decoder`](crate::Decoder).
//!
//! Line handling follows the HTML event-stream rules: CR, LF and CRLF all
//! terminate a line, a UTF-8 BOM at the very start of the stream is dropped
//! once, `id` and `retry` persist across frames.

use std::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::TimeDelta;
use tracing::trace;

use crate::encoder::write_event;
use crate::error::{DecodeError, Error};
use crate::event::{Data, Event, RawData};

const BOM: &[u8] = b"\xEF\xBB\xBF";
const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Stateful SSE frame codec.
#[derive(Debug, Default)]
pub struct SseCodec {
    bom_checked: bool,

    // Persist across frames.
    last_event_id: String,
    retry: TimeDelta,

    // Current frame.
    data: BytesMut,
    data_lines: usize,
    event_type: String,
}

impl SseCodec {
    /// Create a codec positioned at the start of a stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent valid `id` seen on the stream.
    ///
    /// An `id` containing NUL or invalid UTF-8 is ignored and leaves this
    /// unchanged.
    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    /// The most recent valid `retry` seen on the stream.
    pub fn retry(&self) -> TimeDelta {
        self.retry
    }

    /// Parse lines from `src` until a frame is dispatched into `event` or
    /// the buffer runs out of complete lines.
    ///
    /// At `eof` a trailing partial line (and a trailing lone CR) counts as
    /// terminated. Returns whether `event` was filled.
    pub(crate) fn decode_into(&mut self, src: &mut BytesMut, eof: bool, event: &mut Event) -> bool {
        if !self.bom_checked {
            if src.len() < BOM.len() && BOM.starts_with(src) && !eof {
                return false;
            }
            self.bom_checked = true;
            if src.starts_with(BOM) {
                src.advance(BOM.len());
            }
        }

        while let Some(line) = next_line(src, eof) {
            if self.process_line(&line) {
                self.dispatch(event);
                return true;
            }
        }

        false
    }

    /// Whether a frame is partially accumulated.
    pub(crate) fn has_pending_frame(&self) -> bool {
        !self.data.is_empty()
    }

    /// Handle one line; returns true when a blank line ends a frame with data.
    fn process_line(&mut self, line: &[u8]) -> bool {
        if line.is_empty() {
            if self.data.is_empty() {
                self.reset_frame();
                return false;
            }
            return true;
        }

        if line[0] == b':' {
            return false;
        }

        let (name, value) = match line.iter().position(|&b| b == b':') {
            Some(colon) => {
                let value = &line[colon + 1..];
                (&line[..colon], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &[][..]),
        };

        match name {
            b"data" => {
                self.data.extend_from_slice(value);
                self.data.put_u8(LF);
                self.data_lines += 1;
            }
            b"event" => {
                // Invalid UTF-8 is replaced with U+FFFD.
                self.event_type = String::from_utf8_lossy(value).into_owned();
            }
            b"id" => {
                if value.contains(&0) {
                    trace!("ignoring id containing NUL");
                } else {
                    match std::str::from_utf8(value) {
                        Ok(id) => id.clone_into(&mut self.last_event_id),
                        Err(_) => trace!("ignoring id that is not UTF-8"),
                    }
                }
            }
            b"retry" => self.apply_retry(value),
            _ => {
                trace!(field = %String::from_utf8_lossy(name), "ignoring unknown field");
            }
        }

        false
    }

    fn apply_retry(&mut self, value: &[u8]) {
        if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
            trace!("ignoring non-numeric retry");
            return;
        }

        // All digits, so this is valid UTF-8 and the only failure is overflow.
        let millis = std::str::from_utf8(value)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(TimeDelta::try_milliseconds);

        match millis {
            Some(retry) => self.retry = retry,
            None => trace!("ignoring out-of-range retry"),
        }
    }

    fn dispatch(&mut self, event: &mut Event) {
        let mut data = self.data.split();
        // Every data line appended a trailing LF; drop the last one.
        data.truncate(data.len().saturating_sub(1));

        event.clear();
        event.id.push_str(&self.last_event_id);
        event.event_type = mem::take(&mut self.event_type);
        event.retry = if self.retry > TimeDelta::zero() {
            self.retry
        } else {
            TimeDelta::zero()
        };
        event.split = self.data_lines > 1;
        event.data = Some(parse_data(data.freeze()));

        self.data_lines = 0;
    }

    pub(crate) fn reset_frame(&mut self) {
        self.data.clear();
        self.data_lines = 0;
        self.event_type.clear();
    }
}

/// JSON when the payload looks like a JSON object, array or string and
/// parses; raw bytes otherwise.
fn parse_data(data: Bytes) -> Data {
    let trimmed = data.trim_ascii();
    if matches!(trimmed.first(), Some(b'{' | b'[' | b'"')) {
        if let Ok(value) = serde_json::from_slice(trimmed) {
            return Data::Json(value);
        }
    }
    Data::Raw(RawData::new(data))
}

/// Find the end of the first line.
///
/// Returns `(line_end, next_line_start)`. A CR as the final buffered byte is
/// ambiguous (it may be the first half of CRLF) and yields `None` unless `eof`.
fn find_eol(bytes: &[u8], eof: bool) -> Option<(usize, usize)> {
    let pos = bytes.iter().position(|&b| b == CR || b == LF)?;
    if bytes[pos] == LF {
        return Some((pos, pos + 1));
    }
    match bytes.get(pos + 1) {
        Some(&LF) => Some((pos, pos + 2)),
        Some(_) => Some((pos, pos + 1)),
        None if eof => Some((pos, pos + 1)),
        None => None,
    }
}

fn next_line(src: &mut BytesMut, eof: bool) -> Option<BytesMut> {
    if let Some((end, next)) = find_eol(src, eof) {
        let line = src.split_to(end);
        src.advance(next - end);
        return Some(line);
    }

    if eof && !src.is_empty() {
        return Some(src.split());
    }

    None
}

impl tokio_util::codec::Decoder for SseCodec {
    type Item = Event;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Event>, DecodeError> {
        let mut event = Event::default();
        Ok(self.decode_into(src, false, &mut event).then_some(event))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Event>, DecodeError> {
        let mut event = Event::default();
        if self.decode_into(src, true, &mut event) {
            return Ok(Some(event));
        }

        if self.has_pending_frame() {
            self.reset_frame();
            return Err(DecodeError::UnexpectedEof);
        }

        Ok(None)
    }
}

impl tokio_util::codec::Encoder<Event> for SseCodec {
    type Error = Error;

    fn encode(&mut self, item: Event, dst: &mut BytesMut) -> Result<(), Error> {
        write_event(dst, &item)?;
        Ok(())
    }
}

impl tokio_util::codec::Encoder<&Event> for SseCodec {
    type Error = Error;

    fn encode(&mut self, item: &Event, dst: &mut BytesMut) -> Result<(), Error> {
        write_event(dst, item)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio_util::codec::{Decoder as _, FramedRead};

    fn decode_all(input: &[u8]) -> (Vec<Event>, Result<(), DecodeError>) {
        let mut codec = SseCodec::new();
        let mut buf = BytesMut::from(input);
        let mut events = Vec::new();
        while let Some(event) = codec.decode(&mut buf).unwrap() {
            events.push(event);
        }
        loop {
            match codec.decode_eof(&mut buf) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => return (events, Ok(())),
                Err(err) => return (events, Err(err)),
            }
        }
    }

    #[test]
    fn test_find_eol() {
        assert_eq!(find_eol(b"abc\ndef", false), Some((3, 4)));
        assert_eq!(find_eol(b"abc\r\ndef", false), Some((3, 5)));
        assert_eq!(find_eol(b"abc\rdef", false), Some((3, 4)));
        assert_eq!(find_eol(b"abc\r", false), None);
        assert_eq!(find_eol(b"abc\r", true), Some((3, 4)));
        assert_eq!(find_eol(b"abc", true), None);
    }

    #[test]
    fn test_simple_event() {
        let (events, end) = decode_all(b"data: hello\n\n");
        assert!(end.is_ok());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, Some(Data::raw("hello")));
        assert!(!events[0].split);
    }

    #[test]
    fn test_waits_for_blank_line() {
        let mut codec = SseCodec::new();
        let mut buf = BytesMut::from(&b"data: a\n"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\n");
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_crlf_split_across_reads() {
        let mut codec = SseCodec::new();
        let mut buf = BytesMut::from(&b"data: a\r"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\n\r\n");
        let event = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(event.data, Some(Data::raw("a")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bom_split_across_reads() {
        let mut codec = SseCodec::new();
        let mut buf = BytesMut::from(&b"\xEF\xBB"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\xBFdata: x\n\n");
        let event = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(event.data, Some(Data::raw("x")));
    }

    #[test]
    fn test_sticky_fields() {
        let (events, _) = decode_all(b"id: 7\nretry: 1500\ndata: a\n\ndata: b\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].id, "7");
        assert_eq!(events[1].retry, TimeDelta::milliseconds(1500));
    }

    #[test]
    fn test_event_type_is_per_frame() {
        let (events, _) = decode_all(b"event: a\ndata: 1\n\ndata: 2\n\n");
        assert_eq!(events[0].event_type, "a");
        assert_eq!(events[1].event_type, "");
    }

    #[test]
    fn test_retry_rejects_non_digits() {
        let mut codec = SseCodec::new();
        for value in ["-1", "1.5", " 10", "abc", "", "99999999999999999999"] {
            codec.apply_retry(value.as_bytes());
        }
        assert_eq!(codec.retry(), TimeDelta::zero());
    }

    #[test]
    fn test_json_detection() {
        let (events, _) = decode_all(b"data: {\"a\":1}\n\ndata: [1,2]\n\ndata: \"s\"\n\ndata: 42\n\n");
        assert_eq!(events[0].data, Some(Data::Json(json!({"a": 1}))));
        assert_eq!(events[1].data, Some(Data::Json(json!([1, 2]))));
        assert_eq!(events[2].data, Some(Data::Json(json!("s"))));
        assert_eq!(events[3].data, Some(Data::raw("42")));
    }

    #[test]
    fn test_truncated_frame() {
        let (events, end) = decode_all(b"data: a\n\ndata: b");
        assert_eq!(events.len(), 1);
        assert!(matches!(end, Err(DecodeError::UnexpectedEof)));
    }

    #[test]
    fn test_trailing_cr_at_eof() {
        let (events, end) = decode_all(b"data: test\r\r");
        assert!(end.is_ok());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, Some(Data::raw("test")));
    }

    #[test]
    fn test_codec_encoder() {
        use tokio_util::codec::Encoder as _;

        let mut codec = SseCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(Event::raw("hi").with_id("1"), &mut dst).unwrap();
        assert_eq!(&dst[..], b"id: 1\ndata: hi\n\n");

        let err = codec.encode(&Event::raw("a\nb"), &mut dst).unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_framed_read() {
        let input: &[u8] = b"data: one\n\n: ping\ndata: two\n\n";
        let events: Vec<_> = FramedRead::new(input, SseCodec::new())
            .map(|res| res.unwrap())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data, Some(Data::raw("two")));
    }
}
