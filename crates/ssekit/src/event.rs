//! The wire-agnostic SSE event model.
//!
//! ## SSE Format
//!
//! ```text
//! id: event-123
//! retry: 3000
//! event: update
//! data: {"status": "ok"}
//!
//! ```
//!
//! Every field is optional; a frame is terminated by a blank line.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio_util::codec::Decoder as _;

use crate::codec::SseCodec;
use crate::encoder::write_event;
use crate::error::{Error, ValidationError};

/// Event type used by clients when the `event:` field is absent.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Pre-encoded payload bytes that are written to `data:` lines verbatim.
///
/// Unlike [`Data::Json`], raw data is never JSON-encoded. A raw payload may
/// hold bytes that are not valid UTF-8 (the decoder preserves whatever it
/// received), but such a payload is rejected when encoding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RawData(Bytes);

impl RawData {
    /// Wrap already-encoded bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The payload as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Consume the wrapper and return the underlying bytes.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for RawData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for RawData {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl From<Vec<u8>> for RawData {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<String> for RawData {
    fn from(value: String) -> Self {
        Self(Bytes::from(value))
    }
}

impl From<&str> for RawData {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<&[u8]> for RawData {
    fn from(value: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(value))
    }
}

/// Event payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Data {
    /// Structured payload, JSON-encoded on the wire.
    Json(serde_json::Value),
    /// Pre-encoded payload, written as-is.
    Raw(RawData),
}

impl Data {
    /// Convert any serializable value into a structured payload.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::JsonEncoding`] if `value` cannot be represented as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ValidationError> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(ValidationError::JsonEncoding)
    }

    /// Wrap pre-encoded bytes.
    pub fn raw(bytes: impl Into<RawData>) -> Self {
        Self::Raw(bytes.into())
    }

    /// The raw payload, if this is raw data.
    pub fn as_raw(&self) -> Option<&RawData> {
        match self {
            Self::Raw(raw) => Some(raw),
            Self::Json(_) => None,
        }
    }

    /// The structured payload, if this is JSON data.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }
}

impl From<serde_json::Value> for Data {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<RawData> for Data {
    fn from(value: RawData) -> Self {
        Self::Raw(value)
    }
}

/// A single Server-Sent Event.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    /// Reconnection identifier; omitted from the wire when empty.
    pub id: String,

    /// Event type; omitted when empty or `"message"`.
    pub event_type: String,

    /// Payload; `None` produces a meta-only frame without `data:` lines.
    pub data: Option<Data>,

    /// Reconnection delay; omitted when zero, invalid when negative.
    pub retry: TimeDelta,

    /// Split a raw payload into one `data:` line per line of text.
    ///
    /// Only meaningful for [`Data::Raw`]. When false the payload must not
    /// contain CR or LF.
    pub split: bool,

    /// Server receipt time. Never written to the wire.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            id: String::new(),
            event_type: String::new(),
            data: None,
            retry: TimeDelta::zero(),
            split: false,
            timestamp: None,
        }
    }
}

impl Event {
    /// Create an empty (meta-only) event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an event carrying a raw payload.
    pub fn raw(data: impl Into<RawData>) -> Self {
        Self {
            data: Some(Data::Raw(data.into())),
            ..Self::default()
        }
    }

    /// Create an event carrying a JSON-encoded payload.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::JsonEncoding`] if `value` cannot be represented as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, ValidationError> {
        Ok(Self {
            data: Some(Data::json(value)?),
            ..Self::default()
        })
    }

    /// Set the event ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the event type.
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Set the payload.
    pub fn with_data(mut self, data: impl Into<Data>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the reconnection delay.
    pub fn with_retry(mut self, retry: TimeDelta) -> Self {
        self.retry = retry;
        self
    }

    /// Split a raw payload on line breaks.
    pub fn with_split(mut self, split: bool) -> Self {
        self.split = split;
        self
    }

    /// Record the server receipt time.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Reset every field in place, keeping string allocations.
    pub fn clear(&mut self) {
        self.id.clear();
        self.event_type.clear();
        self.data = None;
        self.retry = TimeDelta::zero();
        self.split = false;
        self.timestamp = None;
    }

    /// Whether the event type is the wire default and can be omitted.
    pub fn has_default_type(&self) -> bool {
        self.event_type.is_empty() || self.event_type == DEFAULT_EVENT_TYPE
    }

    /// Check that the event can be written without corrupting the stream.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule, checked in this order: id characters,
    /// retry sign, event type characters, raw payload encoding and line breaks.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.contains(['\0', '\r', '\n']) {
            return Err(ValidationError::ForbiddenIdChar);
        }

        if self.retry < TimeDelta::zero() {
            return Err(ValidationError::NegativeRetry);
        }

        if !self.has_default_type() && self.event_type.contains(['\r', '\n']) {
            return Err(ValidationError::EventContainsNewline);
        }

        if let Some(Data::Raw(raw)) = &self.data {
            if raw.as_str().is_none() {
                return Err(ValidationError::RawNotUtf8);
            }
            if !self.split && raw.as_bytes().iter().any(|&b| b == b'\r' || b == b'\n') {
                return Err(ValidationError::RawContainsNewline);
            }
        }

        Ok(())
    }

    /// Render the complete frame, including the terminating blank line.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the event is invalid.
    pub fn to_text(&self) -> Result<Bytes, ValidationError> {
        let mut buf = BytesMut::new();
        write_event(&mut buf, self)?;
        Ok(buf.freeze())
    }

    /// Parse a single frame from text and validate it.
    ///
    /// Input that ends without producing a frame yields an empty event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] for a truncated frame and
    /// [`Error::Validation`] if the parsed event would not re-encode.
    pub fn from_text(text: &[u8]) -> Result<Self, Error> {
        let mut codec = SseCodec::new();
        let mut buf = BytesMut::from(text);

        let event = match codec.decode(&mut buf)? {
            Some(event) => event,
            None => match codec.decode_eof(&mut buf)? {
                Some(event) => event,
                None => return Ok(Self::default()),
            },
        };

        event.validate()?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_ok() {
        let event = Event::raw("hello")
            .with_id("1")
            .with_event_type("update")
            .with_retry(TimeDelta::milliseconds(1500));
        assert!(event.validate().is_ok());
        assert!(Event::new().validate().is_ok());
    }

    #[test]
    fn test_validate_id() {
        for id in ["a\0b", "a\rb", "a\nb"] {
            let err = Event::new().with_id(id).validate().unwrap_err();
            assert!(matches!(err, ValidationError::ForbiddenIdChar), "{id:?}");
        }
    }

    #[test]
    fn test_validate_retry() {
        let err = Event::new()
            .with_retry(TimeDelta::milliseconds(-1))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("retry must be >=0"));
        assert!(Event::new().with_retry(TimeDelta::zero()).validate().is_ok());
    }

    #[test]
    fn test_validate_event_type() {
        let err = Event::new()
            .with_event_type("up\ndate")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ValidationError::EventContainsNewline));
    }

    #[test]
    fn test_validate_raw() {
        let err = Event::raw("a\nb").validate().unwrap_err();
        assert!(err.to_string().contains("Split is false"));

        let err = Event::raw("a\rb").validate().unwrap_err();
        assert!(matches!(err, ValidationError::RawContainsNewline));

        assert!(Event::raw("a\nb").with_split(true).validate().is_ok());

        let err = Event::raw(vec![0xff, 0xfe]).validate().unwrap_err();
        assert!(matches!(err, ValidationError::RawNotUtf8));
    }

    #[test]
    fn test_validation_order() {
        // id is checked before retry
        let event = Event::new()
            .with_id("x\n")
            .with_retry(TimeDelta::milliseconds(-5));
        assert!(matches!(
            event.validate(),
            Err(ValidationError::ForbiddenIdChar)
        ));
    }

    #[test]
    fn test_clear_resets_fields() {
        let mut event = Event::json(&json!({"a": 1}))
            .unwrap()
            .with_id("7")
            .with_event_type("tick")
            .with_retry(TimeDelta::seconds(1))
            .with_split(true)
            .with_timestamp(Utc::now());
        event.clear();
        assert_eq!(event, Event::default());
    }

    #[test]
    fn test_to_text_and_back() {
        let event = Event::json(&json!({"status": "ok"}))
            .unwrap()
            .with_id("42")
            .with_event_type("update");
        let text = event.to_text().unwrap();
        assert_eq!(
            &text[..],
            b"id: 42\nevent: update\ndata: {\"status\":\"ok\"}\n\n"
        );
        assert_eq!(Event::from_text(&text).unwrap(), event);
    }

    #[test]
    fn test_from_text_empty() {
        assert_eq!(Event::from_text(b"").unwrap(), Event::default());
        assert_eq!(Event::from_text(b": comment\n\n").unwrap(), Event::default());
    }

    #[test]
    fn test_from_text_truncated() {
        let err = Event::from_text(b"data: test\n").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_from_text_rejects_invalid_utf8() {
        let err = Event::from_text(b"data: \xff\n\n").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_raw_data_conversions() {
        let raw = RawData::from("abc");
        assert_eq!(raw.as_str(), Some("abc"));
        assert_eq!(raw.len(), 3);
        assert!(RawData::default().is_empty());
        assert_eq!(RawData::from(vec![0xff]).as_str(), None);
        assert_eq!(Data::raw("x").as_raw().map(RawData::as_bytes), Some(&b"x"[..]));
        assert_eq!(Data::json(&1).unwrap().as_json(), Some(&json!(1)));
    }
}
