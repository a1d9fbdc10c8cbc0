//! # ssekit
//!
//! Server-Sent Events (`text/event-stream`) for async Rust: a streaming
//! decoder, a validating encoder and a server-side connection that can be
//! shared between tasks.
//!
//! ## Features
//!
//! - **Decoder**: incremental parsing from any [`AsyncRead`](tokio::io::AsyncRead),
//!   CR/LF/CRLF line endings, BOM stripping, sticky `id`/`retry`
//! - **Encoder**: events are validated before a single byte is written
//! - **Codec**: [`SseCodec`] for `tokio_util::codec::FramedRead`/`FramedWrite`
//! - **Connection**: serialized writes, heartbeats, farewell event, per-call
//!   cancellation and deadlines
//! - **axum** (default feature): [`channel`] bridges a [`Connection`] to an
//!   axum response body
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ssekit::{Decoder, Event};
//!
//! # async fn example() -> Result<(), ssekit::DecodeError> {
//! let input: &[u8] = b"event: greeting\ndata: hello\n\n";
//! let mut decoder = Decoder::new(input);
//! while let Some(event) = decoder.next_event().await? {
//!     println!("{}: {:?}", event.event_type, event.data);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Writing to a response:
//!
//! ```rust,ignore
//! let conn = ssekit::upgrade(signal, writer, SseConfig::default()).await?;
//! conn.send_event(&SendContext::background(), &Event::raw("ready").with_event_type("status")).await?;
//! conn.close().await;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod clock;
pub mod codec;
pub mod config;
pub mod connection;
pub mod context;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod event;
pub mod writer;

#[cfg(feature = "axum")]
#[cfg_attr(docsrs, doc(cfg(feature = "axum")))]
pub mod channel;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::SseCodec;
pub use config::SseConfig;
pub use connection::{Connection, EVENT_STREAM_CONTENT_TYPE, upgrade};
pub use context::SendContext;
pub use decoder::Decoder;
pub use encoder::{Encoder, write_comment, write_event};
pub use error::{DecodeError, Error, Result, ValidationError};
pub use event::{DEFAULT_EVENT_TYPE, Data, Event, RawData};
pub use writer::{Capabilities, Flusher, ResponseWriter, WriteDeadliner};

#[cfg(feature = "axum")]
pub use channel::{ChannelWriter, ResponseHandle, channel};

/// Request header carrying the last event ID a reconnecting client saw.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";
