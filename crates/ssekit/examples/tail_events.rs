//! Tail Events - decode an event stream from stdin
//!
//! ## Usage
//!
//! ```bash
//! curl -sN http://127.0.0.1:3000/events | cargo run --example tail_events
//! printf 'id: 1\ndata: {"ok":true}\n\n' | cargo run --example tail_events
//! ```

use futures::StreamExt;
use ssekit::{Data, DecodeError, Decoder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let decoder = Decoder::new(tokio::io::stdin());
    let mut events = std::pin::pin!(decoder.into_stream());

    while let Some(result) = events.next().await {
        let event = match result {
            Ok(event) => event,
            Err(DecodeError::UnexpectedEof) => {
                eprintln!("stream ended mid-frame");
                break;
            }
            Err(err) => return Err(err.into()),
        };

        let kind = if event.event_type.is_empty() {
            ssekit::DEFAULT_EVENT_TYPE
        } else {
            event.event_type.as_str()
        };
        let payload = match &event.data {
            Some(Data::Json(value)) => value.to_string(),
            Some(Data::Raw(raw)) => String::from_utf8_lossy(raw.as_bytes()).into_owned(),
            None => String::new(),
        };
        println!("[{}] {} {}", event.id, kind, payload);
    }

    Ok(())
}
