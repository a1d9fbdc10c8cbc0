//! Basic SSE Server - ticks, heartbeats and a farewell event
//!
//! Streams a JSON tick every second to each client, with keep-alive comments
//! in between, and says goodbye after ten ticks.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=debug,ssekit=trace cargo run --example basic_server
//!
//! # In another terminal
//! curl -N http://127.0.0.1:3000/events
//! ```

use std::time::Duration;

use axum::Router;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use serde::Serialize;
use ssekit::{Event, LAST_EVENT_ID_HEADER, SendContext, SseConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const TICKS: u64 = 10;

#[derive(Serialize)]
struct Tick {
    seq: u64,
    resumed_from: Option<String>,
}

async fn events(headers: HeaderMap) -> Response {
    let resumed_from = headers
        .get(LAST_EVENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let (mut writer, handle) = ssekit::channel(32);
    let signal = CancellationToken::new();
    writer.cancel_on_disconnect(signal.clone());

    let config = SseConfig::new()
        .with_heartbeat_interval(Duration::from_millis(400))
        .with_close_event(Event::raw("bye").with_event_type("close"));

    tokio::spawn(async move {
        let conn = match ssekit::upgrade(signal.clone(), writer, config).await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = %err, "upgrade failed");
                return;
            }
        };
        info!(?resumed_from, "client connected");

        let ctx = SendContext::new().with_cancellation(signal);
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        for seq in 0..TICKS {
            interval.tick().await;
            let tick = Tick {
                seq,
                resumed_from: resumed_from.clone(),
            };
            let event = match Event::json(&tick) {
                Ok(event) => event.with_id(seq.to_string()).with_event_type("tick"),
                Err(err) => {
                    warn!(error = %err, "tick not serializable");
                    break;
                }
            };
            if let Err(err) = conn.send_event(&ctx, &event).await {
                info!(error = %err, "stopping stream");
                break;
            }
        }

        conn.close().await;
    });

    handle.into_response().await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(true)
        .init();

    let app = Router::new().route("/events", get(events));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
