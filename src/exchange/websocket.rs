//! Binance WebSocket streams: public trade ticks and the private user data stream.

use super::types::{ExecutionReport, StreamEnvelope, TradeTick};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::Deserialize;
use std::future::Future;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Combined-stream URL for the raw trade stream of one symbol.
pub fn trade_stream_url(ws_base_url: &str, symbol: &str) -> String {
    format!(
        "{}/stream?streams={}@trade",
        ws_base_url.trim_end_matches('/'),
        symbol.to_lowercase()
    )
}

/// URL of the user data stream bound to a listen key.
pub fn user_data_url(ws_base_url: &str, listen_key: &str) -> String {
    format!("{}/ws/{}", ws_base_url.trim_end_matches('/'), listen_key)
}

/// Parse a trade tick, accepting both combined-stream envelopes and bare events.
pub fn parse_trade_tick(text: &str) -> Result<TradeTick> {
    if let Ok(envelope) = serde_json::from_str::<StreamEnvelope<TradeTick>>(text) {
        return Ok(envelope.data);
    }
    serde_json::from_str(text).context("Failed to parse trade tick")
}

#[derive(Deserialize)]
struct EventHeader {
    #[serde(rename = "e", default)]
    event_type: Option<String>,
    /// Newer WebSocket API subscriptions nest the payload under `event`.
    #[serde(default)]
    event: Option<serde_json::Value>,
}

/// Parse a user data stream message.
///
/// Returns `Ok(None)` for well-formed events that are not execution reports
/// (balance updates, account positions, listen key expiry).
pub fn parse_user_event(text: &str) -> Result<Option<ExecutionReport>> {
    let header: EventHeader =
        serde_json::from_str(text).context("Failed to parse user data event")?;

    if let Some(inner) = header.event {
        let is_report = inner.get("e").and_then(|e| e.as_str()) == Some("executionReport");
        if !is_report {
            return Ok(None);
        }
        let report = serde_json::from_value(inner).context("Malformed execution report")?;
        return Ok(Some(report));
    }

    match header.event_type.as_deref() {
        Some("executionReport") => {
            let report = serde_json::from_str(text).context("Malformed execution report")?;
            Ok(Some(report))
        }
        _ => Ok(None),
    }
}

/// How a stream session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The caller's stop future completed.
    Stopped,
    /// The server closed the connection or the stream ended.
    ClosedByServer,
}

/// Connect to `url` and feed every text frame to `on_text` until `stop`
/// completes or the connection drops.
///
/// Pings are answered by tungstenite while the stream is being read.
pub async fn run_session<S, F>(url: &str, stop: S, mut on_text: F) -> Result<SessionEnd>
where
    S: Future<Output = ()>,
    F: FnMut(&str),
{
    info!(%url, "Connecting to WebSocket");

    let (mut ws_stream, _) = connect_async(url)
        .await
        .context("Failed to connect to WebSocket")?;

    info!(%url, "WebSocket connected");
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => {
                if let Err(e) = ws_stream.close(None).await {
                    debug!(error = %e, "Error while closing WebSocket");
                }
                return Ok(SessionEnd::Stopped);
            }
            msg = ws_stream.next() => match msg {
                Some(Ok(Message::Text(text))) => on_text(text.as_str()),
                Some(Ok(Message::Ping(_))) => debug!("Received ping"),
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "WebSocket closed by server");
                    return Ok(SessionEnd::ClosedByServer);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    return Err(e).context("WebSocket read failed");
                }
                None => return Ok(SessionEnd::ClosedByServer),
            }
        }
    }
}
