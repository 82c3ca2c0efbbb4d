use axum::extract::ws::{Message, WebSocket};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use depthcalc::{Controller, SeriesHandle};

#[derive(Serialize)]
struct SamplePayload {
    timestamp: f64,
    value: f64,
    seq: u64,
    end_flag: bool,
}

/// Streams every sample of one series, then an end marker.
pub async fn handle_ws_fetch(
    mut socket: WebSocket,
    controller: Arc<tokio::sync::Mutex<Controller>>,
    handle: SeriesHandle,
) {
    // copy the samples so the controller is not locked while sending
    let (name, timestamps, values) = {
        let guard = controller.lock().await;
        match guard.series(handle) {
            Some(s) => (s.name().to_string(), s.timestamps().to_vec(), s.values().to_vec()),
            None => {
                error!("series not found: {}", handle.to_id());
                return;
            }
        }
    };

    info!("ws_fetch streaming started: {}", name);
    let mut seq: u64 = 0;

    for (timestamp, value) in timestamps.into_iter().zip(values) {
        let payload = SamplePayload {
            timestamp,
            value,
            seq,
            end_flag: false,
        };

        let json = match serde_json::to_string(&payload) {
            Ok(j) => j,
            Err(e) => {
                error!("json serialize error: {}", e);
                return;
            }
        };

        if let Err(e) = socket.send(Message::Text(json.into())).await {
            warn!("ws send failed: {}", e);
            return;
        }

        seq += 1;
    }

    let end_payload = SamplePayload {
        timestamp: 0.0,
        value: 0.0,
        seq,
        end_flag: true,
    };

    if let Ok(json) = serde_json::to_string(&end_payload) {
        if let Err(e) = socket.send(Message::Text(json.into())).await {
            warn!("ws end marker not sent: {}", e);
        }
    }

    info!("ws_fetch finished: {} ({} samples)", name, seq);
}
