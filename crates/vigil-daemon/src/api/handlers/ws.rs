//! Live event stream over WebSocket

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info};
use vigil_hub::Subscription;

use crate::api::state::AppState;

/// Handler for GET /ws
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Pump hub envelopes to the client until either side goes away.
///
/// The hub drops a subscriber whose buffer fills; the write pump then sees
/// its channel close and ends the connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let Subscription { id, mut receiver } = state.hub.register();
    state.metrics.set_subscribers(state.hub.subscriber_count());
    info!(subscriber = %id, "Live subscriber connected");

    let (mut outbound, mut inbound) = socket.split();
    let mut shutdown = state.shutdown.clone();

    let mut write_pump = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    let stop = changed.is_err() || *shutdown.borrow();
                    if stop {
                        let _ = outbound.send(Message::Close(None)).await;
                        break;
                    }
                }
                frame = receiver.recv() => {
                    let Some(text) = frame else {
                        break;
                    };
                    if outbound.send(Message::Text(text.to_string())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut read_pump = tokio::spawn(async move {
        while let Some(message) = inbound.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut write_pump => read_pump.abort(),
        _ = &mut read_pump => write_pump.abort(),
    }

    let removed = state.hub.unregister(&id);
    state.metrics.set_subscribers(state.hub.subscriber_count());
    debug!(subscriber = %id, removed, "Unregistered live subscriber");
    info!(subscriber = %id, "Live subscriber disconnected");
}
