use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::broker::Broker;

/// Drive one client WebSocket until it closes.
///
/// Outbound events are written by a dedicated task fed from the connection's
/// relay queue; inbound text frames are handled in arrival order.
pub async fn handle_socket(socket: WebSocket, broker: Broker) {
    let (conn_id, mut outbound) = broker.connect().await;
    let (mut sink, mut stream) = socket.split();

    let writer_conn = conn_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let text = match event.to_text() {
                Ok(text) => text,
                Err(e) => {
                    warn!(conn = %writer_conn.short(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                debug!(conn = %writer_conn.short(), "Socket closed while writing");
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Err(e) = broker.handle_text(&conn_id, &text).await {
                    debug!(conn = %conn_id.short(), error = %e, "Ignoring malformed event");
                }
            }
            Ok(Message::Binary(_)) => {
                debug!(conn = %conn_id.short(), "Ignoring binary frame");
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(conn = %conn_id.short(), error = %e, "WebSocket error");
                break;
            }
        }
    }

    broker.disconnect(&conn_id).await;
    writer.abort();
}
