use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use ghostshare_shared::{ClientEvent, ProtocolError, ServerEvent};

use crate::error::{ClientError, Result};

/// Connection to the signaling broker.
///
/// Outbound events are written by a background task so sending never blocks
/// the session loop.
pub struct SignalingClient {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ClientError::Signaling(format!("connect to {url}: {e}")))?;
        info!(url = %url, "Connected to signaling broker");

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let text = match event.to_text() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode client event");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(error = %e, "Broker socket closed while writing");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerEvent::from_text(&text) {
                        Ok(event) => {
                            if in_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed broker event"),
                    },
                    Ok(Message::Binary(_)) => {
                        warn!(error = %ProtocolError::UnexpectedBinary, "Ignoring broker frame")
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Broker socket error");
                        break;
                    }
                }
            }
            debug!("Broker reader finished");
        });

        Ok(Self::from_channels(out_tx, in_rx))
    }

    /// Wrap an already established event pipe.
    pub fn from_channels(
        outbound: mpsc::UnboundedSender<ClientEvent>,
        inbound: mpsc::UnboundedReceiver<ServerEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }

    pub fn send(&self, event: ClientEvent) -> Result<()> {
        self.outbound
            .send(event)
            .map_err(|_| ClientError::Signaling("broker connection closed".into()))
    }

    /// Next broker event, `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.inbound.recv().await
    }
}
