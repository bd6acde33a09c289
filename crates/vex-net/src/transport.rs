//! Text-frame transport under the connector.
//!
//! A [`Transport`] is a pair of channels: frames to send, and frames (or the
//! close) received. The websocket bridge spawns a writer and a reader task
//! around a `tokio-tungstenite` stream. Dropping the outbound sender closes
//! the socket. [`memory`] builds an in-process pair for driving a connector
//! against a scripted peer.

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::Target;
use crate::error::ConnectorError;

/// What the read half of a transport yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    /// The connection ended, with the peer's or the error's reason if any.
    Closed(Option<String>),
}

#[derive(Debug)]
pub struct Transport {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports for the reconnect loop.
pub trait Dialer: Send + Sync + 'static {
    fn dial(&self, target: &Target) -> BoxFuture<'static, Result<Transport, ConnectorError>>;
}

/// Dials real vex servers over websocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketDialer;

impl Dialer for WebSocketDialer {
    fn dial(&self, target: &Target) -> BoxFuture<'static, Result<Transport, ConnectorError>> {
        let url = target.url();
        Box::pin(async move { connect(&url).await })
    }
}

/// Open a websocket and bridge it onto a [`Transport`].
pub async fn connect(url: &str) -> Result<Transport, ConnectorError> {
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| ConnectorError::Transport(e.to_string()))?;
    info!(url, "Websocket connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    // Writer: runs until the connector drops its sender, then closes.
    tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if let Err(e) = ws_sender.send(Message::Text(text)).await {
                warn!(error = %e, "Websocket send failed");
                break;
            }
        }
        let _ = ws_sender.close().await;
        debug!("Websocket writer stopped");
    });

    tokio::spawn(async move {
        let mut reason = None;
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if in_tx.send(TransportEvent::Frame(text)).is_err() {
                        return;
                    }
                }
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => {
                        if in_tx.send(TransportEvent::Frame(text)).is_err() {
                            return;
                        }
                    }
                    Err(_) => debug!("Dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    reason = Some(e.to_string());
                    break;
                }
            }
        }
        let _ = in_tx.send(TransportEvent::Closed(reason));
    });

    Ok(Transport {
        outbound: out_tx,
        inbound: in_rx,
    })
}

/// The far end of an in-memory transport.
#[derive(Debug)]
pub struct MemoryPeer {
    /// Frames the connector sent. Yields `None` once the connector closed.
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryPeer {
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.to_client
            .send(TransportEvent::Frame(frame.into()))
            .is_ok()
    }

    pub fn hang_up(&self, reason: Option<&str>) {
        let _ = self
            .to_client
            .send(TransportEvent::Closed(reason.map(str::to_string)));
    }
}

/// In-process transport pair.
pub fn memory() -> (Transport, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    (
        Transport {
            outbound: out_tx,
            inbound: in_rx,
        },
        MemoryPeer {
            from_client: out_rx,
            to_client: in_tx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_carries_frames_both_ways() {
        let (mut transport, mut peer) = memory();

        transport.outbound.send("hello".into()).unwrap();
        assert_eq!(peer.from_client.recv().await.as_deref(), Some("hello"));

        assert!(peer.send("world"));
        assert_eq!(
            transport.inbound.recv().await,
            Some(TransportEvent::Frame("world".into()))
        );

        peer.hang_up(Some("bye"));
        assert_eq!(
            transport.inbound.recv().await,
            Some(TransportEvent::Closed(Some("bye".into())))
        );

        drop(transport);
        assert!(peer.from_client.recv().await.is_none());
    }
}
