//! The duplex transport seam.
//!
//! A [`Connector`] opens one transport and hands back a [`TransportHandle`]:
//! a sender for outbound frames and a receiver for inbound events. The
//! connection manager only ever talks to the handle, so the WebSocket
//! implementation here can be swapped for an in-memory one in tests.

use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Closed,
    Error(String),
}

/// An open transport. Dropping `outbound` closes it.
#[derive(Debug)]
pub struct TransportHandle {
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportHandle {
    pub fn send_text(&self, text: String) -> bool {
        self.outbound.send(OutboundFrame::Text(text)).is_ok()
    }

    pub fn close(self) {
        let _ = self.outbound.send(OutboundFrame::Close);
    }
}

pub trait Connector: Send + Sync + 'static {
    /// Completes once the open handshake has finished or failed.
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<TransportHandle>>;
}

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<TransportHandle>> {
        let url = url.to_string();
        async move {
            let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
            let (mut write, mut read) = ws.split();
            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundFrame>();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TransportEvent>();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        frame = outbound_rx.recv() => {
                            match frame {
                                Some(OutboundFrame::Text(text)) => {
                                    if let Err(error) = write.send(Message::Text(text)).await {
                                        tracing::warn!(target = "playbook_sync::transport", error = %error, "ws write error");
                                        let _ = inbound_tx.send(TransportEvent::Error(error.to_string()));
                                        break;
                                    }
                                }
                                Some(OutboundFrame::Close) | None => {
                                    let _ = write.close().await;
                                    break;
                                }
                            }
                        }
                        frame = read.next() => {
                            match frame {
                                Some(Ok(Message::Text(text))) => {
                                    if inbound_tx.send(TransportEvent::Frame(text)).is_err() {
                                        let _ = write.close().await;
                                        break;
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    tracing::debug!(target = "playbook_sync::transport", "ws closed by peer");
                                    let _ = inbound_tx.send(TransportEvent::Closed);
                                    break;
                                }
                                Some(Err(error)) => {
                                    tracing::warn!(target = "playbook_sync::transport", error = %error, "ws read error");
                                    let _ = inbound_tx.send(TransportEvent::Error(error.to_string()));
                                    break;
                                }
                                _ => {}
                            }
                        }
                    }
                }
            });

            Ok(TransportHandle {
                outbound: outbound_tx,
                inbound: inbound_rx,
            })
        }
        .boxed()
    }
}
