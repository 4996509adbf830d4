//! In-memory transport for driving the connection manager in tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use playbook_sync::{
    Connector, OutboundFrame, Result, SyncError, TransportEvent, TransportHandle,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// What the next `connect` call does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Accept,
    Fail,
    Hang,
}

/// The server side of one accepted fake transport.
pub struct FakePeer {
    pub sent: mpsc::UnboundedReceiver<OutboundFrame>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl FakePeer {
    pub fn send_frame(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Frame(text.into()));
    }

    pub fn close(&self) {
        let _ = self.events.send(TransportEvent::Closed);
    }

    pub fn error(&self, message: &str) {
        let _ = self.events.send(TransportEvent::Error(message.to_string()));
    }

    /// Drains everything the client has written so far.
    pub fn drain_sent(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.sent.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

pub struct Peers {
    rx: mpsc::UnboundedReceiver<FakePeer>,
}

impl Peers {
    pub async fn next(&mut self) -> FakePeer {
        self.rx.recv().await.expect("connector dropped")
    }
}

struct State {
    attempts: Vec<Instant>,
    plan: VecDeque<Plan>,
    fallback: Plan,
}

pub struct FakeConnector {
    state: Mutex<State>,
    peers: mpsc::UnboundedSender<FakePeer>,
}

impl FakeConnector {
    pub fn new(plan: impl IntoIterator<Item = Plan>, fallback: Plan) -> (Arc<Self>, Peers) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            state: Mutex::new(State {
                attempts: Vec::new(),
                plan: plan.into_iter().collect(),
                fallback,
            }),
            peers: peers_tx,
        });
        (connector, Peers { rx: peers_rx })
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.state.lock().attempts.clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.state.lock().attempts.len()
    }

    /// Gaps between consecutive attempts, in milliseconds.
    pub fn gaps_ms(&self) -> Vec<u128> {
        self.attempts()
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis())
            .collect()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, _url: &str) -> BoxFuture<'static, Result<TransportHandle>> {
        let plan = {
            let mut state = self.state.lock();
            state.attempts.push(Instant::now());
            let fallback = state.fallback;
            state.plan.pop_front().unwrap_or(fallback)
        };

        match plan {
            Plan::Fail => future::ready(Err(SyncError::from(
                tokio_tungstenite::tungstenite::Error::ConnectionClosed,
            )))
            .boxed(),
            Plan::Hang => future::pending().boxed(),
            Plan::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                let _ = self.peers.send(FakePeer {
                    sent: outbound_rx,
                    events: inbound_tx,
                });
                future::ready(Ok(TransportHandle {
                    outbound: outbound_tx,
                    inbound: inbound_rx,
                }))
                .boxed()
            }
        }
    }
}

/// Lets the manager task process whatever is already queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn ping() -> OutboundFrame {
    OutboundFrame::Text(r#"{"type":"ping"}"#.to_string())
}
