//! Client-side synchronization of playbook execution state.
//!
//! A [`SyncClient`] keeps one WebSocket to the execution backend alive,
//! decodes single and batched event frames, routes them to subscribers, and
//! folds execution updates into a shared [`ExecutionStore`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use playbook_sync::{ExecutionStore, StaticEndpoint, SyncClient, SyncOptions, WsConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SyncClient::start(
//!         &StaticEndpoint::new("ws://127.0.0.1:8765/ws", "local-key"),
//!         Arc::new(WsConnector),
//!         SyncOptions::default(),
//!         ExecutionStore::new(),
//!     )?;
//!
//!     let store = client.store();
//!     let mut changes = store.subscribe();
//!     while let Ok(change) = changes.recv().await {
//!         println!("{change:?}: {:?}", store.snapshot());
//!     }
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod events;
pub mod protocol;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod transport;

pub use client::SyncClient;
pub use connection::{
    Backoff, ConnectionHandle, ConnectionManager, ConnectionStatus, LifecycleEvent, SyncOptions,
};
pub use endpoint::{EndpointSource, StaticEndpoint};
pub use envelope::{decode, Envelope, Event};
pub use error::{Result, SyncError};
pub use protocol::{ExecutionUpdate, ScreenshotFrame};
pub use router::{EventRouter, SubscriptionId};
pub use store::{ExecutionEntry, ExecutionStore, ExecutionStoreReader, StoreChange};
pub use transport::{Connector, OutboundFrame, TransportEvent, TransportHandle, WsConnector};
