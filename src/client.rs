//! Session wiring: connection manager, router and store in one place.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use crate::connection::{
    ConnectionHandle, ConnectionManager, ConnectionStatus, LifecycleEvent, SyncOptions,
};
use crate::endpoint::{self, EndpointSource};
use crate::error::Result;
use crate::protocol::{ExecutionUpdate, ScreenshotFrame};
use crate::router::{EventRouter, SubscriptionId};
use crate::store::{ExecutionStore, ExecutionStoreReader};
use crate::transport::Connector;

/// One application session's view of the execution stream.
///
/// Built once at startup. Inbound execution updates and screenshot frames are
/// written into the [`ExecutionStore`]; additional subscribers can be
/// registered on the same router.
pub struct SyncClient {
    manager: ConnectionManager,
    router: EventRouter,
    store: ExecutionStore,
}

impl SyncClient {
    /// Resolves the endpoint once and starts connecting.
    pub fn start(
        source: &dyn EndpointSource,
        connector: Arc<dyn Connector>,
        options: SyncOptions,
        store: ExecutionStore,
    ) -> Result<Self> {
        let url = endpoint::resolve(source)?;
        Ok(Self::start_with_url(url, connector, options, store))
    }

    pub fn start_with_url(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        options: SyncOptions,
        store: ExecutionStore,
    ) -> Self {
        let router = EventRouter::new();

        let updates = store.clone();
        router.on_execution_update(move |update: &ExecutionUpdate| {
            updates.set_execution_update(&update.execution_id, update.fields.clone());
        });
        let frames = store.clone();
        router.on_screenshot_frame(move |frame: &ScreenshotFrame| {
            frames.set_screenshot_frame(&frame.execution_id, frame.clone());
        });

        let manager = ConnectionManager::spawn(url, connector, options, router.clone());
        store.attach_connection_status(manager.handle().status_receiver());

        Self {
            manager,
            router,
            store,
        }
    }

    pub fn store(&self) -> ExecutionStoreReader {
        self.store.reader()
    }

    pub fn connection(&self) -> ConnectionHandle {
        self.manager.handle()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.manager.connection_status()
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn connect(&self) -> Result<()> {
        self.manager.connect()
    }

    pub fn disconnect(&self) -> Result<()> {
        self.manager.disconnect()
    }

    pub fn reconnect(&self) -> Result<()> {
        self.manager.reconnect()
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.manager.subscribe_lifecycle()
    }

    pub fn on_execution_update<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ExecutionUpdate) + Send + Sync + 'static,
    {
        self.router.on_execution_update(handler)
    }

    pub fn on_screenshot_frame<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ScreenshotFrame) + Send + Sync + 'static,
    {
        self.router.on_screenshot_frame(handler)
    }

    pub fn on<F>(&self, event_type: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.router.on(event_type, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.router.unsubscribe(id)
    }

    /// Tears the session down; no subscriber fires after this returns.
    pub async fn shutdown(self) {
        self.manager.shutdown().await;
    }
}
