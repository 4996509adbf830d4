use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;

use playbook_sync::{
    config::Config,
    events::{init_logging, EventEmitter},
    ExecutionStore, LifecycleEvent, StoreChange, SyncClient, WsConnector,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::parse();
    init_logging(&cfg)?;
    let events = EventEmitter::new(cfg.json_output);

    let client = SyncClient::start(
        &cfg,
        Arc::new(WsConnector),
        cfg.sync_options(),
        ExecutionStore::new(),
    )
    .context("failed to start sync client")?;

    let mut lifecycle = client.subscribe_lifecycle();
    let mut changes = client.store().subscribe();
    let reader = client.store();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target = "playbook_sync::main", "interrupt received; shutting down");
                break;
            }
            event = lifecycle.recv() => {
                match event {
                    Ok(event) => report_lifecycle(&events, &event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(target = "playbook_sync::main", skipped, "lifecycle events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            change = changes.recv() => {
                match change {
                    Ok(StoreChange::Execution(id)) => {
                        let entry = reader.execution(&id).map(Value::Object).unwrap_or(Value::Null);
                        tracing::info!(
                            target = "playbook_sync::main",
                            execution_id = %id,
                            status = reader.status(&id).as_deref().unwrap_or("-"),
                            "execution updated"
                        );
                        events.emit("execution_update", json!({"execution_id": id, "entry": entry}));
                    }
                    Ok(StoreChange::Frame(id)) => {
                        let timestamp = reader.latest_frame(&id).and_then(|frame| frame.timestamp);
                        tracing::debug!(target = "playbook_sync::main", execution_id = %id, "screenshot frame");
                        events.emit("screenshot_frame", json!({"execution_id": id, "timestamp": timestamp}));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(target = "playbook_sync::main", skipped, "store changes dropped; re-reading snapshot");
                        events.emit("snapshot", json!(reader.snapshot()));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    client.shutdown().await;
    events.emit("connection", json!({"status": reader.connection_status()}));
    Ok(())
}

fn report_lifecycle(events: &EventEmitter, event: &LifecycleEvent) {
    match event {
        LifecycleEvent::Open => {
            events.emit("connection", json!({"status": "connected"}));
        }
        LifecycleEvent::Close => {
            events.emit("connection", json!({"status": "disconnected"}));
        }
        LifecycleEvent::Error(error) => {
            events.emit("connection_error", json!({"error": error}));
        }
        LifecycleEvent::Reconnecting { attempt, delay } => {
            events.emit(
                "reconnecting",
                json!({"attempt": attempt, "delay_ms": delay.as_millis() as u64}),
            );
        }
    }
}
