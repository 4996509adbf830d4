//! Connection manager: one duplex transport, kept alive.
//!
//! The manager runs as a single task that owns the transport, the reconnect
//! and heartbeat timers, and the `connecting -> connected -> disconnected`
//! state machine. Commands, attempt results, timer expirations and transport
//! events all arrive on that task, so transitions never interleave.
//!
//! Every asynchronous input carries the epoch it was issued under. Abandoning
//! an attempt, losing a transport, or cancelling timers bumps the epoch, and
//! inputs from an older epoch are dropped on arrival.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::envelope;
use crate::error::{Result, SyncError};
use crate::protocol::ping_frame;
use crate::router::EventRouter;
use crate::scheduler::ScheduledTask;
use crate::transport::{Connector, TransportEvent, TransportHandle};

pub const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
pub const MAX_DELAY: Duration = Duration::from_millis(30_000);
pub const BACKOFF_MULTIPLIER: f64 = 1.5;
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(15_000);

const LIFECYCLE_CHANNEL_CAPACITY: usize = 128;
const MAX_MULTIPLIER: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notifications emitted by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Open,
    Close,
    Error(String),
    Reconnecting { attempt: u32, delay: Duration },
}

/// Timing knobs for the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOptions {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub heartbeat_interval: Duration,
    /// Treat the connection as lost when nothing has been received for this
    /// long. Checked on heartbeat ticks. Disabled when `None`.
    pub stale_after: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            initial_delay: INITIAL_DELAY,
            max_delay: MAX_DELAY,
            backoff_multiplier: BACKOFF_MULTIPLIER,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            stale_after: None,
        }
    }
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Option<Duration>) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// Reconnect delay sequence: each delay is the previous one (never less than
/// the initial delay) times the multiplier, capped at the maximum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    previous: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.max(1.0).min(MAX_MULTIPLIER),
            previous: initial,
        }
    }

    pub fn from_options(options: &SyncOptions) -> Self {
        Self::new(
            options.initial_delay,
            options.max_delay,
            options.backoff_multiplier,
        )
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.previous.max(self.initial);
        let next = Duration::try_from_secs_f64(base.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max)
            .min(self.max);
        self.previous = next;
        next
    }

    pub fn reset(&mut self) {
        self.previous = self.initial;
    }
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Reconnect,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum Timer {
    Reconnect(u64),
    Heartbeat(u64),
}

struct AttemptResult {
    epoch: u64,
    result: Result<TransportHandle>,
}

/// Cloneable view of a running connection manager.
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
}

impl ConnectionHandle {
    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status() == ConnectionStatus::Connected
    }

    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Starts a connection attempt if none is open or in flight, and lifts
    /// an intentional disconnect.
    pub fn connect(&self) -> Result<()> {
        self.send(Command::Connect)
    }

    /// Closes the transport and stops reconnecting until `connect` or
    /// `reconnect` is called.
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    /// Drops whatever is open or in flight, resets backoff, and connects now.
    pub fn reconnect(&self) -> Result<()> {
        self.send(Command::Reconnect)
    }

    pub async fn wait_for_status(&self, target: ConnectionStatus) -> Result<()> {
        let mut status = self.status.clone();
        status
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| SyncError::NotRunning)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::NotRunning)
    }
}

/// Owns the manager task. Dropping it tears the connection down.
pub struct ConnectionManager {
    handle: ConnectionHandle,
    task: Option<JoinHandle<()>>,
}

impl ConnectionManager {
    /// Spawns the manager on the current tokio runtime and starts the first
    /// connection attempt immediately. Decoded frames are dispatched through
    /// `router` on the manager task.
    pub fn spawn(
        url: impl Into<String>,
        connector: Arc<dyn Connector>,
        options: SyncOptions,
        router: EventRouter,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (lifecycle_tx, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
        let (timers_tx, timers_rx) = mpsc::unbounded_channel();

        let url = url.into();
        let endpoint = url
            .split_once('?')
            .map(|(prefix, _)| prefix)
            .unwrap_or(&url)
            .to_string();

        let driver = Driver {
            url,
            endpoint,
            connector,
            backoff: Backoff::from_options(&options),
            options,
            router,
            status: status_tx,
            lifecycle: lifecycle_tx.clone(),
            commands: commands_rx,
            attempts_tx,
            attempts_rx,
            timers_tx,
            timers_rx,
            epoch: 0,
            intentional: false,
            failures: 0,
            attempt: None,
            transport: None,
            reconnect_timer: None,
            heartbeat: None,
            last_inbound: Instant::now(),
        };
        let task = tokio::spawn(driver.run());

        Self {
            handle: ConnectionHandle {
                commands: commands_tx,
                status: status_rx,
                lifecycle: lifecycle_tx,
            },
            task: Some(task),
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.handle.connection_status()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.handle.subscribe_lifecycle()
    }

    pub fn connect(&self) -> Result<()> {
        self.handle.connect()
    }

    pub fn disconnect(&self) -> Result<()> {
        self.handle.disconnect()
    }

    pub fn reconnect(&self) -> Result<()> {
        self.handle.reconnect()
    }

    /// Disconnects and waits for the manager task to exit. No router or
    /// lifecycle callback fires after this returns.
    pub async fn shutdown(mut self) {
        let _ = self.handle.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Driver {
    url: String,
    endpoint: String,
    connector: Arc<dyn Connector>,
    options: SyncOptions,
    backoff: Backoff,
    router: EventRouter,
    status: watch::Sender<ConnectionStatus>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    attempts_tx: mpsc::UnboundedSender<AttemptResult>,
    attempts_rx: mpsc::UnboundedReceiver<AttemptResult>,
    timers_tx: mpsc::UnboundedSender<Timer>,
    timers_rx: mpsc::UnboundedReceiver<Timer>,
    epoch: u64,
    intentional: bool,
    failures: u32,
    attempt: Option<JoinHandle<()>>,
    transport: Option<TransportHandle>,
    reconnect_timer: Option<ScheduledTask>,
    heartbeat: Option<ScheduledTask>,
    last_inbound: Instant,
}

impl Driver {
    async fn run(mut self) {
        self.start_attempt();

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Connect) => self.connect(),
                        Some(Command::Disconnect) => self.disconnect(),
                        Some(Command::Reconnect) => self.reconnect(),
                        Some(Command::Shutdown) | None => {
                            self.disconnect();
                            break;
                        }
                    }
                }
                Some(attempt) = self.attempts_rx.recv() => self.on_attempt(attempt),
                Some(timer) = self.timers_rx.recv() => self.on_timer(timer),
                event = next_transport_event(&mut self.transport) => self.on_transport_event(event),
            }
        }

        tracing::debug!(target = "playbook_sync::connection", "connection manager stopped");
    }

    fn connect(&mut self) {
        self.intentional = false;
        if self.attempt.is_some() || self.transport.is_some() {
            return;
        }
        self.start_attempt();
    }

    fn disconnect(&mut self) {
        self.intentional = true;
        let was_connected = self.teardown_current();
        self.set_status(ConnectionStatus::Disconnected);
        if was_connected {
            self.emit(LifecycleEvent::Close);
        }
        tracing::info!(target = "playbook_sync::connection", endpoint = %self.endpoint, "disconnected intentionally");
    }

    fn reconnect(&mut self) {
        self.intentional = false;
        if self.teardown_current() {
            self.emit(LifecycleEvent::Close);
        }
        self.backoff.reset();
        self.failures = 0;
        self.start_attempt();
    }

    /// Cancels timers and drops any attempt or transport. Returns whether a
    /// transport was open.
    fn teardown_current(&mut self) -> bool {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.cancel();
        }
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.cancel();
        }
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        self.epoch += 1;
        match self.transport.take() {
            Some(transport) => {
                transport.close();
                true
            }
            None => false,
        }
    }

    fn start_attempt(&mut self) {
        if self.attempt.is_some() || self.transport.is_some() {
            return;
        }
        self.reconnect_timer = None;
        self.epoch += 1;
        let epoch = self.epoch;
        self.set_status(ConnectionStatus::Connecting);
        tracing::debug!(target = "playbook_sync::connection", endpoint = %self.endpoint, epoch, "opening transport");

        let pending = self.connector.connect(&self.url);
        let attempts = self.attempts_tx.clone();
        self.attempt = Some(tokio::spawn(async move {
            let result = pending.await;
            let _ = attempts.send(AttemptResult { epoch, result });
        }));
    }

    fn on_attempt(&mut self, attempt: AttemptResult) {
        if attempt.epoch != self.epoch || self.attempt.is_none() {
            if let Ok(transport) = attempt.result {
                transport.close();
            }
            return;
        }
        self.attempt = None;

        match attempt.result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.backoff.reset();
                self.failures = 0;
                self.last_inbound = Instant::now();
                self.set_status(ConnectionStatus::Connected);
                self.heartbeat = Some(ScheduledTask::every(
                    self.options.heartbeat_interval,
                    self.timers_tx.clone(),
                    Timer::Heartbeat(self.epoch),
                ));
                tracing::info!(target = "playbook_sync::connection", endpoint = %self.endpoint, "connected");
                self.emit(LifecycleEvent::Open);
            }
            Err(error) => {
                tracing::warn!(
                    target = "playbook_sync::connection",
                    endpoint = %self.endpoint,
                    error = %error,
                    "connect failed"
                );
                self.on_connection_lost(Some(error.to_string()));
            }
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Frame(text) => {
                self.last_inbound = Instant::now();
                let events = envelope::decode(&text);
                self.router.dispatch_all(&events);
            }
            TransportEvent::Closed => {
                tracing::info!(target = "playbook_sync::connection", endpoint = %self.endpoint, "transport closed");
                self.on_connection_lost(None);
            }
            TransportEvent::Error(error) => {
                tracing::warn!(target = "playbook_sync::connection", endpoint = %self.endpoint, error = %error, "transport error");
                self.on_connection_lost(Some(error));
            }
        }
    }

    fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Reconnect(epoch) => {
                if epoch != self.epoch || self.intentional {
                    return;
                }
                self.reconnect_timer = None;
                self.start_attempt();
            }
            Timer::Heartbeat(epoch) => {
                if epoch != self.epoch || self.status_now() != ConnectionStatus::Connected {
                    return;
                }
                if let Some(stale_after) = self.options.stale_after {
                    let silent_for = self.last_inbound.elapsed();
                    if silent_for > stale_after {
                        tracing::warn!(
                            target = "playbook_sync::connection",
                            endpoint = %self.endpoint,
                            silent_ms = silent_for.as_millis() as u64,
                            "no inbound frames; treating connection as lost"
                        );
                        self.on_connection_lost(Some(format!(
                            "no inbound frames for {} ms",
                            silent_for.as_millis()
                        )));
                        return;
                    }
                }
                let sent = self
                    .transport
                    .as_ref()
                    .is_some_and(|transport| transport.send_text(ping_frame()));
                if !sent {
                    self.on_connection_lost(Some("heartbeat send failed".to_string()));
                }
            }
        }
    }

    /// Close, error, failed attempt and staleness all land here exactly once
    /// per transport: the transport is taken and the epoch bumped, so any
    /// trailing signal from it is ignored.
    fn on_connection_lost(&mut self, error: Option<String>) {
        let was_connected = self.teardown_current();
        self.set_status(ConnectionStatus::Disconnected);
        if let Some(error) = error {
            self.emit(LifecycleEvent::Error(error));
        }
        if was_connected {
            self.emit(LifecycleEvent::Close);
        }
        if self.intentional {
            return;
        }

        let delay = self.backoff.next_delay();
        self.failures = self.failures.saturating_add(1);
        tracing::info!(
            target = "playbook_sync::connection",
            endpoint = %self.endpoint,
            attempt = self.failures,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        self.emit(LifecycleEvent::Reconnecting {
            attempt: self.failures,
            delay,
        });
        self.reconnect_timer = Some(ScheduledTask::once(
            delay,
            self.timers_tx.clone(),
            Timer::Reconnect(self.epoch),
        ));
    }

    fn status_now(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            tracing::debug!(
                target = "playbook_sync::connection",
                from = %previous,
                to = %status,
                "connection status changed"
            );
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.lifecycle.send(event);
    }
}

/// Runs on shutdown and when the manager is dropped mid-run, so observers
/// never see `connected` once the transport is gone.
impl Drop for Driver {
    fn drop(&mut self) {
        if self.teardown_current() {
            self.emit(LifecycleEvent::Close);
        }
        self.set_status(ConnectionStatus::Disconnected);
    }
}

async fn next_transport_event(transport: &mut Option<TransportHandle>) -> TransportEvent {
    match transport {
        Some(transport) => transport
            .inbound
            .recv()
            .await
            .unwrap_or(TransportEvent::Closed),
        None => std::future::pending().await,
    }
}
