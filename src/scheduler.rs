//! Cancellable timers that post a message back to their owner.
//!
//! A `ScheduledTask` never runs owner logic itself; it only sends a message
//! on a channel when it fires. Cancelling or dropping it aborts the timer.
//! A message already queued before cancellation is still delivered, so
//! owners tag messages with something they can check for staleness.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Shortest period a repeating task runs at; zero is rounded up to this.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Sends `message` once after `delay`.
    pub fn once<T>(delay: Duration, tx: mpsc::UnboundedSender<T>, message: T) -> Self
    where
        T: Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(message);
        });
        Self { handle }
    }

    /// Sends a clone of `message` every `period`, first after one full period.
    /// A period below [`MIN_PERIOD`] runs at `MIN_PERIOD`.
    pub fn every<T>(period: Duration, tx: mpsc::UnboundedSender<T>, message: T) -> Self
    where
        T: Clone + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticks = tokio::time::interval_at(start, period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if tx.send(message.clone()).is_err() {
                    break;
                }
            }
        });
        Self { handle }
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
