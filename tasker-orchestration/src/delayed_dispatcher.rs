//! # Delayed-Message Dispatcher (C16)
//!
//! Background loop that promotes scheduled ([`DelayedMessage`]) rows into
//! the live broker once their delivery time arrives. Polls the store for
//! the soonest delivery time instead of a fixed tick so a message with an
//! ETA seconds away isn't stuck waiting out a long poll interval.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tasker_shared::clock::SharedClock;
use tasker_shared::config::BackoffConfig;
use tasker_shared::error::TaskerError;
use tasker_shared::messaging::MessageClient;
use tasker_stores::DelayedMessageStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct DelayedDispatcher {
    store: Arc<dyn DelayedMessageStore>,
    client: Arc<MessageClient>,
    clock: SharedClock,
    poll_interval: StdDuration,
    backoff: BackoffConfig,
}

impl DelayedDispatcher {
    pub fn new(
        store: Arc<dyn DelayedMessageStore>,
        client: Arc<MessageClient>,
        clock: SharedClock,
        poll_interval: StdDuration,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            store,
            client,
            clock,
            poll_interval,
            backoff,
        }
    }

    /// Runs until `cancel` fires. Intended to be spawned as its own task.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.sleep_until_next_tick() => {}
            }
            if cancel.is_cancelled() {
                break;
            }
            if let Err(err) = self.dispatch_due().await {
                warn!(?err, "delayed dispatch tick failed");
            }
        }
    }

    async fn sleep_until_next_tick(&self) {
        let wait = match self.store.get_next_delivery_time().await {
            Ok(Some(next)) => {
                let now = self.clock.now();
                (next - now).to_std().unwrap_or(StdDuration::ZERO).min(self.poll_interval)
            }
            _ => self.poll_interval,
        };
        tokio::time::sleep(wait).await;
    }

    /// Drains every row whose delivery time has passed, publishing each to
    /// its target queue. A message that fails to publish is put back with
    /// an exponentially-backed-off delivery time rather than dropped.
    pub async fn dispatch_due(&self) -> Result<usize, TaskerError> {
        let now = self.clock.now();
        let due = self.store.get_due_messages(now).await?;
        let mut dispatched = 0;

        for row in due {
            let mut message = row.message;
            match self.client.publish(&message.queue, &message).await {
                Ok(()) => {
                    dispatched += 1;
                    debug!(task_id = %row.task_id, "delayed message dispatched");
                }
                Err(err) => {
                    message.retries += 1;
                    let delay = self.backoff.delay_for_attempt(message.retries);
                    let redelivery = now + chrono::Duration::from_std(delay).unwrap_or_default();
                    warn!(task_id = %row.task_id, ?err, retries = message.retries, "delayed dispatch publish failed, requeuing");
                    self.store.add_async(message, redelivery).await?;
                }
            }
        }
        Ok(dispatched)
    }
}
