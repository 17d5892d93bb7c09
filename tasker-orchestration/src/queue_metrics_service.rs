//! # Queue Metrics Service (C18, aggregation layer)
//!
//! Bridges the live, in-process [`QueueMetrics`] counters to the durable
//! [`HistoricalMetricsStore`]: on an interval, snapshots every queue's
//! current counters into a time-stamped [`MetricsSnapshot`] row so
//! `GetTimeSeries`/`GetMetricsByTaskName` queries have history to answer
//! from, not just the current instant.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tasker_shared::clock::SharedClock;
use tasker_shared::wire::MetricsSnapshot;
use tasker_stores::{HistoricalMetricsStore, QueueMetrics};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug)]
pub struct QueueMetricsService {
    live: Arc<QueueMetrics>,
    history: Arc<dyn HistoricalMetricsStore>,
    clock: SharedClock,
    interval: StdDuration,
}

impl QueueMetricsService {
    pub fn new(
        live: Arc<QueueMetrics>,
        history: Arc<dyn HistoricalMetricsStore>,
        clock: SharedClock,
        interval: StdDuration,
    ) -> Self {
        Self {
            live,
            history,
            clock,
            interval,
        }
    }

    /// Runs until `cancel` fires, recording one snapshot per known queue on
    /// every tick.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            if cancel.is_cancelled() {
                break;
            }
            if let Err(err) = self.record_tick().await {
                warn!(?err, "queue metrics snapshot tick failed");
            }
        }
    }

    pub async fn record_tick(&self) -> Result<(), tasker_shared::error::TaskerError> {
        let now = self.clock.now();
        for queue in self.live.queue_names() {
            let snapshot = self.live.snapshot(&queue);
            self.history
                .record(MetricsSnapshot {
                    timestamp: now,
                    task_name: None,
                    queue: Some(queue),
                    success_count: snapshot.success_count,
                    failure_count: snapshot.failure_count,
                    retry_count: 0,
                    revoked_count: 0,
                    avg_execution_time_ms: snapshot.average_duration_ms,
                })
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasker_shared::clock::system_clock;
    use tasker_stores::InMemoryHistoricalMetricsStore;

    #[tokio::test]
    async fn record_tick_snapshots_every_known_queue() {
        let live = Arc::new(QueueMetrics::new());
        let now = chrono::Utc::now();
        live.record_enqueued("queue_a", now);
        live.record_started("queue_a");
        live.record_completed("queue_a", true, 10, now);

        let history = Arc::new(InMemoryHistoricalMetricsStore::new(system_clock()));
        let service = QueueMetricsService::new(live, history.clone(), system_clock(), StdDuration::from_secs(60));
        service.record_tick().await.unwrap();

        let grouped = history
            .get_metrics(now - chrono::Duration::seconds(1), now + chrono::Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(grouped.success_count, 1);
    }
}
