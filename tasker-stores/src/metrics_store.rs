//! # Queue Metrics & Historical Store (C18)
//!
//! Live per-queue counters plus a time-bucketed historical roll-up used
//! for `GetTimeSeries`/`GetMetricsByTaskName` queries. Bucket boundaries
//! are aligned to the unix epoch so two stores with the same bucket size
//! always agree on where a bucket starts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tasker_shared::clock::SharedClock;
use tasker_shared::error::TaskerError;
use tasker_shared::wire::MetricsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Minute,
    Hour,
    Day,
    Week,
}

impl Granularity {
    pub fn bucket_seconds(self) -> i64 {
        match self {
            Granularity::Minute => 60,
            Granularity::Hour => 3_600,
            Granularity::Day => 86_400,
            Granularity::Week => 604_800,
        }
    }

    fn bucket_start(self, at: DateTime<Utc>) -> DateTime<Utc> {
        let bucket = self.bucket_seconds();
        let epoch = at.timestamp();
        let aligned = epoch - epoch.rem_euclid(bucket);
        DateTime::from_timestamp(aligned, 0).unwrap_or(at)
    }
}

#[derive(Debug, Default)]
struct QueueCounters {
    waiting: AtomicU64,
    running: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    consumer_count: AtomicU64,
    total_duration_ms: AtomicU64,
    last_enqueued_at: std::sync::Mutex<Option<DateTime<Utc>>>,
    last_completed_at: std::sync::Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueMetricsSnapshot {
    pub waiting: u64,
    pub running: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub processed: u64,
    pub consumer_count: u64,
    pub average_duration_ms: f64,
}

/// Live counters, one set per queue name.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    queues: DashMap<String, QueueCounters>,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, queue: &str) -> dashmap::mapref::one::Ref<'_, String, QueueCounters> {
        self.queues.entry(queue.to_string()).or_default();
        self.queues.get(queue).expect("just inserted")
    }

    pub fn record_enqueued(&self, queue: &str, now: DateTime<Utc>) {
        let counters = self.entry(queue);
        counters.waiting.fetch_add(1, Ordering::Relaxed);
        *counters.last_enqueued_at.lock().unwrap_or_else(|p| p.into_inner()) = Some(now);
    }

    pub fn record_started(&self, queue: &str) {
        let counters = self.entry(queue);
        counters.waiting.fetch_sub(1, Ordering::Relaxed);
        counters.running.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, queue: &str, success: bool, duration_ms: u64, now: DateTime<Utc>) {
        let counters = self.entry(queue);
        counters.running.fetch_sub(1, Ordering::Relaxed);
        if success {
            counters.success.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failure.fetch_add(1, Ordering::Relaxed);
        }
        counters.total_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);
        *counters.last_completed_at.lock().unwrap_or_else(|p| p.into_inner()) = Some(now);
    }

    pub fn register_consumer(&self, queue: &str) {
        self.entry(queue).consumer_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unregister_consumer(&self, queue: &str) {
        self.entry(queue).consumer_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Every queue name with at least one recorded event so far.
    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn snapshot(&self, queue: &str) -> QueueMetricsSnapshot {
        let Some(counters) = self.queues.get(queue) else {
            return QueueMetricsSnapshot::default();
        };
        let success = counters.success.load(Ordering::Relaxed);
        let failure = counters.failure.load(Ordering::Relaxed);
        let processed = success + failure;
        let total_duration_ms = counters.total_duration_ms.load(Ordering::Relaxed);

        QueueMetricsSnapshot {
            waiting: counters.waiting.load(Ordering::Relaxed),
            running: counters.running.load(Ordering::Relaxed),
            success_count: success,
            failure_count: failure,
            processed,
            consumer_count: counters.consumer_count.load(Ordering::Relaxed),
            average_duration_ms: if processed > 0 {
                total_duration_ms as f64 / processed as f64
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeSeriesBucket {
    pub bucket_start: DateTime<Utc>,
    pub success_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    pub tasks_per_second: f64,
}

#[async_trait]
pub trait HistoricalMetricsStore: Send + Sync + std::fmt::Debug {
    async fn record(&self, snapshot: MetricsSnapshot) -> Result<(), TaskerError>;

    async fn get_metrics(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<MetricsSnapshot, TaskerError>;

    async fn get_time_series(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<TimeSeriesBucket>, TaskerError>;

    async fn get_metrics_by_task_name(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<HashMap<String, MetricsSnapshot>, TaskerError>;
}

#[derive(Debug)]
pub struct InMemoryHistoricalMetricsStore {
    snapshots: std::sync::Mutex<Vec<MetricsSnapshot>>,
    clock: SharedClock,
}

impl InMemoryHistoricalMetricsStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            snapshots: std::sync::Mutex::new(Vec::new()),
            clock,
        }
    }

    fn in_range(snapshots: &[MetricsSnapshot], from: DateTime<Utc>, until: DateTime<Utc>) -> Vec<MetricsSnapshot> {
        snapshots
            .iter()
            .filter(|s| s.timestamp >= from && s.timestamp <= until)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HistoricalMetricsStore for InMemoryHistoricalMetricsStore {
    async fn record(&self, snapshot: MetricsSnapshot) -> Result<(), TaskerError> {
        let _ = self.clock.now();
        self.snapshots.lock().unwrap_or_else(|p| p.into_inner()).push(snapshot);
        Ok(())
    }

    async fn get_metrics(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> Result<MetricsSnapshot, TaskerError> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|p| p.into_inner());
        let window = Self::in_range(&snapshots, from, until);

        let success_count = window.iter().map(|s| s.success_count).sum();
        let failure_count = window.iter().map(|s| s.failure_count).sum();
        let retry_count = window.iter().map(|s| s.retry_count).sum();
        let revoked_count = window.iter().map(|s| s.revoked_count).sum();
        let avg_execution_time_ms = if window.is_empty() {
            0.0
        } else {
            window.iter().map(|s| s.avg_execution_time_ms).sum::<f64>() / window.len() as f64
        };

        Ok(MetricsSnapshot {
            timestamp: until,
            task_name: None,
            queue: None,
            success_count,
            failure_count,
            retry_count,
            revoked_count,
            avg_execution_time_ms,
        })
    }

    async fn get_time_series(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<Vec<TimeSeriesBucket>, TaskerError> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|p| p.into_inner());
        let window = Self::in_range(&snapshots, from, until);

        let mut buckets: HashMap<DateTime<Utc>, (u64, u64, u64)> = HashMap::new();
        for snapshot in &window {
            let bucket_start = granularity.bucket_start(snapshot.timestamp);
            let entry = buckets.entry(bucket_start).or_insert((0, 0, 0));
            entry.0 += snapshot.success_count;
            entry.1 += snapshot.failure_count;
            entry.2 += snapshot.retry_count;
        }

        let bucket_seconds = granularity.bucket_seconds() as f64;
        let mut result: Vec<TimeSeriesBucket> = buckets
            .into_iter()
            .map(|(bucket_start, (success_count, failure_count, retry_count))| TimeSeriesBucket {
                bucket_start,
                success_count,
                failure_count,
                retry_count,
                tasks_per_second: (success_count + failure_count) as f64 / bucket_seconds,
            })
            .collect();
        result.sort_by_key(|b| b.bucket_start);
        Ok(result)
    }

    async fn get_metrics_by_task_name(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<HashMap<String, MetricsSnapshot>, TaskerError> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|p| p.into_inner());
        let window = Self::in_range(&snapshots, from, until);

        let mut by_name: HashMap<String, Vec<MetricsSnapshot>> = HashMap::new();
        for snapshot in window {
            if let Some(name) = snapshot.task_name.clone() {
                by_name.entry(name).or_default().push(snapshot);
            }
        }

        Ok(by_name
            .into_iter()
            .map(|(name, snaps)| {
                let success_count = snaps.iter().map(|s| s.success_count).sum();
                let failure_count = snaps.iter().map(|s| s.failure_count).sum();
                let retry_count = snaps.iter().map(|s| s.retry_count).sum();
                let revoked_count = snaps.iter().map(|s| s.revoked_count).sum();
                let avg_execution_time_ms =
                    snaps.iter().map(|s| s.avg_execution_time_ms).sum::<f64>() / snaps.len() as f64;
                (
                    name.clone(),
                    MetricsSnapshot {
                        timestamp: until,
                        task_name: Some(name),
                        queue: None,
                        success_count,
                        failure_count,
                        retry_count,
                        revoked_count,
                        avg_execution_time_ms,
                    },
                )
            })
            .collect())
    }
}
