//! Storage contracts for every stateful component the orchestration and
//! worker crates depend on, plus in-memory reference adapters suitable for
//! tests and single-process deployments. Each module owns one contract
//! trait and its adapter; nothing here reaches across module boundaries.

pub mod dead_letter;
pub mod delayed_store;
pub mod execution_tracker;
pub mod metrics_store;
pub mod outbox_inbox;
pub mod partition_lock;
pub mod rate_limiter;
pub mod result_backend;
pub mod revocation;
pub mod saga_store;

pub use dead_letter::{DeadLetterStore, InMemoryDeadLetterStore};
pub use delayed_store::{DelayedMessageStore, InMemoryDelayedMessageStore};
pub use execution_tracker::{ExecutionTracker, InMemoryExecutionTracker};
pub use metrics_store::{Granularity, HistoricalMetricsStore, InMemoryHistoricalMetricsStore, QueueMetrics, QueueMetricsSnapshot, TimeSeriesBucket};
pub use outbox_inbox::{InMemoryInboxStore, InMemoryOutboxStore, InboxStore, OutboxStore};
pub use partition_lock::{InMemoryPartitionLockStore, PartitionLockStore};
pub use rate_limiter::{AcquireOutcome, RateLimitRule, RateLimiter, SlidingWindowRateLimiter};
pub use result_backend::{InMemoryResultBackend, ResultBackend};
pub use revocation::{InMemoryRevocationStore, RevocationRecord, RevocationStore, TerminationMode};
pub use saga_store::{InMemorySagaStore, SagaStore};
