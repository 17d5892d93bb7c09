//! Coordination loops that run alongside worker processes: saga state
//! machine driving, delayed-message promotion, lifecycle signal dispatch,
//! revocation propagation, and queue metrics roll-up. None of these own
//! task execution itself — that's `tasker-worker`.

pub mod delayed_dispatcher;
pub mod queue_metrics_service;
pub mod revocation_manager;
pub mod saga_orchestrator;
pub mod signal_bus;

pub use delayed_dispatcher::DelayedDispatcher;
pub use queue_metrics_service::QueueMetricsService;
pub use revocation_manager::{RevocationManager, RevokeOptions};
pub use saga_orchestrator::SagaOrchestrator;
pub use signal_bus::{Signal, SignalBus, SignalBusRunner, SignalHandler};
