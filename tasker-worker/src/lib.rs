//! Task execution core: the filter pipeline that wraps every invocation,
//! the executor that drives one task through revocation/rate-limit/lock/
//! saga bookkeeping, and the worker loop that consumes a broker and manages
//! graceful shutdown. Orchestration-adjacent loops (saga driving, delayed
//! dispatch, signal bus, revocation propagation) live in
//! `tasker-orchestration`; this crate only owns task execution itself.

pub mod executor;
pub mod filter;
pub mod worker_loop;

pub use executor::{AckDecision, Executor, ExecutionOutcome, ExecutorConfig};
pub use filter::{ExecutingOutcome, Filter, FilterContext, FilterPipeline};
pub use worker_loop::{WorkerLoop, WorkerLoopConfig};
