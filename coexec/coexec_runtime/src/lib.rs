#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Coexec Runtime
//!
//! A cooperative runtime executing resumable tasks under configurable
//! concurrency limits.
//!
//! This crate provides:
//!
//! - Schedulers with a bounded and an unbounded admission lane
//! - A step interpreter driving stacks of suspended computations
//! - Error hand-off between nested computations, with retries and timeouts
//! - Deadlock-avoiding routing of recursively delegated sub-tasks
//! - Bounded, order-preserving parallel fan-out
//!
//! Everything runs on the current tokio runtime: lanes re-arm their drive loop
//! by spawning fresh ticks, and computations advance one suspension point at
//! a time.
//!
//! ## Integration with Other Coexec Crates
//!
//! - **coexec_core**: Error taxonomy, identifiers and scheduler configuration

/// Values, computations and task descriptors
pub mod model;

/// Executions and the step interpreter
pub mod engine;

/// Schedulers and lanes
pub mod scheduler;

/// Helpers building common yieldables
pub mod templates;

pub use coexec_core::{Failure, LogSink, RuntimeError, SchedulerConfig, TaskError};
pub use engine::execution::{ExecutionConfig, ExecutionHandle};
pub use model::classify::{classify, ValueKind};
pub use model::coroutine::{Co, Coroutine, Resume, Step};
pub use model::task::{Task, TaskConfig, WorkItem};
pub use model::value::{AsyncValue, Factory, Frame, Value};
pub use scheduler::executioner::{Scheduler, SchedulerEvent};
pub use scheduler::lane::LaneKind;
