#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Coexec Core
//!
//! Shared types for the coexec cooperative task runtime.
//!
//! This crate has no knowledge of scheduling. It provides:
//!
//! - The error taxonomy used by executions and schedulers
//! - Strongly-typed identifiers
//! - Scheduler configuration, defaults and validation
//!
//! ## Integration with Other Coexec Crates
//!
//! - **coexec_runtime**: Builds lanes, executions and the step interpreter on
//!   top of these types

/// Error types for task attempts and runtime construction
pub mod error;

/// Strongly-typed identifiers
pub mod id;

/// Scheduler configuration
pub mod config;

pub use config::{LogSink, SchedulerConfig};
pub use error::{Failure, Result, RuntimeError, TaskError};
pub use id::{ExecutionId, SchedulerId};
