//! Executions and the step interpreter driving them.

pub mod execution;
pub(crate) mod fanout;
pub(crate) mod promise;
pub(crate) mod step;
