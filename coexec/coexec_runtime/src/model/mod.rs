//! Values, computations and task descriptors.

pub mod classify;
pub mod coroutine;
pub mod task;
pub mod value;
