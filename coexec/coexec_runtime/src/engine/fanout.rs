//! Bounded parallel fan-out.
//!
//! An array of computations, factories or tasks is dispatched as one group of
//! delegated executions, at most `threads` in flight at a time. Members always
//! run in an unbounded lane. The group resolves with the members' results in
//! their original order, or fails with the first member failure.

use std::future::IntoFuture;
use std::sync::Arc;

use coexec_core::error::{Failure, TaskError};
use futures::future::{self, BoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;

use super::execution::Execution;
use crate::model::task::{forwarding, Task, TaskConfig};
use crate::model::value::{AsyncValue, Factory, Frame, Value};
use crate::scheduler::executioner;

/// Dispatch `items` as a fan-out group of `parent`.
pub(crate) fn fan_out(
    parent: &Arc<Execution>,
    items: Vec<Value>,
) -> BoxFuture<'static, Result<Value, TaskError>> {
    let count = items.len();
    let tasks = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| member_task(index, count, item))
        .collect();
    let threads = parent.config().threads;
    run(Arc::clone(parent), tasks, threads).boxed()
}

/// Wait for every async value, preserving order.
pub(crate) fn join(values: Vec<AsyncValue>) -> BoxFuture<'static, Result<Value, TaskError>> {
    future::try_join_all(values.into_iter().map(IntoFuture::into_future))
        .map(|results| results.map(Value::Array))
        .boxed()
}

/// Bare computations and factories become tasks named `t<i>/<count>` that are
/// never retried; tasks keep their own configuration.
fn member_task(index: usize, count: usize, item: Value) -> Task {
    let config = TaskConfig::named(format!("t{}/{}", index + 1, count)).with_retries(0);
    match item {
        Value::Task(task) => task,
        Value::Factory(factory) => Task::new(config, factory),
        Value::Computation(frame) => Task::new(config, forwarding(frame)),
        other => Task::new(config, Factory::new(move || Frame::ready(other.clone()))),
    }
}

type Settled = (usize, Result<Value, Failure>);

fn launch(
    parent: &Arc<Execution>,
    index: usize,
    task: Task,
) -> Result<BoxFuture<'static, Settled>, TaskError> {
    let member = executioner::delegate(parent, task, true)?;
    Ok(async move { (index, member.wait().await) }.boxed())
}

async fn run(parent: Arc<Execution>, tasks: Vec<Task>, threads: usize) -> Result<Value, TaskError> {
    let count = tasks.len();
    let mut queued = tasks.into_iter().enumerate();
    let mut running = FuturesUnordered::new();
    let mut results = vec![Value::null(); count];

    for (index, task) in queued.by_ref().take(threads.max(1)) {
        running.push(launch(&parent, index, task)?);
    }

    while let Some((index, outcome)) = running.next().await {
        results[index] = outcome.map_err(TaskError::Nested)?;
        if let Some((index, task)) = queued.next() {
            running.push(launch(&parent, index, task)?);
        }
    }

    Ok(Value::Array(results))
}
