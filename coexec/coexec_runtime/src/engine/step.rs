//! Step interpreter.
//!
//! One visit advances an execution by exactly one resumption of its top
//! frame and reacts to the produced value according to its kind. Errors are
//! handed down the frame stack until a frame absorbs them; an error that
//! empties the stack fails the current attempt.

use std::future::IntoFuture;
use std::sync::Arc;

use coexec_core::error::TaskError;
use futures::future::BoxFuture;
use log::trace;

use super::execution::{Execution, RetryDecision};
use super::fanout;
use crate::model::classify::{classify, ValueKind};
use crate::model::coroutine::{catch_panic, Forward, Resume, Step};
use crate::model::task::Task;
use crate::model::value::{AsyncValue, Factory, Frame, Value};
use crate::scheduler::executioner;
use crate::scheduler::lane::LaneKind;

/// What the drive loop must do after visiting an execution.
pub(crate) enum Visit {
    /// Not stepped: already stepping, parked, or no longer in this lane
    Skipped,
    /// Progress was made, visit again on a later tick
    Continue,
    /// Waiting on an async value; tick the lane once this completes
    Wait(BoxFuture<'static, ()>),
    /// The attempt failed and a retry starts after this pause
    Backoff {
        attempt: u32,
        pause: BoxFuture<'static, ()>,
    },
    /// The execution completed with a value
    Resolved(Value),
    /// The execution failed with no retries left
    Rejected,
}

enum Advance {
    Produced { value: Value, done: bool },
    Escaped(TaskError),
}

enum Directive {
    Continue,
    Complete(Value),
    Escape(TaskError),
    Delegate(Task),
    Await(AsyncValue),
    FanOut(Vec<Value>),
    Join(Vec<AsyncValue>),
}

/// Run one cycle on `exec` from the drive loop of `lane`.
///
/// The frames are taken out of the execution state while they run, so
/// computations may inspect their own execution through its handle.
pub(crate) fn visit(exec: &Arc<Execution>, lane: LaneKind) -> Visit {
    let Some(_claim) = exec.begin_step() else {
        return Visit::Skipped;
    };
    if exec.lane_kind() != lane || exec.is_busy() {
        return Visit::Skipped;
    }
    if exec.take_stop_request() {
        exec.apply_stop();
    }
    exec.mark_started();

    let (restart, mut frames, pending) = {
        let mut state = exec.lock_state();
        state.steps += 1;
        let restart = std::mem::take(&mut state.restart).then(|| state.entry.clone());
        let pending = std::mem::replace(&mut state.pending, Resume::Next(Value::null()));
        (restart, std::mem::take(&mut state.frames), pending)
    };
    let input = if exec.timed_out() {
        Resume::Throw(exec.timeout_error())
    } else {
        pending
    };

    let (directive, next) = match restart.map(|entry| instantiate(&entry)) {
        Some(Err(err)) => (Directive::Escape(err), None),
        started => {
            if let Some(Ok(frame)) = started {
                frames = vec![frame];
            }
            match deliver(&mut frames, input) {
                Advance::Escaped(err) => (Directive::Escape(err), None),
                Advance::Produced { value, done } => direct(exec.name(), &mut frames, value, done),
            }
        }
    };

    {
        let mut state = exec.lock_state();
        state.frames = frames;
        if let Some(next) = next {
            state.pending = next;
        }
    }

    perform(exec, directive)
}

fn instantiate(factory: &Factory) -> Result<Frame, TaskError> {
    catch_panic(|| Ok(factory.instantiate()))
}

/// Resume the top frame, handing errors down the stack.
///
/// A yielded error is thrown back into the frame that yielded it. A frame
/// that raises, or returns an error, is popped and the error moves on to the
/// frame below.
fn deliver(frames: &mut Vec<Frame>, mut input: Resume) -> Advance {
    loop {
        let Some(top) = frames.last() else {
            return match input {
                Resume::Throw(err) => Advance::Escaped(err),
                Resume::Next(value) => Advance::Produced { value, done: true },
            };
        };
        match catch_panic(|| top.resume(input)) {
            Ok(Step::Yield(value)) => match into_error(value) {
                Ok(err) => input = Resume::Throw(err),
                Err(value) => return Advance::Produced { value, done: false },
            },
            Ok(Step::Return(value)) => match into_error(value) {
                Ok(err) => {
                    frames.pop();
                    input = Resume::Throw(err);
                }
                Err(value) => return Advance::Produced { value, done: true },
            },
            Err(err) => {
                frames.pop();
                input = Resume::Throw(err);
            }
        }
    }
}

/// Split error values (single or array) from everything else.
fn into_error(value: Value) -> Result<TaskError, Value> {
    match classify(&value) {
        ValueKind::Error | ValueKind::ArrayOfError => match value {
            Value::Error(err) => Ok(err),
            Value::Array(items) => Ok(TaskError::Many(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::Error(err) => Some(err),
                        _ => None,
                    })
                    .collect(),
            )),
            other => Err(other),
        },
        _ => Err(value),
    }
}

/// Choose what to do with a produced value, and the next resumption input
/// when it is already known.
fn direct(
    name: &str,
    frames: &mut Vec<Frame>,
    value: Value,
    done: bool,
) -> (Directive, Option<Resume>) {
    let kind = classify(&value);
    trace!("process {} produced {:?} (done: {})", name, kind, done);

    // A frame returning a yieldable is replaced by one returning its result.
    if done && kind.is_yieldable() {
        if let Some(top) = frames.last_mut() {
            *top = Frame::new(Forward::awaiting());
        }
    }

    match (kind, value) {
        (ValueKind::Plain, value) => {
            if done {
                frames.pop();
            }
            if frames.is_empty() {
                (Directive::Complete(value), None)
            } else {
                (Directive::Continue, Some(Resume::Next(value)))
            }
        }
        (ValueKind::NestedComputation, Value::Computation(frame)) => {
            frames.push(frame);
            (Directive::Continue, None)
        }
        (ValueKind::NestedFactory, Value::Factory(factory)) => match instantiate(&factory) {
            Ok(frame) => {
                frames.push(frame);
                (Directive::Continue, None)
            }
            Err(err) => (Directive::Continue, Some(Resume::Throw(err))),
        },
        (ValueKind::SubTask, Value::Task(task)) => (Directive::Delegate(task), None),
        (ValueKind::AsyncValue, Value::Async(value)) => (Directive::Await(value), None),
        (ValueKind::ArrayOfAsyncValue, Value::Array(items)) => {
            let values = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Async(value) => Some(value),
                    _ => None,
                })
                .collect();
            (Directive::Join(values), None)
        }
        (
            ValueKind::ArrayOfNestedComputation
            | ValueKind::ArrayOfNestedFactory
            | ValueKind::ArrayOfSubTask,
            Value::Array(items),
        ) => (Directive::FanOut(items), None),
        (_, other) => {
            let err = into_error(other)
                .unwrap_or_else(|value| TaskError::raised(format!("unhandled value {:?}", value)));
            (Directive::Continue, Some(Resume::Throw(err)))
        }
    }
}

fn perform(exec: &Arc<Execution>, directive: Directive) -> Visit {
    match directive {
        Directive::Continue => Visit::Continue,
        Directive::Complete(value) => Visit::Resolved(value),
        Directive::Escape(err) => escape(exec, err),
        Directive::Delegate(task) => match executioner::delegate(exec, task, false) {
            Ok(child) => Visit::Wait(exec.wait_on(AsyncValue::Execution(child).into_future())),
            Err(err) => {
                exec.lock_state().pending = Resume::Throw(err.into());
                Visit::Continue
            }
        },
        Directive::Await(value) => {
            avoid_deadlock(&value);
            Visit::Wait(exec.wait_on(value.into_future()))
        }
        Directive::FanOut(items) => Visit::Wait(exec.wait_on(fanout::fan_out(exec, items))),
        Directive::Join(values) => {
            values.iter().for_each(avoid_deadlock);
            Visit::Wait(exec.wait_on(fanout::join(values)))
        }
    }
}

/// Fail the current attempt and retry or give up.
fn escape(exec: &Arc<Execution>, err: TaskError) -> Visit {
    exec.add_error(err);
    match exec.retry() {
        RetryDecision::Exhausted => Visit::Rejected,
        RetryDecision::Scheduled { attempt } => Visit::Backoff {
            attempt,
            pause: exec.pause(exec.config().retry_interval),
        },
    }
}

/// An execution awaited from a pooling bounded lane would hold its slot
/// waiting for work queued behind it; move it to the unbounded lane.
fn avoid_deadlock(value: &AsyncValue) {
    if let AsyncValue::Execution(handle) = value {
        let scheduler = handle.scheduler();
        if scheduler.config().pooling {
            scheduler.move_to_sub_lane(handle);
        }
    }
}
