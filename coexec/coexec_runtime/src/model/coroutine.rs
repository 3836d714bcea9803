//! Resumable computations.
//!
//! A `Coroutine` is the unit a frame holds: it can be resumed with a value or
//! with an error, and either suspends with a yielded value or completes with a
//! return value. Raising an error is reported as `Err`.
//!
//! Most computations are written as async bodies through [`Generator`], where
//! every `co.suspend(value).await` is one suspension point. The small adapters
//! here ([`Ready`], [`Forward`], [`FromFn`]) cover the cases that need no body.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll};

use coexec_core::error::TaskError;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;

use super::value::Value;

/// Input delivered to a suspended computation.
#[derive(Debug, Clone)]
pub enum Resume {
    /// Continue with the result of the last yielded value
    Next(Value),

    /// Raise an error at the suspension point
    Throw(TaskError),
}

/// What a computation produced when resumed.
#[derive(Debug, Clone)]
pub enum Step {
    /// Suspended with a value to be handled by the runtime
    Yield(Value),

    /// Completed with a value
    Return(Value),
}

/// A resumable, suspendable computation.
///
/// The first resumption starts the computation and its input value is
/// ignored. Returning `Err` means the computation raised and must not be
/// resumed again.
pub trait Coroutine: Send {
    /// Advance the computation to its next suspension point.
    fn resume(&mut self, input: Resume) -> Result<Step, TaskError>;
}

/// Completes with a fixed value on first resumption.
pub struct Ready {
    value: Option<Value>,
}

impl Ready {
    /// Create a computation returning `value`.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
        }
    }
}

impl Coroutine for Ready {
    fn resume(&mut self, input: Resume) -> Result<Step, TaskError> {
        match input {
            Resume::Throw(err) => Err(err),
            Resume::Next(_) => Ok(Step::Return(self.value.take().unwrap_or_else(Value::null))),
        }
    }
}

/// Yields a value once and returns whatever it resolved to.
pub struct Forward {
    value: Option<Value>,
}

impl Forward {
    /// Create a computation forwarding `value`.
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
        }
    }

    /// A forwarding computation whose value was already yielded.
    pub(crate) fn awaiting() -> Self {
        Self { value: None }
    }
}

impl Coroutine for Forward {
    fn resume(&mut self, input: Resume) -> Result<Step, TaskError> {
        match (self.value.take(), input) {
            (_, Resume::Throw(err)) => Err(err),
            (Some(value), Resume::Next(_)) => Ok(Step::Yield(value)),
            (None, Resume::Next(resolved)) => Ok(Step::Return(resolved)),
        }
    }
}

/// Computation backed by a closure called on every resumption.
pub struct FromFn<F> {
    step: F,
}

impl<F> FromFn<F>
where
    F: FnMut(Resume) -> Result<Step, TaskError> + Send,
{
    /// Create a computation from a step closure.
    pub fn new(step: F) -> Self {
        Self { step }
    }
}

impl<F> Coroutine for FromFn<F>
where
    F: FnMut(Resume) -> Result<Step, TaskError> + Send,
{
    fn resume(&mut self, input: Resume) -> Result<Step, TaskError> {
        (self.step)(input)
    }
}

/// Run `f`, reporting a panic as a raised error.
pub(crate) fn catch_panic<T>(f: impl FnOnce() -> Result<T, TaskError>) -> Result<T, TaskError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(panicked(payload)))
}

fn panicked(payload: Box<dyn Any + Send>) -> TaskError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    TaskError::raised(format!("panicked: {}", message))
}

#[derive(Default)]
struct Channel {
    yielded: Option<Value>,
    input: Option<Resume>,
}

/// Suspension handle given to a generator body.
#[derive(Clone)]
pub struct Co {
    channel: Arc<Mutex<Channel>>,
}

impl Co {
    /// Suspend the body with `value` and wait for the runtime to resume it.
    ///
    /// Resolves to the value the runtime produced for `value` (the result of
    /// a sub-task, async value or nested computation, or `value` itself when
    /// it is plain data), or to the error delivered at this point.
    pub async fn suspend(&self, value: impl Into<Value>) -> Result<Value, TaskError> {
        self.channel.lock().yielded = Some(value.into());
        let mut parked = false;
        future::poll_fn(|_| {
            if !parked {
                parked = true;
                return Poll::Pending;
            }
            match self.channel.lock().input.take() {
                Some(Resume::Next(value)) => Poll::Ready(Ok(value)),
                Some(Resume::Throw(err)) => Poll::Ready(Err(err)),
                None => Poll::Pending,
            }
        })
        .await
    }
}

/// A computation written as an async body.
///
/// The body must only suspend through its [`Co`] handle. Awaiting any other
/// pending future inside the body is an error: yield the future as an async
/// value instead.
pub struct Generator {
    channel: Arc<Mutex<Channel>>,
    body: Option<BoxFuture<'static, Result<Value, TaskError>>>,
    started: bool,
}

impl Generator {
    /// Create a generator from its body.
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Co) -> Fut,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        let channel = Arc::new(Mutex::new(Channel::default()));
        let co = Co {
            channel: channel.clone(),
        };
        Self {
            channel,
            body: Some(body(co).boxed()),
            started: false,
        }
    }
}

impl Coroutine for Generator {
    fn resume(&mut self, input: Resume) -> Result<Step, TaskError> {
        if !self.started {
            self.started = true;
            if let Resume::Throw(err) = input {
                self.body = None;
                return Err(err);
            }
        } else {
            self.channel.lock().input = Some(input);
        }

        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let polled = match self.body.as_mut() {
            Some(body) => catch_panic(|| Ok(body.poll_unpin(&mut cx))),
            None => return Err(TaskError::raised("generator resumed after completion")),
        };
        // a body that panicked can never be polled again
        let polled = polled.map_err(|err| {
            self.body = None;
            err
        })?;

        match polled {
            Poll::Ready(result) => {
                self.body = None;
                result.map(Step::Return)
            }
            Poll::Pending => match self.channel.lock().yielded.take() {
                Some(value) => Ok(Step::Yield(value)),
                None => {
                    self.body = None;
                    Err(TaskError::raised(
                        "generator awaited a future directly; yield it as an async value",
                    ))
                }
            },
        }
    }
}
