//! Values exchanged between computations and the runtime.
//!
//! Everything a computation yields or returns is a [`Value`]. The variants form
//! the closed set of shapes the runtime understands: plain data, nested
//! computations and their factories, tasks, async values, errors and arrays
//! of any of these.

use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::Arc;

use coexec_core::error::TaskError;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;

use super::coroutine::{Co, Coroutine, Forward, Generator, Ready, Resume, Step};
use super::task::Task;
use crate::engine::execution::ExecutionHandle;

/// A value yielded, returned or resolved inside the runtime.
#[derive(Clone)]
pub enum Value {
    /// Plain data
    Data(serde_json::Value),

    /// A suspended computation to run as a nested frame
    Computation(Frame),

    /// A factory producing a nested computation
    Factory(Factory),

    /// A task to delegate to a scheduler
    Task(Task),

    /// A value settled outside of the runtime
    Async(AsyncValue),

    /// An error to deliver to the yielding computation
    Error(TaskError),

    /// An array of values
    Array(Vec<Value>),
}

impl Value {
    /// The null value.
    pub fn null() -> Self {
        Value::Data(serde_json::Value::Null)
    }

    /// Whether this is the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Data(serde_json::Value::Null))
    }

    /// Integer content of plain data.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Data(data) => data.as_i64(),
            _ => None,
        }
    }

    /// Boolean content of plain data.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Data(data) => data.as_bool(),
            _ => None,
        }
    }

    /// String content of plain data.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Data(data) => data.as_str(),
            _ => None,
        }
    }

    /// Elements of an array value.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Convert to plain data.
    ///
    /// Arrays convert element-wise; `None` if any part is not plain data.
    pub fn to_data(&self) -> Option<serde_json::Value> {
        match self {
            Value::Data(data) => Some(data.clone()),
            Value::Array(items) => items
                .iter()
                .map(Value::to_data)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Data(data) => write!(f, "Data({})", data),
            Value::Computation(_) => f.write_str("Computation(..)"),
            Value::Factory(_) => f.write_str("Factory(..)"),
            Value::Task(task) => write!(f, "Task({})", task.name()),
            Value::Async(_) => f.write_str("Async(..)"),
            Value::Error(err) => write!(f, "Error({})", err),
            Value::Array(items) => f.debug_list().entries(items).finish(),
        }
    }
}

macro_rules! impl_from_data {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(data: $ty) -> Self {
                    Value::Data(serde_json::Value::from(data))
                }
            }
        )*
    };
}

impl_from_data!(bool, i32, i64, u32, u64, usize, f64, String, &str);

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::null()
    }
}

impl From<serde_json::Value> for Value {
    fn from(data: serde_json::Value) -> Self {
        Value::Data(data)
    }
}

impl From<Frame> for Value {
    fn from(frame: Frame) -> Self {
        Value::Computation(frame)
    }
}

impl From<Factory> for Value {
    fn from(factory: Factory) -> Self {
        Value::Factory(factory)
    }
}

impl From<Task> for Value {
    fn from(task: Task) -> Self {
        Value::Task(task)
    }
}

impl From<AsyncValue> for Value {
    fn from(value: AsyncValue) -> Self {
        Value::Async(value)
    }
}

impl From<ExecutionHandle> for Value {
    fn from(handle: ExecutionHandle) -> Self {
        Value::Async(AsyncValue::Execution(handle))
    }
}

impl From<TaskError> for Value {
    fn from(err: TaskError) -> Self {
        Value::Error(err)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Value::Array(iter.into_iter().collect())
    }
}

/// One suspended computation on an execution's stack.
///
/// Clones share the same computation.
#[derive(Clone)]
pub struct Frame(Arc<Mutex<Box<dyn Coroutine>>>);

impl Frame {
    /// Wrap a computation.
    pub fn new(coroutine: impl Coroutine + 'static) -> Self {
        Self(Arc::new(Mutex::new(Box::new(coroutine))))
    }

    /// A computation written as an async body.
    pub fn generator<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Co) -> Fut,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        Self::new(Generator::new(body))
    }

    /// A computation completing with `value`.
    pub fn ready(value: impl Into<Value>) -> Self {
        Self::new(Ready::new(value))
    }

    /// A computation yielding `value` once and returning its resolution.
    pub fn forward(value: impl Into<Value>) -> Self {
        Self::new(Forward::new(value))
    }

    /// Resume the computation.
    pub fn resume(&self, input: Resume) -> Result<Step, TaskError> {
        self.0.lock().resume(input)
    }

    /// Whether both handles share the same computation.
    pub fn ptr_eq(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Zero-argument producer of fresh computations.
#[derive(Clone)]
pub struct Factory(Arc<dyn Fn() -> Frame + Send + Sync>);

impl Factory {
    /// Wrap a frame producer.
    pub fn new(produce: impl Fn() -> Frame + Send + Sync + 'static) -> Self {
        Self(Arc::new(produce))
    }

    /// A factory running a new generator body on every instantiation.
    pub fn generator<F, Fut>(body: F) -> Self
    where
        F: Fn(Co) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        Self::new(move || Frame::generator(&body))
    }

    /// Produce a fresh computation.
    pub fn instantiate(&self) -> Frame {
        (self.0)()
    }
}

type SharedResult = Shared<BoxFuture<'static, Result<Value, TaskError>>>;

/// A value settled outside of the runtime.
#[derive(Clone)]
pub enum AsyncValue {
    /// A future; clones observe the same settlement
    Future(SharedResult),

    /// The result of another execution
    Execution(ExecutionHandle),
}

impl AsyncValue {
    /// Wrap a future settling with a value or an error.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        AsyncValue::Future(future.boxed().shared())
    }

    /// Wrap a future whose rejection reason is foreign to the runtime.
    pub fn from_fallible<F, T, E>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Into<Value>,
        E: fmt::Display,
    {
        Self::new(async move { future.await.map(Into::into).map_err(TaskError::rejected) })
    }

    /// An async value already resolved with `value`.
    pub fn resolved(value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::new(async move { Ok(value) })
    }

    /// An async value already rejected with `reason`.
    pub fn rejected(reason: impl fmt::Display) -> Self {
        let err = TaskError::rejected(reason);
        Self::new(async move { Err(err) })
    }
}

impl IntoFuture for AsyncValue {
    type Output = Result<Value, TaskError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            AsyncValue::Future(shared) => shared.boxed(),
            AsyncValue::Execution(handle) => {
                async move { handle.wait().await.map_err(TaskError::Nested) }.boxed()
            }
        }
    }
}
