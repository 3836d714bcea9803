//! Task descriptors.
//!
//! A [`Task`] is an immutable description of resumable work: a name, optional
//! configuration overrides and an entry factory producing a fresh computation
//! for every attempt. Tasks are cheap to clone and may be submitted any number
//! of times.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use coexec_core::error::TaskError;

use super::coroutine::Co;
use super::value::{Factory, Frame, Value};
use crate::scheduler::executioner::Scheduler;

/// Per-task configuration overrides.
///
/// Unset fields fall back to the configuration of the lane running the task.
#[derive(Debug, Clone, Default)]
pub struct TaskConfig {
    /// Task name
    pub name: Option<String>,

    /// Retries allowed after a failed attempt
    pub retries: Option<u32>,

    /// Pause before a retry, in milliseconds
    pub retry_interval: Option<u64>,

    /// Timeout in milliseconds, 0 disables it
    pub timeout: Option<u64>,

    /// Fan-out width for arrays yielded by this task
    pub threads: Option<usize>,

    /// Run with exclusive occupancy of the bounded lane
    pub heavy: Option<bool>,

    /// Scheduler owning executions of this task
    pub executioner: Option<Scheduler>,
}

impl TaskConfig {
    /// A configuration carrying only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Override the retry count.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Override the retry interval.
    pub fn with_retry_interval(mut self, millis: u64) -> Self {
        self.retry_interval = Some(millis);
        self
    }

    /// Override the timeout.
    pub fn with_timeout(mut self, millis: u64) -> Self {
        self.timeout = Some(millis);
        self
    }

    /// Override the fan-out width.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Mark the task heavy.
    pub fn heavy(mut self) -> Self {
        self.heavy = Some(true);
        self
    }

    /// Assign the scheduler owning the task's executions.
    pub fn with_executioner(mut self, scheduler: Scheduler) -> Self {
        self.executioner = Some(scheduler);
        self
    }
}

impl From<&str> for TaskConfig {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl From<String> for TaskConfig {
    fn from(name: String) -> Self {
        Self::named(name)
    }
}

impl From<()> for TaskConfig {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

struct TaskInner {
    name: String,
    config: TaskConfig,
    entry: Factory,
}

/// Immutable description of resumable work.
#[derive(Clone)]
pub struct Task(Arc<TaskInner>);

impl Task {
    /// Create a task from its configuration and entry factory.
    pub fn new(config: impl Into<TaskConfig>, entry: Factory) -> Self {
        let config = config.into();
        let name = match &config.name {
            Some(name) => format!("<{}>", name),
            None => "<anon>".to_string(),
        };
        Self(Arc::new(TaskInner {
            name,
            config,
            entry,
        }))
    }

    /// Create a task whose attempts run a generator body.
    ///
    /// # Examples
    ///
    /// ```
    /// use coexec_runtime::{Task, Value};
    ///
    /// let task = Task::generator("double", |co| async move {
    ///     let n = co.suspend(21).await?;
    ///     Ok(Value::from(n.as_i64().unwrap_or(0) * 2))
    /// });
    /// assert_eq!(task.name(), "<double>");
    /// ```
    pub fn generator<F, Fut>(config: impl Into<TaskConfig>, body: F) -> Self
    where
        F: Fn(Co) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
    {
        Self::new(config, Factory::generator(body))
    }

    /// Create an unnamed task.
    pub fn anonymous(entry: Factory) -> Self {
        Self::new(TaskConfig::default(), entry)
    }

    /// Display name, `<name>` or `<anon>`.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Configuration overrides.
    pub fn config(&self) -> &TaskConfig {
        &self.0.config
    }

    /// Entry factory.
    pub fn entry(&self) -> &Factory {
        &self.0.entry
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.0.name)
            .field("config", &self.0.config)
            .finish()
    }
}

/// Anything that can be submitted to a scheduler.
#[derive(Clone)]
pub enum WorkItem {
    /// A task
    Task(Task),
    /// A bare suspended computation
    Computation(Frame),
    /// A factory producing a computation
    Factory(Factory),
}

impl WorkItem {
    /// Convert to a task, wrapping bare computations and factories in an
    /// anonymous one.
    pub fn into_task(self) -> Task {
        match self {
            WorkItem::Task(task) => task,
            WorkItem::Factory(factory) => Task::anonymous(factory),
            WorkItem::Computation(frame) => Task::anonymous(forwarding(frame)),
        }
    }
}

/// Factory whose frames forward to `frame`, so retries re-await the same
/// computation.
pub(crate) fn forwarding(frame: Frame) -> Factory {
    Factory::new(move || Frame::forward(Value::Computation(frame.clone())))
}

impl From<Task> for WorkItem {
    fn from(task: Task) -> Self {
        WorkItem::Task(task)
    }
}

impl From<Frame> for WorkItem {
    fn from(frame: Frame) -> Self {
        WorkItem::Computation(frame)
    }
}

impl From<Factory> for WorkItem {
    fn from(factory: Factory) -> Self {
        WorkItem::Factory(factory)
    }
}
