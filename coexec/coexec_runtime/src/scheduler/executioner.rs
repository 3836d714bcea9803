//! Schedulers.
//!
//! A [`Scheduler`] owns a bounded "main" lane and an unbounded "sub" lane,
//! accepts submissions and routes delegated sub-tasks between lanes so that
//! recursive delegation cannot starve the bounded lane.
//!
//! # Examples
//!
//! ```no_run
//! use coexec_runtime::{Scheduler, Task, Value};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = Scheduler::new("workers")?;
//! let handle = scheduler.submit(Task::generator("answer", |co| async move {
//!     let half = co.suspend(21).await?;
//!     Ok(Value::from(half.as_i64().unwrap_or(0) * 2))
//! }))?;
//! assert_eq!(handle.await?.as_i64(), Some(42));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use coexec_core::config::{LogSink, SchedulerConfig};
use coexec_core::error::{Result, RuntimeError};
use coexec_core::id::SchedulerId;
use log::debug;
use tokio::sync::broadcast;

use super::lane::{Lane, LaneKind};
use crate::engine::execution::{Execution, ExecutionHandle};
use crate::model::task::{Task, WorkItem};

const EVENT_CAPACITY: usize = 256;

/// Lifecycle events emitted by a scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// The bounded lane went from busy to idle
    Done {
        /// Always true, kept for listeners matching on it
        finished: bool,
    },

    /// A log line, emitted instead of written when the scheduler is silent
    Log(String),
}

#[derive(Clone)]
enum LogRoute {
    Facade,
    Events(broadcast::Sender<SchedulerEvent>),
    Sink(LogSink),
}

/// Routes lane log lines according to the scheduler configuration.
#[derive(Clone)]
pub(crate) struct Logger {
    prefix: String,
    route: LogRoute,
}

impl Logger {
    pub(crate) fn new(config: &SchedulerConfig, events: broadcast::Sender<SchedulerEvent>) -> Self {
        let route = if config.silent {
            LogRoute::Events(events)
        } else if let Some(sink) = &config.log {
            LogRoute::Sink(sink.clone())
        } else {
            LogRoute::Facade
        };
        Self {
            prefix: format!("<exec::{}>", config.name),
            route,
        }
    }

    pub(crate) fn log(&self, lane: LaneKind, message: &str) {
        let line = format!("{} [{}] {}", self.prefix, lane, message);
        match &self.route {
            LogRoute::Facade => debug!("{}", line),
            LogRoute::Events(events) => {
                let _ = events.send(SchedulerEvent::Log(line));
            }
            LogRoute::Sink(sink) => sink.write(&line),
        }
    }
}

struct SchedulerInner {
    id: SchedulerId,
    config: SchedulerConfig,
    main: Arc<Lane>,
    sub: Arc<Lane>,
    events: broadcast::Sender<SchedulerEvent>,
}

/// Cooperative scheduler owning a bounded and an unbounded lane.
///
/// Cheap to clone; clones refer to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration, or a bare name.
    ///
    /// # Returns
    ///
    /// * `Ok(Scheduler)` - The scheduler, idle.
    /// * `Err(RuntimeError::InvalidConfig)` - If the configuration is invalid.
    pub fn new(config: impl Into<SchedulerConfig>) -> Result<Self> {
        let config = config.into();
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let logger = Logger::new(&config, events.clone());
        let main = Arc::new(Lane::new(
            LaneKind::Main,
            config.clone(),
            logger.clone(),
            events.clone(),
        ));
        let sub = Arc::new(Lane::new(LaneKind::Sub, config.clone(), logger, events.clone()));

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                id: SchedulerId::new(),
                config,
                main,
                sub,
                events,
            }),
        })
    }

    /// Unique identifier.
    pub fn id(&self) -> SchedulerId {
        self.inner.id
    }

    /// Configured name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Submit work to the bounded lane.
    ///
    /// Bare computations and factories run as anonymous tasks. A task naming
    /// another scheduler runs there instead.
    pub fn submit(&self, item: impl Into<WorkItem>) -> Result<ExecutionHandle> {
        self.enqueue(item.into().into_task(), None, false)
    }

    /// Submit work on behalf of a running execution.
    ///
    /// The new execution records `parent` for naming and deadlock detection.
    /// With `force_unbounded` it goes to the unbounded lane.
    pub fn submit_with(
        &self,
        item: impl Into<WorkItem>,
        parent: Option<&ExecutionHandle>,
        force_unbounded: bool,
    ) -> Result<ExecutionHandle> {
        self.enqueue(
            item.into().into_task(),
            parent.map(ExecutionHandle::execution),
            force_unbounded,
        )
    }

    /// Subscribe to lifecycle and (when silent) log events.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Number of executions held by a lane.
    pub fn active(&self, lane: LaneKind) -> usize {
        self.lane(lane).len()
    }

    /// Whether both lanes are empty.
    pub fn is_idle(&self) -> bool {
        self.active(LaneKind::Main) == 0 && self.active(LaneKind::Sub) == 0
    }

    /// Move an execution from the bounded to the unbounded lane.
    ///
    /// Returns false if it is not in this scheduler's bounded lane.
    pub fn move_to_sub_lane(&self, handle: &ExecutionHandle) -> bool {
        let exec = handle.execution();
        if !exec.scheduler().ptr_eq(self) {
            return false;
        }
        {
            let mut slot = exec.lane_slot();
            if *slot != LaneKind::Main || !self.inner.main.remove(exec) {
                return false;
            }
            self.inner.sub.push(Arc::clone(exec));
            *slot = LaneKind::Sub;
        }
        self.inner.main.log(&format!("moved process {} to sub lane", exec.name()));
        self.inner.sub.schedule_tick();
        self.inner.main.schedule_tick();
        true
    }

    /// Whether both handles refer to the same scheduler.
    pub fn ptr_eq(&self, other: &Scheduler) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn lane(&self, kind: LaneKind) -> &Arc<Lane> {
        match kind {
            LaneKind::Main => &self.inner.main,
            LaneKind::Sub => &self.inner.sub,
        }
    }

    /// Create an execution of `task` and add it to a lane of its owning
    /// scheduler.
    pub(crate) fn enqueue(
        &self,
        task: Task,
        parent: Option<&Arc<Execution>>,
        unbounded: bool,
    ) -> Result<ExecutionHandle> {
        tokio::runtime::Handle::try_current()
            .map_err(|err| RuntimeError::NoRuntime(err.to_string()))?;

        let owner = task
            .config()
            .executioner
            .clone()
            .unwrap_or_else(|| self.clone());
        let kind = if unbounded { LaneKind::Sub } else { LaneKind::Main };
        let lane = owner.lane(kind).clone();

        let exec = Execution::new(task, owner, kind, parent);
        lane.insert(Arc::clone(&exec), parent);
        lane.log(&format!("added process {}", exec.name()));
        lane.schedule_tick();
        Ok(ExecutionHandle::new(exec))
    }

    /// Remove a completed execution from whichever lane holds it.
    pub(crate) fn detach(&self, exec: &Arc<Execution>) {
        let slot = exec.lane_slot();
        self.lane(*slot).remove(exec);
    }
}

/// Delegate `task` on behalf of `parent`, choosing the lane that keeps the
/// delegation from deadlocking.
///
/// The unbounded lane is chosen for fan-out members, for delegations from an
/// execution already in an unbounded lane, and whenever the owning scheduler
/// is the parent's or appears in the parent's ancestry.
pub(crate) fn delegate(
    parent: &Arc<Execution>,
    task: Task,
    fan_out: bool,
) -> Result<ExecutionHandle> {
    let current = parent.scheduler();
    let owner = task
        .config()
        .executioner
        .clone()
        .unwrap_or_else(|| current.clone());

    let unbounded = fan_out
        || parent.lane_kind() == LaneKind::Sub
        || owner.ptr_eq(current)
        || parent.ancestry().iter().any(|s| s.ptr_eq(&owner));

    current.enqueue(task, Some(parent), unbounded)
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.inner.id)
            .field("name", &self.inner.config.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::value::{Factory, Frame};
    use std::sync::Mutex;

    fn task(name: &str) -> Task {
        Task::new(name, Factory::new(|| Frame::ready(1)))
    }

    #[test]
    fn test_new_validates_config() {
        assert!(Scheduler::new("ok").is_ok());
        let err = Scheduler::new(SchedulerConfig {
            cores: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidConfig(_)));
    }

    #[test]
    fn test_submit_requires_runtime() {
        let scheduler = Scheduler::new("no-runtime").unwrap();
        assert!(matches!(
            scheduler.submit(task("t")),
            Err(RuntimeError::NoRuntime(_))
        ));
    }

    #[test]
    fn test_logger_routes() {
        let (events, mut rx) = broadcast::channel(4);
        let silent = Logger::new(
            &SchedulerConfig {
                name: "quiet".into(),
                silent: true,
                ..Default::default()
            },
            events.clone(),
        );
        silent.log(LaneKind::Main, "hello");
        assert_eq!(
            rx.try_recv().unwrap(),
            SchedulerEvent::Log("<exec::quiet> [main] hello".to_string())
        );

        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let custom = Logger::new(
            &SchedulerConfig {
                name: "custom".into(),
                log: Some(LogSink::new(move |line| {
                    captured.lock().unwrap().push(line.to_string())
                })),
                ..Default::default()
            },
            events,
        );
        custom.log(LaneKind::Sub, "added process <t>");
        assert_eq!(
            lines.lock().unwrap().as_slice(),
            ["<exec::custom> [sub] added process <t>".to_string()]
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_task_executioner_overrides_owner() {
        let a = Scheduler::new("a").unwrap();
        let b = Scheduler::new("b").unwrap();
        let handle = a
            .submit(Task::new(
                crate::model::task::TaskConfig::named("elsewhere").with_executioner(b.clone()),
                Factory::new(|| Frame::ready(1)),
            ))
            .unwrap();

        assert!(handle.scheduler().ptr_eq(&b));
        assert_eq!(b.active(LaneKind::Main), 1);
        assert_eq!(a.active(LaneKind::Main), 0);
    }

    #[tokio::test]
    async fn test_delegate_routing() {
        let a = Scheduler::new("a").unwrap();
        let b = Scheduler::new("b").unwrap();
        let parent = a.submit(task("parent")).unwrap();
        let parent = parent.execution();

        // same scheduler: unbounded
        let same = delegate(parent, task("same"), false).unwrap();
        assert_eq!(same.lane(), LaneKind::Sub);
        assert!(same.scheduler().ptr_eq(&a));

        // unrelated scheduler: bounded
        let other = delegate(
            parent,
            Task::new(
                crate::model::task::TaskConfig::named("other").with_executioner(b.clone()),
                Factory::new(|| Frame::ready(1)),
            ),
            false,
        )
        .unwrap();
        assert_eq!(other.lane(), LaneKind::Main);
        assert!(other.scheduler().ptr_eq(&b));
        assert_eq!(other.name(), "<parent>::<other>");

        // back to an ancestor's scheduler: unbounded
        let back = delegate(
            other.execution(),
            Task::new(
                crate::model::task::TaskConfig::named("back").with_executioner(a.clone()),
                Factory::new(|| Frame::ready(1)),
            ),
            false,
        )
        .unwrap();
        assert_eq!(back.lane(), LaneKind::Sub);
        assert!(back.scheduler().ptr_eq(&a));

        // fan-out: always unbounded
        let member = delegate(
            parent,
            Task::new(
                crate::model::task::TaskConfig::named("member").with_executioner(b.clone()),
                Factory::new(|| Frame::ready(1)),
            ),
            true,
        )
        .unwrap();
        assert_eq!(member.lane(), LaneKind::Sub);
    }

    #[tokio::test]
    async fn test_move_to_sub_lane() {
        let scheduler = Scheduler::new("mover").unwrap();
        let handle = scheduler.submit(task("t")).unwrap();

        assert_eq!(scheduler.active(LaneKind::Main), 1);
        assert!(scheduler.move_to_sub_lane(&handle));
        assert_eq!(handle.lane(), LaneKind::Sub);
        assert_eq!(scheduler.active(LaneKind::Main), 0);
        assert_eq!(scheduler.active(LaneKind::Sub), 1);
        assert!(!scheduler.move_to_sub_lane(&handle));

        let other = Scheduler::new("other").unwrap();
        let foreign = other.submit(task("f")).unwrap();
        assert!(!scheduler.move_to_sub_lane(&foreign));
    }
}
