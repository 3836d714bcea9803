//! Executions: one in-flight run of a task.
//!
//! An [`Execution`] owns the frame stack of its current attempt, the retry and
//! timeout bookkeeping and the result cell exposed to callers through an
//! [`ExecutionHandle`]. Its state is only advanced by the drive loop of the
//! lane it belongs to.

use std::fmt;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use coexec_core::config::SchedulerConfig;
use coexec_core::error::{Failure, TaskError};
use coexec_core::id::ExecutionId;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, MutexGuard};
use tokio::time::Instant;

use super::promise::{Outcome, Promise};
use crate::model::coroutine::Resume;
use crate::model::task::{Task, TaskConfig};
use crate::model::value::{Factory, Frame, Value};
use crate::scheduler::executioner::Scheduler;
use crate::scheduler::lane::{Lane, LaneKind};

/// Effective configuration of one execution.
///
/// Built from the owning scheduler's configuration, overridden field by field
/// by the task's configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Retries allowed after a failed attempt
    pub retries: u32,

    /// Pause before a retry
    pub retry_interval: Duration,

    /// Time allowed since the first start, `None` when disabled
    pub timeout: Option<Duration>,

    /// Fan-out width
    pub threads: usize,

    /// Exclusive occupancy of the bounded lane
    pub heavy: bool,
}

impl ExecutionConfig {
    /// Merge lane configuration with task overrides.
    pub fn resolve(base: &SchedulerConfig, task: &TaskConfig) -> Self {
        let timeout = task.timeout.unwrap_or(base.timeout);
        Self {
            retries: task.retries.unwrap_or(base.retries),
            retry_interval: Duration::from_millis(
                task.retry_interval.unwrap_or(base.retry_interval),
            ),
            timeout: (timeout > 0).then(|| Duration::from_millis(timeout)),
            threads: task.threads.unwrap_or(base.threads).max(1),
            heavy: task.heavy.unwrap_or(false),
        }
    }
}

/// Result of asking an execution to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    /// No retries left
    Exhausted,
    /// The frame stack was reset for another attempt
    Scheduled { attempt: u32 },
}

pub(crate) struct ExecState {
    pub(crate) entry: Factory,
    pub(crate) frames: Vec<Frame>,
    /// Set when `frames` must be rebuilt from the entry before the next step
    pub(crate) restart: bool,
    pub(crate) pending: Resume,
    retries: u32,
    errors: Vec<TaskError>,
    pub(crate) steps: u64,
    epoch: u64,
}

/// One run of a task.
pub(crate) struct Execution {
    id: ExecutionId,
    name: String,
    task: Task,
    scheduler: Scheduler,
    lane: Mutex<LaneKind>,
    parent: Option<Weak<Execution>>,
    config: ExecutionConfig,
    busy: AtomicBool,
    stepping: AtomicBool,
    stop_requested: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    state: Mutex<ExecState>,
    promise: Promise,
}

impl Execution {
    pub(crate) fn new(
        task: Task,
        scheduler: Scheduler,
        lane: LaneKind,
        parent: Option<&Arc<Execution>>,
    ) -> Arc<Self> {
        let name = match parent {
            Some(parent) => format!("{}::{}", parent.task.name(), task.name()),
            None => task.name().to_string(),
        };
        let config = ExecutionConfig::resolve(scheduler.config(), task.config());
        let entry = task.entry().clone();

        Arc::new(Self {
            id: ExecutionId::new(),
            name,
            task,
            scheduler,
            lane: Mutex::new(lane),
            parent: parent.map(Arc::downgrade),
            config,
            busy: AtomicBool::new(false),
            stepping: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            started_at: Mutex::new(None),
            state: Mutex::new(ExecState {
                entry,
                frames: Vec::new(),
                restart: true,
                pending: Resume::Next(Value::null()),
                retries: 0,
                errors: Vec::new(),
                steps: 0,
                epoch: 0,
            }),
            promise: Promise::new(),
        })
    }

    pub(crate) fn id(&self) -> ExecutionId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub(crate) fn is_heavy(&self) -> bool {
        self.config.heavy
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Claim the execution for one step. `None` while another step runs.
    pub(crate) fn begin_step(&self) -> Option<StepClaim<'_>> {
        self.stepping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| StepClaim(&self.stepping))
    }

    pub(crate) fn lane_kind(&self) -> LaneKind {
        *self.lane.lock()
    }

    /// Lock the lane assignment. Held while the execution changes lanes.
    pub(crate) fn lane_slot(&self) -> MutexGuard<'_, LaneKind> {
        self.lane.lock()
    }

    pub(crate) fn current_lane(&self) -> Arc<Lane> {
        self.scheduler.lane(self.lane_kind()).clone()
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ExecState> {
        self.state.lock()
    }

    /// Schedulers of this execution and all its live ancestors.
    pub(crate) fn ancestry(&self) -> Vec<Scheduler> {
        let mut schedulers = vec![self.scheduler.clone()];
        let mut next = self.parent.as_ref().and_then(Weak::upgrade);
        while let Some(parent) = next {
            schedulers.push(parent.scheduler.clone());
            next = parent.parent.as_ref().and_then(Weak::upgrade);
        }
        schedulers
    }

    /// Restart from a fresh top-level frame.
    pub(crate) fn reset(&self) {
        let mut state = self.state.lock();
        self.reset_locked(&mut state);
    }

    fn reset_locked(&self, state: &mut ExecState) {
        state.frames.clear();
        state.restart = true;
        state.pending = Resume::Next(Value::null());
        state.epoch += 1;
        self.busy.store(false, Ordering::SeqCst);
    }

    pub(crate) fn add_error(&self, err: TaskError) {
        self.state.lock().errors.push(err);
    }

    pub(crate) fn retry(&self) -> RetryDecision {
        let mut state = self.state.lock();
        if state.retries >= self.config.retries {
            return RetryDecision::Exhausted;
        }
        state.retries += 1;
        self.reset_locked(&mut state);
        RetryDecision::Scheduled {
            attempt: state.retries,
        }
    }

    /// Mark the execution busy for `duration`.
    pub(crate) fn pause(self: &Arc<Self>, duration: Duration) -> BoxFuture<'static, ()> {
        self.busy.store(true, Ordering::SeqCst);
        let epoch = self.state.lock().epoch;
        let exec = Arc::clone(self);
        async move {
            tokio::time::sleep(duration).await;
            if exec.state.lock().epoch == epoch {
                exec.busy.store(false, Ordering::SeqCst);
            }
        }
        .boxed()
    }

    /// Mark the execution busy until `result` settles, then store it as the
    /// next resumption input.
    ///
    /// Results arriving after a reset belong to an abandoned attempt and are
    /// dropped.
    pub(crate) fn wait_on(
        self: &Arc<Self>,
        result: BoxFuture<'static, Result<Value, TaskError>>,
    ) -> BoxFuture<'static, ()> {
        self.busy.store(true, Ordering::SeqCst);
        let epoch = self.state.lock().epoch;
        let exec = Arc::clone(self);
        async move {
            let result = result.await;
            let mut state = exec.state.lock();
            if state.epoch != epoch {
                return;
            }
            state.pending = match result {
                Ok(value) => Resume::Next(value),
                Err(err) => Resume::Throw(err),
            };
            exec.busy.store(false, Ordering::SeqCst);
        }
        .boxed()
    }

    /// Record the start of the first attempt.
    pub(crate) fn mark_started(&self) {
        self.started_at.lock().get_or_insert_with(Instant::now);
    }

    pub(crate) fn timed_out(&self) -> bool {
        match (self.config.timeout, *self.started_at.lock()) {
            (Some(timeout), Some(started)) => started.elapsed() >= timeout,
            _ => false,
        }
    }

    pub(crate) fn timeout_error(&self) -> TaskError {
        let millis = self.config.timeout.map_or(0, |t| t.as_millis() as u64);
        TaskError::Timeout(millis)
    }

    /// Ask the drive loop to abort this execution at its next visit.
    pub(crate) fn request_stop(self: &Arc<Self>) {
        if self.promise.is_settled() {
            return;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        self.busy.store(false, Ordering::SeqCst);
        self.current_lane().schedule_tick();
    }

    pub(crate) fn take_stop_request(&self) -> bool {
        self.stop_requested.swap(false, Ordering::SeqCst)
    }

    /// Replace the entry with one completing with `false` and restart.
    pub(crate) fn apply_stop(&self) {
        self.state.lock().entry = Factory::new(|| Frame::ready(false));
        self.reset();
    }

    pub(crate) fn resolve(&self, value: Value) -> bool {
        self.promise.settle(Ok(value))
    }

    /// Reject with every error accumulated so far.
    pub(crate) fn reject(&self) -> bool {
        let errors = self.state.lock().errors.clone();
        self.promise.settle(Err(Failure::new(errors)))
    }

    pub(crate) fn steps(&self) -> u64 {
        self.state.lock().steps
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.state.lock().retries + 1
    }

    pub(crate) fn errors(&self) -> Vec<TaskError> {
        self.state.lock().errors.clone()
    }
}

/// Exclusive right to step an execution, released on drop.
pub(crate) struct StepClaim<'a>(&'a AtomicBool);

impl Drop for StepClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Caller-side handle to an execution's result.
///
/// Can be awaited directly, or observed through continuations.
#[derive(Clone)]
pub struct ExecutionHandle(Arc<Execution>);

impl ExecutionHandle {
    pub(crate) fn new(execution: Arc<Execution>) -> Self {
        Self(execution)
    }

    pub(crate) fn execution(&self) -> &Arc<Execution> {
        &self.0
    }

    /// Unique identifier of the execution.
    pub fn id(&self) -> ExecutionId {
        self.0.id()
    }

    /// Display name, `parent::child` for delegated executions.
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Scheduler owning the execution.
    pub fn scheduler(&self) -> &Scheduler {
        self.0.scheduler()
    }

    /// Lane currently holding the execution.
    pub fn lane(&self) -> LaneKind {
        self.0.lane_kind()
    }

    /// Effective configuration.
    pub fn config(&self) -> &ExecutionConfig {
        self.0.config()
    }

    /// Register a continuation called with the final result.
    pub fn on_settled(&self, continuation: impl FnOnce(&Result<Value, Failure>) + Send + 'static) {
        self.0.promise.on_settled(continuation)
    }

    /// Register a continuation called if the execution resolves.
    pub fn on_success(&self, continuation: impl FnOnce(&Value) + Send + 'static) {
        self.on_settled(move |outcome| {
            if let Ok(value) = outcome {
                continuation(value)
            }
        })
    }

    /// Register a continuation called if the execution rejects.
    pub fn on_failure(&self, continuation: impl FnOnce(&Failure) + Send + 'static) {
        self.on_settled(move |outcome| {
            if let Err(failure) = outcome {
                continuation(failure)
            }
        })
    }

    /// Wait for the final result.
    pub fn wait(&self) -> BoxFuture<'static, Result<Value, Failure>> {
        self.0.promise.wait()
    }

    /// The final result, if settled.
    pub fn outcome(&self) -> Option<Result<Value, Failure>> {
        self.0.promise.outcome()
    }

    /// Whether the execution has settled.
    pub fn is_settled(&self) -> bool {
        self.0.promise.is_settled()
    }

    /// Abort the execution.
    ///
    /// Takes effect at the next visit of the drive loop: the execution then
    /// resolves with `false` instead of finishing its computation.
    pub fn stop(&self) {
        self.0.request_stop()
    }

    /// Number of step cycles run so far.
    pub fn steps(&self) -> u64 {
        self.0.steps()
    }

    /// Number of attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.0.attempts()
    }

    /// Errors accumulated by failed attempts.
    pub fn errors(&self) -> Vec<TaskError> {
        self.0.errors()
    }
}

impl IntoFuture for ExecutionHandle {
    type Output = Outcome;
    type IntoFuture = BoxFuture<'static, Outcome>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait()
    }
}

impl fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_config_prefers_task_overrides() {
        let base = SchedulerConfig {
            retries: 2,
            threads: 4,
            timeout: 50,
            ..Default::default()
        };
        let task = TaskConfig::named("t").with_retries(0).heavy();

        let config = ExecutionConfig::resolve(&base, &task);
        assert_eq!(config.retries, 0);
        assert_eq!(config.retry_interval, Duration::from_millis(200));
        assert_eq!(config.timeout, Some(Duration::from_millis(50)));
        assert_eq!(config.threads, 4);
        assert!(config.heavy);
    }

    #[test]
    fn test_zero_timeout_disables() {
        let task = TaskConfig::named("t").with_timeout(0);
        let config = ExecutionConfig::resolve(&SchedulerConfig::default(), &task);
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn test_retry_until_exhausted() {
        let scheduler = Scheduler::new(SchedulerConfig {
            retries: 2,
            ..Default::default()
        })
        .unwrap();
        let task = Task::new("r", Factory::new(|| Frame::ready(1)));
        let exec = Execution::new(task, scheduler, LaneKind::Main, None);

        exec.add_error(TaskError::raised("first"));
        assert_eq!(exec.retry(), RetryDecision::Scheduled { attempt: 1 });
        exec.add_error(TaskError::raised("second"));
        assert_eq!(exec.retry(), RetryDecision::Scheduled { attempt: 2 });
        exec.add_error(TaskError::raised("third"));
        assert_eq!(exec.retry(), RetryDecision::Exhausted);

        assert_eq!(exec.attempts(), 3);
        assert!(exec.reject());
        let failure = exec.promise.outcome().unwrap().unwrap_err();
        assert_eq!(failure.len(), 3);
        assert_eq!(failure.first(), Some(&TaskError::raised("first")));
    }

    #[test]
    fn test_child_name_and_ancestry() {
        let a = Scheduler::new("a").unwrap();
        let b = Scheduler::new("b").unwrap();
        let parent = Execution::new(
            Task::new("outer", Factory::new(|| Frame::ready(1))),
            a.clone(),
            LaneKind::Main,
            None,
        );
        let child = Execution::new(
            Task::new("inner", Factory::new(|| Frame::ready(2))),
            b.clone(),
            LaneKind::Main,
            Some(&parent),
        );

        assert_eq!(child.name(), "<outer>::<inner>");
        let ancestry = child.ancestry();
        assert_eq!(ancestry.len(), 2);
        assert!(ancestry[0].ptr_eq(&b));
        assert!(ancestry[1].ptr_eq(&a));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_clears_busy() {
        let scheduler = Scheduler::new("p").unwrap();
        let exec = Execution::new(
            Task::new("p", Factory::new(|| Frame::ready(1))),
            scheduler,
            LaneKind::Main,
            None,
        );

        let pause = exec.pause(Duration::from_millis(20));
        assert!(exec.is_busy());
        pause.await;
        assert!(!exec.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_measured_from_first_start() {
        let scheduler = Scheduler::new(SchedulerConfig {
            timeout: 10,
            ..Default::default()
        })
        .unwrap();
        let exec = Execution::new(
            Task::new("slow", Factory::new(|| Frame::ready(1))),
            scheduler,
            LaneKind::Main,
            None,
        );

        assert!(!exec.timed_out());
        exec.mark_started();
        tokio::time::advance(Duration::from_millis(5)).await;
        exec.reset();
        exec.mark_started();
        assert!(!exec.timed_out());
        tokio::time::advance(Duration::from_millis(6)).await;
        assert!(exec.timed_out());
        assert_eq!(exec.timeout_error(), TaskError::Timeout(10));
    }

    #[tokio::test]
    async fn test_stale_results_are_dropped() {
        let scheduler = Scheduler::new("s").unwrap();
        let exec = Execution::new(
            Task::new("s", Factory::new(|| Frame::ready(1))),
            scheduler,
            LaneKind::Main,
            None,
        );

        let stale = exec.wait_on(futures::future::ready(Ok(Value::from(1))).boxed());
        exec.reset();
        stale.await;
        assert!(matches!(exec.lock_state().pending, Resume::Next(ref v) if v.is_null()));

        let fresh = exec.wait_on(futures::future::ready(Ok(Value::from(2))).boxed());
        assert!(exec.is_busy());
        fresh.await;
        assert!(!exec.is_busy());
        assert!(matches!(exec.lock_state().pending, Resume::Next(ref v) if v.as_i64() == Some(2)));
    }

    #[test]
    fn test_step_claim_is_exclusive() {
        let scheduler = Scheduler::new("c").unwrap();
        let exec = Execution::new(
            Task::new("c", Factory::new(|| Frame::ready(1))),
            scheduler,
            LaneKind::Main,
            None,
        );

        let claim = exec.begin_step();
        assert!(claim.is_some());
        assert!(exec.begin_step().is_none());
        drop(claim);
        assert!(exec.begin_step().is_some());
    }
}
