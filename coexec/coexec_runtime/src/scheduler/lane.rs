//! Admission lanes and their drive loop.
//!
//! A lane holds an ordered set of active executions and drives them one step
//! at a time. The bounded lane admits only the first `cores` executions of its
//! set (or a single heavy one); the unbounded lane drives every member.
//!
//! Ticks never run inline: every follow-up tick is spawned as a fresh task,
//! so long-running workloads do not grow the call stack.

use std::fmt;
use std::sync::Arc;

use coexec_core::config::SchedulerConfig;
use futures::future::BoxFuture;
use log::warn;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::executioner::{Logger, SchedulerEvent};
use crate::engine::execution::Execution;
use crate::engine::step::{self, Visit};

/// The two lanes of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneKind {
    /// Bounded by `cores` when pooling
    Main,
    /// Never limits admission
    Sub,
}

impl fmt::Display for LaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneKind::Main => f.write_str("main"),
            LaneKind::Sub => f.write_str("sub"),
        }
    }
}

#[derive(Default)]
struct LaneState {
    active: Vec<Arc<Execution>>,
    busy: bool,
}

/// A concurrency-limited admission pool.
pub(crate) struct Lane {
    kind: LaneKind,
    config: SchedulerConfig,
    state: Mutex<LaneState>,
    ticking: Mutex<()>,
    logger: Logger,
    events: broadcast::Sender<SchedulerEvent>,
}

impl Lane {
    pub(crate) fn new(
        kind: LaneKind,
        mut config: SchedulerConfig,
        logger: Logger,
        events: broadcast::Sender<SchedulerEvent>,
    ) -> Self {
        if kind == LaneKind::Sub {
            config.pooling = false;
        }
        Self {
            kind,
            config,
            state: Mutex::new(LaneState::default()),
            ticking: Mutex::new(()),
            logger,
            events,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().active.len()
    }

    pub(crate) fn log(&self, message: &str) {
        self.logger.log(self.kind, message);
    }

    /// Add an execution, right before its parent when the lane pools and the
    /// parent is a member, otherwise at the end.
    pub(crate) fn insert(&self, exec: Arc<Execution>, parent: Option<&Arc<Execution>>) {
        let mut state = self.state.lock();
        let position = match parent {
            Some(parent) if self.config.pooling => {
                state.active.iter().position(|e| Arc::ptr_eq(e, parent))
            }
            _ => None,
        };
        match position {
            Some(index) => state.active.insert(index, exec),
            None => state.active.push(exec),
        }
    }

    pub(crate) fn push(&self, exec: Arc<Execution>) {
        self.state.lock().active.push(exec);
    }

    pub(crate) fn remove(&self, exec: &Arc<Execution>) -> bool {
        let mut state = self.state.lock();
        match state.active.iter().position(|e| Arc::ptr_eq(e, exec)) {
            Some(index) => {
                state.active.remove(index);
                true
            }
            None => false,
        }
    }

    /// Spawn a tick of this lane.
    pub(crate) fn schedule_tick(self: &Arc<Self>) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let lane = Arc::clone(self);
                runtime.spawn(async move { lane.tick() });
            }
            Err(err) => warn!("[{}] cannot schedule tick: {}", self.kind, err),
        }
    }

    /// Run one drive-loop tick.
    pub(crate) fn tick(self: &Arc<Self>) {
        let _ticking = self.ticking.lock();

        let candidates = {
            let mut state = self.state.lock();
            if state.active.is_empty() {
                if state.busy {
                    state.busy = false;
                    drop(state);
                    self.log("done");
                    if self.kind == LaneKind::Main {
                        let _ = self.events.send(SchedulerEvent::Done { finished: true });
                    }
                }
                return;
            }
            state.busy = true;
            self.admit(&state.active)
        };

        let mut progressed = false;
        for exec in candidates {
            match step::visit(&exec, self.kind) {
                Visit::Skipped => {}
                Visit::Continue => progressed = true,
                Visit::Wait(wait) => {
                    progressed = true;
                    self.tick_after(exec, wait);
                }
                Visit::Backoff { attempt, pause } => {
                    self.log(&format!(
                        "process {} retrying ({}/{})",
                        exec.name(),
                        attempt,
                        exec.config().retries
                    ));
                    self.tick_after(exec, pause);
                }
                Visit::Resolved(value) => {
                    progressed = true;
                    exec.scheduler().detach(&exec);
                    let steps = exec.steps();
                    self.log(&format!(
                        "process {} completed in {} cycle{}",
                        exec.name(),
                        steps,
                        if steps > 1 { "s" } else { "" }
                    ));
                    exec.resolve(value);
                }
                Visit::Rejected => {
                    progressed = true;
                    exec.scheduler().detach(&exec);
                    self.log(&format!(
                        "process {} failed in cycle {}",
                        exec.name(),
                        exec.steps()
                    ));
                    exec.reject();
                }
            }
        }

        if progressed {
            self.schedule_tick();
        }
    }

    /// Select the executions allowed to step in this tick.
    fn admit(&self, active: &[Arc<Execution>]) -> Vec<Arc<Execution>> {
        let window = if self.config.pooling {
            let window = &active[..active.len().min(self.config.cores)];
            match window.iter().find(|e| e.is_heavy()) {
                Some(heavy) => std::slice::from_ref(heavy),
                None => window,
            }
        } else {
            active
        };
        window.iter().filter(|e| !e.is_busy()).cloned().collect()
    }

    /// Tick the execution's current lane once `wait` completes.
    fn tick_after(&self, exec: Arc<Execution>, wait: BoxFuture<'static, ()>) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    wait.await;
                    exec.current_lane().tick();
                });
            }
            Err(err) => warn!("[{}] cannot wait for {}: {}", self.kind, exec.name(), err),
        }
    }
}
