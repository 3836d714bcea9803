//! Single-settlement result cell.

use std::mem;

use coexec_core::error::{Failure, TaskError};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::model::value::Value;

/// Final result of an execution.
pub type Outcome = Result<Value, Failure>;

type Continuation = Box<dyn FnOnce(&Outcome) + Send>;

enum State {
    Pending(Vec<Continuation>),
    Settled(Outcome),
}

/// Result cell settled exactly once.
///
/// Continuations registered before settlement run in registration order when
/// it settles; continuations registered afterwards run immediately. They never
/// run while the cell is locked.
pub(crate) struct Promise {
    state: Mutex<State>,
}

impl Promise {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::Pending(Vec::new())),
        }
    }

    /// Settle the cell. Returns false if it was already settled.
    pub(crate) fn settle(&self, outcome: Outcome) -> bool {
        let continuations = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Settled(_) => return false,
                State::Pending(continuations) => {
                    let continuations = mem::take(continuations);
                    *state = State::Settled(outcome.clone());
                    continuations
                }
            }
        };
        for continuation in continuations {
            continuation(&outcome);
        }
        true
    }

    pub(crate) fn on_settled(&self, continuation: impl FnOnce(&Outcome) + Send + 'static) {
        let settled = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Pending(continuations) => {
                    continuations.push(Box::new(continuation));
                    return;
                }
                State::Settled(outcome) => outcome.clone(),
            }
        };
        continuation(&settled);
    }

    pub(crate) fn outcome(&self) -> Option<Outcome> {
        match &*self.state.lock() {
            State::Settled(outcome) => Some(outcome.clone()),
            State::Pending(_) => None,
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        matches!(&*self.state.lock(), State::Settled(_))
    }

    pub(crate) fn wait(&self) -> BoxFuture<'static, Outcome> {
        let (tx, rx) = oneshot::channel();
        self.on_settled(move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        async move {
            rx.await
                .unwrap_or_else(|_| Err(Failure::from(TaskError::Abandoned)))
        }
        .boxed()
    }
}
