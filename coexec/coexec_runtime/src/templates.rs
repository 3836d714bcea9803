//! Helpers producing values the runtime already understands.
//!
//! Nothing here extends the scheduler; each helper builds an async value, a
//! computation or a task from a more convenient shape.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use coexec_core::error::TaskError;
use tokio::sync::oneshot;

use crate::model::coroutine::{Co, Coroutine, Resume, Step};
use crate::model::task::{Task, TaskConfig};
use crate::model::value::{AsyncValue, Factory, Frame, Value};

/// Async value resolving to null after `millis` milliseconds.
pub fn delay(millis: u64) -> Value {
    AsyncValue::new(async move {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(Value::null())
    })
    .into()
}

struct Sequence {
    queued: VecDeque<Value>,
    results: Vec<Value>,
    started: bool,
}

impl Coroutine for Sequence {
    fn resume(&mut self, input: Resume) -> Result<Step, TaskError> {
        match input {
            Resume::Throw(err) => return Err(err),
            Resume::Next(value) if self.started => self.results.push(value),
            Resume::Next(_) => self.started = true,
        }
        match self.queued.pop_front() {
            Some(next) => Ok(Step::Yield(next)),
            None => Ok(Step::Return(Value::Array(std::mem::take(&mut self.results)))),
        }
    }
}

/// Computation yielding `values` one at a time and returning their results.
///
/// Unlike yielding the array directly, nothing runs in parallel.
pub fn sequence(values: Vec<Value>) -> Value {
    Frame::new(Sequence {
        queued: values.into(),
        results: Vec::new(),
        started: false,
    })
    .into()
}

/// Callback invoked with a callback-style result.
pub type Callback = Box<dyn FnOnce(Result<Value, String>) + Send>;

/// Adapt a callback-style operation to an async value.
///
/// `operation` runs immediately and must eventually call the callback it is
/// given. An `Err` reason becomes a rejection.
pub fn callback<F>(operation: F) -> Value
where
    F: FnOnce(Callback),
{
    let (tx, rx) = oneshot::channel();
    operation(Box::new(move |result| {
        let _ = tx.send(result);
    }));
    AsyncValue::new(async move {
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(reason)) => Err(TaskError::Rejected(reason)),
            Err(_) => Err(TaskError::Abandoned),
        }
    })
    .into()
}

/// Shortcut for [`Task::generator`].
pub fn spawn<F, Fut>(config: impl Into<TaskConfig>, body: F) -> Task
where
    F: Fn(Co) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    Task::generator(config, body)
}

/// Turn closures returning yieldables into an array of factories.
///
/// Yielding the result fans the closures out, each member resolving to what
/// its closure's value resolves to.
pub fn functor<F>(fns: Vec<F>) -> Value
where
    F: Fn() -> Value + Send + Sync + 'static,
{
    fns.into_iter()
        .map(|f| Value::Factory(Factory::new(move || Frame::forward(f()))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::classify::{classify, ValueKind};

    fn next(value: impl Into<Value>) -> Resume {
        Resume::Next(value.into())
    }

    #[test]
    fn test_sequence_yields_in_order() {
        let mut seq = Sequence {
            queued: vec![Value::from(1), Value::from(2)].into(),
            results: Vec::new(),
            started: false,
        };

        assert!(matches!(seq.resume(next(())).unwrap(), Step::Yield(v) if v.as_i64() == Some(1)));
        assert!(matches!(seq.resume(next(10)).unwrap(), Step::Yield(v) if v.as_i64() == Some(2)));
        match seq.resume(next(20)).unwrap() {
            Step::Return(value) => {
                assert_eq!(value.to_data(), Some(serde_json::json!([10, 20])))
            }
            other => panic!("unexpected step: {:?}", other),
        }
    }

    #[test]
    fn test_functor_builds_factories() {
        let value = functor((1..=2).map(|i| move || Value::from(i)).collect());
        assert_eq!(classify(&value), ValueKind::ArrayOfNestedFactory);
    }

    #[test]
    fn test_delay_is_async() {
        assert_eq!(classify(&delay(5)), ValueKind::AsyncValue);
    }

    #[tokio::test]
    async fn test_callback_resolves_and_rejects() {
        let ok = callback(|done| done(Ok(Value::from("data"))));
        let Value::Async(ok) = ok else {
            panic!("expected an async value")
        };
        assert_eq!(ok.await.unwrap().as_str(), Some("data"));

        let failed = callback(|done| done(Err("io error".to_string())));
        let Value::Async(failed) = failed else {
            panic!("expected an async value")
        };
        assert_eq!(
            failed.await.unwrap_err(),
            TaskError::Rejected("io error".to_string())
        );

        let dropped = callback(|_done| {});
        let Value::Async(dropped) = dropped else {
            panic!("expected an async value")
        };
        assert_eq!(dropped.await.unwrap_err(), TaskError::Abandoned);
    }
}
