//! Error types for the coexec runtime.
//!
//! Errors fall in two families. `TaskError` describes what went wrong during a
//! single attempt of an execution: it is delivered into suspended computations,
//! caught or escapes, and is accumulated across retries. `RuntimeError` covers
//! construction problems (invalid configuration, no async runtime) that are
//! reported synchronously and never retried.
//!
//! A rejected execution delivers a `Failure`: the ordered list of every
//! attempt's terminal error.

use std::fmt;
use thiserror::Error;

/// Error raised while running one attempt of an execution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    /// Raised or yielded by a computation
    #[error("{0}")]
    Raised(String),

    /// An async value settled with a foreign rejection reason
    #[error("async value rejected: {0}")]
    Rejected(String),

    /// The execution ran past its configured timeout
    #[error("execution timed out after {0}ms")]
    Timeout(u64),

    /// A delegated execution or fan-out member failed
    #[error("nested execution failed: {0}")]
    Nested(Failure),

    /// Several errors raised together as one
    #[error("{} errors raised together", .0.len())]
    Many(Vec<TaskError>),

    /// A result handle was dropped before it settled
    #[error("result handle dropped before it settled")]
    Abandoned,
}

impl TaskError {
    /// Create an error raised by a computation.
    pub fn raised(message: impl Into<String>) -> Self {
        Self::Raised(message.into())
    }

    /// Wrap a foreign rejection reason.
    pub fn rejected(reason: impl fmt::Display) -> Self {
        Self::Rejected(reason.to_string())
    }

    /// Whether this error was synthesized by a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The failure of a nested execution, if this error wraps one.
    pub fn nested(&self) -> Option<&Failure> {
        match self {
            Self::Nested(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<RuntimeError> for TaskError {
    fn from(err: RuntimeError) -> Self {
        Self::Raised(err.to_string())
    }
}

/// The rejection value of an execution.
///
/// Holds one entry per failed attempt, in attempt order. A failure after a
/// single attempt is still a one-element list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Failure {
    errors: Vec<TaskError>,
}

impl Failure {
    /// Create a failure from the accumulated attempt errors.
    pub fn new(errors: Vec<TaskError>) -> Self {
        Self { errors }
    }

    /// All attempt errors, oldest first.
    pub fn errors(&self) -> &[TaskError] {
        &self.errors
    }

    /// Number of failed attempts recorded.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether no error was recorded.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// The error of the first attempt.
    pub fn first(&self) -> Option<&TaskError> {
        self.errors.first()
    }

    /// The error of the last attempt.
    pub fn last(&self) -> Option<&TaskError> {
        self.errors.last()
    }

    /// Consume the failure and return its errors.
    pub fn into_errors(self) -> Vec<TaskError> {
        self.errors
    }
}

impl From<TaskError> for Failure {
    fn from(err: TaskError) -> Self {
        Self { errors: vec![err] }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => write!(f, "failed without error"),
            [only] => write!(f, "{}", only),
            [.., last] => write!(f, "{} attempts failed, last: {}", self.errors.len(), last),
        }
    }
}

impl std::error::Error for Failure {}

/// Error raised while constructing schedulers or submitting work.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The configuration record is not usable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Work was submitted outside of an async runtime
    #[error("no async runtime available: {0}")]
    NoRuntime(String),

    /// A JSON configuration could not be parsed
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for runtime construction and submission.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display() {
        let single = Failure::from(TaskError::raised("boom"));
        assert_eq!(single.to_string(), "boom");

        let many = Failure::new(vec![TaskError::raised("a"), TaskError::Timeout(10)]);
        assert_eq!(many.len(), 2);
        assert_eq!(
            many.to_string(),
            "2 attempts failed, last: execution timed out after 10ms"
        );
    }

    #[test]
    fn test_nested_failure_access() {
        let inner = Failure::from(TaskError::raised("inner"));
        let err = TaskError::Nested(inner.clone());

        assert_eq!(err.nested(), Some(&inner));
        assert!(TaskError::Timeout(5).is_timeout());
        assert!(TaskError::raised("x").nested().is_none());
    }

    #[test]
    fn test_runtime_error_converts_to_task_error() {
        let err: TaskError = RuntimeError::InvalidConfig("cores must be positive".into()).into();
        assert_eq!(
            err,
            TaskError::raised("invalid configuration: cores must be positive")
        );
    }

    #[test]
    fn test_many_display() {
        let err = TaskError::Many(vec![TaskError::raised("a"), TaskError::raised("b")]);
        assert_eq!(err.to_string(), "2 errors raised together");
    }
}
