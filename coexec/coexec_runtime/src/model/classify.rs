//! Structural value classification.
//!
//! Maps every [`Value`] to one [`ValueKind`], which decides how the step
//! interpreter reacts to it. Arrays are classified from their elements
//! without recursing into nested arrays:
//!
//! - an empty array is plain
//! - any error element makes the whole array an error
//! - a first element of the plain family (data or a nested array) makes the
//!   whole array plain, which also covers single-element arrays
//! - otherwise the array is `ArrayOf<kind>` when every element shares the
//!   first element's kind, and plain when kinds are mixed

use super::value::Value;

/// How the runtime treats a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Push as a new frame
    NestedComputation,
    /// Instantiate and push as a new frame
    NestedFactory,
    /// Delegate to a scheduler
    SubTask,
    /// Wait for settlement
    AsyncValue,
    /// Deliver into the current frame
    Error,
    /// Deliver into the current frame as one error
    ArrayOfError,
    /// Feed back as the next input
    Plain,
    /// Fan out, one member per computation
    ArrayOfNestedComputation,
    /// Fan out, one member per factory
    ArrayOfNestedFactory,
    /// Fan out, one member per task
    ArrayOfSubTask,
    /// Wait for every async value
    ArrayOfAsyncValue,
}

impl ValueKind {
    /// Whether values of this kind suspend or redirect the current frame.
    pub fn is_yieldable(self) -> bool {
        !matches!(self, ValueKind::Plain)
    }

    fn array_of(self) -> ValueKind {
        match self {
            ValueKind::NestedComputation => ValueKind::ArrayOfNestedComputation,
            ValueKind::NestedFactory => ValueKind::ArrayOfNestedFactory,
            ValueKind::SubTask => ValueKind::ArrayOfSubTask,
            ValueKind::AsyncValue => ValueKind::ArrayOfAsyncValue,
            ValueKind::Error => ValueKind::ArrayOfError,
            _ => ValueKind::Plain,
        }
    }
}

/// Classify a value.
pub fn classify(value: &Value) -> ValueKind {
    match value {
        Value::Array(items) => classify_array(items),
        other => classify_element(other),
    }
}

fn classify_element(value: &Value) -> ValueKind {
    match value {
        Value::Data(_) | Value::Array(_) => ValueKind::Plain,
        Value::Computation(_) => ValueKind::NestedComputation,
        Value::Factory(_) => ValueKind::NestedFactory,
        Value::Task(_) => ValueKind::SubTask,
        Value::Async(_) => ValueKind::AsyncValue,
        Value::Error(_) => ValueKind::Error,
    }
}

fn classify_array(items: &[Value]) -> ValueKind {
    let Some(first) = items.first() else {
        return ValueKind::Plain;
    };
    if items.iter().any(|item| matches!(item, Value::Error(_))) {
        return ValueKind::ArrayOfError;
    }

    let kind = classify_element(first);
    if kind == ValueKind::Plain {
        return ValueKind::Plain;
    }
    if items.iter().all(|item| classify_element(item) == kind) {
        kind.array_of()
    } else {
        ValueKind::Plain
    }
}
