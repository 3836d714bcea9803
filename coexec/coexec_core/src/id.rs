//! Strongly-typed identifiers.
//!
//! Each identifier is a thin wrapper around a UUID with a phantom marker, so
//! identifiers for different entities cannot be mixed up.
//!
//! # Examples
//!
//! ```
//! use coexec_core::id::{ExecutionId, SchedulerId};
//! use std::str::FromStr;
//!
//! let execution = ExecutionId::new();
//! let scheduler = SchedulerId::new();
//! assert_ne!(execution.to_string(), scheduler.to_string());
//!
//! let id_str = "550e8400-e29b-41d4-a716-446655440000";
//! let execution = ExecutionId::from_str(id_str).unwrap();
//! assert_eq!(execution.to_string(), id_str);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// A type-safe identifier based on UUID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Id<T> {
    uuid: Uuid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    /// Create a new random identifier.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Create an identifier from a specific UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _marker: PhantomData,
        }
    }

    /// The underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_uuid(Uuid::from_str(s)?))
    }
}

/// Marker for execution identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ExecutionMarker;

/// Marker for scheduler identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SchedulerMarker;

/// Identifier of one run of a task.
pub type ExecutionId = Id<ExecutionMarker>;

/// Identifier of a scheduler instance.
pub type SchedulerId = Id<SchedulerMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = ExecutionId::new();
        let b = ExecutionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_id_round_trips_through_string() {
        let id = SchedulerId::new();
        let parsed = SchedulerId::from_str(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
        assert!(SchedulerId::from_str("not-a-uuid").is_err());
    }
}
