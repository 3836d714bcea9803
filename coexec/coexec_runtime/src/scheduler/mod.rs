//! Schedulers and their admission lanes.

pub mod executioner;
pub mod lane;
