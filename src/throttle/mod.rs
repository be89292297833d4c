//! Throttled FIFO execution of asynchronous operations.
//!
//! A [`RequestThrottle`] runs submitted operations one at a time, in
//! submission order, starting no two of them less than the configured
//! minimum interval apart. A [`ThrottleRegistry`] holds one throttle per
//! named lane.

mod queue;
mod registry;
mod stats;
mod task;

use serde::{Deserialize, Serialize};

pub use queue::RequestThrottle;
pub use registry::ThrottleRegistry;
pub use stats::ThrottleStats;
pub use task::Submission;

/// Lifecycle state of a throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleState {
    /// No drain loop is running
    Idle,
    /// A drain loop is working through the queue
    Draining,
}
