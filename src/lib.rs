//! Pacer - FIFO request throttle queue
//!
//! This crate serializes asynchronous operations, typically calls to a
//! rate-limited external API, so that they run one at a time in submission
//! order and no two start less than a configured interval apart. Each caller
//! gets back exactly what its own operation returned.
//!
//! ```no_run
//! use std::time::Duration;
//! use pacer::{RequestThrottle, ThrottleConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let throttle = RequestThrottle::new(ThrottleConfig::with_interval(Duration::from_secs(1)))?;
//! let answer = throttle
//!     .submit(|| async { Ok::<_, anyhow::Error>(42) })
//!     .await?;
//! assert_eq!(answer, 42);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod runner;
pub mod telemetry;
pub mod throttle;

pub use crate::config::{IntervalAnchor, PacerConfig, ThrottleConfig};
pub use crate::error::{Cancelled, PacerError, Result};
pub use crate::throttle::{RequestThrottle, Submission, ThrottleRegistry, ThrottleState, ThrottleStats};
