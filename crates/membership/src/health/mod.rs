//! Failure detection
//!
//! The [`HealthMonitor`] keeps one [`HealthEntry`] per peer. Three loops run
//! against it:
//!
//! - heartbeat: broadcasts ALIVE for the local member every period
//! - detector: marks silent ALIVE peers INDOUBT and wakes the verifier
//! - verifier: once a peer has been INDOUBT for the whole grace period, marks
//!   it DEAD and removes it from the view

mod cache;
mod detector;
mod monitor;
mod verifier;

pub use cache::{HealthCache, HealthEntry};
pub use monitor::HealthMonitor;
