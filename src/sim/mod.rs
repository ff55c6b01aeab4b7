//! Simulation harness.
//!
//! This module provides the discrete-event queue and callback context, the
//! synthetic host workload that drives the link, and the simulator loop.

/// Time-ordered task queue and per-callback context.
pub mod event;

/// Simulation driver.
pub mod simulator;

/// Synthetic host traffic.
pub mod workload;

pub use event::{Ctx, EventQueue, RelayId, Task};
pub use simulator::{Simulator, StopReason};
pub use workload::TrafficGenerator;
