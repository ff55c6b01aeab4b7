//! The modeled link hardware.
//!
//! This module contains the relay used at every protocol boundary, the CXL
//! hop policies of the host bridge and the memory device, the device's
//! command scheduler and memory media, the latency model and the builder
//! that wires everything into a `System`.

/// System construction and task routing.
pub mod builder;

/// CXL.mem hop policies.
pub mod cxl;

/// Latency attribution.
pub mod latency;

/// Reference memory media and the backing store.
pub mod memory;

/// Flow-controlled packet relay.
pub mod relay;

/// Read/write command scheduler.
pub mod scheduler;

/// Timing-port interfaces between components.
pub mod traits;

pub use builder::System;
