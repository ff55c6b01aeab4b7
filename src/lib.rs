//! CXL Memory-Expansion Link Simulator Library.
//!
//! This crate models the timing and flow control of a CXL.mem link between a
//! host and a memory expander. Requests travel from a synthetic host through
//! the host-side CXL bridge and the CXL device into the device's memory
//! controller, which arbitrates a DRAM or NVM medium. Every hop queues,
//! delays and, when its buffers fill up, refuses traffic until it can take
//! more.
//!
//! # Architecture
//!
//! * **Relay**: bounded request and response queues with reservation-based
//!   admission control and retry signalling, used for the bridge and the
//!   device.
//! * **Command Scheduler**: per-direction priority queues, write-drain
//!   hysteresis and bus turnaround penalties in front of the medium.
//! * **Latency Model**: additive, cause-attributed latency composition.
//!
//! # Modules
//!
//! * `common`: Time, addresses, packets, faults and errors.
//! * `config`: Configuration loading and parsing.
//! * `sim`: Event queue, simulator loop and host workload.
//! * `soc`: The modeled link hardware.
//! * `stats`: Statistics collection and reporting.

/// Shared types: simulated time, address ranges, packets and errors.
///
/// Provides the data structures every component exchanges and the fault
/// type that ends a run when an invariant is broken.
pub mod common;

/// Configuration system for the link, the controller, the medium and the
/// workload.
///
/// Loads and parses TOML configuration files with unit-suffixed latencies
/// and sizes.
pub mod config;

/// Simulation harness: event queue, driver and synthetic workload.
pub mod sim;

/// The modeled link: relays, CXL hop policies, scheduler, media and builder.
pub mod soc;

/// Statistics collection and reporting.
///
/// Tracks counters and distributions recorded by every component during
/// the run and prints or serialises them afterwards.
pub mod stats;

pub use config::Config;
pub use sim::Simulator;
pub use soc::System;
