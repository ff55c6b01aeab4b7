//! Common types shared by every component of the simulator.
//!
//! This module provides simulated time and clocks, physical address ranges,
//! the packet type that travels through the link, and the fault and error
//! types.

/// Physical address ranges.
pub mod addr;

/// Read/write access direction.
pub mod data;

/// Fatal faults and top-level errors.
pub mod error;

/// Requests and responses travelling through the link.
pub mod packet;

/// Simulated time and clock domains.
pub mod time;

pub use addr::AddrRange;
pub use data::Direction;
pub use error::{Fault, SimError};
pub use packet::{CxlCmd, MemCmd, Packet, PacketId};
pub use time::{ClockDomain, Cycles, Tick, TICKS_PER_NS, TICKS_PER_US};
