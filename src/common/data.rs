//! Access Direction.
//!
//! This module defines the direction of a memory access. The back-end data
//! bus is shared between reads and writes, so the command scheduler tracks
//! which direction the bus currently serves, and the medium charges a
//! turnaround gap whenever it changes.

use std::fmt;

/// Direction of a memory access or of the shared data bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    /// Data flows from the medium to the requestor.
    #[default]
    Read,

    /// Data flows from the requestor to the medium.
    Write,
}

impl Direction {
    /// Returns the other direction.
    pub fn flip(self) -> Self {
        match self {
            Direction::Read => Direction::Write,
            Direction::Write => Direction::Read,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("READ"),
            Direction::Write => f.write_str("WRITE"),
        }
    }
}
