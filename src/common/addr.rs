//! Physical Address Ranges.
//!
//! Relays, devices and media each serve one or more contiguous ranges of the
//! physical address space. A range is half-open: `[start, end)`.

use std::fmt;

/// A contiguous, half-open range of physical addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AddrRange {
    start: u64,
    end: u64,
}

impl AddrRange {
    /// Creates a range from a base address and a size in bytes.
    pub fn new(start: u64, size: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(size),
        }
    }

    /// Covers the whole 64-bit address space except the last byte.
    pub fn all() -> Self {
        Self {
            start: 0,
            end: u64::MAX,
        }
    }

    /// First address of the range.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// One past the last address of the range.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Size of the range in bytes.
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Returns `true` if `addr` lies inside the range.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Returns `true` if every byte of `[addr, addr + size)` lies inside the range.
    pub fn contains_span(&self, addr: u64, size: u64) -> bool {
        match addr.checked_add(size) {
            Some(last) => addr >= self.start && last <= self.end,
            None => false,
        }
    }

    /// Translates an absolute address into an offset from the start of the range.
    pub fn offset_of(&self, addr: u64) -> Option<u64> {
        self.contains(addr).then(|| addr - self.start)
    }
}

impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x} : {:#x})", self.start, self.end)
    }
}
