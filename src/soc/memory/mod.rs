//! Back-End Memory Media.
//!
//! The command scheduler drives a `MemoryMedium`: it asks whether the medium
//! is busy and whether a queued burst is eligible, issues bursts and learns
//! when their data is ready. The medium owns its internal timing state (banks,
//! open rows, refresh, media write buffers) and the backing store that holds
//! the data.
//!
//! Two reference media are provided: a DDR4-style DRAM and an NVM with slow,
//! buffered writes.

/// DDR-style DRAM medium.
pub mod dram;

/// Non-volatile medium with buffered writes.
pub mod nvm;

/// Sparse byte store backing a medium.
pub mod store;

pub use dram::{Dram, DramTiming};
pub use nvm::{Nvm, NvmTiming};
pub use store::BackingStore;

use crate::common::{AddrRange, Direction, Fault, PacketId, Tick};

/// One medium burst waiting in, or issued from, a scheduler queue.
#[derive(Clone, Debug)]
pub struct MemCommand {
    /// Request this burst belongs to.
    pub pkt_id: PacketId,
    pub dir: Direction,
    /// First byte of the request inside this burst.
    pub addr: u64,
    /// Bytes of the request that fall in this burst.
    pub size: u64,
    /// Priority tier, fixed at insertion.
    pub qos: u8,
    /// Time the burst entered the scheduler.
    pub entry_time: Tick,
}

/// Timing of an issued burst.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IssueTiming {
    /// Time the column command (or media command) was issued.
    pub cmd_at: Tick,
    /// Time the burst's data transfer completed.
    pub ready_at: Tick,
    /// Row buffer hit, for media with row buffers.
    pub row_hit: Option<bool>,
}

/// Timing interface the command scheduler consumes.
pub trait MemoryMedium {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Address range held by the medium.
    fn range(&self) -> AddrRange;

    /// Size of one burst in bytes.
    fn burst_size(&self) -> u64;

    /// Returns `true` while the medium cannot accept any command, e.g.
    /// during refresh.
    fn is_busy(&self, now: Tick) -> bool;

    /// Earliest time at which a busy medium, or a medium with no eligible
    /// command, should be asked again.
    fn wake_at(&self, now: Tick) -> Tick;

    /// Earliest time the next command may be issued.
    fn next_request_time(&self) -> Tick;

    /// Returns `true` if `cmd` could be issued at `now`.
    fn is_eligible(&self, cmd: &MemCommand, now: Tick) -> bool;

    /// Issues a burst.
    ///
    /// # Arguments
    ///
    /// * `cmd` - The burst to issue.
    /// * `now` - Current simulated time.
    /// * `gap` - Bus turnaround penalty charged before the burst's data.
    fn issue(&mut self, cmd: &MemCommand, now: Tick, gap: Tick) -> Result<IssueTiming, Fault>;

    /// Returns `true` if the medium cannot take more writes right now.
    fn blocks_writes_now(&self, now: Tick) -> bool;

    /// Minimum gap when the bus turns from writes to reads.
    fn write_to_read_gap(&self) -> Tick;

    /// Minimum gap when the bus turns from reads to writes.
    fn read_to_write_gap(&self) -> Tick;

    /// Time at which every media operation issued so far has completed.
    fn drained_at(&self) -> Tick;

    /// Returns `true` once no media operation is in flight.
    fn is_internally_drained(&self, now: Tick) -> bool {
        self.drained_at() <= now
    }

    fn store(&self) -> &BackingStore;

    fn store_mut(&mut self) -> &mut BackingStore;
}
