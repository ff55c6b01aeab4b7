//! NVM Medium Timing.
//!
//! Reads pay the media read time before their data can be sent over the
//! bus. Writes complete on the bus quickly but keep a media write buffer
//! slot busy for `tWRITE`; once every slot is taken the medium refuses
//! further writes until the oldest completes.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use log::trace;

use crate::common::{AddrRange, Direction, Fault, Tick, TICKS_PER_NS};

use super::{BackingStore, IssueTiming, MemCommand, MemoryMedium};

/// NVM geometry and timing, all times in ticks.
#[derive(Clone, Debug)]
pub struct NvmTiming {
    pub burst_size: u64,
    pub row_buffer_size: u64,
    pub banks: usize,
    pub max_pending_writes: usize,
    pub t_read: Tick,
    pub t_write: Tick,
    pub t_send: Tick,
    pub t_burst: Tick,
    pub t_wtr: Tick,
    pub t_rtw: Tick,
}

impl Default for NvmTiming {
    /// NVM-2400 in a 1x64 configuration.
    fn default() -> Self {
        Self {
            burst_size: 64,
            row_buffer_size: 256,
            banks: 16,
            max_pending_writes: 128,
            t_read: 150 * TICKS_PER_NS,
            t_write: 500 * TICKS_PER_NS,
            t_send: 14_160,
            t_burst: 3_332,
            t_wtr: 1_666,
            t_rtw: 1_666,
        }
    }
}

/// NVM medium.
pub struct Nvm {
    name: String,
    timing: NvmTiming,
    bank_ready: Vec<Tick>,
    bus_free_at: Tick,
    next_cmd_at: Tick,
    pending_writes: BinaryHeap<Reverse<Tick>>,
    store: BackingStore,
}

impl Nvm {
    pub fn new(name: &str, range: AddrRange, timing: NvmTiming) -> Self {
        Self {
            name: name.to_string(),
            store: BackingStore::new(name, range),
            bank_ready: vec![0; timing.banks.max(1)],
            timing,
            bus_free_at: 0,
            next_cmd_at: 0,
            pending_writes: BinaryHeap::new(),
        }
    }

    pub fn timing(&self) -> &NvmTiming {
        &self.timing
    }

    fn bank_of(&self, addr: u64) -> usize {
        let offset = addr.saturating_sub(self.store.range().start());
        ((offset / self.timing.row_buffer_size) % self.bank_ready.len() as u64) as usize
    }

    /// Writes still occupying a media write buffer slot at `now`.
    fn writes_in_flight(&self, now: Tick) -> usize {
        self.pending_writes.iter().filter(|Reverse(t)| *t > now).count()
    }

    fn retire_writes(&mut self, now: Tick) {
        while let Some(Reverse(done)) = self.pending_writes.peek() {
            if *done > now {
                break;
            }
            self.pending_writes.pop();
        }
    }
}

impl MemoryMedium for Nvm {
    fn name(&self) -> &str {
        &self.name
    }

    fn range(&self) -> AddrRange {
        self.store.range()
    }

    fn burst_size(&self) -> u64 {
        self.timing.burst_size
    }

    fn is_busy(&self, _now: Tick) -> bool {
        false
    }

    fn wake_at(&self, now: Tick) -> Tick {
        if self.blocks_writes_now(now) {
            self.pending_writes
                .iter()
                .map(|Reverse(done)| *done)
                .filter(|done| *done > now)
                .min()
                .unwrap_or(now)
        } else {
            now.max(self.next_cmd_at)
        }
    }

    fn next_request_time(&self) -> Tick {
        self.next_cmd_at
    }

    fn is_eligible(&self, cmd: &MemCommand, now: Tick) -> bool {
        match cmd.dir {
            Direction::Read => true,
            Direction::Write => !self.blocks_writes_now(now),
        }
    }

    fn issue(&mut self, cmd: &MemCommand, now: Tick, gap: Tick) -> Result<IssueTiming, Fault> {
        self.retire_writes(now);

        let bank = self.bank_of(cmd.addr);
        let t = &self.timing;
        let cmd_at = now.max(self.next_cmd_at);

        let ready_at = match cmd.dir {
            Direction::Read => {
                let media_at = cmd_at.max(self.bank_ready[bank]);
                self.bank_ready[bank] = media_at + t.t_read;
                let data_at = (media_at + t.t_read + t.t_send).max(self.bus_free_at + gap);
                data_at + t.t_burst
            }
            Direction::Write => {
                let data_at = cmd_at.max(self.bus_free_at + gap);
                let done = data_at + t.t_burst;
                let media_done = done.max(self.bank_ready[bank]) + t.t_write;
                self.bank_ready[bank] = media_done;
                self.pending_writes.push(Reverse(media_done));
                done
            }
        };

        self.bus_free_at = ready_at;
        self.next_cmd_at = cmd_at + t.t_burst;

        trace!(
            "{}: {} burst {:#x} bank {} ready at {} ({} writes buffered)",
            self.name,
            cmd.dir,
            cmd.addr,
            bank,
            ready_at,
            self.pending_writes.len()
        );

        Ok(IssueTiming {
            cmd_at,
            ready_at,
            row_hit: None,
        })
    }

    fn blocks_writes_now(&self, now: Tick) -> bool {
        self.writes_in_flight(now) >= self.timing.max_pending_writes
    }

    fn write_to_read_gap(&self) -> Tick {
        self.timing.t_wtr
    }

    fn read_to_write_gap(&self) -> Tick {
        self.timing.t_rtw
    }

    fn drained_at(&self) -> Tick {
        self.bank_ready.iter().copied().fold(self.bus_free_at, Tick::max)
    }

    fn store(&self) -> &BackingStore {
        &self.store
    }

    fn store_mut(&mut self) -> &mut BackingStore {
        &mut self.store
    }
}
