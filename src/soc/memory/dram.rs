//! DRAM Medium Timing.
//!
//! A DDR4-style medium with open-row banks, a shared data bus and periodic
//! refresh. Timing is intentionally coarse: it tracks per-bank row state and
//! readiness, serialises bursts on the data bus, and closes every row while
//! the device refreshes.
//!
//! * **Row Hit:** the row is open, the column command issues after the bank is ready.
//! * **Row Closed:** the row must be activated first: `tRCD`.
//! * **Row Conflict:** another row is open and must be precharged: `tRP + tRCD`.

use log::trace;

use crate::common::{AddrRange, Direction, Fault, Tick, TICKS_PER_NS};

use super::{BackingStore, IssueTiming, MemCommand, MemoryMedium};

/// DRAM geometry and timing, all times in ticks.
#[derive(Clone, Debug)]
pub struct DramTiming {
    pub burst_size: u64,
    pub row_buffer_size: u64,
    pub banks: usize,
    pub t_burst: Tick,
    pub t_rcd: Tick,
    pub t_cl: Tick,
    pub t_rp: Tick,
    pub t_ras: Tick,
    pub t_wr: Tick,
    pub t_rtp: Tick,
    pub t_rfc: Tick,
    pub t_refi: Tick,
    pub t_wtr: Tick,
    pub t_rtw: Tick,
}

impl Default for DramTiming {
    /// DDR4-2400 in a 16x4 configuration, two ranks of sixteen banks.
    fn default() -> Self {
        Self {
            burst_size: 64,
            row_buffer_size: 8192,
            banks: 32,
            t_burst: 3_332,
            t_rcd: 14_160,
            t_cl: 14_160,
            t_rp: 14_160,
            t_ras: 32 * TICKS_PER_NS,
            t_wr: 15 * TICKS_PER_NS,
            t_rtp: 7_500,
            t_rfc: 350 * TICKS_PER_NS,
            t_refi: 7_800 * TICKS_PER_NS,
            t_wtr: 5 * TICKS_PER_NS,
            t_rtw: 1_666,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Bank {
    open_row: Option<u64>,
    /// Earliest time of the next column command.
    col_allowed_at: Tick,
    /// Earliest time of the next precharge.
    pre_allowed_at: Tick,
}

/// DRAM medium.
pub struct Dram {
    name: String,
    timing: DramTiming,
    banks: Vec<Bank>,
    bus_free_at: Tick,
    next_burst_at: Tick,
    refresh_epoch: u64,
    store: BackingStore,
}

impl Dram {
    pub fn new(name: &str, range: AddrRange, timing: DramTiming) -> Self {
        let banks = vec![Bank::default(); timing.banks.max(1)];
        Self {
            name: name.to_string(),
            store: BackingStore::new(name, range),
            timing,
            banks,
            bus_free_at: 0,
            next_burst_at: 0,
            refresh_epoch: 0,
        }
    }

    pub fn timing(&self) -> &DramTiming {
        &self.timing
    }

    /// Bank index and row of a burst address.
    fn decode(&self, addr: u64) -> (usize, u64) {
        let offset = addr.saturating_sub(self.store.range().start());
        let row_index = offset / self.timing.row_buffer_size;
        let banks = self.banks.len() as u64;
        ((row_index % banks) as usize, row_index / banks)
    }

    fn in_refresh(&self, now: Tick) -> bool {
        let t = &self.timing;
        t.t_refi > 0 && now >= t.t_refi && now % t.t_refi < t.t_rfc
    }

    fn refresh_end(&self, now: Tick) -> Tick {
        (now / self.timing.t_refi) * self.timing.t_refi + self.timing.t_rfc
    }

    /// Closes every row if a refresh happened since the last command.
    fn catch_up_refresh(&mut self, now: Tick) {
        if self.timing.t_refi == 0 {
            return;
        }
        let epoch = now / self.timing.t_refi;
        if epoch > self.refresh_epoch {
            trace!("{}: refresh {} closed all rows", self.name, epoch);
            self.refresh_epoch = epoch;
            let done = epoch * self.timing.t_refi + self.timing.t_rfc;
            for bank in &mut self.banks {
                bank.open_row = None;
                bank.col_allowed_at = bank.col_allowed_at.max(done);
                bank.pre_allowed_at = bank.pre_allowed_at.max(done);
            }
        }
    }
}

impl MemoryMedium for Dram {
    fn name(&self) -> &str {
        &self.name
    }

    fn range(&self) -> AddrRange {
        self.store.range()
    }

    fn burst_size(&self) -> u64 {
        self.timing.burst_size
    }

    fn is_busy(&self, now: Tick) -> bool {
        self.in_refresh(now)
    }

    fn wake_at(&self, now: Tick) -> Tick {
        if self.in_refresh(now) {
            self.refresh_end(now)
        } else {
            now.max(self.next_burst_at)
        }
    }

    fn next_request_time(&self) -> Tick {
        self.next_burst_at
    }

    fn is_eligible(&self, _cmd: &MemCommand, now: Tick) -> bool {
        !self.in_refresh(now)
    }

    fn issue(&mut self, cmd: &MemCommand, now: Tick, gap: Tick) -> Result<IssueTiming, Fault> {
        self.catch_up_refresh(now);

        let (idx, row) = self.decode(cmd.addr);
        let t = &self.timing;
        let bank = &mut self.banks[idx];

        let mut col_at = now.max(bank.col_allowed_at);
        let row_hit = match bank.open_row {
            Some(open) if open == row => true,
            Some(_) => {
                let act_at = col_at.max(bank.pre_allowed_at) + t.t_rp;
                bank.pre_allowed_at = act_at + t.t_ras;
                col_at = act_at + t.t_rcd;
                false
            }
            None => {
                let act_at = col_at;
                bank.pre_allowed_at = act_at + t.t_ras;
                col_at = act_at + t.t_rcd;
                false
            }
        };
        bank.open_row = Some(row);

        // Data follows the column command by tCL and needs the bus for tBURST;
        // a direction switch holds the data back by the turnaround gap.
        let data_at = (col_at + t.t_cl).max(self.bus_free_at + gap);
        let col_at = data_at - t.t_cl;
        let ready_at = data_at + t.t_burst;

        match cmd.dir {
            Direction::Read => {
                bank.pre_allowed_at = bank.pre_allowed_at.max(col_at + t.t_rtp);
            }
            Direction::Write => {
                bank.pre_allowed_at = bank.pre_allowed_at.max(ready_at + t.t_wr);
            }
        }
        bank.col_allowed_at = col_at + t.t_burst;

        self.bus_free_at = ready_at;
        self.next_burst_at = col_at + t.t_burst;

        trace!(
            "{}: {} burst {:#x} bank {} row {} ({}) ready at {}",
            self.name,
            cmd.dir,
            cmd.addr,
            idx,
            row,
            if row_hit { "hit" } else { "miss" },
            ready_at
        );

        Ok(IssueTiming {
            cmd_at: col_at,
            ready_at,
            row_hit: Some(row_hit),
        })
    }

    fn blocks_writes_now(&self, _now: Tick) -> bool {
        false
    }

    fn write_to_read_gap(&self) -> Tick {
        self.timing.t_wtr
    }

    fn read_to_write_gap(&self) -> Tick {
        self.timing.t_rtw
    }

    fn drained_at(&self) -> Tick {
        self.banks
            .iter()
            .map(|b| b.pre_allowed_at)
            .fold(self.bus_free_at, Tick::max)
    }

    fn store(&self) -> &BackingStore {
        &self.store
    }

    fn store_mut(&mut self) -> &mut BackingStore {
        &mut self.store
    }
}
