//! Read/Write Command Scheduler.
//!
//! The memory controller of the CXL device. Requests arriving from the
//! device relay are split into medium bursts and queued per direction and
//! priority tier. At each decision point the scheduler picks the direction
//! of the shared data bus, issues one eligible burst to the medium and
//! decides whether to turn the bus around:
//!
//! * **Reads:** served until the write backlog exceeds the high threshold
//!   and enough reads were issued since the last turnaround.
//! * **Writes:** served until the backlog drops below the low threshold
//!   (with `min_writes_per_switch` as hysteresis), or enough writes were
//!   issued while reads wait.
//!
//! Writes are acknowledged as soon as they are queued. Reads are answered
//! once every burst of the request has its data, after the front-end and
//! back-end latency.

/// Bus turnaround policies.
pub mod policy;

/// Per-direction priority queues.
pub mod queues;

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info, trace};

use crate::common::{AddrRange, Direction, Fault, MemCmd, Packet, PacketId, Tick};
use crate::sim::event::{Ctx, Task};
use crate::soc::memory::{MemCommand, MemoryMedium};
use crate::soc::traits::{Admission, RequestSink, Responder};

pub use policy::TurnPolicy;
pub use queues::PriorityQueueSet;

/// Scheduler sizing, thresholds and static latencies.
#[derive(Clone, Debug)]
pub struct SchedulerParams {
    /// Read bursts plus pending read responses the scheduler holds.
    pub read_buffer_size: usize,
    /// Write bursts the scheduler holds.
    pub write_buffer_size: usize,
    /// Write backlog above which reads give way to writes.
    pub write_high_threshold: usize,
    /// Write backlog below which writes give way to reads.
    pub write_low_threshold: usize,
    pub min_reads_per_switch: usize,
    pub min_writes_per_switch: usize,
    /// Controller pipeline latency before the medium.
    pub frontend_latency: Tick,
    /// Controller pipeline latency after the medium.
    pub backend_latency: Tick,
    /// Number of QoS priority tiers.
    pub priorities: u8,
    pub turn_policy: Option<TurnPolicy>,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            read_buffer_size: 64,
            write_buffer_size: 128,
            write_high_threshold: 108,
            write_low_threshold: 64,
            min_reads_per_switch: 16,
            min_writes_per_switch: 16,
            frontend_latency: 10_000,
            backend_latency: 10_000,
            priorities: 1,
            turn_policy: None,
        }
    }
}

/// Direction the shared data bus serves now and at the next decision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BusState {
    pub current: Direction,
    pub next: Direction,
}

/// A read whose bursts are still being served.
struct ReadTracker {
    pkt: Packet,
    bursts: usize,
    serviced: usize,
}

/// The device's memory controller.
pub struct CommandScheduler {
    name: String,
    params: SchedulerParams,
    medium: Box<dyn MemoryMedium>,
    bus: BusState,
    read_queue: PriorityQueueSet,
    write_queue: PriorityQueueSet,
    queued_write_bursts: HashSet<u64>,
    resp_queue: VecDeque<(MemCommand, Tick)>,
    in_service: HashMap<PacketId, ReadTracker>,
    pending_responses: VecDeque<(Packet, Tick)>,
    last_response_at: Tick,
    reads_this_time: usize,
    writes_this_time: usize,
    retry_rd: bool,
    retry_wr: bool,
    draining: bool,
    drain_signaled: bool,
    retry_target: Task,
}

impl CommandScheduler {
    /// Creates a scheduler in front of `medium`.
    ///
    /// # Arguments
    ///
    /// * `name` - Prefix of the scheduler's statistics and log lines.
    /// * `params` - Buffer sizes, thresholds and latencies.
    /// * `medium` - The back-end medium.
    /// * `retry_target` - Task signalled when a refused request may be resent.
    pub fn new(
        name: &str,
        params: SchedulerParams,
        medium: Box<dyn MemoryMedium>,
        retry_target: Task,
    ) -> Self {
        Self {
            name: name.to_string(),
            read_queue: PriorityQueueSet::new(params.priorities),
            write_queue: PriorityQueueSet::new(params.priorities),
            params,
            medium,
            bus: BusState::default(),
            queued_write_bursts: HashSet::new(),
            resp_queue: VecDeque::new(),
            in_service: HashMap::new(),
            pending_responses: VecDeque::new(),
            last_response_at: 0,
            reads_this_time: 0,
            writes_this_time: 0,
            retry_rd: false,
            retry_wr: false,
            draining: false,
            drain_signaled: false,
            retry_target,
        }
    }

    pub fn params(&self) -> &SchedulerParams {
        &self.params
    }

    pub fn medium(&self) -> &dyn MemoryMedium {
        self.medium.as_ref()
    }

    pub fn medium_mut(&mut self) -> &mut dyn MemoryMedium {
        self.medium.as_mut()
    }

    pub fn bus_state(&self) -> BusState {
        self.bus
    }

    /// Read bursts waiting to issue.
    pub fn read_queue_len(&self) -> usize {
        self.read_queue.len()
    }

    /// Write bursts waiting to issue.
    pub fn write_queue_len(&self) -> usize {
        self.write_queue.len()
    }

    /// Issued read bursts waiting for their data.
    pub fn resp_queue_len(&self) -> usize {
        self.resp_queue.len()
    }

    pub fn reads_this_time(&self) -> usize {
        self.reads_this_time
    }

    pub fn writes_this_time(&self) -> usize {
        self.writes_this_time
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Returns `true` once drain completion has been signalled.
    ///
    /// Covers the controller and its medium only. The last responses may
    /// still sit in the device relay's response queue.
    pub fn drain_signaled(&self) -> bool {
        self.drain_signaled
    }

    /// Returns `true` while a refused request waits for a retry.
    pub fn retry_pending(&self) -> bool {
        self.retry_rd || self.retry_wr
    }

    fn stat(&self, name: &str) -> String {
        format!("{}.{}", self.name, name)
    }

    fn burst_align(&self, addr: u64) -> u64 {
        let burst = self.medium.burst_size();
        addr - addr % burst
    }

    /// Splits `[addr, addr + size)` into per-burst `(addr, len)` pieces.
    fn bursts(&self, addr: u64, size: u64) -> Vec<(u64, u64)> {
        let burst = self.medium.burst_size();
        let end = addr + size;
        let mut out = Vec::new();
        let mut cur = addr;
        while cur < end {
            let next = (self.burst_align(cur) + burst).min(end);
            out.push((cur, next - cur));
            cur = next;
        }
        out
    }

    fn write_queue_covers(&self, addr: u64, size: u64) -> bool {
        self.write_queue
            .iter()
            .any(|w| w.addr <= addr && addr + size <= w.addr + w.size)
    }

    fn queue_response(&mut self, pkt: Packet, when: Tick, ctx: &mut Ctx) -> Result<(), Fault> {
        self.pending_responses.push_back((pkt, when));
        ctx.signal(Task::AckWrites)
    }

    fn add_to_read_queue(&mut self, pkt: Packet, ctx: &mut Ctx) -> Result<bool, Fault> {
        let now = ctx.now();
        let pieces = self.bursts(pkt.addr(), pkt.size());
        let mut serviced = 0;

        for &(addr, len) in &pieces {
            if self.write_queue_covers(addr, len) {
                serviced += 1;
                ctx.incr(&self.stat("serviced_by_wr_q"));
                continue;
            }
            self.read_queue.push(MemCommand {
                pkt_id: pkt.id(),
                dir: Direction::Read,
                addr,
                size: len,
                qos: pkt.qos(),
                entry_time: now,
            });
            ctx.incr(&self.stat("read_bursts"));
        }

        if serviced == pieces.len() {
            trace!("{}: read {} serviced by the write queue", self.name, pkt);
            let mut pkt = pkt;
            self.medium.store_mut().access(&mut pkt)?;
            let resp = pkt.into_response()?;
            self.queue_response(resp, now + self.params.frontend_latency, ctx)?;
            return Ok(true);
        }

        self.in_service.insert(
            pkt.id(),
            ReadTracker {
                pkt,
                bursts: pieces.len(),
                serviced,
            },
        );
        Ok(false)
    }

    fn add_to_write_queue(&mut self, pkt: Packet, ctx: &mut Ctx) -> Result<(), Fault> {
        let now = ctx.now();
        for (addr, len) in self.bursts(pkt.addr(), pkt.size()) {
            let aligned = self.burst_align(addr);
            if !self.queued_write_bursts.insert(aligned) {
                ctx.incr(&self.stat("merged_wr_bursts"));
                continue;
            }
            self.write_queue.push(MemCommand {
                pkt_id: pkt.id(),
                dir: Direction::Write,
                addr,
                size: len,
                qos: pkt.qos(),
                entry_time: now,
            });
            ctx.incr(&self.stat("write_bursts"));
        }

        // Data is applied on acceptance and the write acknowledged after
        // the front-end latency.
        let mut pkt = pkt;
        self.medium.store_mut().access(&mut pkt)?;
        if pkt.needs_response() {
            let resp = pkt.into_response()?;
            self.queue_response(resp, now + self.params.frontend_latency, ctx)?;
        }
        Ok(())
    }

    /// Hands queued write acknowledgements and write-serviced read
    /// responses to the responder.
    pub fn flush_responses<R>(&mut self, responder: &mut R, ctx: &mut Ctx) -> Result<(), Fault>
    where
        R: Responder + ?Sized,
    {
        while let Some((pkt, when)) = self.pending_responses.pop_front() {
            self.hand_over(responder, pkt, when, ctx)?;
        }
        self.check_drain(ctx)
    }

    /// Passes a response to the responder. Hand-over times never decrease,
    /// as the responder's queue is FIFO.
    fn hand_over<R>(
        &mut self,
        responder: &mut R,
        pkt: Packet,
        when: Tick,
        ctx: &mut Ctx,
    ) -> Result<(), Fault>
    where
        R: Responder + ?Sized,
    {
        let when = when.max(self.last_response_at);
        self.last_response_at = when;
        trace!("{}: responding {} at {}", self.name, pkt, when);
        responder.sched_timing_resp(pkt, when, ctx)
    }

    fn arm_wake_up(&mut self, ctx: &mut Ctx) -> Result<(), Fault> {
        let now = ctx.now();
        let wake = self.medium.wake_at(now).max(now + 1);
        ctx.events.schedule_if_idle(Task::NextRequest, wake)
    }

    fn is_quiescent(&self) -> bool {
        self.read_queue.is_empty()
            && self.write_queue.is_empty()
            && self.resp_queue.is_empty()
            && self.pending_responses.is_empty()
            && self.in_service.is_empty()
    }

    /// Signals drain completion once no work is left and the medium has
    /// drained internally.
    fn check_drain(&mut self, ctx: &mut Ctx) -> Result<(), Fault> {
        if !self.draining || self.drain_signaled || !self.is_quiescent() {
            return Ok(());
        }
        let now = ctx.now();
        if self.medium.is_internally_drained(now) {
            info!("{}: done draining at {}", self.name, now);
            self.drain_signaled = true;
            Ok(())
        } else {
            let at = self.medium.drained_at().max(now + 1);
            ctx.events.schedule_if_idle(Task::NextRequest, at)
        }
    }

    /// Enters drain mode.
    ///
    /// # Returns
    ///
    /// `true` if the scheduler was already drained.
    pub fn drain(&mut self, ctx: &mut Ctx) -> Result<bool, Fault> {
        self.draining = true;
        self.drain_signaled = false;
        self.check_drain(ctx)?;
        if !self.drain_signaled {
            let now = ctx.now();
            ctx.events.schedule_if_idle(Task::NextRequest, now)?;
        }
        Ok(self.drain_signaled)
    }

    /// Leaves drain mode.
    pub fn drain_resume(&mut self) {
        self.draining = false;
        self.drain_signaled = false;
    }

    /// One scheduling decision: choose the bus direction, issue at most one
    /// burst and decide whether to turn the bus around.
    pub fn process_next_req_event(&mut self, ctx: &mut Ctx) -> Result<(), Fault> {
        let now = ctx.now();

        if let Some(policy) = self.params.turn_policy {
            self.bus.next = policy.select(self.bus.current, &self.read_queue, &self.write_queue);
        }

        let switched = self.bus.current != self.bus.next;
        if switched {
            match self.bus.current {
                Direction::Read => {
                    debug!(
                        "{}: switching to writes after {} reads with {} reads waiting",
                        self.name,
                        self.reads_this_time,
                        self.read_queue.len()
                    );
                    ctx.sample(&self.stat("rd_per_turn_around"), self.reads_this_time as u64);
                    self.reads_this_time = 0;
                }
                Direction::Write => {
                    debug!(
                        "{}: switching to reads after {} writes with {} writes waiting",
                        self.name,
                        self.writes_this_time,
                        self.write_queue.len()
                    );
                    ctx.sample(&self.stat("wr_per_turn_around"), self.writes_this_time as u64);
                    self.writes_this_time = 0;
                }
            }
            ctx.incr(&self.stat("turnarounds"));
        }
        self.bus.current = self.bus.next;

        self.check_drain(ctx)?;

        if self.medium.is_busy(now) {
            trace!("{}: medium busy, deferring", self.name);
            return self.arm_wake_up(ctx);
        }

        match self.bus.current {
            Direction::Read => {
                if self.read_queue.is_empty() {
                    if !self.write_queue.is_empty()
                        && (self.draining
                            || self.write_queue.len() > self.params.write_low_threshold)
                    {
                        debug!("{}: switching to writes, read queue empty", self.name);
                        self.bus.next = Direction::Write;
                    } else {
                        return self.check_drain(ctx);
                    }
                } else {
                    let gap = if switched {
                        self.medium.write_to_read_gap()
                    } else {
                        0
                    };
                    let medium = &self.medium;
                    let Some(cmd) = self.read_queue.take_first(|c| medium.is_eligible(c, now))
                    else {
                        trace!("{}: no eligible read", self.name);
                        return self.arm_wake_up(ctx);
                    };
                    self.issue_read(cmd, gap, ctx)?;

                    if self.write_queue.len() > self.params.write_high_threshold
                        && (self.reads_this_time >= self.params.min_reads_per_switch
                            || self.read_queue.is_empty())
                        && !self.medium.blocks_writes_now(now)
                    {
                        self.bus.next = Direction::Write;
                    }
                }
            }
            Direction::Write => {
                if self.write_queue.is_empty() {
                    self.bus.next = Direction::Read;
                    if self.read_queue.is_empty() {
                        return self.check_drain(ctx);
                    }
                } else {
                    let gap = if switched {
                        self.medium.read_to_write_gap()
                    } else {
                        0
                    };
                    let medium = &self.medium;
                    let Some(cmd) = self.write_queue.take_first(|c| medium.is_eligible(c, now))
                    else {
                        trace!("{}: no eligible write", self.name);
                        return self.arm_wake_up(ctx);
                    };
                    self.issue_write(cmd, gap, ctx)?;

                    let backlog = self.write_queue.len();
                    let below_threshold =
                        backlog + self.params.min_writes_per_switch < self.params.write_low_threshold;
                    let reads_waiting = !self.read_queue.is_empty();

                    if backlog == 0
                        || (below_threshold && !self.draining)
                        || (reads_waiting && self.writes_this_time >= self.params.min_writes_per_switch)
                        || (reads_waiting && self.medium.blocks_writes_now(now))
                    {
                        self.bus.next = Direction::Read;
                    }
                }
            }
        }

        let next = self.medium.next_request_time().max(now);
        ctx.events.schedule_if_idle(Task::NextRequest, next)?;

        if self.retry_wr && self.write_queue.len() < self.params.write_buffer_size {
            self.retry_wr = false;
            ctx.incr(&self.stat("wr_retry_signals"));
            ctx.signal(self.retry_target)?;
        }
        Ok(())
    }

    fn issue_read(&mut self, cmd: MemCommand, gap: Tick, ctx: &mut Ctx) -> Result<(), Fault> {
        let now = ctx.now();
        let timing = self.medium.issue(&cmd, now, gap)?;
        self.reads_this_time += 1;

        trace!(
            "{}: read burst {:#x} issued at {}, ready at {}",
            self.name,
            cmd.addr,
            timing.cmd_at,
            timing.ready_at
        );
        self.record_issue(&cmd, timing.cmd_at, timing.ready_at, timing.row_hit, ctx);
        if gap > 0 {
            ctx.sample(&self.stat("turnaround_gap"), gap);
        }

        if let Some(&(_, tail)) = self.resp_queue.back() {
            if timing.ready_at < tail {
                return Err(Fault::ResponseOrder {
                    component: self.name.clone(),
                    ready: timing.ready_at,
                    tail,
                });
            }
        } else {
            ctx.schedule(Task::Respond, timing.ready_at)?;
        }
        self.resp_queue.push_back((cmd, timing.ready_at));
        Ok(())
    }

    fn issue_write(&mut self, cmd: MemCommand, gap: Tick, ctx: &mut Ctx) -> Result<(), Fault> {
        let now = ctx.now();
        let timing = self.medium.issue(&cmd, now, gap)?;
        self.writes_this_time += 1;

        let aligned = self.burst_align(cmd.addr);
        self.queued_write_bursts.remove(&aligned);

        trace!(
            "{}: write burst {:#x} issued at {}, done at {}",
            self.name,
            cmd.addr,
            timing.cmd_at,
            timing.ready_at
        );
        self.record_issue(&cmd, timing.cmd_at, timing.ready_at, timing.row_hit, ctx);
        if gap > 0 {
            ctx.sample(&self.stat("turnaround_gap"), gap);
        }
        Ok(())
    }

    fn record_issue(
        &self,
        cmd: &MemCommand,
        cmd_at: Tick,
        ready_at: Tick,
        row_hit: Option<bool>,
        ctx: &mut Ctx,
    ) {
        let (queue_lat, access_lat) = match cmd.dir {
            Direction::Read => ("rd_queue_latency", "rd_access_latency"),
            Direction::Write => ("wr_queue_latency", "wr_access_latency"),
        };
        ctx.sample(&self.stat(queue_lat), cmd_at.saturating_sub(cmd.entry_time));
        ctx.sample(&self.stat(access_lat), ready_at.saturating_sub(cmd.entry_time));
        match row_hit {
            Some(true) => ctx.incr(&self.stat("row_hits")),
            Some(false) => ctx.incr(&self.stat("row_misses")),
            None => {}
        }
    }

    /// A read burst's data is ready: answer the read once all its bursts
    /// are done.
    pub fn process_respond_event<R>(&mut self, responder: &mut R, ctx: &mut Ctx) -> Result<(), Fault>
    where
        R: Responder + ?Sized,
    {
        let now = ctx.now();
        let Some((cmd, _)) = self.resp_queue.pop_front() else {
            return Err(Fault::EmptyQueue {
                component: self.stat("resp_queue"),
            });
        };

        let tracker = self
            .in_service
            .get_mut(&cmd.pkt_id)
            .ok_or_else(|| Fault::UnknownPacket {
                component: self.name.clone(),
                id: cmd.pkt_id,
            })?;
        tracker.serviced += 1;

        if tracker.serviced == tracker.bursts {
            if let Some(ReadTracker { mut pkt, .. }) = self.in_service.remove(&cmd.pkt_id) {
                self.medium.store_mut().access(&mut pkt)?;
                if pkt.needs_response() {
                    let resp = pkt.into_response()?;
                    let when = now + self.params.frontend_latency + self.params.backend_latency;
                    self.hand_over(responder, resp, when, ctx)?;
                }
            }
        }

        match self.resp_queue.front() {
            Some(&(_, next)) => ctx.schedule(Task::Respond, next)?,
            None => self.check_drain(ctx)?,
        }

        if self.retry_rd {
            self.retry_rd = false;
            ctx.incr(&self.stat("rd_retry_signals"));
            ctx.signal(self.retry_target)?;
        }
        Ok(())
    }
}

impl RequestSink for CommandScheduler {
    fn recv_timing_req(&mut self, pkt: Packet, ctx: &mut Ctx) -> Result<Admission, Fault> {
        let range = self.medium.range();
        if !range.contains_span(pkt.addr(), pkt.size()) {
            return Err(Fault::AddressNotServed {
                component: self.name.clone(),
                addr: pkt.addr(),
            });
        }
        if pkt.size() == 0 {
            return Err(Fault::BurstSize {
                id: pkt.id(),
                addr: pkt.addr(),
                size: 0,
            });
        }

        let count = self.bursts(pkt.addr(), pkt.size()).len();
        let size = pkt.size();
        let now = ctx.now();

        let capacity = match pkt.cmd() {
            MemCmd::WriteReq => self.params.write_buffer_size,
            _ => self.params.read_buffer_size,
        };
        if count > capacity {
            return Err(Fault::RequestTooLarge {
                component: self.name.clone(),
                id: pkt.id(),
                bursts: count,
                capacity,
            });
        }

        match pkt.cmd() {
            MemCmd::WriteReq => {
                if self.write_queue.len() + count > self.params.write_buffer_size {
                    debug!("{}: write queue full, not accepting {}", self.name, pkt);
                    self.retry_wr = true;
                    ctx.incr(&self.stat("num_wr_retry"));
                    return Ok(Admission::Rejected(pkt));
                }
                self.add_to_write_queue(pkt, ctx)?;
                ctx.events.schedule_if_idle(Task::NextRequest, now)?;
                ctx.incr(&self.stat("write_reqs"));
                ctx.stats.incr(&self.stat("bytes_written_sys"), size);
            }
            MemCmd::ReadReq => {
                if self.read_queue.len() + self.resp_queue.len() + count
                    > self.params.read_buffer_size
                {
                    debug!("{}: read queue full, not accepting {}", self.name, pkt);
                    self.retry_rd = true;
                    ctx.incr(&self.stat("num_rd_retry"));
                    return Ok(Admission::Rejected(pkt));
                }
                if !self.add_to_read_queue(pkt, ctx)? {
                    ctx.events.schedule_if_idle(Task::NextRequest, now)?;
                }
                ctx.incr(&self.stat("read_reqs"));
                ctx.stats.incr(&self.stat("bytes_read_sys"), size);
            }
            cmd => {
                return Err(Fault::UnexpectedCommand {
                    id: pkt.id(),
                    cmd,
                    context: "timing request to the memory controller",
                })
            }
        }
        // Work arriving while draining postpones drain completion.
        self.drain_signaled = false;
        Ok(Admission::Admitted)
    }

    fn address_ranges(&self) -> Vec<AddrRange> {
        vec![self.medium.range()]
    }
}
