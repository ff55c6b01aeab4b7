//! Integration tests for the command scheduler.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use cxl_memsim::common::{AddrRange, Direction, Fault, MemCmd, Packet, PacketId, Tick};
use cxl_memsim::sim::event::{Ctx, EventQueue, Task};
use cxl_memsim::soc::memory::{BackingStore, IssueTiming, MemCommand, MemoryMedium};
use cxl_memsim::soc::scheduler::{CommandScheduler, SchedulerParams, TurnPolicy};
use cxl_memsim::soc::traits::{Admission, RequestSink, Responder};
use cxl_memsim::stats::SimStats;

const BURST_TIME: Tick = 1_000;

/// Behaviour of the scripted medium, shared with the test body.
#[derive(Default)]
struct Knobs {
    latency: Tick,
    ready_script: VecDeque<Tick>,
    drain_tail: Tick,
    drained_at: Tick,
    issued: Vec<(Direction, u64)>,
}

/// Medium that is never busy and answers after a fixed latency.
struct ScriptedMedium {
    knobs: Rc<RefCell<Knobs>>,
    store: BackingStore,
    next_at: Tick,
}

impl MemoryMedium for ScriptedMedium {
    fn name(&self) -> &str {
        "scripted"
    }

    fn range(&self) -> AddrRange {
        self.store.range()
    }

    fn burst_size(&self) -> u64 {
        64
    }

    fn is_busy(&self, _now: Tick) -> bool {
        false
    }

    fn wake_at(&self, now: Tick) -> Tick {
        now
    }

    fn next_request_time(&self) -> Tick {
        self.next_at
    }

    fn is_eligible(&self, _cmd: &MemCommand, _now: Tick) -> bool {
        true
    }

    fn issue(&mut self, cmd: &MemCommand, now: Tick, gap: Tick) -> Result<IssueTiming, Fault> {
        let mut k = self.knobs.borrow_mut();
        let ready_at = k
            .ready_script
            .pop_front()
            .unwrap_or(now + gap + k.latency);
        k.issued.push((cmd.dir, cmd.addr));
        k.drained_at = k.drained_at.max(ready_at + k.drain_tail);
        self.next_at = now + BURST_TIME;
        Ok(IssueTiming {
            cmd_at: now,
            ready_at,
            row_hit: None,
        })
    }

    fn blocks_writes_now(&self, _now: Tick) -> bool {
        false
    }

    fn write_to_read_gap(&self) -> Tick {
        0
    }

    fn read_to_write_gap(&self) -> Tick {
        0
    }

    fn drained_at(&self) -> Tick {
        self.knobs.borrow().drained_at
    }

    fn store(&self) -> &BackingStore {
        &self.store
    }

    fn store_mut(&mut self) -> &mut BackingStore {
        &mut self.store
    }
}

/// Collects the responses the scheduler hands upstream.
#[derive(Default)]
struct FakeResponder {
    responses: Vec<(Packet, Tick)>,
}

impl Responder for FakeResponder {
    fn sched_timing_resp(&mut self, pkt: Packet, when: Tick, _ctx: &mut Ctx) -> Result<(), Fault> {
        self.responses.push((pkt, when));
        Ok(())
    }
}

struct Harness {
    events: EventQueue,
    stats: SimStats,
    sched: CommandScheduler,
    responder: FakeResponder,
    knobs: Rc<RefCell<Knobs>>,
    fired: Vec<Task>,
}

impl Harness {
    fn new(params: SchedulerParams) -> Self {
        let knobs = Rc::new(RefCell::new(Knobs {
            latency: 5_000,
            ..Default::default()
        }));
        let medium = ScriptedMedium {
            knobs: knobs.clone(),
            store: BackingStore::new("scripted", AddrRange::new(0, 1 << 20)),
            next_at: 0,
        };
        Self {
            events: EventQueue::new(),
            stats: SimStats::default(),
            sched: CommandScheduler::new("sched", params, Box::new(medium), Task::HostRetry),
            responder: FakeResponder::default(),
            knobs,
            fired: Vec::new(),
        }
    }

    fn offer(&mut self, pkt: Packet) -> Admission {
        let mut ctx = Ctx::new(&mut self.events, &mut self.stats);
        self.sched.recv_timing_req(pkt, &mut ctx).unwrap()
    }

    fn step(&mut self) -> Result<Option<Task>, Fault> {
        let Some((_, task)) = self.events.pop() else {
            return Ok(None);
        };
        let mut ctx = Ctx::new(&mut self.events, &mut self.stats);
        match task {
            Task::NextRequest => self.sched.process_next_req_event(&mut ctx)?,
            Task::Respond => self
                .sched
                .process_respond_event(&mut self.responder, &mut ctx)?,
            Task::AckWrites => self.sched.flush_responses(&mut self.responder, &mut ctx)?,
            other => self.fired.push(other),
        }
        Ok(Some(task))
    }

    /// Runs tasks up to and including the next scheduling decision.
    fn next_decision(&mut self) {
        loop {
            match self.step().unwrap() {
                Some(Task::NextRequest) => return,
                Some(_) => continue,
                None => panic!("no scheduling decision pending"),
            }
        }
    }

    fn run(&mut self) -> Result<(), Fault> {
        while self.step()?.is_some() {}
        Ok(())
    }
}

fn params(write_buffer: usize, high: usize, low: usize) -> SchedulerParams {
    SchedulerParams {
        read_buffer_size: 32,
        write_buffer_size: write_buffer,
        write_high_threshold: high,
        write_low_threshold: low,
        min_reads_per_switch: 4,
        min_writes_per_switch: 2,
        frontend_latency: 100,
        backend_latency: 200,
        priorities: 1,
        turn_policy: None,
    }
}

fn read(id: u64, addr: u64) -> Packet {
    Packet::read(PacketId(id), addr, 64, 0)
}

fn write(id: u64, addr: u64) -> Packet {
    Packet::write(PacketId(id), addr, vec![id as u8; 64], 0)
}

/// Tests that an idle read bus turns to writes once the write backlog
/// exceeds the low threshold.
#[test]
fn test_scheduler_switches_to_writes_above_low_threshold() {
    let mut h = Harness::new(params(16, 12, 4));
    for i in 0..6 {
        assert!(h.offer(write(i, i * 64)).is_admitted());
    }

    h.next_decision();
    assert_eq!(h.sched.bus_state().current, Direction::Read);
    assert_eq!(h.sched.bus_state().next, Direction::Write);

    h.next_decision();
    assert_eq!(h.sched.bus_state().current, Direction::Write);
    assert_eq!(h.sched.writes_this_time(), 1);
    assert_eq!(h.sched.write_queue_len(), 5);
    assert_eq!(h.stats.counter("sched.turnarounds"), 1);
}

/// Tests that a small write backlog does not pull the bus to writes.
#[test]
fn test_scheduler_keeps_reading_below_low_threshold() {
    let mut h = Harness::new(params(16, 12, 4));
    for i in 0..4 {
        assert!(h.offer(write(i, i * 64)).is_admitted());
    }
    h.run().unwrap();

    assert_eq!(h.sched.bus_state().current, Direction::Read);
    assert_eq!(h.sched.write_queue_len(), 4);
    assert!(h.knobs.borrow().issued.is_empty());
}

/// Tests that writes give way to reads once the backlog falls below the
/// low threshold by the minimum switch count.
#[test]
fn test_scheduler_write_hysteresis() {
    let p = params(16, 12, 8);
    let mut h = Harness::new(p.clone());
    for i in 0..10 {
        assert!(h.offer(write(i, i * 64)).is_admitted());
    }

    h.next_decision();
    assert_eq!(h.sched.bus_state().next, Direction::Write);

    for _ in 0..10 {
        h.next_decision();
        if h.sched.bus_state().next == Direction::Read {
            break;
        }
    }
    assert_eq!(h.sched.bus_state().next, Direction::Read);
    assert_eq!(h.sched.write_queue_len(), 5);
    assert!(h.sched.write_queue_len() + p.min_writes_per_switch < p.write_low_threshold);
}

/// Tests the high-threshold scenario: the write backlog reaches the high
/// threshold plus one while the minimum reads have been served, and the
/// following decision turns the bus to writes.
#[test]
fn test_scheduler_high_threshold_scenario() {
    let p = params(16, 8, 4);
    let mut h = Harness::new(p.clone());
    for i in 0..10 {
        assert!(h.offer(read(i, i * 64)).is_admitted());
    }

    for _ in 0..p.min_reads_per_switch - 1 {
        h.next_decision();
    }
    assert_eq!(h.sched.reads_this_time(), p.min_reads_per_switch - 1);

    for i in 0..(p.write_high_threshold as u64 + 1) {
        assert!(h.offer(write(100 + i, 0x10_000 + i * 64)).is_admitted());
    }
    assert_eq!(h.sched.write_queue_len(), p.write_high_threshold + 1);

    h.next_decision();
    assert_eq!(h.sched.reads_this_time(), p.min_reads_per_switch);
    assert_eq!(h.sched.bus_state().current, Direction::Read);
    assert_eq!(h.sched.bus_state().next, Direction::Write);

    h.next_decision();
    assert_eq!(h.sched.bus_state().current, Direction::Write);
    assert_eq!(h.sched.writes_this_time(), 1);
    assert_eq!(h.sched.reads_this_time(), 0);
}

/// Tests that without a turn policy the direction only changes through the
/// backlog rules.
#[test]
fn test_scheduler_sticky_without_policy() {
    let mut h = Harness::new(params(16, 12, 4));
    for i in 0..3 {
        assert!(h.offer(read(i, i * 64)).is_admitted());
        assert!(h.offer(write(10 + i, 0x1000 + i * 64)).is_admitted());
    }
    h.run().unwrap();

    assert_eq!(h.stats.counter("sched.turnarounds"), 0);
    assert_eq!(h.sched.write_queue_len(), 3);
    let issued = h.knobs.borrow().issued.clone();
    assert!(issued.iter().all(|(dir, _)| *dir == Direction::Read));
    assert_eq!(h.responder.responses.iter().filter(|(p, _)| p.is_read()).count(), 3);
}

/// Tests that the ideal policy serves the direction holding the
/// highest-priority command.
#[test]
fn test_scheduler_ideal_policy_follows_priority() {
    let mut p = params(16, 12, 4);
    p.priorities = 2;
    p.turn_policy = Some(TurnPolicy::Ideal);
    let mut h = Harness::new(p);

    for i in 0..3 {
        assert!(h.offer(read(i, i * 64)).is_admitted());
    }
    assert!(h.offer(write(9, 0x1000).with_qos(1)).is_admitted());

    h.next_decision();
    assert_eq!(h.sched.bus_state().current, Direction::Write);
    assert_eq!(h.knobs.borrow().issued[0], (Direction::Write, 0x1000));
}

/// Tests that a response computed earlier than the response queue tail is
/// a fault.
#[test]
fn test_scheduler_response_order_fault() {
    let mut h = Harness::new(params(16, 12, 4));
    h.knobs.borrow_mut().ready_script = VecDeque::from(vec![5_000, 3_000]);
    assert!(h.offer(read(0, 0)).is_admitted());
    assert!(h.offer(read(1, 64)).is_admitted());

    let err = h.run().unwrap_err();
    assert!(matches!(err, Fault::ResponseOrder { ready: 3_000, tail: 5_000, .. }));
}

/// Tests that a full read buffer refuses reads and signals a retry when a
/// response leaves.
#[test]
fn test_scheduler_read_buffer_retry() {
    let mut p = params(16, 12, 4);
    p.read_buffer_size = 2;
    let mut h = Harness::new(p);

    assert!(h.offer(read(0, 0)).is_admitted());
    assert!(h.offer(read(1, 64)).is_admitted());
    assert!(!h.offer(read(2, 128)).is_admitted());
    assert!(h.sched.retry_pending());
    assert_eq!(h.stats.counter("sched.num_rd_retry"), 1);

    h.run().unwrap();
    assert!(h.fired.contains(&Task::HostRetry));
    assert_eq!(h.stats.counter("sched.rd_retry_signals"), 1);
    assert!(!h.sched.retry_pending());
}

/// Tests that a full write buffer refuses writes until a write issues.
#[test]
fn test_scheduler_write_buffer_retry() {
    let mut h = Harness::new(params(2, 2, 1));
    assert!(h.offer(write(0, 0)).is_admitted());
    assert!(h.offer(write(1, 64)).is_admitted());
    assert!(!h.offer(write(2, 128)).is_admitted());
    assert_eq!(h.stats.counter("sched.num_wr_retry"), 1);

    h.next_decision();
    assert!(h.fired.is_empty());
    h.next_decision();
    assert_eq!(h.sched.write_queue_len(), 1);
    assert_eq!(h.stats.counter("sched.wr_retry_signals"), 1);

    h.step().unwrap();
    assert!(h.fired.contains(&Task::HostRetry));
}

/// Tests that writes are acknowledged after the front-end latency.
#[test]
fn test_scheduler_acknowledges_writes() {
    let mut h = Harness::new(params(16, 12, 4));
    assert!(h.offer(write(0, 0x200)).is_admitted());
    h.step().unwrap();

    let (resp, when) = &h.responder.responses[0];
    assert_eq!(resp.cmd(), MemCmd::WriteResp);
    assert_eq!(*when, 100);
    assert_eq!(h.stats.counter("sched.bytes_written_sys"), 64);
}

/// Tests that writes to one burst are merged in the write queue.
#[test]
fn test_scheduler_merges_write_bursts() {
    let mut h = Harness::new(params(16, 12, 4));
    assert!(h.offer(write(0, 0)).is_admitted());
    let partial = Packet::write(PacketId(1), 0x20, vec![0xee; 32], 0);
    assert!(h.offer(partial).is_admitted());

    assert_eq!(h.sched.write_queue_len(), 1);
    assert_eq!(h.stats.counter("sched.merged_wr_bursts"), 1);
}

/// Tests that a read covered by a queued write is answered without a
/// medium access and carries the write's data.
#[test]
fn test_scheduler_read_serviced_by_write_queue() {
    let mut h = Harness::new(params(16, 12, 4));
    assert!(h.offer(write(7, 0x80)).is_admitted());
    assert!(h.offer(read(8, 0x80)).is_admitted());
    h.run().unwrap();

    assert_eq!(h.sched.read_queue_len(), 0);
    assert_eq!(h.stats.counter("sched.serviced_by_wr_q"), 1);
    let (resp, _) = h
        .responder
        .responses
        .iter()
        .find(|(p, _)| p.id() == PacketId(8))
        .unwrap();
    assert_eq!(resp.cmd(), MemCmd::ReadResp);
    assert_eq!(resp.data(), Some(&[7u8; 64][..]));
    assert!(h.knobs.borrow().issued.is_empty());
}

/// Tests that a read spanning two bursts is answered once, after both.
#[test]
fn test_scheduler_multi_burst_read() {
    let mut h = Harness::new(params(16, 12, 4));
    assert!(h.offer(Packet::read(PacketId(0), 0x40, 128, 0)).is_admitted());
    h.run().unwrap();

    assert_eq!(h.stats.counter("sched.read_bursts"), 2);
    assert_eq!(h.responder.responses.len(), 1);
    let (resp, when) = &h.responder.responses[0];
    assert_eq!(resp.size(), 128);
    assert_eq!(*when, BURST_TIME + 5_000 + 100 + 200);
}

/// Tests that drain completes only after the in-flight read has been
/// answered and the medium has drained internally.
#[test]
fn test_scheduler_drain_waits_for_medium() {
    let mut h = Harness::new(params(16, 12, 4));
    h.knobs.borrow_mut().drain_tail = 10_000;
    assert!(h.offer(read(0, 0)).is_admitted());
    h.next_decision();

    let done = {
        let mut ctx = Ctx::new(&mut h.events, &mut h.stats);
        h.sched.drain(&mut ctx).unwrap()
    };
    assert!(!done);

    let mut answered_at = None;
    while h.step().unwrap().is_some() {
        if answered_at.is_none() && !h.responder.responses.is_empty() {
            answered_at = Some(h.events.now());
            assert!(!h.sched.drain_signaled());
        }
    }

    assert_eq!(answered_at, Some(5_000));
    assert!(h.sched.drain_signaled());
    assert!(h.events.now() >= 15_000);
}

/// Tests that a write acknowledged after a read response is not handed
/// over ahead of it.
#[test]
fn test_scheduler_response_times_never_decrease() {
    let mut h = Harness::new(params(16, 12, 4));
    assert!(h.offer(read(0, 0)).is_admitted());
    while h.responder.responses.is_empty() {
        h.step().unwrap();
    }
    assert_eq!(h.events.now(), 5_000);

    assert!(h.offer(write(1, 0x400)).is_admitted());
    h.run().unwrap();

    let times: Vec<(u64, Tick)> = h
        .responder
        .responses
        .iter()
        .map(|(p, when)| (p.id().0, *when))
        .collect();
    assert_eq!(times, vec![(0, 5_300), (1, 5_300)]);
}

/// Tests that a request larger than the scheduler's buffers is a fault.
#[test]
fn test_scheduler_oversized_request_faults() {
    let mut h = Harness::new(params(16, 12, 4));
    let mut ctx = Ctx::new(&mut h.events, &mut h.stats);

    let big_read = Packet::read(PacketId(0), 0, 33 * 64, 0);
    let err = h.sched.recv_timing_req(big_read, &mut ctx).unwrap_err();
    assert_eq!(
        err,
        Fault::RequestTooLarge {
            component: "sched".to_string(),
            id: PacketId(0),
            bursts: 33,
            capacity: 32,
        }
    );

    let big_write = Packet::write(PacketId(1), 0, vec![0; 17 * 64], 0);
    let err = h.sched.recv_timing_req(big_write, &mut ctx).unwrap_err();
    assert!(matches!(err, Fault::RequestTooLarge { bursts: 17, capacity: 16, .. }));
    assert!(!h.sched.retry_pending());
}

/// Tests that requests outside the medium or of zero size are faults.
#[test]
fn test_scheduler_rejects_bad_requests() {
    let mut h = Harness::new(params(16, 12, 4));
    let mut ctx = Ctx::new(&mut h.events, &mut h.stats);
    let err = h
        .sched
        .recv_timing_req(read(0, 1 << 20), &mut ctx)
        .unwrap_err();
    assert!(matches!(err, Fault::AddressNotServed { .. }));

    let err = h
        .sched
        .recv_timing_req(Packet::read(PacketId(1), 0, 0, 0), &mut ctx)
        .unwrap_err();
    assert!(matches!(err, Fault::BurstSize { .. }));
}
