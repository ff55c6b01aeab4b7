//! Integration tests for the synthetic host workload.

use cxl_memsim::common::{AddrRange, ClockDomain, Fault, Packet, PacketId};
use cxl_memsim::config::{AccessPattern, WorkloadConfig};
use cxl_memsim::sim::event::{Ctx, EventQueue, Task};
use cxl_memsim::sim::TrafficGenerator;
use cxl_memsim::soc::traits::{Admission, RequestSink, ResponseSink};
use cxl_memsim::stats::SimStats;

const BASE: u64 = 0x1_0000_0000;

/// Bridge stand-in that records what it admits.
#[derive(Default)]
struct FakeBridge {
    refuse: bool,
    received: Vec<Packet>,
}

impl RequestSink for FakeBridge {
    fn recv_timing_req(&mut self, pkt: Packet, _ctx: &mut Ctx) -> Result<Admission, Fault> {
        if self.refuse {
            return Ok(Admission::Rejected(pkt));
        }
        self.received.push(pkt);
        Ok(Admission::Admitted)
    }

    fn address_ranges(&self) -> Vec<AddrRange> {
        vec![AddrRange::all()]
    }
}

struct Harness {
    events: EventQueue,
    stats: SimStats,
    host: TrafficGenerator,
    bridge: FakeBridge,
}

impl Harness {
    fn new(config: WorkloadConfig) -> Self {
        let mut h = Self {
            events: EventQueue::new(),
            stats: SimStats::default(),
            host: TrafficGenerator::new(&config, AddrRange::new(BASE, 4096), ClockDomain::new(1_000)),
            bridge: FakeBridge::default(),
        };
        let mut ctx = Ctx::new(&mut h.events, &mut h.stats);
        h.host.start(&mut ctx).unwrap();
        h
    }

    fn run(&mut self) {
        while let Some((_, task)) = self.events.pop() {
            let mut ctx = Ctx::new(&mut self.events, &mut self.stats);
            match task {
                Task::HostIssue => self.host.issue(&mut self.bridge, &mut ctx),
                Task::HostRetry => self.host.retry(&mut self.bridge, &mut ctx),
                other => panic!("unexpected task {other}"),
            }
            .unwrap();
        }
    }

    fn complete(&mut self, pkt: Packet) {
        let mut ctx = Ctx::new(&mut self.events, &mut self.stats);
        let resp = pkt.into_response().unwrap();
        assert!(self.host.recv_timing_resp(resp, &mut ctx).unwrap().is_admitted());
    }
}

fn create_config(requests: u64) -> WorkloadConfig {
    WorkloadConfig {
        requests,
        interval: 4,
        max_outstanding: 3,
        ..WorkloadConfig::default()
    }
}

/// Tests that issue stops at the outstanding limit and resumes on a response.
#[test]
fn test_outstanding_limit() {
    let mut h = Harness::new(create_config(10));
    h.run();
    assert_eq!(h.host.issued(), 3);
    assert_eq!(h.host.outstanding(), 3);
    assert!(h.events.is_empty());

    let first = h.bridge.received.remove(0);
    h.complete(first);
    assert_eq!(h.host.completed(), 1);
    h.run();
    assert_eq!(h.host.issued(), 4);
    assert_eq!(h.stats.counter("host.responses_received"), 1);
}

/// Tests that requests follow the issue interval on clock edges.
#[test]
fn test_issue_interval() {
    let mut h = Harness::new(create_config(3));
    h.run();
    let times: Vec<u64> = h.bridge.received.iter().map(|p| p.created_at()).collect();
    assert_eq!(times, vec![0, 4_000, 8_000]);
}

/// Tests linear addresses, wrapping at the end of the range.
#[test]
fn test_linear_addresses_wrap() {
    let config = WorkloadConfig {
        size: 1024,
        max_outstanding: 8,
        pattern: AccessPattern::Linear,
        ..create_config(6)
    };
    let mut h = Harness::new(config);
    h.run();
    let addrs: Vec<u64> = h.bridge.received.iter().map(|p| p.addr() - BASE).collect();
    assert_eq!(addrs, vec![0, 1024, 2048, 3072, 0, 1024]);
}

/// Tests that random addresses stay aligned inside the range and repeat per seed.
#[test]
fn test_random_addresses() {
    let config = WorkloadConfig {
        max_outstanding: 64,
        pattern: AccessPattern::Random,
        seed: 9,
        ..create_config(32)
    };
    let mut a = Harness::new(config.clone());
    let mut b = Harness::new(config);
    a.run();
    b.run();

    for (x, y) in a.bridge.received.iter().zip(&b.bridge.received) {
        assert_eq!(x.addr(), y.addr());
        assert_eq!(x.cmd(), y.cmd());
        assert_eq!((x.addr() - BASE) % 64, 0);
        assert!(x.addr() + 64 <= BASE + 4096);
    }
}

/// Tests the read mix and round-robin QoS assignment.
#[test]
fn test_read_mix_and_qos() {
    let reads_only = WorkloadConfig {
        read_percent: 100,
        qos_levels: 3,
        max_outstanding: 16,
        ..create_config(6)
    };
    let mut h = Harness::new(reads_only);
    h.run();
    assert!(h.bridge.received.iter().all(|p| p.is_read()));
    let qos: Vec<u8> = h.bridge.received.iter().map(|p| p.qos()).collect();
    assert_eq!(qos, vec![0, 1, 2, 0, 1, 2]);

    let writes_only = WorkloadConfig {
        read_percent: 0,
        ..create_config(2)
    };
    let mut h = Harness::new(writes_only);
    h.run();
    assert!(h.bridge.received.iter().all(|p| p.is_write()));
    assert_eq!(h.bridge.received[1].data(), Some(&[1u8; 64][..]));
}

/// Tests that a refused request is held and resent unchanged on retry.
#[test]
fn test_refused_request_waits_for_retry() {
    let mut h = Harness::new(create_config(2));
    h.bridge.refuse = true;
    h.run();
    assert!(h.host.is_blocked());
    assert_eq!(h.host.issued(), 0);
    assert!(!h.host.all_issued());
    assert_eq!(h.stats.counter("host.requests_refused"), 1);

    h.bridge.refuse = false;
    let mut ctx = Ctx::new(&mut h.events, &mut h.stats);
    ctx.signal(Task::HostRetry).unwrap();
    h.run();
    assert!(!h.host.is_blocked());
    assert_eq!(h.bridge.received[0].id(), PacketId(0));
    assert!(h.host.all_issued());
}

/// Tests that draining stops new issues.
#[test]
fn test_drain_stops_issue() {
    let mut h = Harness::new(create_config(5));
    h.host.drain();
    h.run();
    assert_eq!(h.host.issued(), 0);
    assert!(h.host.is_draining());
}

/// Tests that a response for an unknown request is a fault.
#[test]
fn test_unknown_response_faults() {
    let mut h = Harness::new(create_config(0));
    let mut ctx = Ctx::new(&mut h.events, &mut h.stats);
    let stray = Packet::read(PacketId(77), BASE, 64, 0).into_response().unwrap();
    let err = h.host.recv_timing_resp(stray, &mut ctx).unwrap_err();
    assert_eq!(
        err,
        Fault::UnknownPacket {
            component: "host".to_string(),
            id: PacketId(77),
        }
    );
}
