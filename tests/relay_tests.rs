//! Integration tests for the packet relay.

use cxl_memsim::common::{AddrRange, ClockDomain, Cycles, Fault, Packet, PacketId};
use cxl_memsim::sim::event::{Ctx, EventQueue, RelayId, Task};
use cxl_memsim::soc::relay::{Relay, RelayParams};
use cxl_memsim::soc::traits::{Admission, HopPolicy, RequestSink, Responder, ResponseSink};
use cxl_memsim::stats::SimStats;

/// Hop policy charging a fixed number of cycles and leaving packets as they are.
struct FixedHop(Cycles);

impl HopPolicy for FixedHop {
    fn request_hop(&self, pkt: Packet) -> Result<(Packet, Cycles), Fault> {
        Ok((pkt, self.0))
    }

    fn response_hop(&self, pkt: Packet) -> Result<(Packet, Cycles), Fault> {
        Ok((pkt, self.0))
    }

    fn atomic_cycles(&self, _pkt: &Packet) -> Cycles {
        self.0 * 2
    }
}

/// Downstream neighbour that accepts requests while `accept` is set.
#[derive(Default)]
struct FakeDownstream {
    accept: bool,
    received: Vec<Packet>,
}

impl RequestSink for FakeDownstream {
    fn recv_timing_req(&mut self, pkt: Packet, _ctx: &mut Ctx) -> Result<Admission, Fault> {
        if self.accept {
            self.received.push(pkt);
            Ok(Admission::Admitted)
        } else {
            Ok(Admission::Rejected(pkt))
        }
    }

    fn address_ranges(&self) -> Vec<AddrRange> {
        vec![AddrRange::all()]
    }
}

/// Upstream neighbour that accepts responses while `accept` is set.
#[derive(Default)]
struct FakeUpstream {
    accept: bool,
    received: Vec<Packet>,
}

impl ResponseSink for FakeUpstream {
    fn recv_timing_resp(&mut self, pkt: Packet, _ctx: &mut Ctx) -> Result<Admission, Fault> {
        if self.accept {
            self.received.push(pkt);
            Ok(Admission::Admitted)
        } else {
            Ok(Admission::Rejected(pkt))
        }
    }
}

/// A relay with its neighbours and a private event queue.
struct Harness {
    events: EventQueue,
    stats: SimStats,
    relay: Relay<FixedHop>,
    down: FakeDownstream,
    up: FakeUpstream,
}

const PERIOD: u64 = 1_000;

impl Harness {
    fn new(req_limit: usize, resp_limit: usize) -> Self {
        Self {
            events: EventQueue::new(),
            stats: SimStats::default(),
            relay: Relay::new(
                "relay",
                RelayId::Bridge,
                ClockDomain::new(PERIOD),
                FixedHop(1),
                RelayParams {
                    req_queue_limit: req_limit,
                    resp_queue_limit: resp_limit,
                    ranges: vec![AddrRange::new(0, 0x1_0000)],
                },
                Task::HostRetry,
            ),
            down: FakeDownstream {
                accept: true,
                ..Default::default()
            },
            up: FakeUpstream {
                accept: true,
                ..Default::default()
            },
        }
    }

    fn offer(&mut self, pkt: Packet) -> Admission {
        let mut ctx = Ctx::new(&mut self.events, &mut self.stats);
        self.relay.recv_timing_req(pkt, &mut ctx).unwrap()
    }

    fn respond(&mut self, pkt: Packet) {
        let mut ctx = Ctx::new(&mut self.events, &mut self.stats);
        let when = ctx.now();
        let resp = pkt.into_response().unwrap();
        self.relay.sched_timing_resp(resp, when, &mut ctx).unwrap();
    }

    fn signal(&mut self, task: Task) {
        let mut ctx = Ctx::new(&mut self.events, &mut self.stats);
        ctx.signal(task).unwrap();
    }

    /// Runs every pending task and returns the ones addressed to the caller.
    fn run(&mut self) -> Vec<Task> {
        let mut fired = Vec::new();
        while let Some((_, task)) = self.events.pop() {
            let mut ctx = Ctx::new(&mut self.events, &mut self.stats);
            match task {
                Task::SendRequest(_) => self.relay.try_send_request(&mut self.down, &mut ctx),
                Task::SendResponse(_) => self.relay.try_send_response(&mut self.up, &mut ctx),
                Task::RequestRetry(_) => self.relay.recv_req_retry(&mut self.down, &mut ctx),
                Task::ResponseRetry(_) => self.relay.recv_resp_retry(&mut self.up, &mut ctx),
                other => {
                    fired.push(other);
                    Ok(())
                }
            }
            .unwrap();
        }
        fired
    }
}

fn read(id: u64) -> Packet {
    Packet::read(PacketId(id), 0x40 * id, 64, 0)
}

fn rejected(adm: Admission) -> Packet {
    match adm {
        Admission::Rejected(pkt) => pkt,
        Admission::Admitted => panic!("packet was admitted"),
    }
}

/// Tests that admitted requests are forwarded after the hop latency.
#[test]
fn test_relay_forwards_after_hop_latency() {
    let mut h = Harness::new(4, 4);
    assert!(h.offer(read(0)).is_admitted());
    assert_eq!(h.events.scheduled_at(Task::SendRequest(RelayId::Bridge)), Some(PERIOD));

    h.run();
    assert_eq!(h.down.received.len(), 1);
    assert_eq!(h.events.now(), PERIOD);
    assert_eq!(h.relay.outstanding(), 1);
    assert_eq!(h.stats.counter("relay.req_send_success"), 1);
}

/// Tests that requests leave in admission order.
#[test]
fn test_relay_fifo_order() {
    let mut h = Harness::new(8, 8);
    for id in 0..5 {
        assert!(h.offer(read(id)).is_admitted());
    }
    h.run();

    let ids: Vec<u64> = h.down.received.iter().map(|p| p.id().0).collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
}

/// Tests that the request queue never holds more than its capacity.
#[test]
fn test_relay_request_queue_bounded() {
    let mut h = Harness::new(2, 16);
    h.down.accept = false;

    assert!(h.offer(read(0)).is_admitted());
    assert!(h.offer(read(1)).is_admitted());
    let c = rejected(h.offer(read(2)));
    assert_eq!(c.id(), PacketId(2));
    assert_eq!(h.relay.req_queue_len(), 2);
    assert!(h.relay.retry_pending());
    assert_eq!(h.stats.counter("relay.req_queue_full_events"), 1);

    h.run();
    assert_eq!(h.relay.req_queue_len(), 2);
    assert_eq!(h.stats.counter("relay.req_send_failure"), 1);
}

/// Tests that a latched retry rejects every offer, even with room.
#[test]
fn test_relay_rejects_while_retry_latched() {
    let mut h = Harness::new(1, 16);
    h.down.accept = false;
    assert!(h.offer(read(0)).is_admitted());
    rejected(h.offer(read(1)));
    assert!(h.relay.retry_pending());

    // Still latched: a second caller is refused without counting a full event.
    rejected(h.offer(read(2)));
    assert_eq!(h.stats.counter("relay.req_queue_full_events"), 1);
}

/// Tests that a downstream retry resends the refused head and frees the caller.
#[test]
fn test_relay_downstream_retry_liveness() {
    let mut h = Harness::new(1, 16);
    h.down.accept = false;
    assert!(h.offer(read(0)).is_admitted());
    let blocked = rejected(h.offer(read(1)));

    let fired = h.run();
    assert!(fired.is_empty());
    assert!(h.down.received.is_empty());

    h.down.accept = true;
    h.signal(Task::RequestRetry(RelayId::Bridge));
    let fired = h.run();

    assert_eq!(h.down.received.len(), 1);
    assert_eq!(fired, vec![Task::HostRetry]);
    assert!(!h.relay.retry_pending());
    assert!(h.offer(blocked).is_admitted());
}

/// Tests that reservations bound the outstanding responses and are
/// released only once upstream takes the response.
#[test]
fn test_relay_reservations_bounded() {
    let mut h = Harness::new(8, 2);
    assert!(h.offer(read(0)).is_admitted());
    assert!(h.offer(read(1)).is_admitted());
    rejected(h.offer(read(2)));
    assert_eq!(h.relay.outstanding(), 2);
    assert_eq!(h.stats.counter("relay.rsp_queue_full_events"), 1);

    h.run();
    h.up.accept = false;
    let a = h.down.received.remove(0);
    h.respond(a);
    h.run();
    assert_eq!(h.relay.outstanding(), 2);
    assert_eq!(h.relay.resp_queue_len(), 1);

    h.up.accept = true;
    h.signal(Task::ResponseRetry(RelayId::Bridge));
    h.run();
    assert_eq!(h.relay.outstanding(), 1);
    assert_eq!(h.up.received.len(), 1);
}

/// Tests that posted writes take no reservation.
#[test]
fn test_relay_posted_write_needs_no_reservation() {
    let mut h = Harness::new(8, 1);
    assert!(h.offer(read(0)).is_admitted());
    let posted = Packet::write(PacketId(1), 0x100, vec![0xab; 8], 0).posted();
    assert!(h.offer(posted).is_admitted());
    assert_eq!(h.relay.outstanding(), 1);
}

/// Tests the two-reservation scenario: A and B are admitted, C is refused,
/// and C is admitted after A's response has been sent.
#[test]
fn test_relay_capacity_two_scenario() {
    let mut h = Harness::new(8, 2);
    assert!(h.offer(read(0)).is_admitted());
    assert!(h.offer(read(1)).is_admitted());
    let mut c = rejected(h.offer(read(2)));
    assert!(h.relay.retry_pending());

    // Forwarding A and B signals the stalled caller, but both reservations
    // are still held, so C is refused again.
    let fired = h.run();
    assert!(fired.contains(&Task::HostRetry));
    c = rejected(h.offer(c));
    assert!(h.relay.retry_pending());

    let a = h.down.received.remove(0);
    h.respond(a);
    let fired = h.run();
    assert_eq!(h.up.received.len(), 1);
    assert_eq!(h.up.received[0].id(), PacketId(0));
    assert_eq!(fired, vec![Task::HostRetry]);

    assert!(h.offer(c).is_admitted());
    assert_eq!(h.relay.outstanding(), 2);
}

/// Tests that responses leave in the order they were computed.
#[test]
fn test_relay_response_order() {
    let mut h = Harness::new(8, 8);
    for id in 0..3 {
        assert!(h.offer(read(id)).is_admitted());
    }
    h.run();
    let reqs: Vec<Packet> = h.down.received.drain(..).collect();
    for pkt in reqs {
        h.respond(pkt);
    }
    h.run();

    let ids: Vec<u64> = h.up.received.iter().map(|p| p.id().0).collect();
    assert_eq!(ids, vec![0, 1, 2]);
    assert!(h.relay.is_idle());
}

/// Tests that a response due before the queue tail is a fault.
#[test]
fn test_relay_response_out_of_time_order_faults() {
    let mut h = Harness::new(8, 8);
    assert!(h.offer(read(0)).is_admitted());
    assert!(h.offer(read(1)).is_admitted());
    h.run();
    let mut reqs = h.down.received.drain(..);
    let (r0, r1) = (reqs.next().unwrap(), reqs.next().unwrap());
    drop(reqs);

    let mut ctx = Ctx::new(&mut h.events, &mut h.stats);
    let now = ctx.now();
    let late = r0.into_response().unwrap();
    h.relay.sched_timing_resp(late, now + 50 * PERIOD, &mut ctx).unwrap();

    let early = r1.into_response().unwrap();
    let err = h
        .relay
        .sched_timing_resp(early, now + 5 * PERIOD, &mut ctx)
        .unwrap_err();
    assert!(matches!(err, Fault::ResponseOrder { ready, tail, .. } if ready < tail));
}

/// Tests that an address outside every served range is a fault.
#[test]
fn test_relay_unserved_address_faults() {
    let mut h = Harness::new(4, 4);
    let mut ctx = Ctx::new(&mut h.events, &mut h.stats);
    let err = h
        .relay
        .recv_timing_req(Packet::read(PacketId(9), 0x10_0000, 64, 0), &mut ctx)
        .unwrap_err();
    assert!(matches!(err, Fault::AddressNotServed { .. }));
}

/// Tests that transfer delay carried by a request is added to its send time.
#[test]
fn test_relay_consumes_transfer_delay() {
    let mut h = Harness::new(4, 4);
    let pkt = read(0).with_transfer_delay(300, 200);
    assert!(h.offer(pkt).is_admitted());
    assert_eq!(
        h.events.scheduled_at(Task::SendRequest(RelayId::Bridge)),
        Some(PERIOD + 500)
    );
}
