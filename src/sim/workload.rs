//! Synthetic Host Workload.
//!
//! The traffic generator stands in for the host CPU. It offers a fixed
//! number of read and write requests to the host bridge at a steady rate,
//! keeps at most `max_outstanding` of them in flight and measures the round
//! trip of each one. A request the bridge refuses is held, unchanged, until
//! the bridge signals a retry.

use std::collections::HashMap;

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::{AddrRange, ClockDomain, Fault, Packet, PacketId, Tick};
use crate::config::{AccessPattern, WorkloadConfig};
use crate::sim::event::{Ctx, Task};
use crate::soc::traits::{Admission, RequestSink, ResponseSink};

/// Synthetic requestor attached to the host side of the bridge.
pub struct TrafficGenerator {
    config: WorkloadConfig,
    range: AddrRange,
    clock: ClockDomain,
    rng: StdRng,
    next_id: u64,
    next_offset: u64,
    issued: u64,
    completed: u64,
    in_flight: HashMap<PacketId, Tick>,
    blocked: Option<Packet>,
    draining: bool,
}

impl TrafficGenerator {
    /// Creates a generator issuing requests inside `range`.
    pub fn new(config: &WorkloadConfig, range: AddrRange, clock: ClockDomain) -> Self {
        Self {
            config: config.clone(),
            range,
            clock,
            rng: StdRng::seed_from_u64(config.seed),
            next_id: 0,
            next_offset: 0,
            issued: 0,
            completed: 0,
            in_flight: HashMap::new(),
            blocked: None,
            draining: false,
        }
    }

    /// Arms the first issue attempt.
    pub fn start(&mut self, ctx: &mut Ctx) -> Result<(), Fault> {
        if self.config.requests > 0 {
            ctx.signal(Task::HostIssue)?;
        }
        Ok(())
    }

    /// Requests accepted by the bridge so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Requests whose response has come back.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Requests accepted and not yet answered.
    pub fn outstanding(&self) -> usize {
        self.in_flight.len()
    }

    /// Returns `true` while a refused request waits for the bridge's retry.
    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }

    /// Returns `true` once every request has been accepted by the bridge.
    pub fn all_issued(&self) -> bool {
        self.issued >= self.config.requests && self.blocked.is_none()
    }

    /// Stops issuing new requests. A refused request still waiting for a
    /// retry is resent so that nothing the host started is lost.
    pub fn drain(&mut self) {
        self.draining = true;
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    fn next_addr(&mut self) -> u64 {
        let size = self.config.size;
        let slots = (self.range.size() / size).max(1);
        let slot = match self.config.pattern {
            AccessPattern::Linear => {
                let slot = self.next_offset % slots;
                self.next_offset = slot + 1;
                slot
            }
            AccessPattern::Random => self.rng.gen_range(0..slots),
        };
        self.range.start() + slot * size
    }

    fn next_packet(&mut self, now: Tick) -> Packet {
        let id = PacketId(self.next_id);
        self.next_id += 1;
        let addr = self.next_addr();
        let qos = (id.0 % u64::from(self.config.qos_levels.max(1))) as u8;

        let pkt = if self.rng.gen_range(0..100) < self.config.read_percent {
            Packet::read(id, addr, self.config.size, now)
        } else {
            let data = vec![id.0 as u8; self.config.size as usize];
            Packet::write(id, addr, data, now)
        };
        pkt.with_qos(qos)
            .with_transfer_delay(self.config.header_delay, self.config.payload_delay)
    }

    fn may_issue(&self) -> bool {
        !self.draining
            && self.blocked.is_none()
            && self.issued < self.config.requests
            && self.in_flight.len() < self.config.max_outstanding
    }

    fn offer<S>(&mut self, pkt: Packet, bridge: &mut S, ctx: &mut Ctx) -> Result<bool, Fault>
    where
        S: RequestSink + ?Sized,
    {
        let id = pkt.id();
        let created = pkt.created_at();
        match bridge.recv_timing_req(pkt, ctx)? {
            Admission::Admitted => {
                self.in_flight.insert(id, created);
                self.issued += 1;
                ctx.incr("host.requests_issued");
                Ok(true)
            }
            Admission::Rejected(pkt) => {
                debug!("host: bridge refused {}, waiting for retry", pkt);
                ctx.incr("host.requests_refused");
                self.blocked = Some(pkt);
                Ok(false)
            }
        }
    }

    fn arm_next_issue(&mut self, ctx: &mut Ctx) -> Result<(), Fault> {
        if self.may_issue() && !ctx.events.is_scheduled(Task::HostIssue) {
            let at = self.clock.edge(ctx.now(), self.config.interval.max(1));
            ctx.schedule(Task::HostIssue, at)?;
        }
        Ok(())
    }

    /// Issues the next request to the bridge.
    pub fn issue<S>(&mut self, bridge: &mut S, ctx: &mut Ctx) -> Result<(), Fault>
    where
        S: RequestSink + ?Sized,
    {
        if !self.may_issue() {
            return Ok(());
        }
        let pkt = self.next_packet(ctx.now());
        trace!("host: issuing {}", pkt);
        if self.offer(pkt, bridge, ctx)? {
            self.arm_next_issue(ctx)?;
        }
        Ok(())
    }

    /// The bridge has room again: resend the refused request.
    pub fn retry<S>(&mut self, bridge: &mut S, ctx: &mut Ctx) -> Result<(), Fault>
    where
        S: RequestSink + ?Sized,
    {
        let Some(pkt) = self.blocked.take() else {
            return Ok(());
        };
        trace!("host: retrying {}", pkt);
        if self.offer(pkt, bridge, ctx)? {
            self.arm_next_issue(ctx)?;
        }
        Ok(())
    }
}

impl ResponseSink for TrafficGenerator {
    fn recv_timing_resp(&mut self, pkt: Packet, ctx: &mut Ctx) -> Result<Admission, Fault> {
        let Some(created) = self.in_flight.remove(&pkt.id()) else {
            return Err(Fault::UnknownPacket {
                component: "host".to_string(),
                id: pkt.id(),
            });
        };
        let latency = ctx.now() - created;
        if pkt.is_read() {
            ctx.sample("host.read_latency", latency);
        } else {
            ctx.sample("host.write_latency", latency);
        }
        ctx.incr("host.responses_received");
        self.completed += 1;
        trace!("host: {} completed after {} ticks", pkt, latency);

        self.arm_next_issue(ctx)?;
        Ok(Admission::Admitted)
    }
}
