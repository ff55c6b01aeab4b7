//! Flow-Controlled Packet Relay.
//!
//! A relay joins two sides of a queued link. Its inbound endpoint faces
//! upstream: it admits requests, owns the response queue and counts the
//! responses it has promised. Its outbound endpoint faces downstream: it
//! forwards admitted requests once their send time arrives and receives the
//! responses coming back.
//!
//! Refused admissions latch a retry flag. The flag is cleared, and the
//! upstream caller told to retry, only once a slot is known to be free:
//! after a request leaves the outbound queue, or after a response leaves
//! while the outbound queue has room.
//!
//! The protocol work of the hop (latency, CXL.mem tagging) is supplied by a
//! `HopPolicy`, so the same relay serves as host bridge and as device.

pub mod queue;

use log::{debug, trace};

use crate::common::{AddrRange, ClockDomain, Cycles, Fault, Packet, Tick};
use crate::sim::event::{Ctx, RelayId, Task};
use crate::soc::traits::{Admission, HopPolicy, RequestSink, Responder, ResponseSink};
use queue::{BoundedQueue, DeferredEnvelope, ReservationCounter, RetryFlag};

/// Sizing and address map of a relay.
#[derive(Clone, Debug)]
pub struct RelayParams {
    /// Capacity of the outbound request queue.
    pub req_queue_limit: usize,
    /// Maximum number of outstanding responses, and capacity of the
    /// response queue.
    pub resp_queue_limit: usize,
    /// Address ranges accepted by the inbound endpoint.
    pub ranges: Vec<AddrRange>,
}

struct StatNames {
    req_queue_full: String,
    rsp_queue_full: String,
    req_retry: String,
    req_sent: String,
    req_refused: String,
    rsp_sent: String,
    rsp_refused: String,
    req_queue_depth: String,
    req_queue_latency: String,
    rsp_queue_depth: String,
    rsp_queue_latency: String,
    outstanding: String,
    inter_response: String,
}

impl StatNames {
    fn new(prefix: &str) -> Self {
        let n = |s: &str| format!("{prefix}.{s}");
        Self {
            req_queue_full: n("req_queue_full_events"),
            rsp_queue_full: n("rsp_queue_full_events"),
            req_retry: n("req_retry_counts"),
            req_sent: n("req_send_success"),
            req_refused: n("req_send_failure"),
            rsp_sent: n("rsp_send_success"),
            rsp_refused: n("rsp_send_failure"),
            req_queue_depth: n("req_queue_depth"),
            req_queue_latency: n("req_queue_latency"),
            rsp_queue_depth: n("rsp_queue_depth"),
            rsp_queue_latency: n("rsp_queue_latency"),
            outstanding: n("outstanding_responses"),
            inter_response: n("io_to_bridge_rsp"),
        }
    }
}

/// Upstream-facing endpoint: admission control and the response queue.
struct Inbound {
    responses: BoundedQueue,
    reservations: ReservationCounter,
    retry: RetryFlag,
    ranges: Vec<AddrRange>,
}

impl Inbound {
    fn serves(&self, addr: u64) -> bool {
        self.ranges.iter().any(|r| r.contains(addr))
    }
}

/// Downstream-facing endpoint: the request queue.
struct Outbound {
    requests: BoundedQueue,
}

/// A pair of relay endpoints sharing one hop policy.
pub struct Relay<P> {
    name: String,
    id: RelayId,
    clock: ClockDomain,
    policy: P,
    inbound: Inbound,
    outbound: Outbound,
    retry_target: Task,
    last_response_at: Option<Tick>,
    stats: StatNames,
}

impl<P: HopPolicy> Relay<P> {
    /// Creates a relay.
    ///
    /// # Arguments
    ///
    /// * `name` - Prefix of the relay's statistics and log lines.
    /// * `id` - Identifies the relay's own tasks.
    /// * `clock` - Clock whose edges requests and responses are aligned to.
    /// * `policy` - Protocol processing applied at this hop.
    /// * `params` - Queue sizes and served ranges.
    /// * `retry_target` - Task signalled when a refused caller may retry.
    pub fn new(
        name: &str,
        id: RelayId,
        clock: ClockDomain,
        policy: P,
        params: RelayParams,
        retry_target: Task,
    ) -> Self {
        Self {
            name: name.to_string(),
            id,
            clock,
            policy,
            inbound: Inbound {
                responses: BoundedQueue::new(format!("{name}.resp_queue"), params.resp_queue_limit),
                reservations: ReservationCounter::new(name, params.resp_queue_limit),
                retry: RetryFlag::default(),
                ranges: params.ranges,
            },
            outbound: Outbound {
                requests: BoundedQueue::new(format!("{name}.req_queue"), params.req_queue_limit),
            },
            retry_target,
            last_response_at: None,
            stats: StatNames::new(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> RelayId {
        self.id
    }

    pub fn clock(&self) -> ClockDomain {
        self.clock
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Number of requests waiting in the outbound queue.
    pub fn req_queue_len(&self) -> usize {
        self.outbound.requests.len()
    }

    /// Number of responses waiting in the inbound response queue.
    pub fn resp_queue_len(&self) -> usize {
        self.inbound.responses.len()
    }

    /// Responses promised and not yet sent.
    pub fn outstanding(&self) -> usize {
        self.inbound.reservations.count()
    }

    /// Returns `true` while a refused caller is waiting for a retry.
    pub fn retry_pending(&self) -> bool {
        self.inbound.retry.is_set()
    }

    /// Returns `true` when no request or response is held.
    pub fn is_idle(&self) -> bool {
        self.outbound.requests.is_empty()
            && self.inbound.responses.is_empty()
            && self.inbound.reservations.count() == 0
    }

    /// Requests still waiting to be forwarded, oldest first.
    pub fn pending_requests(&self) -> impl Iterator<Item = &Packet> {
        self.outbound.requests.packets()
    }

    /// Sends the head of the outbound request queue downstream.
    ///
    /// Runs when the relay's send event fires, or on a downstream retry.
    /// A refused packet stays at the head until the next retry.
    pub fn try_send_request<S>(&mut self, downstream: &mut S, ctx: &mut Ctx) -> Result<(), Fault>
    where
        S: RequestSink + ?Sized,
    {
        let now = ctx.now();
        let depth = self.outbound.requests.len() as u64;
        let DeferredEnvelope {
            packet,
            send_at,
            enqueued_at,
        } = self.outbound.requests.pop_due(now)?;

        trace!("{}: trying to send request {}", self.name, packet);

        match downstream.recv_timing_req(packet, ctx)? {
            Admission::Admitted => {
                ctx.incr(&self.stats.req_sent);
                ctx.sample(&self.stats.req_queue_depth, depth);
                ctx.sample(&self.stats.req_queue_latency, now - enqueued_at);

                if let Some(next) = self.outbound.requests.head_due() {
                    ctx.schedule(Task::SendRequest(self.id), next.max(now))?;
                }
                self.retry_stalled_admission(ctx)
            }
            Admission::Rejected(packet) => {
                debug!("{}: downstream refused {}", self.name, packet);
                ctx.incr(&self.stats.req_refused);
                self.outbound.requests.restore_front(DeferredEnvelope {
                    packet,
                    send_at,
                    enqueued_at,
                });
                Ok(())
            }
        }
    }

    /// Sends the head of the inbound response queue upstream.
    ///
    /// The response's reservation is released only once upstream accepts it.
    pub fn try_send_response<S>(&mut self, upstream: &mut S, ctx: &mut Ctx) -> Result<(), Fault>
    where
        S: ResponseSink + ?Sized,
    {
        let now = ctx.now();
        let depth = self.inbound.responses.len() as u64;
        let DeferredEnvelope {
            packet,
            send_at,
            enqueued_at,
        } = self.inbound.responses.pop_due(now)?;

        trace!("{}: trying to send response {}", self.name, packet);

        match upstream.recv_timing_resp(packet, ctx)? {
            Admission::Admitted => {
                self.inbound.reservations.release()?;
                ctx.incr(&self.stats.rsp_sent);
                ctx.sample(&self.stats.rsp_queue_depth, depth);
                ctx.sample(&self.stats.rsp_queue_latency, now - enqueued_at);

                if let Some(next) = self.inbound.responses.head_due() {
                    ctx.schedule(Task::SendResponse(self.id), next.max(now))?;
                }

                if !self.outbound.requests.is_full() && self.inbound.retry.take() {
                    debug!("{}: response slot freed, signalling retry", self.name);
                    ctx.incr(&self.stats.req_retry);
                    ctx.signal(self.retry_target)?;
                }
                Ok(())
            }
            Admission::Rejected(packet) => {
                debug!("{}: upstream refused {}", self.name, packet);
                ctx.incr(&self.stats.rsp_refused);
                self.inbound.responses.restore_front(DeferredEnvelope {
                    packet,
                    send_at,
                    enqueued_at,
                });
                Ok(())
            }
        }
    }

    /// Downstream has room again: resend a refused head request.
    pub fn recv_req_retry<S>(&mut self, downstream: &mut S, ctx: &mut Ctx) -> Result<(), Fault>
    where
        S: RequestSink + ?Sized,
    {
        if ctx.events.is_scheduled(Task::SendRequest(self.id)) {
            return Ok(());
        }
        match self.outbound.requests.head_due() {
            Some(due) if due <= ctx.now() => self.try_send_request(downstream, ctx),
            _ => Ok(()),
        }
    }

    /// Upstream accepts responses again: resend a refused head response.
    pub fn recv_resp_retry<S>(&mut self, upstream: &mut S, ctx: &mut Ctx) -> Result<(), Fault>
    where
        S: ResponseSink + ?Sized,
    {
        if ctx.events.is_scheduled(Task::SendResponse(self.id)) {
            return Ok(());
        }
        match self.inbound.responses.head_due() {
            Some(due) if due <= ctx.now() => self.try_send_response(upstream, ctx),
            _ => Ok(()),
        }
    }

    /// Clears a latched retry flag and tells the refused caller to retry.
    pub fn retry_stalled_admission(&mut self, ctx: &mut Ctx) -> Result<(), Fault> {
        if self.inbound.retry.take() {
            debug!("{}: request waiting for retry, now retrying", self.name);
            ctx.incr(&self.stats.req_retry);
            ctx.signal(self.retry_target)?;
        }
        Ok(())
    }

    /// Latency of the hop on the atomic path.
    pub fn atomic_cycles(&self, pkt: &Packet) -> Cycles {
        self.policy.atomic_cycles(pkt)
    }

    fn enqueue_response(&mut self, pkt: Packet, ready: Tick, ctx: &mut Ctx) -> Result<(), Fault> {
        let mut pkt = pkt;
        let receive_delay = pkt.take_transfer_delay();
        let (pkt, cycles) = self.policy.response_hop(pkt)?;
        let send_at = self.clock.edge(ready, cycles) + receive_delay;

        trace!("{}: response {} due at {}", self.name, pkt, send_at);

        // The queue is FIFO, so an entry due before the tail would be held
        // behind it.
        if let Some(tail) = self.inbound.responses.tail_due() {
            if send_at < tail {
                return Err(Fault::ResponseOrder {
                    component: self.name.clone(),
                    ready: send_at,
                    tail,
                });
            }
        }

        let was_empty = self.inbound.responses.is_empty();
        self.inbound.responses.push_back(pkt, send_at, ctx.now())?;
        if was_empty {
            ctx.schedule(Task::SendResponse(self.id), send_at)?;
        }
        Ok(())
    }
}

impl<P: HopPolicy> RequestSink for Relay<P> {
    fn recv_timing_req(&mut self, pkt: Packet, ctx: &mut Ctx) -> Result<Admission, Fault> {
        if !self.inbound.serves(pkt.addr()) {
            return Err(Fault::AddressNotServed {
                component: self.name.clone(),
                addr: pkt.addr(),
            });
        }

        // A caller that was refused must wait for its retry signal.
        if self.inbound.retry.is_set() {
            return Ok(Admission::Rejected(pkt));
        }

        let full = if self.outbound.requests.is_full() {
            Some(&self.stats.req_queue_full)
        } else if pkt.needs_response() && self.inbound.reservations.is_exhausted() {
            Some(&self.stats.rsp_queue_full)
        } else {
            None
        };
        if let Some(stat) = full {
            ctx.incr(stat);
            debug!("{}: {} full, rejecting {}", self.name, stat, pkt);
            self.inbound.retry.latch();
            return Ok(Admission::Rejected(pkt));
        }

        if pkt.needs_response() {
            self.inbound.reservations.reserve()?;
            ctx.sample(
                &self.stats.outstanding,
                self.inbound.reservations.count() as u64,
            );
        }

        let now = ctx.now();
        let mut pkt = pkt;
        let receive_delay = pkt.take_transfer_delay();
        let (pkt, cycles) = self.policy.request_hop(pkt)?;
        let send_at = self.clock.edge(now, cycles) + receive_delay;

        trace!("{}: admitted {}, send at {}", self.name, pkt, send_at);

        let was_empty = self.outbound.requests.is_empty();
        self.outbound.requests.push_back(pkt, send_at, now)?;
        if was_empty {
            ctx.schedule(Task::SendRequest(self.id), send_at)?;
        }
        Ok(Admission::Admitted)
    }

    fn address_ranges(&self) -> Vec<AddrRange> {
        self.inbound.ranges.clone()
    }
}

impl<P: HopPolicy> ResponseSink for Relay<P> {
    fn recv_timing_resp(&mut self, pkt: Packet, ctx: &mut Ctx) -> Result<Admission, Fault> {
        let now = ctx.now();
        if let Some(prev) = self.last_response_at {
            let gap = self.clock.ticks_to_cycles(now - prev);
            ctx.sample(&self.stats.inter_response, gap);
        }
        self.last_response_at = Some(now);

        self.enqueue_response(pkt, now, ctx)?;
        Ok(Admission::Admitted)
    }
}

impl<P: HopPolicy> Responder for Relay<P> {
    fn sched_timing_resp(&mut self, pkt: Packet, when: Tick, ctx: &mut Ctx) -> Result<(), Fault> {
        self.enqueue_response(pkt, when, ctx)
    }
}
