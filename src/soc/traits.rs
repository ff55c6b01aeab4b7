//! System-on-Chip Traits.
//!
//! This module defines the timing-port interfaces through which the link's
//! components hand packets to each other. Every component that can receive
//! a request, receive a response, or accept a scheduled response implements
//! the matching trait, so relays can be tested against fake neighbours.

use crate::common::{AddrRange, Cycles, Fault, Packet, Tick};
use crate::sim::event::Ctx;

/// Outcome of offering a packet to a timing port.
#[derive(Debug)]
pub enum Admission {
    /// The receiver took ownership and is now responsible for delivery.
    Admitted,

    /// The receiver had no room. The packet is handed back and the caller
    /// must hold it until the receiver signals a retry.
    Rejected(Packet),
}

impl Admission {
    /// Returns `true` if the packet was accepted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// A component that accepts requests from upstream.
pub trait RequestSink {
    /// Offers a request.
    ///
    /// A rejection is a flow-control signal, not an error. Only a broken
    /// invariant, such as an address this component does not serve, is
    /// reported as a `Fault`.
    ///
    /// # Arguments
    ///
    /// * `pkt` - The request; ownership passes on admission.
    /// * `ctx` - Event queue and statistics sink for this callback.
    fn recv_timing_req(&mut self, pkt: Packet, ctx: &mut Ctx) -> Result<Admission, Fault>;

    /// Address ranges served by this component.
    ///
    /// Used by the system builder to check the link's address map.
    fn address_ranges(&self) -> Vec<AddrRange>;
}

/// A component that accepts responses from downstream.
pub trait ResponseSink {
    /// Offers a response travelling back towards the requestor.
    ///
    /// # Arguments
    ///
    /// * `pkt` - The response; ownership passes on admission.
    /// * `ctx` - Event queue and statistics sink for this callback.
    fn recv_timing_resp(&mut self, pkt: Packet, ctx: &mut Ctx) -> Result<Admission, Fault>;
}

/// A component that sends responses on behalf of a downstream scheduler.
///
/// The command scheduler computes when a response is ready and hands it to
/// its responder, which queues and delivers it upstream.
pub trait Responder {
    /// Schedules `pkt` for delivery upstream no earlier than `when`.
    ///
    /// # Arguments
    ///
    /// * `pkt` - The response packet.
    /// * `when` - Simulated time at which the response is ready.
    /// * `ctx` - Event queue and statistics sink for this callback.
    fn sched_timing_resp(&mut self, pkt: Packet, when: Tick, ctx: &mut Ctx) -> Result<(), Fault>;
}

/// Protocol processing applied by a relay at each hop.
///
/// A hop policy prices a packet in clock cycles and performs the protocol
/// transformation of the hop, such as attaching or checking a CXL.mem tag.
pub trait HopPolicy {
    /// Transforms a request crossing the hop and returns its latency.
    fn request_hop(&self, pkt: Packet) -> Result<(Packet, Cycles), Fault>;

    /// Transforms a response crossing the hop and returns its latency.
    fn response_hop(&self, pkt: Packet) -> Result<(Packet, Cycles), Fault>;

    /// Latency of a request and its response crossing the hop on the
    /// atomic path.
    fn atomic_cycles(&self, pkt: &Packet) -> Cycles;
}
