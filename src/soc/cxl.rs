//! CXL.mem Hop Policies.
//!
//! The host bridge and the memory device are the same relay with different
//! protocol processing. The bridge converts host requests that target the
//! CXL memory range into M2S messages and strips the S2M tag from the
//! responses; the device checks the M2S tag on arrival and tags its
//! responses S2MDRS (read data) or S2MNDR (write completion).

use log::trace;

use crate::common::{CxlCmd, Cycles, Fault, MemCmd, Packet};
use crate::soc::traits::HopPolicy;

/// Host-side CXL bridge. Every address it admits is CXL memory; the relay
/// refuses the rest before the policy runs.
#[derive(Clone, Debug)]
pub struct CxlHostBridge {
    /// Base bridge traversal latency.
    pub bridge_lat: Cycles,
    /// Extra protocol processing for CXL.mem traffic.
    pub proto_lat: Cycles,
}

impl CxlHostBridge {
    fn hop_cycles(&self) -> Cycles {
        self.bridge_lat + self.proto_lat
    }
}

impl HopPolicy for CxlHostBridge {
    fn request_hop(&self, pkt: Packet) -> Result<(Packet, Cycles), Fault> {
        let pkt = match CxlCmd::for_request(pkt.cmd()) {
            Some(tag) if pkt.needs_response() => pkt.with_cxl(tag)?,
            _ => {
                trace!("bridge: {} is not a CXL.mem request, forwarding untagged", pkt);
                pkt
            }
        };
        Ok((pkt, self.hop_cycles()))
    }

    fn response_hop(&self, pkt: Packet) -> Result<(Packet, Cycles), Fault> {
        match pkt.cxl() {
            Some(CxlCmd::S2MDRS) if !pkt.is_read() => Err(mismatch(&pkt, CxlCmd::S2MDRS)),
            Some(CxlCmd::S2MNDR) if !pkt.is_write() => Err(mismatch(&pkt, CxlCmd::S2MNDR)),
            Some(tag) if tag.is_m2s() => Err(mismatch(&pkt, tag)),
            _ => Ok((pkt.without_cxl(), self.hop_cycles())),
        }
    }

    fn atomic_cycles(&self, _pkt: &Packet) -> Cycles {
        self.hop_cycles()
    }
}

/// CXL memory expander device.
#[derive(Clone, Debug)]
pub struct CxlDevice {
    /// Device-side protocol processing per direction.
    pub proto_lat: Cycles,
}

impl HopPolicy for CxlDevice {
    fn request_hop(&self, pkt: Packet) -> Result<(Packet, Cycles), Fault> {
        match pkt.cxl() {
            Some(CxlCmd::M2SReq) if pkt.cmd() != MemCmd::ReadReq || !pkt.needs_response() => {
                Err(mismatch(&pkt, CxlCmd::M2SReq))
            }
            Some(CxlCmd::M2SRwD) if pkt.cmd() != MemCmd::WriteReq || !pkt.needs_response() => {
                Err(mismatch(&pkt, CxlCmd::M2SRwD))
            }
            Some(tag) if !tag.is_m2s() => Err(mismatch(&pkt, tag)),
            _ => Ok((pkt, self.proto_lat)),
        }
    }

    fn response_hop(&self, pkt: Packet) -> Result<(Packet, Cycles), Fault> {
        let pkt = match CxlCmd::for_response(pkt.cmd()) {
            Some(tag) => pkt.with_cxl(tag)?,
            None => pkt,
        };
        Ok((pkt, self.proto_lat))
    }

    fn atomic_cycles(&self, _pkt: &Packet) -> Cycles {
        self.proto_lat * 2
    }
}

fn mismatch(pkt: &Packet, tag: CxlCmd) -> Fault {
    Fault::CommandMismatch {
        id: pkt.id(),
        cmd: pkt.cmd(),
        tag,
    }
}
