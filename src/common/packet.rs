//! Memory Packets.
//!
//! A `Packet` is one request or response travelling between the host, the
//! CXL bridge, the CXL device and the back-end medium. Packets are moved from
//! component to component, so exactly one component owns a packet at any
//! simulated instant.
//!
//! The memory command of a packet never changes in place. Crossing a protocol
//! boundary produces a new value: `with_cxl` attaches a CXL.mem tag,
//! `without_cxl` strips it and `into_response` turns a request into its
//! response.

use std::fmt;

use super::error::Fault;
use super::time::Tick;

/// Identifier assigned by the requestor that created a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(pub u64);

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Memory command carried by a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemCmd {
    /// Read request.
    ReadReq,
    /// Write request.
    WriteReq,
    /// Atomic swap (optionally conditional); only serviced on the atomic path.
    SwapReq,
    /// Read response carrying data.
    ReadResp,
    /// Write completion.
    WriteResp,
    /// Swap response carrying the previous memory contents.
    SwapResp,
}

impl MemCmd {
    /// Returns `true` for commands that read memory.
    pub fn is_read(self) -> bool {
        matches!(
            self,
            MemCmd::ReadReq | MemCmd::ReadResp | MemCmd::SwapReq | MemCmd::SwapResp
        )
    }

    /// Returns `true` for commands that write memory.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            MemCmd::WriteReq | MemCmd::WriteResp | MemCmd::SwapReq | MemCmd::SwapResp
        )
    }

    /// Returns `true` for request commands.
    pub fn is_request(self) -> bool {
        matches!(self, MemCmd::ReadReq | MemCmd::WriteReq | MemCmd::SwapReq)
    }

    /// Returns `true` for response commands.
    pub fn is_response(self) -> bool {
        !self.is_request()
    }

    /// The response command matching a request, `None` for responses.
    pub fn response(self) -> Option<MemCmd> {
        match self {
            MemCmd::ReadReq => Some(MemCmd::ReadResp),
            MemCmd::WriteReq => Some(MemCmd::WriteResp),
            MemCmd::SwapReq => Some(MemCmd::SwapResp),
            _ => None,
        }
    }
}

impl fmt::Display for MemCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemCmd::ReadReq => "ReadReq",
            MemCmd::WriteReq => "WriteReq",
            MemCmd::SwapReq => "SwapReq",
            MemCmd::ReadResp => "ReadResp",
            MemCmd::WriteResp => "WriteResp",
            MemCmd::SwapResp => "SwapResp",
        };
        f.write_str(s)
    }
}

/// CXL.mem message class attached to packets inside the CXL range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CxlCmd {
    /// Master-to-subordinate request without data (read).
    M2SReq,
    /// Master-to-subordinate request with data (write).
    M2SRwD,
    /// Subordinate-to-master data response (read completion).
    S2MDRS,
    /// Subordinate-to-master no-data response (write completion).
    S2MNDR,
}

impl CxlCmd {
    /// Returns `true` for host-to-device messages.
    pub fn is_m2s(self) -> bool {
        matches!(self, CxlCmd::M2SReq | CxlCmd::M2SRwD)
    }

    /// The request tag matching a memory command, if CXL.mem carries it.
    pub fn for_request(cmd: MemCmd) -> Option<CxlCmd> {
        match cmd {
            MemCmd::ReadReq => Some(CxlCmd::M2SReq),
            MemCmd::WriteReq => Some(CxlCmd::M2SRwD),
            _ => None,
        }
    }

    /// The response tag matching a memory command, if CXL.mem carries it.
    pub fn for_response(cmd: MemCmd) -> Option<CxlCmd> {
        match cmd {
            MemCmd::ReadResp => Some(CxlCmd::S2MDRS),
            MemCmd::WriteResp => Some(CxlCmd::S2MNDR),
            _ => None,
        }
    }
}

impl fmt::Display for CxlCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CxlCmd::M2SReq => "M2SReq",
            CxlCmd::M2SRwD => "M2SRwD",
            CxlCmd::S2MDRS => "S2MDRS",
            CxlCmd::S2MNDR => "S2MNDR",
        };
        f.write_str(s)
    }
}

/// A request or response in flight.
#[derive(Clone, Debug)]
pub struct Packet {
    id: PacketId,
    cmd: MemCmd,
    cxl: Option<CxlCmd>,
    addr: u64,
    size: u64,
    needs_response: bool,
    qos: u8,
    created_at: Tick,
    header_delay: Tick,
    payload_delay: Tick,
    data: Option<Vec<u8>>,
    condition: Option<u64>,
}

impl Packet {
    fn new(id: PacketId, cmd: MemCmd, addr: u64, size: u64, now: Tick) -> Self {
        Self {
            id,
            cmd,
            cxl: None,
            addr,
            size,
            needs_response: true,
            qos: 0,
            created_at: now,
            header_delay: 0,
            payload_delay: 0,
            data: None,
            condition: None,
        }
    }

    /// Creates a read request of `size` bytes.
    pub fn read(id: PacketId, addr: u64, size: u64, now: Tick) -> Self {
        Self::new(id, MemCmd::ReadReq, addr, size, now)
    }

    /// Creates a write request carrying `data`.
    pub fn write(id: PacketId, addr: u64, data: Vec<u8>, now: Tick) -> Self {
        let mut pkt = Self::new(id, MemCmd::WriteReq, addr, data.len() as u64, now);
        pkt.data = Some(data);
        pkt
    }

    /// Creates a write request of `size` bytes whose contents are not modeled.
    pub fn write_sized(id: PacketId, addr: u64, size: u64, now: Tick) -> Self {
        Self::new(id, MemCmd::WriteReq, addr, size, now)
    }

    /// Creates a swap request. With a `condition` the swap only takes place if
    /// memory currently holds that value.
    pub fn swap(id: PacketId, addr: u64, data: Vec<u8>, condition: Option<u64>, now: Tick) -> Self {
        let mut pkt = Self::new(id, MemCmd::SwapReq, addr, data.len() as u64, now);
        pkt.data = Some(data);
        pkt.condition = condition;
        pkt
    }

    /// Sets the QoS priority of the request.
    pub fn with_qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    /// Marks the packet as not expecting a response.
    pub fn posted(mut self) -> Self {
        self.needs_response = false;
        self
    }

    /// Adds interconnect transfer delay still to be consumed by the next hop.
    pub fn with_transfer_delay(mut self, header: Tick, payload: Tick) -> Self {
        self.header_delay += header;
        self.payload_delay += payload;
        self
    }

    /// Attaches a CXL.mem tag after checking it agrees with the memory command.
    pub fn with_cxl(mut self, tag: CxlCmd) -> Result<Self, Fault> {
        let consistent = match tag {
            CxlCmd::M2SReq => self.cmd == MemCmd::ReadReq && self.needs_response,
            CxlCmd::M2SRwD => self.cmd == MemCmd::WriteReq && self.needs_response,
            CxlCmd::S2MDRS => self.cmd == MemCmd::ReadResp,
            CxlCmd::S2MNDR => self.cmd == MemCmd::WriteResp,
        };
        if !consistent {
            return Err(Fault::CommandMismatch {
                id: self.id,
                cmd: self.cmd,
                tag,
            });
        }
        self.cxl = Some(tag);
        Ok(self)
    }

    /// Removes the CXL.mem tag.
    pub fn without_cxl(mut self) -> Self {
        self.cxl = None;
        self
    }

    /// Turns a request into its response. Read data, if any, stays attached.
    pub fn into_response(mut self) -> Result<Self, Fault> {
        let resp = match self.cmd.response() {
            Some(resp) if self.needs_response => resp,
            _ => {
                return Err(Fault::UnexpectedCommand {
                    id: self.id,
                    cmd: self.cmd,
                    context: "response requested",
                })
            }
        };
        self.cmd = resp;
        self.cxl = None;
        self.needs_response = false;
        self.condition = None;
        if resp == MemCmd::WriteResp {
            self.data = None;
        }
        Ok(self)
    }

    /// Consumes the header and payload delay accumulated by the previous hop.
    pub fn take_transfer_delay(&mut self) -> Tick {
        let delay = self.header_delay + self.payload_delay;
        self.header_delay = 0;
        self.payload_delay = 0;
        delay
    }

    /// Serves this read from a queued write that covers it.
    ///
    /// # Returns
    ///
    /// `true` if the read was satisfied and now carries the write's data.
    pub fn satisfy_from(&mut self, write: &Packet) -> bool {
        if self.cmd != MemCmd::ReadReq || write.cmd != MemCmd::WriteReq {
            return false;
        }
        let Some(src) = write.data.as_ref() else {
            return false;
        };
        let covers = self.addr >= write.addr && self.addr + self.size <= write.addr + write.size;
        if !covers {
            return false;
        }
        let off = (self.addr - write.addr) as usize;
        self.data = Some(src[off..off + self.size as usize].to_vec());
        true
    }

    pub fn id(&self) -> PacketId {
        self.id
    }

    pub fn cmd(&self) -> MemCmd {
        self.cmd
    }

    pub fn cxl(&self) -> Option<CxlCmd> {
        self.cxl
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn qos(&self) -> u8 {
        self.qos
    }

    pub fn created_at(&self) -> Tick {
        self.created_at
    }

    pub fn needs_response(&self) -> bool {
        self.needs_response
    }

    pub fn is_read(&self) -> bool {
        self.cmd.is_read()
    }

    pub fn is_write(&self) -> bool {
        self.cmd.is_write()
    }

    /// Compare value of a conditional swap.
    pub fn condition(&self) -> Option<u64> {
        self.condition
    }

    /// Payload bytes, when the packet carries data.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Replaces the payload, e.g. with data read from the backing store.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = Some(data);
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{:#x}:{:#x}]", self.id, self.cmd, self.addr, self.addr + self.size)?;
        if let Some(tag) = self.cxl {
            write!(f, " ({tag})")?;
        }
        Ok(())
    }
}
