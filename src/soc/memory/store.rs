//! Sparse Backing Store.
//!
//! Memory contents are held in 4 KiB pages allocated on first write, so a
//! multi-gigabyte expander costs only what the workload touches. Bytes never
//! written read as zero.

use std::collections::HashMap;

use crate::common::{AddrRange, Fault, MemCmd, Packet};

const PAGE_SIZE: u64 = 4096;

/// Byte store covering one address range.
#[derive(Debug)]
pub struct BackingStore {
    name: String,
    range: AddrRange,
    pages: HashMap<u64, Box<[u8]>>,
}

impl BackingStore {
    pub fn new(name: &str, range: AddrRange) -> Self {
        Self {
            name: name.to_string(),
            range,
            pages: HashMap::new(),
        }
    }

    pub fn range(&self) -> AddrRange {
        self.range
    }

    /// Number of pages allocated so far.
    pub fn resident_pages(&self) -> usize {
        self.pages.len()
    }

    fn check(&self, addr: u64, len: u64) -> Result<u64, Fault> {
        if !self.range.contains_span(addr, len) {
            return Err(Fault::AddressNotServed {
                component: self.name.clone(),
                addr,
            });
        }
        Ok(addr - self.range.start())
    }

    /// Reads `len` bytes at `addr`.
    pub fn read(&self, addr: u64, len: u64) -> Result<Vec<u8>, Fault> {
        let mut off = self.check(addr, len)?;
        let mut out = Vec::with_capacity(len as usize);
        let end = off + len;
        while off < end {
            let page = off / PAGE_SIZE;
            let start = (off % PAGE_SIZE) as usize;
            let n = ((PAGE_SIZE - off % PAGE_SIZE).min(end - off)) as usize;
            match self.pages.get(&page) {
                Some(p) => out.extend_from_slice(&p[start..start + n]),
                None => out.resize(out.len() + n, 0),
            }
            off += n as u64;
        }
        Ok(out)
    }

    /// Writes `data` at `addr`.
    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), Fault> {
        let mut off = self.check(addr, data.len() as u64)?;
        let mut src = data;
        while !src.is_empty() {
            let page = off / PAGE_SIZE;
            let start = (off % PAGE_SIZE) as usize;
            let n = (PAGE_SIZE as usize - start).min(src.len());
            let p = self
                .pages
                .entry(page)
                .or_insert_with(|| vec![0u8; PAGE_SIZE as usize].into_boxed_slice());
            p[start..start + n].copy_from_slice(&src[..n]);
            src = &src[n..];
            off += n as u64;
        }
        Ok(())
    }

    /// Applies a packet to the store.
    ///
    /// Reads are filled with the current contents, writes store their
    /// payload, and swaps return the previous contents while storing the new
    /// value (only if the compare value matches, for a conditional swap).
    pub fn access(&mut self, pkt: &mut Packet) -> Result<(), Fault> {
        match pkt.cmd() {
            MemCmd::ReadReq => {
                let data = self.read(pkt.addr(), pkt.size())?;
                pkt.set_data(data);
            }
            MemCmd::WriteReq => {
                if let Some(data) = pkt.data() {
                    let data = data.to_vec();
                    self.write(pkt.addr(), &data)?;
                } else {
                    self.check(pkt.addr(), pkt.size())?;
                }
            }
            MemCmd::SwapReq => self.swap(pkt)?,
            cmd => {
                return Err(Fault::UnexpectedCommand {
                    id: pkt.id(),
                    cmd,
                    context: "backing store access",
                })
            }
        }
        Ok(())
    }

    fn swap(&mut self, pkt: &mut Packet) -> Result<(), Fault> {
        let old = self.read(pkt.addr(), pkt.size())?;
        let overwrite = match pkt.condition() {
            None => true,
            Some(cond) => match pkt.size() {
                8 => cond.to_le_bytes()[..] == old[..],
                4 => (cond as u32).to_le_bytes()[..] == old[..],
                size => return Err(Fault::SwapSize { id: pkt.id(), size }),
            },
        };
        if overwrite {
            let new = pkt.data().map(<[u8]>::to_vec).unwrap_or_default();
            self.write(pkt.addr(), &new)?;
        }
        pkt.set_data(old);
        Ok(())
    }
}
