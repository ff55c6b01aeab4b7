//! Link Builder.
//!
//! This module defines the `System` structure, which owns every component of
//! the modeled link: the host workload, the host-side CXL bridge, the CXL
//! memory device and the device's memory controller with its medium. It
//! wires them together from the configuration and routes each fired task to
//! the component that owns it.

use log::info;

use crate::common::{AddrRange, ClockDomain, Cycles, Fault, MemCmd, Packet, SimError};
use crate::config::{Config, MediumKind};
use crate::sim::event::{Ctx, RelayId, Task};
use crate::sim::workload::TrafficGenerator;
use crate::soc::cxl::{CxlDevice, CxlHostBridge};
use crate::soc::latency::{LatencyBreakdown, LatencyCause, LatencyModel};
use crate::soc::memory::{Dram, MemoryMedium, Nvm};
use crate::soc::relay::{Relay, RelayParams};
use crate::soc::scheduler::CommandScheduler;
use crate::soc::traits::{HopPolicy, RequestSink};
use crate::stats::SimStats;

/// The modeled link, host to medium.
pub struct System {
    /// Synthetic requestor on the host side.
    pub host: TrafficGenerator,
    /// Host-side CXL bridge.
    pub bridge: Relay<CxlHostBridge>,
    /// CXL memory expander.
    pub device: Relay<CxlDevice>,
    /// Memory controller inside the device.
    pub controller: CommandScheduler,
    clock: ClockDomain,
    cxl_range: AddrRange,
    medium_access_lat: Cycles,
}

impl System {
    /// Builds the link described by `config`.
    ///
    /// # Returns
    ///
    /// The wired system, or `SimError::Param` if the controller does not
    /// serve every address the device accepts.
    pub fn new(config: &Config) -> Result<Self, SimError> {
        let clock = ClockDomain::new(config.general.clock);
        let range = config.cxl_range();
        let cycles = |ticks| clock.ticks_to_cycles(ticks);

        let bridge = Relay::new(
            "bridge",
            RelayId::Bridge,
            clock,
            CxlHostBridge {
                bridge_lat: cycles(config.bridge.bridge_lat),
                proto_lat: cycles(config.bridge.proto_lat),
            },
            RelayParams {
                req_queue_limit: config.bridge.req_fifo_depth,
                resp_queue_limit: config.bridge.resp_fifo_depth,
                ranges: vec![range],
            },
            Task::HostRetry,
        );

        let device = Relay::new(
            "device",
            RelayId::Device,
            clock,
            CxlDevice {
                proto_lat: cycles(config.device.proto_lat),
            },
            RelayParams {
                req_queue_limit: config.device.req_fifo_depth,
                resp_queue_limit: config.device.resp_fifo_depth,
                ranges: vec![range],
            },
            Task::RequestRetry(RelayId::Bridge),
        );

        let medium: Box<dyn MemoryMedium> = match config.medium.kind {
            MediumKind::Dram => Box::new(Dram::new("medium", range, config.medium.dram.timing())),
            MediumKind::Nvm => Box::new(Nvm::new("medium", range, config.medium.nvm.timing())),
        };

        let controller = CommandScheduler::new(
            "controller",
            config.controller.scheduler_params(),
            medium,
            Task::RequestRetry(RelayId::Device),
        );

        let served = controller.address_ranges();
        for r in device.address_ranges() {
            if !served.iter().any(|s| s.contains_span(r.start(), r.size())) {
                return Err(SimError::Param(format!(
                    "controller does not serve the device range {:#x}..{:#x}",
                    r.start(),
                    r.end()
                )));
            }
        }

        info!(
            "link: {:?} medium at {:#x}..{:#x}, clock period {} ps",
            config.medium.kind,
            range.start(),
            range.end(),
            clock.period()
        );

        Ok(Self {
            host: TrafficGenerator::new(&config.workload, range, clock),
            bridge,
            device,
            controller,
            clock,
            cxl_range: range,
            medium_access_lat: cycles(config.device.medium_access_lat),
        })
    }

    pub fn clock(&self) -> ClockDomain {
        self.clock
    }

    pub fn cxl_range(&self) -> AddrRange {
        self.cxl_range
    }

    /// Registers the bucketed distributions the link reports.
    pub fn register_stats(&self, stats: &mut SimStats) {
        for relay in [self.bridge.name(), self.device.name()] {
            stats.register_distribution(&format!("{relay}.io_to_bridge_rsp"), 0, 299, 10);
        }
    }

    /// Runs a fired task on the component that owns it.
    pub fn dispatch(&mut self, task: Task, ctx: &mut Ctx) -> Result<(), Fault> {
        match task {
            Task::SendRequest(RelayId::Bridge) => {
                self.bridge.try_send_request(&mut self.device, ctx)
            }
            Task::SendRequest(RelayId::Device) => {
                self.device.try_send_request(&mut self.controller, ctx)
            }
            Task::SendResponse(RelayId::Bridge) => {
                self.bridge.try_send_response(&mut self.host, ctx)
            }
            Task::SendResponse(RelayId::Device) => {
                self.device.try_send_response(&mut self.bridge, ctx)
            }
            Task::RequestRetry(RelayId::Bridge) => {
                self.bridge.recv_req_retry(&mut self.device, ctx)
            }
            Task::RequestRetry(RelayId::Device) => {
                self.device.recv_req_retry(&mut self.controller, ctx)
            }
            Task::ResponseRetry(RelayId::Bridge) => {
                self.bridge.recv_resp_retry(&mut self.host, ctx)
            }
            Task::ResponseRetry(RelayId::Device) => {
                self.device.recv_resp_retry(&mut self.bridge, ctx)
            }
            Task::NextRequest => self.controller.process_next_req_event(ctx),
            Task::Respond => self.controller.process_respond_event(&mut self.device, ctx),
            Task::AckWrites => self.controller.flush_responses(&mut self.device, ctx),
            Task::HostIssue => self.host.issue(&mut self.bridge, ctx),
            Task::HostRetry => self.host.retry(&mut self.bridge, ctx),
        }
    }

    /// Stops the workload and asks the controller to drain.
    ///
    /// # Returns
    ///
    /// `true` if the link holds no work at all.
    pub fn drain(&mut self, ctx: &mut Ctx) -> Result<bool, Fault> {
        self.host.drain();
        self.controller.drain(ctx)?;
        Ok(self.is_drained())
    }

    /// Returns `true` once no request or response is held anywhere.
    pub fn is_drained(&self) -> bool {
        self.host.outstanding() == 0
            && !self.host.is_blocked()
            && self.bridge.is_idle()
            && self.device.is_idle()
            && self.controller.drain_signaled()
    }

    fn check_served(&self, pkt: &Packet) -> Result<(), Fault> {
        if self.cxl_range.contains_span(pkt.addr(), pkt.size()) {
            Ok(())
        } else {
            Err(Fault::AddressNotServed {
                component: "link".to_string(),
                addr: pkt.addr(),
            })
        }
    }

    /// Services a request immediately, bypassing every timing queue.
    ///
    /// The request crosses both hops and the medium in one call. The latency
    /// charged is the bridge traversal, the device's protocol processing in
    /// both directions and the device's medium access latency.
    ///
    /// # Returns
    ///
    /// The response and the latency it accumulated.
    pub fn access_atomic(&mut self, pkt: Packet) -> Result<(Packet, LatencyBreakdown), Fault> {
        self.check_served(&pkt)?;

        let bridge = self.bridge.policy();
        let bridge_cycles = self.bridge.atomic_cycles(&pkt);
        let proto_cycles = self.device.policy().proto_lat;

        let mut latency = LatencyBreakdown::new()
            .with(LatencyCause::Bridge, self.clock.cycles_to_ticks(bridge.bridge_lat))
            .with(
                LatencyCause::Protocol,
                self.clock
                    .cycles_to_ticks(bridge_cycles.saturating_sub(bridge.bridge_lat)),
            );
        let model = LatencyModel::new(self.clock);
        latency.extend(&model.access_latency(self.medium_access_lat, proto_cycles, 2));

        let (pkt, _) = self.bridge.policy().request_hop(pkt)?;
        let (mut pkt, _) = self.device.policy().request_hop(pkt)?;
        self.controller.medium_mut().store_mut().access(&mut pkt)?;
        let resp = pkt.into_response()?;
        let (resp, _) = self.device.policy().response_hop(resp)?;
        let (resp, _) = self.bridge.policy().response_hop(resp)?;
        Ok((resp, latency))
    }

    /// Reads or writes memory contents without any timing.
    ///
    /// A read is served by the youngest write still queued in the bridge
    /// or the device that covers it, and otherwise by the backing store.
    pub fn access_functional(&mut self, pkt: &mut Packet) -> Result<(), Fault> {
        self.check_served(pkt)?;
        if pkt.cmd() == MemCmd::ReadReq {
            let bridge: Vec<&Packet> = self.bridge.pending_requests().collect();
            let device: Vec<&Packet> = self.device.pending_requests().collect();
            let queued = bridge.into_iter().rev().chain(device.into_iter().rev());
            for write in queued {
                if pkt.satisfy_from(write) {
                    return Ok(());
                }
            }
        }
        self.controller.medium_mut().store_mut().access(pkt)
    }
}
