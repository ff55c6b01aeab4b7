//! Simulation Faults and Errors.
//!
//! Flow-control conditions (queue full, reservation limit reached, medium
//! busy) are not errors; they are reported through `Admission::Rejected` and
//! statistics. A `Fault` is a broken invariant: a bug in a collaborator or a
//! misconfiguration. Any fault ends the simulation run.

use thiserror::Error;

use super::packet::{CxlCmd, MemCmd, PacketId};
use super::time::Tick;

/// Fatal invariant violation detected during simulation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("{component}: response sent without an outstanding reservation")]
    ReservationUnderflow { component: String },

    #[error("{component}: reservation limit {limit} exceeded")]
    ReservationOverflow { component: String, limit: usize },

    #[error("{component}: address {addr:#x} is outside every served range")]
    AddressNotServed { component: String, addr: u64 },

    #[error("packet {id}: command {cmd} is inconsistent with CXL tag {tag}")]
    CommandMismatch {
        id: PacketId,
        cmd: MemCmd,
        tag: CxlCmd,
    },

    #[error("packet {id}: unexpected command {cmd} ({context})")]
    UnexpectedCommand {
        id: PacketId,
        cmd: MemCmd,
        context: &'static str,
    },

    #[error("packet {id}: invalid size {size} for conditional swap")]
    SwapSize { id: PacketId, size: u64 },

    #[error("packet {id}: {size} bytes at {addr:#x} do not fit the burst layout")]
    BurstSize { id: PacketId, addr: u64, size: u64 },

    #[error("{component}: packet {id} needs {bursts} bursts but the buffer holds {capacity}")]
    RequestTooLarge {
        component: String,
        id: PacketId,
        bursts: usize,
        capacity: usize,
    },

    #[error("{component}: send attempted on an empty queue")]
    EmptyQueue { component: String },

    #[error("{component}: queue capacity {capacity} exceeded")]
    QueueOverflow { component: String, capacity: usize },

    #[error("{component}: entry due at {due} sent early at {now}")]
    PrematureSend {
        component: String,
        due: Tick,
        now: Tick,
    },

    #[error("{component}: entry scheduled at {when} before its enqueue time {enqueued}")]
    ScheduleBeforeEnqueue {
        component: String,
        when: Tick,
        enqueued: Tick,
    },

    #[error("{component}: response ready at {ready} precedes queue tail ready at {tail}")]
    ResponseOrder {
        component: String,
        ready: Tick,
        tail: Tick,
    },

    #[error("{component}: response for unknown packet {id}")]
    UnknownPacket { component: String, id: PacketId },

    #[error("event {task} is already scheduled at {at}")]
    DoubleSchedule { task: String, at: Tick },

    #[error("event {task} scheduled in the past ({when} < {now})")]
    PastEvent { task: String, when: Tick, now: Tick },
}

/// Top-level error returned by configuration loading and simulation runs.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid parameter: {0}")]
    Param(String),

    #[error("simulation fault: {0}")]
    Fault(#[from] Fault),
}
