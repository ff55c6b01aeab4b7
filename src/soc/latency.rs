//! Latency Composition.
//!
//! Every delay a request accumulates is attributed to a named cause, so a
//! response time can always be explained part by part. Composition is
//! additive: the ready time of a request is its arrival time plus the sum of
//! its parts.

use std::fmt;

use serde::Serialize;

use crate::common::{ClockDomain, Cycles, Tick};

/// Source of a latency contribution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum LatencyCause {
    /// CXL.mem protocol processing at one hop.
    Protocol,
    /// Host bridge traversal.
    Bridge,
    /// Medium access.
    Medium,
    /// Bus direction switch.
    Turnaround,
    /// Memory controller front end.
    Frontend,
    /// Memory controller back end.
    Backend,
    /// Header and payload transfer on the interconnect.
    Transfer,
}

impl fmt::Display for LatencyCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LatencyCause::Protocol => "protocol",
            LatencyCause::Bridge => "bridge",
            LatencyCause::Medium => "medium",
            LatencyCause::Turnaround => "turnaround",
            LatencyCause::Frontend => "frontend",
            LatencyCause::Backend => "backend",
            LatencyCause::Transfer => "transfer",
        };
        f.write_str(s)
    }
}

/// Ordered list of latency contributions, in ticks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LatencyBreakdown {
    parts: Vec<(LatencyCause, Tick)>,
}

impl LatencyBreakdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a contribution.
    pub fn add(&mut self, cause: LatencyCause, ticks: Tick) -> &mut Self {
        self.parts.push((cause, ticks));
        self
    }

    /// Appends a contribution, builder style.
    pub fn with(mut self, cause: LatencyCause, ticks: Tick) -> Self {
        self.add(cause, ticks);
        self
    }

    /// Appends every contribution of `other`.
    pub fn extend(&mut self, other: &LatencyBreakdown) {
        self.parts.extend_from_slice(&other.parts);
    }

    /// Sum of the contributions of one cause.
    pub fn of(&self, cause: LatencyCause) -> Tick {
        self.parts
            .iter()
            .filter(|(c, _)| *c == cause)
            .map(|(_, t)| *t)
            .sum()
    }

    /// Sum of all contributions.
    pub fn total(&self) -> Tick {
        self.parts.iter().map(|(_, t)| *t).sum()
    }

    pub fn parts(&self) -> &[(LatencyCause, Tick)] {
        &self.parts
    }
}

impl fmt::Display for LatencyBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ticks", self.total())?;
        for (cause, ticks) in &self.parts {
            write!(f, " {cause}={ticks}")?;
        }
        Ok(())
    }
}

/// Converts cycle counts of the link's clock into attributed latencies.
#[derive(Clone, Copy, Debug)]
pub struct LatencyModel {
    clock: ClockDomain,
}

impl LatencyModel {
    pub fn new(clock: ClockDomain) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> ClockDomain {
        self.clock
    }

    /// Latency of a read that crosses `hops` protocol hops and one medium
    /// access. Protocol processing is charged once per hop.
    pub fn access_latency(&self, medium: Cycles, protocol: Cycles, hops: u32) -> LatencyBreakdown {
        let mut b = LatencyBreakdown::new();
        for _ in 0..hops {
            b.add(LatencyCause::Protocol, self.clock.cycles_to_ticks(protocol));
        }
        b.add(LatencyCause::Medium, self.clock.cycles_to_ticks(medium));
        b
    }

    /// Ready time of a request arriving at `arrival` at a single hop.
    pub fn single_hop(&self, arrival: Tick, protocol: Cycles, medium: Cycles) -> Tick {
        arrival + self.access_latency(medium, protocol, 1).total()
    }

    /// Ready time of a request arriving at `arrival` with the given parts.
    pub fn ready_at(arrival: Tick, breakdown: &LatencyBreakdown) -> Tick {
        arrival + breakdown.total()
    }
}
