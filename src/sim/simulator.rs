//! Simulation Driver.
//!
//! The simulator owns the link, the event queue and the statistics. It pops
//! one task at a time, hands it to the link together with a fresh callback
//! context, and stops when the link has drained, the tick limit is reached
//! or a fault is raised.

use log::{info, warn};

use crate::common::{SimError, Tick};
use crate::config::Config;
use crate::sim::event::{Ctx, EventQueue, Task};
use crate::soc::System;
use crate::stats::SimStats;

/// Why a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Every request completed and the link holds no work.
    Drained,
    /// The next event lies beyond the configured tick limit.
    TickLimit,
    /// No event is left to run.
    Idle,
}

/// Discrete-event driver for a `System`.
pub struct Simulator {
    pub system: System,
    pub events: EventQueue,
    pub stats: SimStats,
    max_ticks: Tick,
    drain_at_end: bool,
    draining: bool,
}

impl Simulator {
    /// Builds the link described by `config`.
    pub fn new(config: &Config) -> Result<Self, SimError> {
        let system = System::new(config)?;
        let mut stats = SimStats::default();
        system.register_stats(&mut stats);
        Ok(Self {
            system,
            events: EventQueue::new(),
            stats,
            max_ticks: config.general.max_ticks,
            drain_at_end: config.general.drain,
            draining: false,
        })
    }

    /// Current simulated time.
    pub fn now(&self) -> Tick {
        self.events.now()
    }

    /// Sets the tick limit. Zero removes it.
    pub fn set_max_ticks(&mut self, max_ticks: Tick) {
        self.max_ticks = max_ticks;
    }

    /// Chooses whether the run drains the link once the workload is done.
    pub fn set_drain_at_end(&mut self, drain: bool) {
        self.drain_at_end = drain;
    }

    /// Arms the workload's first request.
    pub fn start(&mut self) -> Result<(), SimError> {
        let mut ctx = Ctx::new(&mut self.events, &mut self.stats);
        self.system.host.start(&mut ctx)?;
        Ok(())
    }

    /// Runs the earliest pending task.
    ///
    /// # Returns
    ///
    /// The task that ran and its time, or `None` if the queue was empty.
    pub fn step(&mut self) -> Result<Option<(Tick, Task)>, SimError> {
        let Some((when, task)) = self.events.pop() else {
            return Ok(None);
        };
        let mut ctx = Ctx::new(&mut self.events, &mut self.stats);
        self.system.dispatch(task, &mut ctx).map_err(|fault| {
            warn!("fault while running {} at {}: {}", task, when, fault);
            fault
        })?;
        Ok(Some((when, task)))
    }

    /// Runs every task due at or before `limit`.
    pub fn run_until(&mut self, limit: Tick) -> Result<(), SimError> {
        while matches!(self.events.peek_time(), Some(t) if t <= limit) {
            self.step()?;
        }
        Ok(())
    }

    /// Stops the workload and starts draining the link.
    ///
    /// # Returns
    ///
    /// `true` if the link was already drained.
    pub fn drain(&mut self) -> Result<bool, SimError> {
        info!("draining the link at {}", self.now());
        self.draining = true;
        let mut ctx = Ctx::new(&mut self.events, &mut self.stats);
        Ok(self.system.drain(&mut ctx)?)
    }

    /// Runs the workload to completion.
    pub fn run(&mut self) -> Result<StopReason, SimError> {
        self.start()?;
        loop {
            if self.draining && self.system.is_drained() {
                info!("link drained at {}", self.now());
                return Ok(StopReason::Drained);
            }
            if !self.draining && self.drain_at_end && self.system.host.all_issued() {
                self.drain()?;
                continue;
            }

            let Some(next) = self.events.peek_time() else {
                if self.draining {
                    warn!("event queue ran dry before the link drained");
                }
                return Ok(StopReason::Idle);
            };
            if self.max_ticks > 0 && next > self.max_ticks {
                info!("tick limit {} reached", self.max_ticks);
                return Ok(StopReason::TickLimit);
            }
            self.step()?;
        }
    }
}
