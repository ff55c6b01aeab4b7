//! Priority Queue Sets.
//!
//! Each bus direction keeps one FIFO per QoS priority tier. Tiers are
//! scanned from the highest priority down, and within a tier commands are
//! taken in arrival order, skipping those the medium cannot serve yet.

use std::collections::VecDeque;

use crate::soc::memory::MemCommand;

/// Per-direction set of FIFO queues keyed by priority tier.
#[derive(Debug)]
pub struct PriorityQueueSet {
    tiers: Vec<VecDeque<MemCommand>>,
    len: usize,
}

impl PriorityQueueSet {
    /// Creates a set with `priorities` tiers (at least one).
    pub fn new(priorities: u8) -> Self {
        let n = usize::from(priorities.max(1));
        Self {
            tiers: (0..n).map(|_| VecDeque::new()).collect(),
            len: 0,
        }
    }

    /// Tier a QoS value maps to; values above the highest tier saturate.
    pub fn tier_of(&self, qos: u8) -> usize {
        usize::from(qos).min(self.tiers.len() - 1)
    }

    /// Appends a command to the tail of its tier.
    pub fn push(&mut self, cmd: MemCommand) {
        let tier = self.tier_of(cmd.qos);
        self.tiers[tier].push_back(cmd);
        self.len += 1;
    }

    /// Removes the first eligible command, scanning tiers from highest to
    /// lowest and each tier in FIFO order.
    pub fn take_first<F>(&mut self, mut eligible: F) -> Option<MemCommand>
    where
        F: FnMut(&MemCommand) -> bool,
    {
        for tier in self.tiers.iter_mut().rev() {
            if let Some(pos) = tier.iter().position(&mut eligible) {
                self.len -= 1;
                return tier.remove(pos);
            }
        }
        None
    }

    /// Highest tier holding at least one command.
    pub fn highest_pending(&self) -> Option<usize> {
        self.tiers.iter().rposition(|t| !t.is_empty())
    }

    /// Number of commands in one tier.
    pub fn tier_len(&self, tier: usize) -> usize {
        self.tiers.get(tier).map_or(0, VecDeque::len)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All commands, highest tier first.
    pub fn iter(&self) -> impl Iterator<Item = &MemCommand> {
        self.tiers.iter().rev().flat_map(|t| t.iter())
    }
}
