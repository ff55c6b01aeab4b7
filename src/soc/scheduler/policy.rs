//! Bus Turnaround Policies.

use serde::Deserialize;

use crate::common::Direction;

use super::queues::PriorityQueueSet;

/// Proactive choice of the next bus direction, evaluated at every decision
/// point before the threshold rules run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnPolicy {
    /// Serve the direction holding the highest-priority pending command.
    /// When both directions hold commands of that priority, keep the
    /// current direction.
    Ideal,
}

impl TurnPolicy {
    pub fn select(
        self,
        current: Direction,
        reads: &PriorityQueueSet,
        writes: &PriorityQueueSet,
    ) -> Direction {
        match self {
            TurnPolicy::Ideal => match (reads.highest_pending(), writes.highest_pending()) {
                (Some(r), Some(w)) if r > w => Direction::Read,
                (Some(r), Some(w)) if w > r => Direction::Write,
                (Some(_), None) => Direction::Read,
                (None, Some(_)) => Direction::Write,
                _ => current,
            },
        }
    }
}
