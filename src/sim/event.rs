//! Discrete-Event Queue.
//!
//! Components never hold callbacks. Each deferred action is a `Task` value
//! naming the component and the action to run; the queue hands tasks back in
//! time order (FIFO among equal times) and `System::dispatch` runs them.
//!
//! A task can be armed at most once. Arming an already armed task, or arming
//! a task in the past, is a fault.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use crate::common::{Fault, Tick};
use crate::stats::StatsSink;

/// Identifies one of the two relays of the link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RelayId {
    /// Host-side CXL bridge.
    Bridge,
    /// CXL memory device.
    Device,
}

impl fmt::Display for RelayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayId::Bridge => f.write_str("bridge"),
            RelayId::Device => f.write_str("device"),
        }
    }
}

/// A deferred action: component plus method tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {
    /// Send the head of the relay's outbound request queue.
    SendRequest(RelayId),
    /// Send the head of the relay's inbound response queue.
    SendResponse(RelayId),
    /// Downstream of the relay has room for requests again.
    RequestRetry(RelayId),
    /// Upstream of the relay accepts responses again.
    ResponseRetry(RelayId),
    /// Command scheduler decision point.
    NextRequest,
    /// Command scheduler read response ready.
    Respond,
    /// Command scheduler write acknowledgements due.
    AckWrites,
    /// Traffic generator issues its next request.
    HostIssue,
    /// The bridge accepts requests from the host again.
    HostRetry,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::SendRequest(r) => write!(f, "{r}.send_request"),
            Task::SendResponse(r) => write!(f, "{r}.send_response"),
            Task::RequestRetry(r) => write!(f, "{r}.request_retry"),
            Task::ResponseRetry(r) => write!(f, "{r}.response_retry"),
            Task::NextRequest => f.write_str("controller.next_request"),
            Task::Respond => f.write_str("controller.respond"),
            Task::AckWrites => f.write_str("controller.ack_writes"),
            Task::HostIssue => f.write_str("host.issue"),
            Task::HostRetry => f.write_str("host.retry"),
        }
    }
}

/// Time-ordered queue of armed tasks.
#[derive(Debug, Default)]
pub struct EventQueue {
    now: Tick,
    seq: u64,
    heap: BinaryHeap<Reverse<(Tick, u64, Task)>>,
    armed: HashMap<Task, Tick>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current simulated time.
    pub fn now(&self) -> Tick {
        self.now
    }

    /// Arms `task` to run at `when`.
    pub fn schedule(&mut self, task: Task, when: Tick) -> Result<(), Fault> {
        if when < self.now {
            return Err(Fault::PastEvent {
                task: task.to_string(),
                when,
                now: self.now,
            });
        }
        if let Some(&at) = self.armed.get(&task) {
            return Err(Fault::DoubleSchedule {
                task: task.to_string(),
                at,
            });
        }
        self.armed.insert(task, when);
        self.heap.push(Reverse((when, self.seq, task)));
        self.seq += 1;
        Ok(())
    }

    /// Arms `task` at `when` unless it is already armed.
    pub fn schedule_if_idle(&mut self, task: Task, when: Tick) -> Result<(), Fault> {
        if self.is_scheduled(task) {
            return Ok(());
        }
        self.schedule(task, when)
    }

    pub fn is_scheduled(&self, task: Task) -> bool {
        self.armed.contains_key(&task)
    }

    /// Time at which `task` is armed, if it is.
    pub fn scheduled_at(&self, task: Task) -> Option<Tick> {
        self.armed.get(&task).copied()
    }

    /// Time of the earliest armed task.
    pub fn peek_time(&self) -> Option<Tick> {
        self.heap.peek().map(|Reverse((when, _, _))| *when)
    }

    /// Removes the earliest task and advances time to it.
    pub fn pop(&mut self) -> Option<(Tick, Task)> {
        let Reverse((when, _, task)) = self.heap.pop()?;
        self.armed.remove(&task);
        self.now = when;
        Some((when, task))
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

/// Per-callback context: the event queue to arm follow-up tasks on and the
/// statistics sink to record into.
pub struct Ctx<'a> {
    pub events: &'a mut EventQueue,
    pub stats: &'a mut dyn StatsSink,
}

impl<'a> Ctx<'a> {
    pub fn new(events: &'a mut EventQueue, stats: &'a mut dyn StatsSink) -> Self {
        Self { events, stats }
    }

    pub fn now(&self) -> Tick {
        self.events.now()
    }

    /// Arms `task` at `when`.
    pub fn schedule(&mut self, task: Task, when: Tick) -> Result<(), Fault> {
        self.events.schedule(task, when)
    }

    /// Arms `task` to run at the current time, after every task already due.
    pub fn signal(&mut self, task: Task) -> Result<(), Fault> {
        let now = self.now();
        self.events.schedule_if_idle(task, now)
    }

    pub fn incr(&mut self, name: &str) {
        self.stats.incr(name, 1);
    }

    pub fn sample(&mut self, name: &str, value: u64) {
        self.stats.sample(name, value);
    }
}
