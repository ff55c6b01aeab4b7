//! Relay Queues and Flow-Control State.
//!
//! The building blocks of a relay endpoint: a capacity-limited FIFO of
//! packets waiting for their send time, a counter of promised responses and
//! the retry latch that remembers a refused admission.

use std::collections::VecDeque;

use crate::common::{Fault, Packet, Tick};

/// A packet committed to be sent at `send_at`.
#[derive(Debug)]
pub struct DeferredEnvelope {
    pub packet: Packet,
    pub send_at: Tick,
    pub enqueued_at: Tick,
}

/// Capacity-limited FIFO of deferred packets. Only the head may be sent.
#[derive(Debug)]
pub struct BoundedQueue {
    owner: String,
    capacity: usize,
    entries: VecDeque<DeferredEnvelope>,
}

impl BoundedQueue {
    /// Creates an empty queue. `owner` names the queue in faults.
    pub fn new(owner: impl Into<String>, capacity: usize) -> Self {
        Self {
            owner: owner.into(),
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends a packet due at `send_at`.
    pub fn push_back(&mut self, packet: Packet, send_at: Tick, now: Tick) -> Result<(), Fault> {
        if self.is_full() {
            return Err(Fault::QueueOverflow {
                component: self.owner.clone(),
                capacity: self.capacity,
            });
        }
        if send_at < now {
            return Err(Fault::ScheduleBeforeEnqueue {
                component: self.owner.clone(),
                when: send_at,
                enqueued: now,
            });
        }
        self.entries.push_back(DeferredEnvelope {
            packet,
            send_at,
            enqueued_at: now,
        });
        Ok(())
    }

    /// Puts back the head after the receiver refused it.
    pub fn restore_front(&mut self, envelope: DeferredEnvelope) {
        self.entries.push_front(envelope);
    }

    /// Removes the head for sending. The head must be due.
    pub fn pop_due(&mut self, now: Tick) -> Result<DeferredEnvelope, Fault> {
        match self.entries.front() {
            None => Err(Fault::EmptyQueue {
                component: self.owner.clone(),
            }),
            Some(head) if head.send_at > now => Err(Fault::PrematureSend {
                component: self.owner.clone(),
                due: head.send_at,
                now,
            }),
            Some(_) => self.entries.pop_front().ok_or_else(|| Fault::EmptyQueue {
                component: self.owner.clone(),
            }),
        }
    }

    pub fn front(&self) -> Option<&DeferredEnvelope> {
        self.entries.front()
    }

    /// Send time of the head entry.
    pub fn head_due(&self) -> Option<Tick> {
        self.entries.front().map(|e| e.send_at)
    }

    /// Send time of the tail entry.
    pub fn tail_due(&self) -> Option<Tick> {
        self.entries.back().map(|e| e.send_at)
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Packets in queue order.
    pub fn packets(&self) -> impl Iterator<Item = &Packet> {
        self.entries.iter().map(|e| &e.packet)
    }
}

/// Count of responses promised but not yet sent.
#[derive(Debug)]
pub struct ReservationCounter {
    owner: String,
    count: usize,
    limit: usize,
}

impl ReservationCounter {
    pub fn new(owner: impl Into<String>, limit: usize) -> Self {
        Self {
            owner: owner.into(),
            count: 0,
            limit,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.count >= self.limit
    }

    pub fn reserve(&mut self) -> Result<(), Fault> {
        if self.is_exhausted() {
            return Err(Fault::ReservationOverflow {
                component: self.owner.clone(),
                limit: self.limit,
            });
        }
        self.count += 1;
        Ok(())
    }

    pub fn release(&mut self) -> Result<(), Fault> {
        if self.count == 0 {
            return Err(Fault::ReservationUnderflow {
                component: self.owner.clone(),
            });
        }
        self.count -= 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Latch set when an admission was refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetryFlag(bool);

impl RetryFlag {
    pub fn latch(&mut self) {
        self.0 = true;
    }

    /// Clears the latch, returning whether it was set.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.0)
    }

    pub fn is_set(&self) -> bool {
        self.0
    }
}
