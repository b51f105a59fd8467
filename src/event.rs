//! Timestamped simulation events and the queue which orders them

use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashSet},
};

use crate::{block::BlockHash, peer::PeerId, transaction::Transaction};

/// Logical simulation time, in ticks (one tick is one millisecond of
/// simulated time).
pub type Time = u64;

/// Unique identifier of an [`Event`]. Ids are handed out in increasing order,
/// which also makes them the tie-breaker between events with equal
/// timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// What an [`Event`] does when it is executed, along with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Create the genesis block and start every peer.
    Genesis,
    /// Generate a new transaction at the executing peer.
    CreateTransaction,
    /// A transaction arrives at the executing peer from `created_by`.
    ReceiveTransaction(Transaction),
    /// Start mining a new block at the executing peer.
    CreateBlock,
    /// An honest peer finishes mining the given block and broadcasts it.
    BroadcastBlock(BlockHash),
    /// A selfish peer finishes mining the given block.
    FinishedBlock(BlockHash),
    /// A block arrives at the executing peer from `created_by`.
    ReceiveBlock(BlockHash),
}

/// An action to execute against one peer at a given time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Time,
    /// Peer whose event handler scheduled this event.
    pub created_by: Option<PeerId>,
    /// Peer which handles this event. `None` only for [`EventKind::Genesis`].
    pub executed_by: Option<PeerId>,
    pub kind: EventKind,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An event that has not been assigned an id or placed in a queue yet.
/// Returned by peer handlers and scheduled by the simulation loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEvent {
    pub timestamp: Time,
    pub executed_by: PeerId,
    pub kind: EventKind,
}

impl PendingEvent {
    pub fn new(timestamp: Time, executed_by: PeerId, kind: EventKind) -> Self {
        Self { timestamp, executed_by, kind }
    }
}

/// Min-priority queue of [`Events`](Event) ordered by timestamp, then by
/// insertion order.
///
/// Cancellation is lazy: cancelled ids are remembered, and the matching
/// events are dropped when they reach the front of the queue.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<Event>>,
    cancelled: HashSet<EventId>,
    next_id: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a fresh [`EventId`] without scheduling anything.
    pub fn allocate_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;

        id
    }

    /// Places an already built event in the queue.
    pub fn push(&mut self, event: Event) {
        self.heap.push(Reverse(event));
    }

    /// Schedules a new event, returning its id.
    pub fn schedule(
        &mut self,
        timestamp: Time,
        created_by: Option<PeerId>,
        executed_by: Option<PeerId>,
        kind: EventKind,
    ) -> EventId {
        let id = self.allocate_id();
        self.push(Event { id, timestamp, created_by, executed_by, kind });

        id
    }

    /// Marks the event with the given id as cancelled. Cancelling an event
    /// which has already run has no effect.
    pub fn cancel(&mut self, id: EventId) {
        self.cancelled.insert(id);
    }

    /// Removes and returns the earliest event which has not been cancelled.
    pub fn pop(&mut self) -> Option<Event> {
        while let Some(Reverse(event)) = self.heap.pop() {
            if self.cancelled.remove(&event.id) {
                continue;
            }
            return Some(event);
        }

        None
    }

    /// Number of queued events, including cancelled events not yet dropped.
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{EventKind, EventQueue};

    #[test]
    fn pops_in_timestamp_then_insertion_order() {
        let mut queue = EventQueue::new();
        let late =
            queue.schedule(9, None, Some(0.into()), EventKind::CreateBlock);
        let first =
            queue.schedule(3, None, Some(1.into()), EventKind::CreateBlock);
        let second =
            queue.schedule(3, None, Some(2.into()), EventKind::CreateBlock);

        assert_eq!(queue.pop().map(|e| e.id), Some(first));
        assert_eq!(queue.pop().map(|e| e.id), Some(second));
        assert_eq!(queue.pop().map(|e| e.id), Some(late));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn cancelled_events_are_skipped() {
        let mut queue = EventQueue::new();
        let a = queue.schedule(1, None, Some(0.into()), EventKind::CreateBlock);
        let b = queue.schedule(2, None, Some(0.into()), EventKind::CreateBlock);
        queue.cancel(a);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().map(|e| e.id), Some(b));
        assert!(queue.is_empty());
    }

    #[test]
    fn allocated_ids_are_unique() {
        let mut queue = EventQueue::new();
        let a = queue.allocate_id();
        let b = queue.schedule(0, None, None, EventKind::Genesis);
        assert_ne!(a, b);
        assert!(a < b);
    }
}
