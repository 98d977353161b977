//! Cancellable timers
//!
//! Pending timers live in a [`Slab`] keyed by handle, with a min-heap of
//! (fire time, handle) on top. Cancelling removes the slab entry; the heap
//! entry is skipped when it surfaces, so a cancelled timer never fires.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::slab::Slab;
use crate::types::SimTime;

/// Handle returned by [`TimerQueue::schedule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

#[derive(Debug)]
struct Pending<E> {
    at: SimTime,
    event: E,
}

#[derive(Debug)]
pub struct TimerQueue<E> {
    pending: Slab<Pending<E>>,
    heap: BinaryHeap<Reverse<(SimTime, u64)>>,
}

impl<E> Default for TimerQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> TimerQueue<E> {
    pub fn new() -> Self {
        Self {
            pending: Slab::new(),
            heap: BinaryHeap::new(),
        }
    }

    pub fn schedule(&mut self, at: SimTime, event: E) -> TimerHandle {
        let id = self.pending.insert(Pending { at, event });
        self.heap.push(Reverse((at, id)));
        TimerHandle(id)
    }

    /// Returns the event if the timer was still pending
    pub fn cancel(&mut self, handle: TimerHandle) -> Option<E> {
        self.pending.remove(handle.0).map(|p| p.event)
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.pending.contains(handle.0)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn next_deadline(&mut self) -> Option<SimTime> {
        self.skip_cancelled();
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Pop the earliest timer due at or before `now`. Same-time timers fire
    /// in scheduling order.
    pub fn pop_due(&mut self, now: SimTime) -> Option<(SimTime, E)> {
        self.skip_cancelled();
        let Reverse((at, id)) = *self.heap.peek()?;
        if at > now {
            return None;
        }
        self.heap.pop();
        self.pending.remove(id).map(|p| (p.at, p.event))
    }

    /// Cancel everything
    pub fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.drain();
        self.heap.clear();
        n
    }

    fn skip_cancelled(&mut self) {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            if self.pending.contains(*id) {
                break;
            }
            self.heap.pop();
        }
    }
}
