//! Cycle-based deferred event scheduler
//!
//! Entries are keyed by an integer id and fire once the CPU cycle counter reaches their deadline.
//! Deadlines are compared cyclically so that ordering survives the 64-bit counter wrapping around.

use bincode::{Decode, Encode};
use std::collections::VecDeque;

const HALF_RANGE: u64 = 1 << 63;

/// Returns true if `a` is strictly before `b`, treating the counter as cyclic.
#[inline]
fn is_before(a: u64, b: u64) -> bool {
    a != b && a.wrapping_sub(b) >= HALF_RANGE
}

/// Returns true if `deadline` has been reached at cycle count `now`.
#[inline]
fn is_due(deadline: u64, now: u64) -> bool {
    deadline == now || is_before(deadline, now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
struct Entry<H> {
    id: u32,
    deadline: u64,
    handler: H,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Scheduler<H> {
    entries: VecDeque<Entry<H>>,
}

impl<H: Copy> Default for Scheduler<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Copy> Scheduler<H> {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: VecDeque::new() }
    }

    /// Schedule `handler` to fire `delta` cycles after `now`. Any existing entry with the same id is
    /// replaced.
    pub fn add(&mut self, id: u32, delta: u64, handler: H, now: u64) {
        self.delete(id);

        let deadline = now.wrapping_add(delta);
        log::trace!("Scheduling event {id} at cycle {deadline} ({delta} cycles from {now})");

        // Entries with equal deadlines fire in insertion order
        let position = self
            .entries
            .iter()
            .position(|entry| is_before(deadline, entry.deadline))
            .unwrap_or(self.entries.len());
        self.entries.insert(position, Entry { id, deadline, handler });
    }

    /// Remove the entry with the given id, if any.
    pub fn delete(&mut self, id: u32) {
        if let Some(position) = self.entries.iter().position(|entry| entry.id == id) {
            log::trace!("Removing scheduled event {id}");
            self.entries.remove(position);
        }
    }

    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deadline of the earliest entry.
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.front().map(|entry| entry.deadline)
    }

    /// Remove and return the head entry if it is due at `now`. Only the head is examined.
    pub fn pop_due(&mut self, now: u64) -> Option<(u32, H)> {
        let head = self.entries.front()?;
        if !is_due(head.deadline, now) {
            return None;
        }

        let Entry { id, deadline, handler } = self.entries.pop_front()?;
        log::trace!("Event {id} due at cycle {deadline} fired at {now}");

        Some((id, handler))
    }

    /// If the head entry is due at `now`, remove it and pass its id and handler to `dispatch`.
    /// Returns whether an entry fired.
    pub fn check_and_handle(&mut self, now: u64, dispatch: impl FnOnce(u32, H)) -> bool {
        match self.pop_due(now) {
            Some((id, handler)) => {
                dispatch(id, handler);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
    enum Event {
        A,
        B,
        C,
    }

    fn drain(scheduler: &mut Scheduler<Event>, now: u64) -> Vec<(u32, Event)> {
        let mut fired = Vec::new();
        while scheduler.check_and_handle(now, |id, event| fired.push((id, event))) {}
        fired
    }

    #[test]
    fn fires_in_deadline_order() {
        let mut scheduler = Scheduler::new();
        scheduler.add(1, 300, Event::A, 1000);
        scheduler.add(2, 100, Event::B, 1000);
        scheduler.add(3, 200, Event::C, 1000);

        assert_eq!(drain(&mut scheduler, 1099), vec![]);
        assert_eq!(drain(&mut scheduler, 1100), vec![(2, Event::B)]);
        assert_eq!(drain(&mut scheduler, 1250), vec![(3, Event::C)]);
        assert_eq!(drain(&mut scheduler, 5000), vec![(1, Event::A)]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn only_head_checked_per_call() {
        let mut scheduler = Scheduler::new();
        scheduler.add(1, 10, Event::A, 0);
        scheduler.add(2, 20, Event::B, 0);

        let mut fired = vec![];
        assert!(scheduler.check_and_handle(100, |id, _| fired.push(id)));
        assert_eq!(fired, vec![1]);
        assert_eq!(scheduler.len(), 1);

        assert!(scheduler.check_and_handle(100, |id, _| fired.push(id)));
        assert_eq!(fired, vec![1, 2]);
        assert!(!scheduler.check_and_handle(100, |id, _| fired.push(id)));
    }

    #[test]
    fn add_replaces_same_id() {
        let mut scheduler = Scheduler::new();
        scheduler.add(7, 10, Event::A, 0);
        scheduler.add(8, 20, Event::B, 0);
        scheduler.add(7, 30, Event::C, 0);

        assert_eq!(scheduler.len(), 2);
        assert_eq!(drain(&mut scheduler, 25), vec![(8, Event::B)]);
        assert_eq!(drain(&mut scheduler, 30), vec![(7, Event::C)]);
    }

    #[test]
    fn delete() {
        let mut scheduler = Scheduler::new();
        scheduler.add(1, 10, Event::A, 0);
        scheduler.add(2, 10, Event::B, 0);

        scheduler.delete(1);
        scheduler.delete(99);

        assert!(!scheduler.contains(1));
        assert_eq!(drain(&mut scheduler, 10), vec![(2, Event::B)]);
    }

    #[test]
    fn equal_deadlines_fire_in_insertion_order() {
        let mut scheduler = Scheduler::new();
        scheduler.add(1, 50, Event::A, 0);
        scheduler.add(2, 50, Event::B, 0);
        scheduler.add(3, 50, Event::C, 0);

        assert_eq!(drain(&mut scheduler, 50), vec![(1, Event::A), (2, Event::B), (3, Event::C)]);
    }

    #[test]
    fn wraparound() {
        let now = u64::MAX - 99;

        let mut scheduler = Scheduler::new();
        // Deadline wraps past zero
        scheduler.add(1, 200, Event::A, now);
        scheduler.add(2, 50, Event::B, now);

        assert_eq!(scheduler.next_deadline(), Some(u64::MAX - 49));
        assert_eq!(drain(&mut scheduler, u64::MAX - 50), vec![]);
        assert_eq!(drain(&mut scheduler, u64::MAX), vec![(2, Event::B)]);

        // Not due just before the wrapped deadline, due once the counter wraps past it
        assert_eq!(drain(&mut scheduler, 99), vec![]);
        assert_eq!(drain(&mut scheduler, 100), vec![(1, Event::A)]);
    }

    #[test]
    fn encode_decode() {
        let mut scheduler = Scheduler::new();
        scheduler.add(1, 10, Event::A, 0);
        scheduler.add(2, 5, Event::B, 0);

        let config = bincode::config::standard();
        let bytes = bincode::encode_to_vec(&scheduler, config).unwrap();
        let (mut decoded, _): (Scheduler<Event>, _) =
            bincode::decode_from_slice(&bytes, config).unwrap();

        assert_eq!(drain(&mut decoded, 100), vec![(2, Event::B), (1, Event::A)]);
    }
}
