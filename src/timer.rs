// src/timer.rs
//! Deadline bookkeeping for the main loop.
//!
//! Timers are identified by a [`TimerId`] so the owner can cancel them. A
//! repeating timer is rescheduled from the moment it fired, never from its
//! previous deadline: a tick delayed by a slow handler fires once, it does
//! not fire again to catch up.

use std::time::{Duration, Instant};

/// Smallest period a repeating timer may have; keeps `expire` finite.
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug)]
struct TimerEntry<K> {
    id: TimerId,
    deadline: Instant,
    period: Option<Duration>,
    kind: K,
}

#[derive(Debug)]
pub struct TimerQueue<K> {
    entries: Vec<TimerEntry<K>>,
    next_id: u64,
}

impl<K: Copy> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, deadline: Instant, period: Option<Duration>, kind: K) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.push(TimerEntry {
            id,
            deadline,
            period,
            kind,
        });
        id
    }

    /// Fires once, `delay` from now.
    pub fn add_oneshot(&mut self, delay: Duration, kind: K) -> TimerId {
        self.insert(Instant::now() + delay, None, kind)
    }

    /// Fires every `period`, first time one period from now.
    pub fn add_repeating(&mut self, period: Duration, kind: K) -> TimerId {
        let period = period.max(MIN_PERIOD);
        self.insert(Instant::now() + period, Some(period), kind)
    }

    /// Returns true if the timer was still pending.
    pub fn remove(&mut self, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time until the earliest deadline, zero if one is already due,
    /// `None` if nothing is scheduled.
    pub fn next_timeout(&self, now: Instant) -> Option<Duration> {
        self.entries
            .iter()
            .map(|entry| entry.deadline.saturating_duration_since(now))
            .min()
    }

    /// Takes the earliest timer due at `now`. One-shot timers are removed,
    /// repeating ones are pushed to `now + period`.
    pub fn expire(&mut self, now: Instant) -> Option<(TimerId, K)> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.deadline <= now)
            .min_by_key(|(_, entry)| entry.deadline)
            .map(|(index, _)| index)?;

        let entry = &mut self.entries[index];
        let fired = (entry.id, entry.kind);
        let period = entry.period;
        match period {
            Some(period) => self.entries[index].deadline = now + period,
            None => {
                self.entries.swap_remove(index);
            }
        }
        Some(fired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Kind {
        Once,
        Tick,
    }

    #[test]
    fn it_should_remove_oneshot_timers_after_firing() {
        let mut timers = TimerQueue::new();
        let id = timers.add_oneshot(Duration::ZERO, Kind::Once);
        let now = Instant::now();
        assert_eq!(timers.expire(now), Some((id, Kind::Once)));
        assert_eq!(timers.expire(now), None);
        assert!(timers.is_empty());
    }

    #[test]
    fn it_should_reschedule_late_repeating_timers_without_catching_up() {
        let mut timers = TimerQueue::new();
        let id = timers.add_repeating(Duration::from_millis(10), Kind::Tick);

        // Ten periods late: fires exactly once, then waits a full period.
        let late = Instant::now() + Duration::from_millis(100);
        assert_eq!(timers.expire(late), Some((id, Kind::Tick)));
        assert_eq!(timers.expire(late), None);
        assert_eq!(timers.next_timeout(late), Some(Duration::from_millis(10)));
        assert!(timers.contains(id));
    }

    #[test]
    fn it_should_fire_due_timers_earliest_first_and_honour_removal() {
        let mut timers = TimerQueue::new();
        let later = timers.add_oneshot(Duration::from_millis(5), Kind::Once);
        let sooner = timers.add_oneshot(Duration::ZERO, Kind::Tick);
        let removed = timers.add_oneshot(Duration::ZERO, Kind::Once);
        assert!(timers.remove(removed));
        assert!(!timers.remove(removed));

        let now = Instant::now() + Duration::from_millis(10);
        assert_eq!(timers.expire(now), Some((sooner, Kind::Tick)));
        assert_eq!(timers.expire(now), Some((later, Kind::Once)));
        assert_eq!(timers.expire(now), None);
        assert_eq!(timers.next_timeout(now), None);
    }
}
