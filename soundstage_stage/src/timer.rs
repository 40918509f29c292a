// Cancellable timer table driven by an explicit clock.
//
// The schedulers never sleep or spawn threads. They register timers here and
// the owner calls `fire_due(now)` from its loop; every firing comes back as a
// `TimerHandle` the scheduler looks up in its own state. Cancelling removes
// the entry outright, so a cancelled timer can never fire late.

use std::collections::BTreeMap;
use std::time::Instant;

/// Milliseconds on the scheduler clock.
pub type Millis = u64;

/// Identifies one registered timer. Never reused within a `Timers` table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

#[derive(Clone, Copy, Debug)]
struct Timer {
    next_due: Millis,
    /// `None` for one-shot timers.
    interval: Option<Millis>,
}

#[derive(Debug, Default)]
pub struct Timers {
    next_id: u64,
    timers: BTreeMap<TimerHandle, Timer>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire every `interval` ms, first at `now + interval`. A zero interval
    /// is treated as 1 ms so catch-up always terminates.
    pub fn repeating(&mut self, now: Millis, interval: Millis) -> TimerHandle {
        let interval = interval.max(1);
        self.insert(Timer {
            next_due: now + interval,
            interval: Some(interval),
        })
    }

    /// Fire once at `now + delay`.
    pub fn once(&mut self, now: Millis, delay: Millis) -> TimerHandle {
        self.insert(Timer {
            next_due: now + delay,
            interval: None,
        })
    }

    /// Returns whether the timer was still registered.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.timers.remove(&handle).is_some()
    }

    pub fn is_active(&self, handle: TimerHandle) -> bool {
        self.timers.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// When the given timer fires next.
    pub fn due_at(&self, handle: TimerHandle) -> Option<Millis> {
        self.timers.get(&handle).map(|t| t.next_due)
    }

    /// Every firing due at or before `now`, oldest first. A repeating timer
    /// that fell behind fires once per missed interval. Ties break by
    /// registration order.
    pub fn fire_due(&mut self, now: Millis) -> Vec<TimerHandle> {
        let mut fired = Vec::new();
        loop {
            let next = self
                .timers
                .iter()
                .filter(|(_, t)| t.next_due <= now)
                .min_by_key(|(handle, t)| (t.next_due, **handle))
                .map(|(handle, _)| *handle);
            let Some(handle) = next else {
                break;
            };
            fired.push(handle);
            match self.timers.get_mut(&handle) {
                Some(Timer {
                    next_due,
                    interval: Some(interval),
                }) => *next_due += *interval,
                _ => {
                    self.timers.remove(&handle);
                }
            }
        }
        fired
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }

    fn insert(&mut self, timer: Timer) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.timers.insert(handle, timer);
        handle
    }
}

/// Wall-clock source for the binaries: milliseconds since construction.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> Millis {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(Millis::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_fires_exactly_once() {
        let mut timers = Timers::new();
        let h = timers.once(100, 50);
        assert!(timers.fire_due(149).is_empty());
        assert_eq!(timers.fire_due(150), vec![h]);
        assert!(!timers.is_active(h));
        assert!(timers.fire_due(1000).is_empty());
    }

    #[test]
    fn repeating_catches_up_in_order() {
        let mut timers = Timers::new();
        let fast = timers.repeating(0, 50);
        let slow = timers.repeating(0, 120);
        let fired = timers.fire_due(150);
        assert_eq!(fired, vec![fast, fast, slow, fast]);
        assert_eq!(timers.due_at(fast), Some(200));
        assert_eq!(timers.due_at(slow), Some(240));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut timers = Timers::new();
        let h = timers.repeating(0, 10);
        assert!(timers.cancel(h));
        assert!(!timers.cancel(h));
        assert!(timers.fire_due(1000).is_empty());
        assert!(timers.is_empty());
    }

    #[test]
    fn zero_interval_still_advances() {
        let mut timers = Timers::new();
        let h = timers.repeating(0, 0);
        assert_eq!(timers.fire_due(3), vec![h, h, h]);
    }

    #[test]
    fn handles_are_not_reused() {
        let mut timers = Timers::new();
        let a = timers.once(0, 1);
        timers.cancel(a);
        let b = timers.once(0, 1);
        assert_ne!(a, b);
    }
}
