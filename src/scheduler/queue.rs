//! Due-time priority queue.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::time::Instant;

/// Min-heap of `(due, job)` entries. Entries pushed at the same instant pop
/// in insertion order.
#[derive(Debug, Default)]
pub(crate) struct DueQueue {
    heap: BinaryHeap<Reverse<(Instant, u64, String)>>,
    seq: u64,
}

impl DueQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, due: Instant, job: impl Into<String>) {
        self.seq += 1;
        self.heap.push(Reverse((due, self.seq, job.into())));
    }

    /// Earliest due time.
    pub fn peek_due(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((due, _, _))| *due)
    }

    /// Pop the earliest entry if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(Instant, String)> {
        if self.peek_due()? > now {
            return None;
        }
        self.heap.pop().map(|Reverse((due, _, job))| (due, job))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

/// Next due time after `prev`, skipping every interval already missed.
pub(crate) fn next_due(prev: Instant, interval: Duration, now: Instant) -> Instant {
    let next = prev + interval;
    if next > now || interval.is_zero() {
        return next;
    }
    let behind = now.duration_since(prev).as_nanos();
    let step = interval.as_nanos();
    let intervals = behind / step + 1;
    let offset = u64::try_from(step.saturating_mul(intervals)).unwrap_or(u64::MAX);
    prev + Duration::from_nanos(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_order() {
        let now = Instant::now();
        let mut q = DueQueue::new();
        q.push(now + Duration::from_secs(2), "late");
        q.push(now, "first");
        q.push(now, "second");
        q.push(now + Duration::from_secs(1), "soon");

        assert_eq!(q.len(), 4);
        assert_eq!(q.pop_due(now).unwrap().1, "first");
        assert_eq!(q.pop_due(now).unwrap().1, "second");
        assert!(q.pop_due(now).is_none());
        assert_eq!(q.peek_due(), Some(now + Duration::from_secs(1)));
        assert_eq!(q.pop_due(now + Duration::from_secs(5)).unwrap().1, "soon");
    }

    #[test]
    fn test_next_due_keeps_alignment() {
        let base = Instant::now();
        let every = Duration::from_secs(1);
        assert_eq!(next_due(base, every, base), base + every);
        assert_eq!(
            next_due(base, every, base + Duration::from_millis(300)),
            base + every
        );
    }

    #[test]
    fn test_next_due_skips_missed_ticks() {
        let base = Instant::now();
        let every = Duration::from_secs(1);
        let now = base + Duration::from_millis(3500);
        assert_eq!(next_due(base, every, now), base + Duration::from_secs(4));
        let now = base + Duration::from_secs(3);
        assert_eq!(next_due(base, every, now), base + Duration::from_secs(4));
    }
}
