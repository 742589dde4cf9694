//! Pending fault queue
//!
//! Failed before Critical before Degraded; equal severity is FIFO by arrival.

use remedy_core::{Fault, FaultId, Severity};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(Debug)]
struct Entry {
    severity: Severity,
    seq: Reverse<u64>,
    fault: Fault,
}

impl Entry {
    fn key(&self) -> (Severity, Reverse<u64>) {
        (self.severity, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Priority queue of faults awaiting admission
#[derive(Debug, Default)]
pub struct Backlog {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl Backlog {
    /// Create empty backlog
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a fault
    pub fn push(&mut self, fault: Fault) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            severity: fault.severity,
            seq: Reverse(seq),
            fault,
        });
    }

    /// Dequeue the highest-priority fault
    pub fn pop(&mut self) -> Option<Fault> {
        self.heap.pop().map(|entry| entry.fault)
    }

    /// Next fault to be dequeued
    #[must_use]
    pub fn peek(&self) -> Option<&Fault> {
        self.heap.peek().map(|entry| &entry.fault)
    }

    /// Whether a fault is waiting
    #[must_use]
    pub fn contains(&self, id: FaultId) -> bool {
        self.heap.iter().any(|entry| entry.fault.id == id)
    }

    /// Pending faults
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing is pending
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use remedy_core::FaultKind;

    fn fault(component: &str, severity: Severity) -> Fault {
        Fault::new(component, FaultKind::ResourceExhaustion, severity)
    }

    #[test]
    fn severity_then_arrival() {
        let mut backlog = Backlog::new();
        backlog.push(fault("a", Severity::Degraded));
        backlog.push(fault("b", Severity::Failed));
        backlog.push(fault("c", Severity::Degraded));
        backlog.push(fault("d", Severity::Critical));

        let order: Vec<_> = std::iter::from_fn(|| backlog.pop())
            .map(|f| f.component.to_string())
            .collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn peek_and_contains() {
        let mut backlog = Backlog::new();
        assert!(backlog.peek().is_none());

        let first = fault("a", Severity::Critical);
        let id = first.id;
        backlog.push(first);
        assert!(backlog.contains(id));
        assert_eq!(backlog.peek().map(|f| f.id), Some(id));
        assert_eq!(backlog.len(), 1);
    }

    fn severity() -> impl Strategy<Value = Severity> {
        prop_oneof![
            Just(Severity::Degraded),
            Just(Severity::Critical),
            Just(Severity::Failed),
        ]
    }

    proptest! {
        #[test]
        fn pops_are_sorted_and_stable(severities in prop::collection::vec(severity(), 0..64)) {
            let mut backlog = Backlog::new();
            for (index, severity) in severities.iter().enumerate() {
                backlog.push(fault(&index.to_string(), *severity));
            }

            let popped: Vec<(Severity, usize)> = std::iter::from_fn(|| backlog.pop())
                .map(|f| (f.severity, f.component.as_str().parse().unwrap()))
                .collect();

            prop_assert_eq!(popped.len(), severities.len());
            for pair in popped.windows(2) {
                let ((s1, i1), (s2, i2)) = (pair[0], pair[1]);
                prop_assert!(s1 > s2 || (s1 == s2 && i1 < i2));
            }
        }
    }
}
