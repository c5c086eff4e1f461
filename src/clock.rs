/// Vector Clocks and Versioned Values
///
/// A vector clock is a partial-order timestamp keyed by node id. Every write
/// accepted by a coordinator advances the coordinator's own slot; replicas
/// never advance the clock. Two values whose clocks are incomparable are
/// siblings and are both retained until a client reconciles them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Partial-order timestamp: node id -> monotonically nondecreasing counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    times: HashMap<String, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for a node id; absent entries read as 0.
    pub fn get(&self, id: &str) -> u64 {
        self.times.get(id).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, id: &str) {
        *self.times.entry(id.to_string()).or_insert(0) += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Componentwise `self <= other`. Only iterates our own entries; ids
    /// absent from `other` read as 0, ids absent from us are trivially <=.
    fn dominated_by(&self, other: &VectorClock) -> bool {
        self.times.iter().all(|(id, t)| *t <= other.get(id))
    }

    /// Strict causal precedence: `self` happened before `other`. Equal
    /// clocks do not precede each other.
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        self.dominated_by(other) && !other.dominated_by(self)
    }

    /// Neither clock precedes the other.
    pub fn concurrent(&self, other: &VectorClock) -> bool {
        !self.happens_before(other) && !other.happens_before(self)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        let mut first = true;
        for (id, t) in &self.times {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", id, t)?;
            first = false;
        }
        write!(f, "}}")
    }
}

/// An opaque payload stamped with the clock under which it was written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub data: Vec<u8>,
    pub clock: VectorClock,
}

impl Value {
    pub fn new(data: Vec<u8>, clock: VectorClock) -> Self {
        Self { data, clock }
    }
}

/// Set of sibling values. Invariant: after any reconcile step, no member's
/// clock strictly precedes another's.
pub type ValueList = Vec<Value>;

/// Outcome of merging an incoming value into a resident value list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// The incoming value was appended; dominated residents were dropped.
    Applied,
    /// A resident clock strictly dominates the incoming one.
    Stale,
}

/// Merge `incoming` into `residents` under the sibling invariant. The stale
/// check runs against every resident before anything is dropped.
pub fn reconcile(residents: &mut ValueList, incoming: Value) -> Reconcile {
    if residents
        .iter()
        .any(|v| incoming.clock.happens_before(&v.clock))
    {
        return Reconcile::Stale;
    }

    residents.retain(|v| !v.clock.happens_before(&incoming.clock));
    residents.push(incoming);
    Reconcile::Applied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        let mut c = VectorClock::new();
        for (id, n) in entries {
            for _ in 0..*n {
                c.increment(id);
            }
        }
        c
    }

    #[test]
    fn test_basic_counters() {
        let a = clock(&[("x", 2), ("y", 1)]);
        let b = clock(&[("x", 1), ("y", 2)]);

        assert_eq!(a.get("x"), 2);
        assert_eq!(a.get("y"), 1);
        assert_eq!(b.get("x"), 1);
        assert_eq!(b.get("y"), 2);
        assert_eq!(a.get("missing"), 0);
    }

    #[test]
    fn test_causal_precedence() {
        let a = clock(&[("x", 2), ("y", 1)]);
        let b = clock(&[("x", 1), ("y", 2)]);
        let c = clock(&[("x", 1), ("y", 1)]);

        // c happens before both a and b
        assert!(c.happens_before(&a));
        assert!(c.happens_before(&b));

        // a and b are concurrent
        assert!(!a.happens_before(&b));
        assert!(!b.happens_before(&a));
    }

    #[test]
    fn test_equal_clocks_are_not_strictly_less() {
        let a = clock(&[("x", 2), ("y", 1)]);
        assert!(!a.happens_before(&a));
        assert!(a.concurrent(&a));
    }

    #[test]
    fn test_absent_key_on_left_still_precedes() {
        // {} < {x:1}: the right operand carries a strictly larger entry that
        // is absent from the left.
        let empty = VectorClock::new();
        let one = clock(&[("x", 1)]);
        assert!(empty.happens_before(&one));
        assert!(!one.happens_before(&empty));
    }

    #[test]
    fn test_sibling_detection() {
        let a = clock(&[("x", 2), ("y", 1)]);
        let b = clock(&[("x", 1), ("y", 2)]);
        let c = clock(&[("x", 1), ("y", 1)]);

        assert!(a.concurrent(&b));
        assert!(b.concurrent(&a));

        assert!(!a.concurrent(&c));
        assert!(!c.concurrent(&a));
        assert!(!b.concurrent(&c));
    }

    #[test]
    fn test_reconcile_drops_dominated_residents() {
        let old = Value::new(b"old".to_vec(), clock(&[("n1", 1)]));
        let new = Value::new(b"new".to_vec(), clock(&[("n1", 2)]));

        let mut list = vec![old];
        assert_eq!(reconcile(&mut list, new.clone()), Reconcile::Applied);
        assert_eq!(list, vec![new]);
    }

    #[test]
    fn test_reconcile_rejects_stale() {
        let resident = Value::new(b"v2".to_vec(), clock(&[("n1", 2)]));
        let stale = Value::new(b"v1".to_vec(), clock(&[("n1", 1)]));

        let mut list = vec![resident.clone()];
        assert_eq!(reconcile(&mut list, stale), Reconcile::Stale);
        assert_eq!(list, vec![resident]);
    }

    #[test]
    fn test_reconcile_keeps_siblings_concurrent() {
        let a = Value::new(b"a".to_vec(), clock(&[("n1", 1)]));
        let b = Value::new(b"b".to_vec(), clock(&[("n2", 1)]));

        let mut list = vec![a];
        assert_eq!(reconcile(&mut list, b), Reconcile::Applied);
        assert_eq!(list.len(), 2);

        for x in &list {
            for y in &list {
                if x.data != y.data {
                    assert!(x.clock.concurrent(&y.clock));
                }
            }
        }
    }
}
