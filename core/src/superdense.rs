//! Superdense time: the `(t, i, o)` total order the event queue and
//! simulator loop are built on.
//!
//! `t` is continuous simulation time, `i` is the pass index (bumped when a
//! chain of simultaneous events at the same `t` needs another pass), and
//! `o` is a fixed per-kind offset that forces `Discrete < QSS-Input < QSS
//! < Zero-Crossing < Handler` ordering within a pass.

use std::cmp::Ordering;

/// The kinds of event a queue entry can carry, in required processing
/// order. The discriminant doubles as the `o` offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum EventKind {
    Discrete = 0,
    QssInput = 1,
    Qss = 2,
    ZeroCrossing = 3,
    Handler = 4,
}

impl EventKind {
    pub fn offset(self) -> u32 {
        self as u32
    }
}

/// `(t, i, o)` superdense time.
#[derive(Debug, Clone, Copy)]
pub struct SuperdenseTime {
    pub t: f64,
    pub i: u64,
    pub o: u32,
}

impl SuperdenseTime {
    pub fn new(t: f64, i: u64, o: u32) -> Self {
        Self { t, i, o }
    }

    /// A bare-time superdense time with pass 0 and offset 0, used for
    /// comparisons against plain simulation time.
    pub fn at(t: f64) -> Self {
        Self { t, i: 0, o: 0 }
    }

    pub fn with_kind(t: f64, i: u64, kind: EventKind) -> Self {
        Self { t, i, o: kind.offset() }
    }

    /// The pass index to use for a new event produced at the same `t` as
    /// `self`, when it must be ordered after everything in this pass.
    pub fn next_index(self) -> u64 {
        self.i + 1
    }
}

impl From<f64> for SuperdenseTime {
    fn from(t: f64) -> Self {
        SuperdenseTime::at(t)
    }
}

impl PartialEq for SuperdenseTime {
    fn eq(&self, other: &Self) -> bool {
        self.t == other.t && self.i == other.i && self.o == other.o
    }
}
impl Eq for SuperdenseTime {}

impl PartialOrd for SuperdenseTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SuperdenseTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.t
            .partial_cmp(&other.t)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.i.cmp(&other.i))
            .then_with(|| self.o.cmp(&other.o))
    }
}

impl PartialEq<f64> for SuperdenseTime {
    fn eq(&self, other: &f64) -> bool {
        self.t == *other
    }
}

impl PartialOrd<f64> for SuperdenseTime {
    fn partial_cmp(&self, other: &f64) -> Option<Ordering> {
        self.t.partial_cmp(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_time_first() {
        let a = SuperdenseTime::new(1.0, 5, 3);
        let b = SuperdenseTime::new(2.0, 0, 0);
        assert!(a < b);
    }

    #[test]
    fn orders_by_pass_then_offset() {
        let a = SuperdenseTime::new(1.0, 0, 4);
        let b = SuperdenseTime::new(1.0, 1, 0);
        assert!(a < b);

        let c = SuperdenseTime::with_kind(1.0, 0, EventKind::Discrete);
        let d = SuperdenseTime::with_kind(1.0, 0, EventKind::Handler);
        assert!(c < d);
    }

    #[test]
    fn compares_against_bare_time() {
        let a = SuperdenseTime::new(3.0, 2, 1);
        assert!(a == 3.0);
        assert!(a < 4.0);
        assert!(a > 2.0);
    }

    #[test]
    fn event_kind_ordering_matches_spec() {
        assert!(EventKind::Discrete < EventKind::QssInput);
        assert!(EventKind::QssInput < EventKind::Qss);
        assert!(EventKind::Qss < EventKind::ZeroCrossing);
        assert!(EventKind::ZeroCrossing < EventKind::Handler);
    }
}
