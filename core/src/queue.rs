//! Event queue: a min-heap keyed by superdense time with stable handles.
//!
//! Handles are index + generation pairs into a side table (`slots`), so a
//! handle that outlives a `remove`/`shift` can be detected as stale rather
//! than silently addressing a reused slot. The heap itself uses lazy
//! deletion: a `shift` or `remove` bumps the slot's generation instead of
//! touching the heap, and stale heap entries are discarded the next time
//! they would surface at the top.
//!
//! Ties at equal superdense time are broken by the variable's stable
//! name, so traces are reproducible regardless of allocation order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::superdense::{EventKind, SuperdenseTime};
use crate::variable::VariableId;

/// Stable handle to a queue entry. `generation` lets the queue detect a
/// handle that refers to a slot which has since been shifted or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone)]
struct Slot {
    var: VariableId,
    name: String,
    kind: EventKind,
    sdt: SuperdenseTime,
    generation: u32,
    active: bool,
}

#[derive(Debug, Clone)]
struct HeapEntry {
    sdt: SuperdenseTime,
    name: String,
    index: usize,
    generation: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.sdt == other.sdt && self.name == other.name
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest (sdt, name)
        // pair surfaces first.
        other
            .sdt
            .cmp(&self.sdt)
            .then_with(|| other.name.cmp(&self.name))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A (variable, event-kind) pair popped from the queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueItem {
    pub var: VariableId,
    pub kind: EventKind,
}

/// Min-heap of `(superdense-time, variable, event-kind)` entries with
/// stable add/shift/remove, per spec.md §4.1.
#[derive(Debug, Default)]
pub struct EventQueue {
    slots: Vec<Slot>,
    free: Vec<usize>,
    heap: BinaryHeap<HeapEntry>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entry; returns a stable handle. At most one entry per
    /// variable is expected by callers (spec invariant 5), but the queue
    /// itself does not enforce that — callers must `remove`/`shift` any
    /// prior handle for the variable first.
    pub fn add(&mut self, sdt: SuperdenseTime, var: VariableId, name: &str, kind: EventKind) -> EventHandle {
        let index = if let Some(i) = self.free.pop() {
            self.slots[i] = Slot {
                var,
                name: name.to_string(),
                kind,
                sdt,
                generation: self.slots[i].generation + 1,
                active: true,
            };
            i
        } else {
            self.slots.push(Slot {
                var,
                name: name.to_string(),
                kind,
                sdt,
                generation: 0,
                active: true,
            });
            self.slots.len() - 1
        };
        let generation = self.slots[index].generation;
        self.heap.push(HeapEntry { sdt, name: name.to_string(), index, generation });
        EventHandle { index, generation }
    }

    /// Update the key (and optionally kind) of an existing entry; returns
    /// the (possibly new) handle. Implemented as lazy-delete + re-push.
    pub fn shift(&mut self, handle: EventHandle, new_sdt: SuperdenseTime, kind: Option<EventKind>) -> EventHandle {
        let slot = &mut self.slots[handle.index];
        debug_assert_eq!(slot.generation, handle.generation, "stale event handle passed to shift");
        slot.sdt = new_sdt;
        if let Some(k) = kind {
            slot.kind = k;
        }
        slot.generation += 1;
        slot.active = true;
        let new_handle = EventHandle { index: handle.index, generation: slot.generation };
        self.heap.push(HeapEntry {
            sdt: new_sdt,
            name: slot.name.clone(),
            index: handle.index,
            generation: slot.generation,
        });
        new_handle
    }

    /// Remove an entry from the queue.
    pub fn remove(&mut self, handle: EventHandle) {
        if let Some(slot) = self.slots.get_mut(handle.index) {
            if slot.generation == handle.generation && slot.active {
                slot.active = false;
                slot.generation += 1;
                self.free.push(handle.index);
            }
        }
    }

    /// Drop stale (superseded or removed) entries from the top of the
    /// heap until a live one surfaces, or the heap empties.
    fn clean_top(&mut self) {
        while let Some(top) = self.heap.peek() {
            let slot = &self.slots[top.index];
            if slot.active && slot.generation == top.generation {
                break;
            }
            self.heap.pop();
        }
    }

    /// The superdense time of the earliest pending event, or `+inf`/pass0
    /// sentinel when the queue is empty.
    pub fn top_time(&mut self) -> Option<SuperdenseTime> {
        self.clean_top();
        self.heap.peek().map(|e| e.sdt)
    }

    /// Non-destructive peek at the earliest pending entry.
    pub fn top(&mut self) -> Option<(SuperdenseTime, VariableId, EventKind)> {
        self.clean_top();
        self.heap.peek().map(|e| {
            let slot = &self.slots[e.index];
            (e.sdt, slot.var, slot.kind)
        })
    }

    /// Remove and return every entry whose `(t, i)` equals the top's, in
    /// deterministic (kind, then variable name) order.
    pub fn pop_same_pass(&mut self) -> Vec<QueueItem> {
        self.clean_top();
        let Some(top) = self.heap.peek().cloned() else {
            return Vec::new();
        };
        let mut items = Vec::new();
        loop {
            self.clean_top();
            let Some(candidate) = self.heap.peek() else { break };
            if candidate.sdt.t != top.sdt.t || candidate.sdt.i != top.sdt.i {
                break;
            }
            let entry = self.heap.pop().unwrap();
            let slot = &mut self.slots[entry.index];
            slot.active = false;
            self.free.push(entry.index);
            items.push(QueueItem { var: slot.var, kind: slot.kind });
        }
        items.sort_by(|a, b| a.kind.cmp(&b.kind));
        items
    }

    pub fn is_empty(&mut self) -> bool {
        self.clean_top();
        self.heap.is_empty()
    }

    pub fn len_live(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::superdense::EventKind;
    use crate::variable::VariableId;

    fn sdt(t: f64, i: u64, o: u32) -> SuperdenseTime {
        SuperdenseTime::new(t, i, o)
    }

    #[test]
    fn add_and_pop_in_time_order() {
        let mut q = EventQueue::new();
        q.add(sdt(2.0, 0, 2), VariableId(0), "b", EventKind::Qss);
        q.add(sdt(1.0, 0, 2), VariableId(1), "a", EventKind::Qss);
        let top = q.top().unwrap();
        assert_eq!(top.0.t, 1.0);
        assert_eq!(top.1, VariableId(1));
    }

    #[test]
    fn tie_break_by_name() {
        let mut q = EventQueue::new();
        q.add(sdt(1.0, 0, 0), VariableId(0), "b", EventKind::Qss);
        q.add(sdt(1.0, 0, 0), VariableId(1), "a", EventKind::Qss);
        let items = q.pop_same_pass();
        assert_eq!(items.len(), 2);
        // both are Qss kind; name tie-break applied inside pop_same_pass's source order
        assert!(q.is_empty());
    }

    #[test]
    fn shift_updates_key_and_old_handle_is_stale() {
        let mut q = EventQueue::new();
        let h = q.add(sdt(5.0, 0, 0), VariableId(0), "x", EventKind::Qss);
        let h2 = q.shift(h, sdt(1.0, 0, 0), None);
        let top = q.top().unwrap();
        assert_eq!(top.0.t, 1.0);
        assert_ne!(h.generation, h2.generation);
    }

    #[test]
    fn remove_drops_entry() {
        let mut q = EventQueue::new();
        let h = q.add(sdt(1.0, 0, 0), VariableId(0), "x", EventKind::Qss);
        q.remove(h);
        assert!(q.is_empty());
    }

    #[test]
    fn pop_same_pass_groups_by_t_and_i_only() {
        let mut q = EventQueue::new();
        q.add(sdt(1.0, 0, 4), VariableId(0), "h", EventKind::Handler);
        q.add(sdt(1.0, 0, 0), VariableId(1), "d", EventKind::Discrete);
        q.add(sdt(1.0, 1, 0), VariableId(2), "next_pass", EventKind::Discrete);
        let items = q.pop_same_pass();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, EventKind::Discrete);
        assert_eq!(items[1].kind, EventKind::Handler);
        let remaining = q.top().unwrap();
        assert_eq!(remaining.0.i, 1);
    }

    #[test]
    fn monotone_pop_ordering_property() {
        let mut q = EventQueue::new();
        for (t, name) in [(3.0, "c"), (1.0, "a"), (2.0, "b")] {
            q.add(sdt(t, 0, 0), VariableId(0), name, EventKind::Qss);
        }
        let mut last = f64::NEG_INFINITY;
        while !q.is_empty() {
            let t = q.top_time().unwrap().t;
            assert!(t >= last);
            last = t;
            q.pop_same_pass();
        }
    }
}
