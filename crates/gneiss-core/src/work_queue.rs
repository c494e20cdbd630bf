use crate::SmallKeyHashMap;

use float_ord::FloatOrd;
use std::hash::Hash;

/// A min-priority queue that holds at most one entry per item.
///
/// Lower priority values are served first. Ties are served in insertion order. Inserting an item that is already queued keeps
/// the smaller of the two priorities, and the item keeps its original place among ties.
///
/// Implemented as a binary heap with an index from item to heap slot, so a duplicate insert is a lookup plus a sift, never a
/// second entry.
pub struct PriorityWorkQueue<T> {
    heap: Vec<QueueEntry<T>>,
    positions: SmallKeyHashMap<T, usize>,
    next_sequence: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertOutcome {
    /// The item was not queued before.
    Inserted,
    /// The item was queued with a larger priority value, which has been lowered.
    Raised,
    /// The item was already queued at the same or a more urgent priority.
    Unchanged,
}

#[derive(Clone, Copy)]
struct QueueEntry<T> {
    item: T,
    priority: FloatOrd<f64>,
    sequence: u64,
}

impl<T> QueueEntry<T> {
    fn precedes(&self, other: &Self) -> bool {
        (self.priority, self.sequence) < (other.priority, other.sequence)
    }
}

impl<T> Default for PriorityWorkQueue<T> {
    fn default() -> Self {
        Self {
            heap: Vec::new(),
            positions: SmallKeyHashMap::default(),
            next_sequence: 0,
        }
    }
}

impl<T: Copy + Eq + Hash> PriorityWorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            positions: SmallKeyHashMap::with_capacity(capacity),
            next_sequence: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.positions.contains_key(item)
    }

    pub fn priority_of(&self, item: &T) -> Option<f64> {
        self.positions.get(item).map(|&i| self.heap[i].priority.0)
    }

    pub fn insert(&mut self, item: T, priority: f64) -> InsertOutcome {
        let priority = FloatOrd(priority);
        if let Some(&i) = self.positions.get(&item) {
            if priority < self.heap[i].priority {
                self.heap[i].priority = priority;
                self.sift_up(i);
                return InsertOutcome::Raised;
            }
            return InsertOutcome::Unchanged;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let i = self.heap.len();
        self.heap.push(QueueEntry {
            item,
            priority,
            sequence,
        });
        self.positions.insert(item, i);
        self.sift_up(i);
        InsertOutcome::Inserted
    }

    pub fn peek_min(&self) -> Option<(T, f64)> {
        self.heap.first().map(|e| (e.item, e.priority.0))
    }

    pub fn pop_min(&mut self) -> Option<(T, f64)> {
        if self.heap.is_empty() {
            return None;
        }
        let entry = self.swap_remove_slot(0);
        Some((entry.item, entry.priority.0))
    }

    /// Removes `item` if it is queued, returning its priority.
    pub fn remove(&mut self, item: &T) -> Option<f64> {
        let i = *self.positions.get(item)?;
        let entry = self.swap_remove_slot(i);
        Some(entry.priority.0)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.positions.clear();
    }

    /// Pops up to `max` entries in priority order.
    pub fn pop_batch(&mut self, max: usize) -> Vec<(T, f64)> {
        let mut batch = Vec::with_capacity(max.min(self.len()));
        while batch.len() < max {
            match self.pop_min() {
                Some(entry) => batch.push(entry),
                None => break,
            }
        }
        batch
    }

    /// Empties the queue into a flat sequence in priority order, for bulk transfer to another stage.
    pub fn drain_ordered(&mut self) -> Vec<(T, f64)> {
        self.pop_batch(self.len())
    }

    /// Visits the queued entries in heap order (not priority order).
    pub fn iter(&self) -> impl Iterator<Item = (T, f64)> + '_ {
        self.heap.iter().map(|e| (e.item, e.priority.0))
    }

    fn swap_remove_slot(&mut self, i: usize) -> QueueEntry<T> {
        let last = self.heap.len() - 1;
        self.swap_slots(i, last);
        let Some(entry) = self.heap.pop() else {
            unreachable!("slot {i} exists")
        };
        self.positions.remove(&entry.item);
        if i < self.heap.len() {
            // The moved entry can violate the heap property in either direction.
            self.sift_down(i);
            self.sift_up(i);
        }
        entry
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.heap[i].precedes(&self.heap[parent]) {
                break;
            }
            self.swap_slots(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut smallest = i;
            if left < self.heap.len() && self.heap[left].precedes(&self.heap[smallest]) {
                smallest = left;
            }
            if right < self.heap.len() && self.heap[right].precedes(&self.heap[smallest]) {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap_slots(i, smallest);
            i = smallest;
        }
    }

    fn swap_slots(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.positions.insert(self.heap[a].item, a);
        self.positions.insert(self.heap[b].item, b);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serves_lowest_priority_first() {
        let mut queue = PriorityWorkQueue::new();
        queue.insert('c', 3.0);
        queue.insert('a', 1.0);
        queue.insert('b', 2.0);

        assert_eq!(queue.pop_min(), Some(('a', 1.0)));
        assert_eq!(queue.pop_min(), Some(('b', 2.0)));
        assert_eq!(queue.pop_min(), Some(('c', 3.0)));
        assert_eq!(queue.pop_min(), None);
    }

    #[test]
    fn ties_preserve_insertion_order() {
        let mut queue = PriorityWorkQueue::new();
        for item in 0..20 {
            queue.insert(item, (item % 2) as f64);
        }

        let order: Vec<_> = queue.drain_ordered().into_iter().map(|(i, _)| i).collect();
        let expected: Vec<_> = (0..20).step_by(2).chain((1..20).step_by(2)).collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn duplicate_insert_keeps_minimum_priority() {
        let mut queue = PriorityWorkQueue::new();

        assert_eq!(queue.insert("x", 5.0), InsertOutcome::Inserted);
        assert_eq!(queue.insert("x", 7.0), InsertOutcome::Unchanged);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.priority_of(&"x"), Some(5.0));

        assert_eq!(queue.insert("x", 2.0), InsertOutcome::Raised);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.priority_of(&"x"), Some(2.0));
    }

    #[test]
    fn raised_item_overtakes_others() {
        let mut queue = PriorityWorkQueue::new();
        queue.insert(1, 1.0);
        queue.insert(2, 2.0);
        queue.insert(3, 3.0);
        queue.insert(3, 0.5);

        assert_eq!(queue.pop_min(), Some((3, 0.5)));
    }

    #[test]
    fn remove_keeps_heap_consistent() {
        let mut queue = PriorityWorkQueue::new();
        for (item, priority) in [(1, 4.0), (2, 1.0), (3, 3.0), (4, 2.0), (5, 0.0), (6, 5.0)] {
            queue.insert(item, priority);
        }

        assert_eq!(queue.remove(&4), Some(2.0));
        assert_eq!(queue.remove(&4), None);
        assert!(!queue.contains(&4));

        let order: Vec<_> = queue.drain_ordered().into_iter().map(|(i, _)| i).collect();
        assert_eq!(order, vec![5, 2, 3, 1, 6]);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_batch_is_bounded() {
        let mut queue = PriorityWorkQueue::new();
        for item in 0..10 {
            queue.insert(item, -(item as f64));
        }

        let batch = queue.pop_batch(3);
        assert_eq!(batch, vec![(9, -9.0), (8, -8.0), (7, -7.0)]);
        assert_eq!(queue.len(), 7);
    }
}
