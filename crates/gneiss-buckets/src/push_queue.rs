use gneiss_core::{BucketAddress, SmallKeyHashSet};

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub type SharedPushQueue = Rc<RefCell<PushQueue>>;

/// Addresses of dirty buckets waiting to be written back, in insertion order.
///
/// An address is queued at most once at any time. After it has been drained it can be queued again by the next edit.
#[derive(Debug, Default)]
pub struct PushQueue {
    order: VecDeque<BucketAddress>,
    queued: SmallKeyHashSet<BucketAddress>,
}

impl PushQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> SharedPushQueue {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Returns `false` if `address` was already queued.
    pub fn insert(&mut self, address: BucketAddress) -> bool {
        if !self.queued.insert(address) {
            return false;
        }
        log::debug!("Queued bucket {address} for push");
        self.order.push_back(address);
        true
    }

    pub fn contains(&self, address: &BucketAddress) -> bool {
        self.queued.contains(address)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Removes up to `max` of the oldest addresses.
    pub fn drain_batch(&mut self, max: usize) -> Vec<BucketAddress> {
        let n = max.min(self.order.len());
        let batch: Vec<_> = self.order.drain(..n).collect();
        for address in batch.iter() {
            self.queued.remove(address);
        }
        batch
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut queue = PushQueue::new();
        let a = BucketAddress::new(1, 2, 3, 0);

        assert!(queue.insert(a));
        assert!(!queue.insert(a));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drained_address_can_be_queued_again() {
        let mut queue = PushQueue::new();
        let a = BucketAddress::new(0, 0, 0, 0);
        let b = BucketAddress::new(1, 0, 0, 0);
        queue.insert(a);
        queue.insert(b);

        assert_eq!(queue.drain_batch(1), vec![a]);
        assert!(!queue.contains(&a));
        assert!(queue.insert(a));
        assert_eq!(queue.drain_batch(10), vec![b, a]);
        assert!(queue.is_empty());
    }
}
