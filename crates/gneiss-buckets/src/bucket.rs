use gneiss_core::smallvec::SmallVec;
use gneiss_core::{BucketAddress, BUCKET_SIZE};

pub type Voxel = u32;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BucketState {
    Unrequested,
    Requested,
    Loaded,
    /// The store reported that this bucket does not exist. Terminal, like `Loaded`.
    Missing,
}

/// Sent to the listeners of a bucket when its authoritative payload (or "missing" marker) has been merged.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BucketLoaded {
    pub address: BucketAddress,
    pub dirty: bool,
    pub missing: bool,
}

pub type ListenerId = u64;

struct Listener {
    id: ListenerId,
    once: bool,
    callback: Box<dyn FnMut(&BucketLoaded)>,
}

/// One `32³` sub-cube of a dataset.
///
/// Voxels written before the payload arrives are remembered in a touched mask. When the payload is merged, touched voxels keep
/// their local values and every other voxel takes the payload's value.
///
/// Dirtiness is tracked as a generation counter, so a writer can mark the bucket clean "as of" a snapshot without losing
/// edits that happened after the snapshot was taken.
pub struct Bucket {
    address: BucketAddress,
    state: BucketState,
    voxels: Option<Box<[Voxel]>>,
    touched: Option<TouchedMask>,
    edit_generation: u64,
    clean_generation: u64,
    listeners: SmallVec<[Listener; 1]>,
    next_listener_id: ListenerId,
}

impl Bucket {
    pub fn new(address: BucketAddress) -> Self {
        Self {
            address,
            state: BucketState::Unrequested,
            voxels: None,
            touched: None,
            edit_generation: 0,
            clean_generation: 0,
            listeners: SmallVec::new(),
            next_listener_id: 0,
        }
    }

    pub fn address(&self) -> BucketAddress {
        self.address
    }

    pub fn state(&self) -> BucketState {
        self.state
    }

    /// `true` once the payload or "missing" marker has arrived.
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, BucketState::Loaded | BucketState::Missing)
    }

    pub fn is_requested(&self) -> bool {
        self.state == BucketState::Requested
    }

    pub fn is_dirty(&self) -> bool {
        self.edit_generation != self.clean_generation
    }

    /// Increases with every local edit.
    pub fn edit_generation(&self) -> u64 {
        self.edit_generation
    }

    /// `None` until the bucket is loaded or written.
    pub fn voxels(&self) -> Option<&[Voxel]> {
        self.voxels.as_deref()
    }

    pub fn voxel(&self, index: usize) -> Option<Voxel> {
        self.voxels.as_ref().map(|v| v[index])
    }

    pub fn has_listeners(&self) -> bool {
        !self.listeners.is_empty()
    }

    /// Only an `Unrequested` bucket becomes `Requested`. Returns `true` if the state changed.
    pub fn mark_requested(&mut self) -> bool {
        if self.state != BucketState::Unrequested {
            return false;
        }
        self.state = BucketState::Requested;
        true
    }

    /// Puts a `Requested` bucket back, so it can be pulled again.
    pub fn mark_unrequested(&mut self) {
        if self.state == BucketState::Requested {
            self.state = BucketState::Unrequested;
        }
    }

    /// Writes one voxel, materializing an all-zero payload if there is none yet.
    pub fn label_voxel(&mut self, index: usize, value: Voxel) {
        let voxels = self
            .voxels
            .get_or_insert_with(|| vec![0; BUCKET_SIZE].into_boxed_slice());
        voxels[index] = value;
        if !self.is_loaded() {
            self.touched.get_or_insert_with(TouchedMask::new).set(index);
        }
        self.edit_generation += 1;
    }

    /// Clears the dirty flag if no edit happened after `generation`. Returns `true` if the bucket is now clean.
    pub fn mark_clean(&mut self, generation: u64) -> bool {
        if generation == self.edit_generation {
            self.clean_generation = generation;
        }
        !self.is_dirty()
    }

    /// Merges the authoritative payload, or materializes an all-zero bucket if `payload` is `None`, then notifies listeners.
    ///
    /// Ignored if the bucket is already loaded.
    pub fn receive_data(&mut self, payload: Option<Box<[Voxel]>>) {
        if let Some(notification) = self.merge_payload(payload) {
            let kept = notification.notify();
            self.restore_listeners(kept);
        }
    }

    /// Merges like [`Bucket::receive_data`], but returns the listeners instead of calling them. The caller releases its borrow
    /// of the bucket's store, calls [`LoadNotification::notify`], and hands the result to [`Bucket::restore_listeners`].
    ///
    /// `None` if the bucket is already loaded.
    pub fn merge_payload(&mut self, payload: Option<Box<[Voxel]>>) -> Option<LoadNotification> {
        if self.is_loaded() {
            log::debug!("Ignoring duplicate payload for bucket {}", self.address);
            return None;
        }

        let missing = payload.is_none();
        self.voxels = match (self.voxels.take(), self.touched.take(), payload) {
            (Some(mut local), Some(touched), Some(remote)) => {
                for (i, (voxel, remote_voxel)) in local.iter_mut().zip(remote.iter()).enumerate() {
                    if !touched.get(i) {
                        *voxel = *remote_voxel;
                    }
                }
                Some(local)
            }
            (Some(local), _, None) => Some(local),
            (_, _, Some(remote)) => Some(remote),
            (None, _, None) => Some(vec![0; BUCKET_SIZE].into_boxed_slice()),
        };
        self.state = if missing {
            BucketState::Missing
        } else {
            BucketState::Loaded
        };

        Some(LoadNotification {
            event: BucketLoaded {
                address: self.address,
                dirty: self.is_dirty(),
                missing,
            },
            listeners: std::mem::take(&mut self.listeners),
        })
    }

    /// Puts back the listeners that outlived a notification, ahead of any that subscribed while it ran.
    pub fn restore_listeners(&mut self, kept: KeptListeners) {
        let added = std::mem::replace(&mut self.listeners, kept.0);
        self.listeners.extend(added);
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&BucketLoaded) + 'static) -> ListenerId {
        self.add_listener(false, Box::new(callback))
    }

    /// Like [`Bucket::subscribe`], but the listener is dropped after its first notification.
    pub fn subscribe_once(&mut self, callback: impl FnMut(&BucketLoaded) + 'static) -> ListenerId {
        self.add_listener(true, Box::new(callback))
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let len_before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        self.listeners.len() != len_before
    }

    fn add_listener(&mut self, once: bool, callback: Box<dyn FnMut(&BucketLoaded)>) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push(Listener { id, once, callback });
        id
    }
}

/// The listeners of a bucket that just loaded, detached from the bucket.
#[must_use = "listeners only run when notified"]
pub struct LoadNotification {
    event: BucketLoaded,
    listeners: SmallVec<[Listener; 1]>,
}

impl LoadNotification {
    /// Calls every listener and drops the once-listeners.
    pub fn notify(mut self) -> KeptListeners {
        for listener in self.listeners.iter_mut() {
            (listener.callback)(&self.event);
        }
        self.listeners.retain(|l| !l.once);
        KeptListeners(self.listeners)
    }
}

/// Listeners that stay subscribed after a [`LoadNotification`].
pub struct KeptListeners(SmallVec<[Listener; 1]>);

impl KeptListeners {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

struct TouchedMask {
    words: Box<[u64]>,
}

impl TouchedMask {
    fn new() -> Self {
        Self {
            words: vec![0; BUCKET_SIZE / 64].into_boxed_slice(),
        }
    }

    fn set(&mut self, index: usize) {
        self.words[index / 64] |= 1 << (index % 64);
    }

    fn get(&self, index: usize) -> bool {
        self.words[index / 64] & (1 << (index % 64)) != 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    fn payload(value: Voxel) -> Box<[Voxel]> {
        vec![value; BUCKET_SIZE].into_boxed_slice()
    }

    #[test]
    fn local_writes_win_over_payload() {
        let mut bucket = Bucket::new(BucketAddress::new(0, 0, 0, 0));
        bucket.label_voxel(3, 42);
        assert!(bucket.is_dirty());

        bucket.receive_data(Some(payload(7)));

        assert_eq!(bucket.state(), BucketState::Loaded);
        assert_eq!(bucket.voxel(3), Some(42));
        assert_eq!(bucket.voxel(4), Some(7));
        assert!(bucket.is_dirty());
    }

    #[test]
    fn missing_payload_materializes_zeros() {
        let mut bucket = Bucket::new(BucketAddress::new(1, 0, 0, 0));
        bucket.receive_data(None);

        assert_eq!(bucket.state(), BucketState::Missing);
        assert!(bucket.is_loaded());
        assert!(bucket.voxels().unwrap().iter().all(|&v| v == 0));
    }

    #[test]
    fn mark_clean_respects_newer_edits() {
        let mut bucket = Bucket::new(BucketAddress::new(0, 0, 0, 0));
        bucket.receive_data(Some(payload(0)));
        bucket.label_voxel(0, 1);
        let snapshot = bucket.edit_generation();
        bucket.label_voxel(1, 1);

        assert!(!bucket.mark_clean(snapshot));
        assert!(bucket.mark_clean(bucket.edit_generation()));
    }

    #[test]
    fn listeners_are_notified() {
        let mut bucket = Bucket::new(BucketAddress::new(0, 0, 0, 0));
        let events = Rc::new(RefCell::new(Vec::new()));

        let e = events.clone();
        bucket.subscribe_once(move |event| e.borrow_mut().push(*event));
        let e = events.clone();
        let id = bucket.subscribe(move |event| e.borrow_mut().push(*event));
        assert!(bucket.unsubscribe(id));
        assert!(!bucket.unsubscribe(id));

        bucket.label_voxel(0, 5);
        bucket.receive_data(Some(payload(1)));
        bucket.receive_data(Some(payload(2)));

        assert_eq!(
            *events.borrow(),
            vec![BucketLoaded {
                address: BucketAddress::new(0, 0, 0, 0),
                dirty: true,
                missing: false,
            }]
        );
        assert!(!bucket.has_listeners());
    }

    #[test]
    fn listeners_added_during_notification_are_kept() {
        let mut bucket = Bucket::new(BucketAddress::new(0, 0, 0, 0));
        let calls = Rc::new(RefCell::new(0));
        let c = calls.clone();
        bucket.subscribe(move |_| *c.borrow_mut() += 1);
        bucket.subscribe_once(|_| {});

        let notification = bucket.merge_payload(Some(payload(1))).unwrap();
        bucket.subscribe(|_| {});
        let kept = notification.notify();
        assert!(!kept.is_empty());
        bucket.restore_listeners(kept);

        assert_eq!(*calls.borrow(), 1);
        assert_eq!(bucket.listeners.len(), 2);
        assert!(bucket.merge_payload(Some(payload(2))).is_none());
    }
}
