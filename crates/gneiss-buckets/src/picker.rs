use crate::{PrefetchConfig, PrefetchStrategy, ViewState};

use gneiss_core::{BucketAddress, ResolutionInfo};

use crossbeam_channel::{self as channel, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;

/// Everything the picker needs, owned. The worker never sees a bucket or a queue.
#[derive(Clone, Debug)]
pub struct PickRequest {
    pub view: ViewState,
    pub resolutions: ResolutionInfo,
    pub config: PrefetchConfig,
}

#[derive(Clone, Debug)]
pub struct PickResult {
    /// The sequence number returned by [`PickerWorker::request`] for the request this answers.
    pub sequence: u64,
    pub buckets: Vec<(BucketAddress, f64)>,
}

/// Runs prefetch picks on a background thread.
///
/// Only the latest pending request is served. Requests that were superseded before the worker got to them are skipped
/// without a result.
pub struct PickerWorker {
    requests: Option<Sender<(u64, PickRequest)>>,
    results: Receiver<PickResult>,
    next_sequence: u64,
    thread: Option<JoinHandle<()>>,
}

impl PickerWorker {
    pub fn spawn() -> Self {
        let (request_tx, request_rx) = channel::unbounded();
        let (result_tx, result_rx) = channel::unbounded();
        let thread = std::thread::Builder::new()
            .name("bucket-picker".into())
            .spawn(move || run_worker(request_rx, result_tx))
            .ok();
        if thread.is_none() {
            log::error!("Failed to spawn the bucket picker thread; picks will not be served");
        }
        Self {
            requests: Some(request_tx),
            results: result_rx,
            next_sequence: 0,
            thread,
        }
    }

    /// Returns the sequence number of the request.
    pub fn request(&mut self, request: PickRequest) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        if let Some(requests) = self.requests.as_ref() {
            if requests.send((sequence, request)).is_err() {
                log::error!("Bucket picker thread is gone");
            }
        }
        sequence
    }

    /// The newest result that has arrived, if any. Older results are discarded.
    pub fn try_latest(&self) -> Option<PickResult> {
        let mut latest = None;
        loop {
            match self.results.try_recv() {
                Ok(result) => latest = Some(result),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return latest,
            }
        }
    }

    /// Blocks until the result for `sequence` (or a newer one) arrives. `None` if the worker has stopped.
    pub fn wait_for(&self, sequence: u64) -> Option<PickResult> {
        loop {
            let result = self.results.recv().ok()?;
            if result.sequence >= sequence {
                return Some(result);
            }
        }
    }
}

impl Drop for PickerWorker {
    fn drop(&mut self) {
        // Disconnecting the request channel stops the worker loop.
        self.requests = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Bucket picker thread panicked");
            }
        }
    }
}

fn run_worker(requests: Receiver<(u64, PickRequest)>, results: Sender<PickResult>) {
    while let Ok(mut next) = requests.recv() {
        let mut skipped = 0;
        while let Ok(newer) = requests.try_recv() {
            next = newer;
            skipped += 1;
        }
        if skipped > 0 {
            log::debug!("Skipped {skipped} superseded pick request(s)");
        }

        let (sequence, PickRequest { view, resolutions, config }) = next;
        let strategy = PrefetchStrategy::for_mode(view.mode, &config);
        let buckets = strategy.pick(&view, &resolutions);
        if results.send(PickResult { sequence, buckets }).is_err() {
            break;
        }
    }
}
