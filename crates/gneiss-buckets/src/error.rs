use gneiss_core::BucketAddress;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("store rejected the batch: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum PullError {
    #[error("gave up on {} bucket(s) after {attempts} attempts", addresses.len())]
    RetriesExhausted {
        addresses: Vec<BucketAddress>,
        attempts: u32,
    },
}
