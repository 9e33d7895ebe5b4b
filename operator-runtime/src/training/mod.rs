//! Remote model training: job bookkeeping, status polling and model installation.

mod client;
mod model;
mod poller;
mod tracker;

use thiserror::Error;

use crate::join::JoinError;
use crate::persistence::StoreError;

pub use client::{HttpModelDownloader, HttpTrainerClient, JobStatus, ModelLoader, TrainerClient};
pub use model::ModelHandle;
pub use poller::{CheckOutcome, ModelPoller};
pub use tracker::{TrainingSettings, TrainingTracker};

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },
    #[error("{url} responded with {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("model for job {job_id} could not be loaded: {reason}")]
    Model { job_id: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to start model poller: {0}")]
    Spawn(std::io::Error),
    #[error(transparent)]
    Join(#[from] JoinError),
}
