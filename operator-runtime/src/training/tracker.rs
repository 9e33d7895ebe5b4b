use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::client::{ModelLoader, TrainerClient};
use super::model::ModelHandle;
use super::poller::ModelPoller;
use super::TrainingError;
use crate::join::JoinError;
use crate::metrics_consts::TRAINING_JOBS_STARTED;
use crate::persistence::{StateStore, TRAINING_JOB_ID};

const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const JOIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct TrainingSettings {
    pub train_interval: chrono::Duration,
    /// Keep training new models after the first one.
    pub retrain: bool,
    pub check_interval: Duration,
}

/// Decides when to train, submits jobs and hands them to the [`ModelPoller`].
///
/// The job id is persisted, so a job submitted before a restart is still
/// picked up by the poller afterwards.
pub struct TrainingTracker<M> {
    store: StateStore,
    trainer: Arc<dyn TrainerClient>,
    poller: ModelPoller<M>,
    job_id: Option<String>,
    last_training_time: DateTime<Utc>,
    settings: TrainingSettings,
}

impl<M: Send + Sync + 'static> TrainingTracker<M> {
    /// Starts the poller thread, pointing it at the persisted job if there is one.
    pub fn new(
        store: StateStore,
        trainer: Arc<dyn TrainerClient>,
        loader: Arc<dyn ModelLoader<M>>,
        model: ModelHandle<M>,
        last_training_time: DateTime<Utc>,
        settings: TrainingSettings,
    ) -> Result<Self, TrainingError> {
        let job_id = store.load(&TRAINING_JOB_ID)?;
        let poller = ModelPoller::new(trainer.clone(), loader, model, settings.check_interval);
        poller.start()?;
        if let Some(job_id) = &job_id {
            poller.enable_check(job_id);
        }
        Ok(Self {
            store,
            trainer,
            poller,
            job_id,
            last_training_time,
            settings,
        })
    }

    pub fn training_shall_start(&self, now: DateTime<Utc>) -> bool {
        if !self.settings.retrain && self.job_id.is_some() {
            debug!("retrain is disabled and a job exists already");
            return false;
        }
        if now - self.last_training_time < self.settings.train_interval {
            debug!(%now, last_training_time = %self.last_training_time, "waiting with training until enough data is collected");
            return false;
        }
        true
    }

    /// Submits a job and persists its id before the poller starts checking it.
    /// `started_at` becomes the new reference for the training interval.
    pub fn start_training(&mut self, request: &Value, started_at: DateTime<Utc>) -> Result<String, TrainingError> {
        let job_id = self.trainer.start_training(request)?;
        self.store.save(&TRAINING_JOB_ID, &job_id)?;
        debug!(%job_id, "created training job");
        metrics::counter!(TRAINING_JOBS_STARTED).increment(1);

        self.job_id = Some(job_id.clone());
        self.last_training_time = started_at;
        self.poller.enable_check(&job_id);
        Ok(job_id)
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn last_training_time(&self) -> DateTime<Utc> {
        self.last_training_time
    }

    pub fn model(&self) -> &ModelHandle<M> {
        self.poller.model()
    }

    pub fn poller(&self) -> &ModelPoller<M> {
        &self.poller
    }

    pub fn stop(&self) -> Result<(), JoinError> {
        self.poller.stop();
        self.poller.join(STOP_JOIN_TIMEOUT)
    }

    pub fn join(&self) -> Result<(), JoinError> {
        self.poller.join(JOIN_TIMEOUT)
    }
}
