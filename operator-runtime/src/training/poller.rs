use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::client::{JobStatus, ModelLoader, TrainerClient};
use super::model::ModelHandle;
use super::TrainingError;
use crate::handler::BackgroundTask;
use crate::join::{join_slot, JoinError};
use crate::metrics_consts::{MODELS_INSTALLED, TRAINING_CHECK_FAILURES};

/// Result of one polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Disabled,
    NoJob,
    NotReady,
    Installed,
    JobFailed,
    Error,
}

#[derive(Default)]
struct PollerState {
    job_id: Option<String>,
    checking: bool,
    stopped: bool,
}

struct Shared<M> {
    state: Mutex<PollerState>,
    wake: Condvar,
    // Held for a whole check, so the job id cannot change while its model is installed.
    install: Mutex<()>,
    trainer: Arc<dyn TrainerClient>,
    loader: Arc<dyn ModelLoader<M>>,
    model: ModelHandle<M>,
    interval: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<M> Shared<M> {
    fn set_checking(&self, checking: bool) {
        lock(&self.state).checking = checking;
        self.wake.notify_all();
    }

    fn check(&self) -> CheckOutcome {
        let _install = lock(&self.install);
        let job_id = {
            let state = lock(&self.state);
            if !state.checking {
                return CheckOutcome::Disabled;
            }
            match &state.job_id {
                Some(job_id) => job_id.clone(),
                None => {
                    debug!("job id missing");
                    return CheckOutcome::NoJob;
                }
            }
        };

        match self.trainer.job_status(&job_id) {
            Ok(JobStatus::Done) => {}
            Ok(JobStatus::Failed) => {
                error!(%job_id, "training job failed, no model to install");
                self.set_checking(false);
                return CheckOutcome::JobFailed;
            }
            Ok(status) => {
                debug!(%job_id, ?status, "job not ready yet");
                return CheckOutcome::NotReady;
            }
            Err(e) => {
                warn!(%job_id, "failed to check training job: {e}");
                metrics::counter!(TRAINING_CHECK_FAILURES).increment(1);
                return CheckOutcome::Error;
            }
        }

        match self.loader.load(&job_id) {
            Ok(model) => {
                self.model.store(model);
                metrics::counter!(MODELS_INSTALLED).increment(1);
                info!(%job_id, "installed model");
                self.set_checking(false);
                CheckOutcome::Installed
            }
            Err(e) => {
                warn!(%job_id, "failed to download model: {e}");
                metrics::counter!(TRAINING_CHECK_FAILURES).increment(1);
                CheckOutcome::Error
            }
        }
    }

    fn run(&self) {
        info!("model poller started");
        loop {
            let state = lock(&self.state);
            let state = self
                .wake
                .wait_while(state, |s| !s.stopped && !s.checking)
                .unwrap_or_else(PoisonError::into_inner);
            if state.stopped {
                break;
            }
            let (state, _) = self
                .wake
                .wait_timeout_while(state, self.interval, |s| !s.stopped)
                .unwrap_or_else(PoisonError::into_inner);
            if state.stopped {
                break;
            }
            drop(state);
            self.check();
        }
        info!("model poller stopped");
    }
}

/// Background thread that waits for a training job and installs its model.
///
/// While checking is enabled the thread sleeps for the check interval, then
/// asks the trainer for the job status. A finished job's model is published
/// to the shared [`ModelHandle`] and checking turns itself off. Remote errors
/// are retried on the next cycle.
pub struct ModelPoller<M> {
    shared: Arc<Shared<M>>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<M> Clone for ModelPoller<M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            thread: self.thread.clone(),
        }
    }
}

impl<M: Send + Sync + 'static> ModelPoller<M> {
    pub fn new(
        trainer: Arc<dyn TrainerClient>,
        loader: Arc<dyn ModelLoader<M>>,
        model: ModelHandle<M>,
        interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PollerState::default()),
                wake: Condvar::new(),
                install: Mutex::new(()),
                trainer,
                loader,
                model,
                interval,
            }),
            thread: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts the thread once; later calls do nothing.
    pub fn start(&self) -> Result<(), TrainingError> {
        let mut thread = lock(&self.thread);
        if thread.is_some() || lock(&self.shared.state).stopped {
            return Ok(());
        }
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("model-poller".into())
            .spawn(move || shared.run())
            .map_err(TrainingError::Spawn)?;
        *thread = Some(handle);
        Ok(())
    }

    /// Points the poller at `job_id`. Waits for a running check to finish first.
    pub fn enable_check(&self, job_id: &str) {
        info!(%job_id, "checking training job");
        let _install = lock(&self.shared.install);
        {
            let mut state = lock(&self.shared.state);
            state.job_id = Some(job_id.to_string());
            state.checking = true;
        }
        self.shared.wake.notify_all();
    }

    pub fn disable_check(&self) {
        self.shared.set_checking(false);
    }

    pub fn is_checking(&self) -> bool {
        lock(&self.shared.state).checking
    }

    pub fn job_id(&self) -> Option<String> {
        lock(&self.shared.state).job_id.clone()
    }

    pub fn model(&self) -> &ModelHandle<M> {
        &self.shared.model
    }

    /// Runs one cycle on the calling thread, skipping the sleep.
    pub fn check_now(&self) -> CheckOutcome {
        self.shared.check()
    }

    /// Idempotent; the thread exits at its next wake up.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.shared.state);
            if state.stopped {
                return;
            }
            info!("stopping model poller");
            state.checking = false;
            state.stopped = true;
        }
        self.shared.wake.notify_all();
    }

    /// On timeout the thread stays registered, so `is_alive` keeps reporting it and the join
    /// can be retried.
    pub fn join(&self, timeout: Duration) -> Result<(), JoinError> {
        join_slot("model poller", &self.thread, timeout).map(|_| ())
    }

    pub fn is_alive(&self) -> bool {
        lock(&self.thread)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl<M: Send + Sync + 'static> BackgroundTask for ModelPoller<M> {
    fn name(&self) -> &str {
        "model-poller"
    }

    fn stop(&self) {
        ModelPoller::stop(self);
    }

    fn join(&self, timeout: Duration) -> Result<(), JoinError> {
        ModelPoller::join(self, timeout)
    }
}
