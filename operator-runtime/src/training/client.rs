use std::marker::PhantomData;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::TrainingError;

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
    #[serde(other)]
    Unknown,
}

pub trait TrainerClient: Send + Sync {
    /// Submits a training job, returning its id.
    fn start_training(&self, request: &Value) -> Result<String, TrainingError>;

    fn job_status(&self, job_id: &str) -> Result<JobStatus, TrainingError>;
}

pub trait ModelLoader<M>: Send + Sync {
    /// Fetches the production model produced by the job.
    fn load(&self, job_id: &str) -> Result<M, TrainingError>;
}

#[derive(Deserialize)]
struct CreatedJob {
    task_id: String,
}

#[derive(Deserialize)]
struct JobState {
    status: JobStatus,
}

fn build_client(timeout: Duration) -> Result<Client, TrainingError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|source| TrainingError::Http {
            url: String::new(),
            source,
        })
}

fn check_status(url: &str, response: Response) -> Result<Response, TrainingError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(TrainingError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body: response.text().unwrap_or_default(),
    })
}

/// Client of the model trainer service: `POST /job`, `GET /job/{id}`.
pub struct HttpTrainerClient {
    base_url: String,
    client: Client,
}

impl HttpTrainerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TrainingError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
        })
    }
}

impl TrainerClient for HttpTrainerClient {
    fn start_training(&self, request: &Value) -> Result<String, TrainingError> {
        let url = format!("{}/job", self.base_url);
        let http_error = |source| TrainingError::Http {
            url: url.clone(),
            source,
        };

        let response = self.client.post(&url).json(request).send().map_err(http_error)?;
        let created: CreatedJob = check_status(&url, response)?.json().map_err(http_error)?;
        debug!(job_id = %created.task_id, "created training job");
        Ok(created.task_id)
    }

    fn job_status(&self, job_id: &str) -> Result<JobStatus, TrainingError> {
        let url = format!("{}/job/{job_id}", self.base_url);
        let http_error = |source| TrainingError::Http {
            url: url.clone(),
            source,
        };

        let response = self.client.get(&url).send().map_err(http_error)?;
        let state: JobState = check_status(&url, response)?.json().map_err(http_error)?;
        Ok(state.status)
    }
}

/// Downloads the JSON encoded `{job_id}@production` model from the model registry.
pub struct HttpModelDownloader<M> {
    base_url: String,
    client: Client,
    _model: PhantomData<fn() -> M>,
}

impl<M> HttpModelDownloader<M> {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TrainingError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: build_client(timeout)?,
            _model: PhantomData,
        })
    }

    pub fn model_url(&self, job_id: &str) -> String {
        format!("{}/models/{job_id}@production", self.base_url)
    }
}

impl<M: DeserializeOwned> ModelLoader<M> for HttpModelDownloader<M> {
    fn load(&self, job_id: &str) -> Result<M, TrainingError> {
        let url = self.model_url(job_id);
        debug!(%url, "downloading model");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|source| TrainingError::Http {
                url: url.clone(),
                source,
            })?;
        check_status(&url, response)?
            .json()
            .map_err(|e| TrainingError::Model {
                job_id: job_id.to_string(),
                reason: e.to_string(),
            })
    }
}
