use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use operator_runtime::join::JoinError;
use operator_runtime::persistence::{StateStore, TRAINING_JOB_ID};
use operator_runtime::training::{
    CheckOutcome, HttpModelDownloader, HttpTrainerClient, JobStatus, ModelHandle, ModelLoader,
    ModelPoller, TrainerClient, TrainingError, TrainingSettings, TrainingTracker,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize, Debug, PartialEq)]
struct Thresholds {
    upper: f64,
}

/// Answers status requests from a script, repeating the last answer.
#[derive(Default)]
struct ScriptedTrainer {
    statuses: Mutex<VecDeque<JobStatus>>,
    requests: Mutex<Vec<Value>>,
    /// Status requests answered with a 503 before the script is consulted.
    unavailable: Mutex<u32>,
    reject_jobs: bool,
    status_delay: Duration,
    status_calls: AtomicUsize,
}

impl ScriptedTrainer {
    fn with_statuses(statuses: &[JobStatus]) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            ..Default::default()
        })
    }
}

fn unavailable(url: &str) -> TrainingError {
    TrainingError::Status {
        url: url.to_string(),
        status: 503,
        body: "trainer busy".to_string(),
    }
}

impl TrainerClient for ScriptedTrainer {
    fn start_training(&self, request: &Value) -> Result<String, TrainingError> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        if self.reject_jobs {
            return Err(unavailable("http://trainer/job"));
        }
        Ok(format!("job-{}", requests.len()))
    }

    fn job_status(&self, job_id: &str) -> Result<JobStatus, TrainingError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.status_delay);
        {
            let mut unavailable_left = self.unavailable.lock().unwrap();
            if *unavailable_left > 0 {
                *unavailable_left -= 1;
                return Err(unavailable(&format!("http://trainer/job/{job_id}")));
            }
        }
        let mut statuses = self.statuses.lock().unwrap();
        let status = match statuses.len() {
            0 => JobStatus::Unknown,
            1 => statuses[0],
            _ => statuses.pop_front().unwrap(),
        };
        Ok(status)
    }
}

struct FixedLoader;

impl ModelLoader<Thresholds> for FixedLoader {
    fn load(&self, job_id: &str) -> Result<Thresholds, TrainingError> {
        Ok(Thresholds {
            upper: job_id.len() as f64,
        })
    }
}

/// Fails the first download, then behaves like [`FixedLoader`].
#[derive(Default)]
struct FlakyLoader {
    attempts: AtomicUsize,
}

impl ModelLoader<Thresholds> for FlakyLoader {
    fn load(&self, job_id: &str) -> Result<Thresholds, TrainingError> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(TrainingError::Model {
                job_id: job_id.to_string(),
                reason: "connection reset".to_string(),
            });
        }
        FixedLoader.load(job_id)
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 2, 10, 30, 0).unwrap()
}

fn settings(retrain: bool) -> TrainingSettings {
    TrainingSettings {
        train_interval: chrono::Duration::hours(1),
        retrain,
        check_interval: Duration::from_secs(3600),
    }
}

fn tracker(store: &StateStore, trainer: Arc<ScriptedTrainer>, retrain: bool) -> TrainingTracker<Thresholds> {
    TrainingTracker::new(
        store.clone(),
        trainer,
        Arc::new(FixedLoader),
        ModelHandle::new(),
        t0(),
        settings(retrain),
    )
    .unwrap()
}

#[test]
fn training_waits_for_interval_and_respects_retrain() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let mut tracker = tracker(&store, ScriptedTrainer::with_statuses(&[]), false);

    assert!(!tracker.training_shall_start(t0() + chrono::Duration::minutes(59)));
    assert!(tracker.training_shall_start(t0() + chrono::Duration::hours(1)));

    let started = t0() + chrono::Duration::hours(2);
    let job_id = tracker.start_training(&json!({"data": [1, 2]}), started).unwrap();
    assert_eq!(job_id, "job-1");
    assert_eq!(tracker.job_id(), Some("job-1"));
    assert_eq!(tracker.last_training_time(), started);
    assert!(tracker.poller().is_checking());

    // a model exists already and retraining is off
    assert!(!tracker.training_shall_start(started + chrono::Duration::days(1)));
    tracker.stop().unwrap();
}

#[test]
fn retrain_restarts_interval_from_last_job() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let mut tracker = tracker(&store, ScriptedTrainer::with_statuses(&[]), true);

    let started = t0() + chrono::Duration::hours(1);
    tracker.start_training(&json!({}), started).unwrap();
    assert!(!tracker.training_shall_start(started + chrono::Duration::minutes(30)));
    assert!(tracker.training_shall_start(started + chrono::Duration::hours(1)));
    tracker.stop().unwrap();
}

#[test]
fn rejected_job_leaves_tracker_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());
    let trainer = Arc::new(ScriptedTrainer {
        reject_jobs: true,
        ..Default::default()
    });
    let mut tracker = tracker(&store, trainer.clone(), false);

    let now = t0() + chrono::Duration::hours(2);
    match tracker.start_training(&json!({"data": [1]}), now) {
        Err(TrainingError::Status { status, .. }) => assert_eq!(status, 503),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(trainer.requests.lock().unwrap().len(), 1);
    assert_eq!(store.load(&TRAINING_JOB_ID).unwrap(), None);
    assert_eq!(tracker.job_id(), None);
    assert_eq!(tracker.last_training_time(), t0());
    assert!(!tracker.poller().is_checking());
    assert!(tracker.training_shall_start(now));
    tracker.stop().unwrap();
}

#[test]
fn persisted_job_is_resumed_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path());

    let mut first = tracker(&store, ScriptedTrainer::with_statuses(&[]), false);
    first.start_training(&json!({}), t0()).unwrap();
    first.stop().unwrap();
    assert_eq!(store.load(&TRAINING_JOB_ID).unwrap(), Some("job-1".to_string()));

    let trainer = ScriptedTrainer::with_statuses(&[JobStatus::Done]);
    let second = tracker(&store, trainer, false);
    assert_eq!(second.job_id(), Some("job-1"));
    assert!(second.poller().is_checking());
    assert!(!second.training_shall_start(t0() + chrono::Duration::days(1)));

    assert_eq!(second.poller().check_now(), CheckOutcome::Installed);
    assert_eq!(*second.model().load().unwrap(), Thresholds { upper: 5.0 });
    assert!(!second.poller().is_checking());

    second.stop().unwrap();
    // stopping twice is harmless
    second.stop().unwrap();
    second.join().unwrap();
}

#[test]
fn poller_installs_model_once_job_is_done() {
    let trainer = ScriptedTrainer::with_statuses(&[JobStatus::Queued, JobStatus::Running, JobStatus::Done]);
    let model = ModelHandle::<Thresholds>::new();
    let poller = ModelPoller::new(trainer, Arc::new(FixedLoader), model.clone(), Duration::from_secs(3600));

    assert_eq!(poller.check_now(), CheckOutcome::Disabled);
    poller.enable_check("job-42");
    assert_eq!(poller.job_id(), Some("job-42".to_string()));
    assert_eq!(poller.check_now(), CheckOutcome::NotReady);
    assert_eq!(poller.check_now(), CheckOutcome::NotReady);
    assert!(!model.is_loaded());
    assert_eq!(poller.check_now(), CheckOutcome::Installed);
    assert_eq!(model.load().unwrap().upper, 6.0);
    assert_eq!(poller.check_now(), CheckOutcome::Disabled);
}

#[test]
fn failed_job_disables_checking() {
    let trainer = ScriptedTrainer::with_statuses(&[JobStatus::Failed]);
    let model = ModelHandle::<Thresholds>::new();
    let poller = ModelPoller::new(trainer, Arc::new(FixedLoader), model.clone(), Duration::from_secs(3600));

    poller.enable_check("job-1");
    assert_eq!(poller.check_now(), CheckOutcome::JobFailed);
    assert!(!poller.is_checking());
    assert!(!model.is_loaded());
}

#[test]
fn remote_failures_are_retried_next_cycle() {
    let trainer = Arc::new(ScriptedTrainer {
        statuses: Mutex::new(VecDeque::from([JobStatus::Done])),
        unavailable: Mutex::new(1),
        ..Default::default()
    });
    let model = ModelHandle::<Thresholds>::new();
    let poller = ModelPoller::new(
        trainer,
        Arc::new(FlakyLoader::default()),
        model.clone(),
        Duration::from_secs(3600),
    );
    poller.enable_check("job-9");

    // trainer unavailable
    assert_eq!(poller.check_now(), CheckOutcome::Error);
    assert!(poller.is_checking());
    // job done, download fails
    assert_eq!(poller.check_now(), CheckOutcome::Error);
    assert!(poller.is_checking());
    assert!(!model.is_loaded());

    assert_eq!(poller.check_now(), CheckOutcome::Installed);
    assert_eq!(model.load().unwrap().upper, 5.0);
    assert!(!poller.is_checking());
}

#[test]
fn poller_join_can_be_retried_after_timeout() {
    let trainer = Arc::new(ScriptedTrainer {
        status_delay: Duration::from_secs(1),
        ..Default::default()
    });
    let poller = ModelPoller::new(
        trainer.clone(),
        Arc::new(FixedLoader),
        ModelHandle::<Thresholds>::new(),
        Duration::from_millis(10),
    );
    poller.start().unwrap();
    poller.enable_check("job-3");
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while trainer.status_calls.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    poller.stop();
    for _ in 0..2 {
        assert!(matches!(poller.join(Duration::from_millis(50)), Err(JoinError::Timeout { .. })));
        assert!(poller.is_alive());
    }

    poller.join(Duration::from_secs(5)).unwrap();
    assert!(!poller.is_alive());
    poller.join(Duration::from_millis(50)).unwrap();
}

#[test]
fn poller_thread_checks_on_its_interval() {
    let trainer = ScriptedTrainer::with_statuses(&[JobStatus::Done]);
    let model = ModelHandle::<Thresholds>::new();
    let poller = ModelPoller::new(trainer, Arc::new(FixedLoader), model.clone(), Duration::from_millis(10));
    poller.start().unwrap();
    poller.start().unwrap();
    assert!(poller.is_alive());

    poller.enable_check("job-7");
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !model.is_loaded() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(model.load().unwrap().upper, 5.0);

    poller.stop();
    poller.join(Duration::from_secs(5)).unwrap();
    assert!(!poller.is_alive());
}

#[test]
fn http_trainer_creates_and_checks_jobs() {
    let server = MockServer::start();
    let create = server.mock(|when, then| {
        when.method(POST)
            .path("/job")
            .json_body(json!({"data": [1, 2, 3]}));
        then.status(200).json_body(json!({"task_id": "abc"}));
    });
    let status = server.mock(|when, then| {
        when.method(GET).path("/job/abc");
        then.status(200).json_body(json!({"status": "done"}));
    });

    let client = HttpTrainerClient::new(&server.base_url(), Duration::from_secs(5)).unwrap();
    assert_eq!(client.start_training(&json!({"data": [1, 2, 3]})).unwrap(), "abc");
    assert_eq!(client.job_status("abc").unwrap(), JobStatus::Done);
    create.assert();
    status.assert();
}

#[test]
fn http_trainer_reports_unexpected_status() {
    let server = MockServer::start();
    let status = server.mock(|when, then| {
        when.method(GET).path("/job/abc");
        then.status(200).json_body(json!({"status": "paused"}));
    });
    let missing = server.mock(|when, then| {
        when.method(GET).path("/job/gone");
        then.status(404).body("no such job");
    });

    let client = HttpTrainerClient::new(&server.base_url(), Duration::from_secs(5)).unwrap();
    assert_eq!(client.job_status("abc").unwrap(), JobStatus::Unknown);
    match client.job_status("gone") {
        Err(TrainingError::Status { status, body, .. }) => {
            assert_eq!(status, 404);
            assert_eq!(body, "no such job");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    status.assert();
    missing.assert();
}

#[test]
fn http_downloader_fetches_production_model() {
    let server = MockServer::start();
    let model = server.mock(|when, then| {
        when.method(GET).path("/models/abc@production");
        then.status(200).json_body(json!({"upper": 12.5}));
    });
    let broken = server.mock(|when, then| {
        when.method(GET).path("/models/bad@production");
        then.status(200).body("not a model");
    });

    let downloader = HttpModelDownloader::<Thresholds>::new(&server.base_url(), Duration::from_secs(5)).unwrap();
    assert_eq!(downloader.load("abc").unwrap(), Thresholds { upper: 12.5 });
    assert!(matches!(downloader.load("bad"), Err(TrainingError::Model { .. })));
    model.assert();
    broken.assert();
}
