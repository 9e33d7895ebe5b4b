//! Typed key/value state that survives restarts, one JSON file per key.

use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid state in {path}: {source}")]
    Serde {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Logical name of a persisted value, typed by what is stored under it.
pub struct StateKey<T> {
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> StateKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _value: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub const OPERATOR_START_TIME: StateKey<DateTime<Utc>> = StateKey::new("operator_start_time");
pub const INIT_PHASE_RESET: StateKey<bool> = StateKey::new("init_phase_was_reset");
pub const INIT_PHASE_SENT: StateKey<bool> = StateKey::new("init_phase_was_sent");
pub const TRAINING_JOB_ID: StateKey<String> = StateKey::new("training_job_id");

/// Single writer per key: every tracker owns the keys it writes.
#[derive(Clone, Debug)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path<T>(&self, key: &StateKey<T>) -> PathBuf {
        self.root.join(format!("{}.json", key.name))
    }

    pub fn load<T: DeserializeOwned>(&self, key: &StateKey<T>) -> Result<Option<T>, StoreError> {
        let path = self.path(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| StoreError::Serde { path, source })
    }

    pub fn load_or<T: DeserializeOwned>(&self, key: &StateKey<T>, default: T) -> Result<T, StoreError> {
        Ok(self.load(key)?.unwrap_or(default))
    }

    /// Replaces the stored value atomically, creating the directory on first use.
    pub fn save<T: Serialize>(&self, key: &StateKey<T>, value: &T) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|source| StoreError::Io {
            path: self.root.clone(),
            source,
        })?;

        let path = self.path(key);
        let payload = serde_json::to_vec(value).map_err(|source| StoreError::Serde {
            path: path.clone(),
            source,
        })?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, payload).map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| StoreError::Io { path, source })
    }
}
