use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JoinError {
    #[error("{name} did not finish within {timeout:?}")]
    Timeout { name: String, timeout: Duration },
    #[error("{0} panicked")]
    Panicked(String),
}

/// `JoinHandle::join` without a deadline can hang shutdown forever. On timeout the thread is
/// left running detached.
pub fn join_bounded<T>(name: &str, handle: JoinHandle<T>, timeout: Duration) -> Result<T, JoinError> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(JoinError::Timeout {
                name: name.to_string(),
                timeout,
            });
        }
        thread::sleep(Duration::from_millis(10));
    }
    handle
        .join()
        .map_err(|_| JoinError::Panicked(name.to_string()))
}

/// Joins the thread held in `slot`, which stays in place if the deadline passes so a later call
/// can wait again. An empty slot means the thread was already joined.
pub fn join_slot<T>(
    name: &str,
    slot: &Mutex<Option<JoinHandle<T>>>,
    timeout: Duration,
) -> Result<Option<T>, JoinError> {
    let deadline = Instant::now() + timeout;
    loop {
        {
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                None => return Ok(None),
                Some(handle) if handle.is_finished() => {
                    if let Some(handle) = slot.take() {
                        return handle
                            .join()
                            .map(Some)
                            .map_err(|_| JoinError::Panicked(name.to_string()));
                    }
                }
                Some(_) => {}
            }
        }
        if Instant::now() >= deadline {
            return Err(JoinError::Timeout {
                name: name.to_string(),
                timeout,
            });
        }
        thread::sleep(Duration::from_millis(10));
    }
}
