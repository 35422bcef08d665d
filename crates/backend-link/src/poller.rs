use std::{
    fmt,
    sync::{Arc, Mutex},
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use tracing::{debug, trace, warn};

use crate::{error::ApiError, thread::spawn_named};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Most recent successfully fetched value, shared with the polling thread.
pub type SharedSnapshot<T> = Arc<Mutex<Option<T>>>;

/// Re-fetches a snapshot on a fixed interval, keeping the last good value.
///
/// The first fetch runs immediately. A failed fetch leaves the previous
/// snapshot in place and is retried at the next tick.
pub struct PollingSnapshotFetcher<T> {
    name: String,
    latest: SharedSnapshot<T>,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<T> PollingSnapshotFetcher<T>
where
    T: Clone + Send + 'static,
{
    pub fn spawn<F, E>(name: &str, interval: Duration, mut fetch: F) -> Result<Self, ApiError>
    where
        F: FnMut() -> Result<T, E> + Send + 'static,
        E: fmt::Display + 'static,
    {
        let latest: SharedSnapshot<T> = Arc::new(Mutex::new(None));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let thread_name = format!("poll-{name}");
        let label = name.to_string();
        let slot = latest.clone();

        let handle = spawn_named(thread_name.clone(), move || {
            loop {
                match fetch() {
                    Ok(value) => {
                        if stopped(&shutdown_rx) {
                            break;
                        }
                        store(&slot, value);
                        trace!(poller = %label, "snapshot refreshed");
                    }
                    Err(err) => {
                        debug!(poller = %label, error = %err, "snapshot fetch failed, keeping previous")
                    }
                }
                match shutdown_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
            }
        })
        .map_err(|source| ApiError::Spawn {
            name: thread_name,
            source,
        })?;

        Ok(Self {
            name: name.to_string(),
            latest,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Clone of the last good snapshot, if any fetch has succeeded yet.
    pub fn latest(&self) -> Option<T> {
        match self.latest.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn snapshot(&self) -> SharedSnapshot<T> {
        self.latest.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop polling and wait for the worker to exit. Nothing is stored after
    /// this returns.
    pub fn stop(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(poller = %self.name, "polling thread panicked");
            }
        }
    }
}

impl<T> Drop for PollingSnapshotFetcher<T> {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn stopped(shutdown: &Receiver<()>) -> bool {
    matches!(shutdown.try_recv(), Err(TryRecvError::Disconnected))
}

fn store<T>(slot: &SharedSnapshot<T>, value: T) {
    match slot.lock() {
        Ok(mut guard) => *guard = Some(value),
        Err(poisoned) => *poisoned.into_inner() = Some(value),
    }
}
