//! Blocking access to content that is normally downloaded asynchronously.
//!
//! Pull-style readers ("give me the bytes now") sit on top of a push-style
//! download primitive here. This is the only place in the crate that blocks on
//! another subsystem's callback, so it must run on a thread that is allowed to
//! stall: a backend worker, or tokio's blocking pool via
//! [`SyncBridge::await_content_async`].

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{RecvTimeoutError, Sender};
use shared::domain::PartId;
use tracing::{debug, warn};

use crate::error::{LoadFailure, MediaError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Started,
    Updated { bytes: u64 },
    Completed,
    Failed(String),
}

pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, part: &PartId, event: ProgressEvent);
}

/// Local content resource model of the messaging SDK.
pub trait ContentStore: Send + Sync {
    fn is_ready(&self, part: &PartId) -> bool;
    fn read(&self, part: &PartId) -> Result<Vec<u8>, MediaError>;
    /// Starts a download and returns immediately; progress arrives through
    /// registered listeners.
    fn download(&self, part: &PartId) -> Result<(), MediaError>;
    fn register_progress_listener(
        &self,
        part: &PartId,
        listener: Arc<dyn ProgressListener>,
    ) -> ListenerId;
    fn unregister_progress_listener(&self, part: &PartId, listener: ListenerId);
}

struct TerminalEventForwarder {
    tx: Sender<ProgressEvent>,
}

impl ProgressListener for TerminalEventForwarder {
    fn on_progress(&self, _part: &PartId, event: ProgressEvent) {
        if matches!(event, ProgressEvent::Completed | ProgressEvent::Failed(_)) {
            let _ = self.tx.try_send(event);
        }
    }
}

/// Unregisters its listener however the wait ends, including unwinding.
struct ListenerGuard<'a> {
    store: &'a dyn ContentStore,
    part: &'a PartId,
    id: ListenerId,
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.store.unregister_progress_listener(self.part, self.id);
    }
}

enum WaitOutcome {
    Ready,
    Failed(String),
    TimedOut,
}

#[derive(Clone)]
pub struct SyncBridge {
    store: Arc<dyn ContentStore>,
    timeout: Duration,
}

impl SyncBridge {
    pub fn new(store: Arc<dyn ContentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Blocks until `part` is resident, the download reports an error, or the
    /// configured timeout elapses. Returns whether the content is ready.
    pub fn await_content(&self, part: &PartId) -> bool {
        self.await_content_within(part, self.timeout)
    }

    pub fn await_content_within(&self, part: &PartId, timeout: Duration) -> bool {
        matches!(self.wait(part, timeout), WaitOutcome::Ready)
    }

    /// Reads `part`, downloading it first if needed.
    pub fn fetch(&self, part: &PartId) -> Result<Vec<u8>, MediaError> {
        match self.wait(part, self.timeout) {
            WaitOutcome::Ready => self.store.read(part),
            WaitOutcome::Failed(reason) => Err(LoadFailure::Fetch(reason).into()),
            WaitOutcome::TimedOut => Err(MediaError::Timeout {
                part: part.to_string(),
                waited: self.timeout,
            }),
        }
    }

    fn wait(&self, part: &PartId, timeout: Duration) -> WaitOutcome {
        if self.store.is_ready(part) {
            return WaitOutcome::Ready;
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let id = self
            .store
            .register_progress_listener(part, Arc::new(TerminalEventForwarder { tx }));
        let _guard = ListenerGuard {
            store: self.store.as_ref(),
            part,
            id,
        };

        // The download may have landed between the first check and registration.
        if self.store.is_ready(part) {
            return WaitOutcome::Ready;
        }
        if let Err(err) = self.store.download(part) {
            warn!(%part, "sync bridge: download could not start: {err}");
            return WaitOutcome::Failed(err.to_string());
        }

        let started = Instant::now();
        let outcome = match rx.recv_timeout(timeout) {
            Ok(ProgressEvent::Failed(reason)) => {
                warn!(%part, "sync bridge: download failed: {reason}");
                WaitOutcome::Failed(reason)
            }
            Ok(_) => {
                debug!(
                    %part,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "sync bridge: download completed"
                );
                WaitOutcome::Ready
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(%part, ?timeout, "sync bridge: timed out waiting for content");
                WaitOutcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => WaitOutcome::TimedOut,
        };

        match outcome {
            WaitOutcome::Ready if !self.store.is_ready(part) => {
                WaitOutcome::Failed("download completed but content is not resident".into())
            }
            other => other,
        }
    }

    /// Runs [`SyncBridge::await_content`] on tokio's blocking pool.
    pub async fn await_content_async(&self, part: PartId) -> bool {
        let bridge = self.clone();
        tokio::task::spawn_blocking(move || bridge.await_content(&part))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
#[path = "tests/sync_bridge_tests.rs"]
mod tests;
