use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::watch;

/// State stored per job in a [`ProgressTracker`].
pub trait TrackedState: Clone + Send + Sync + 'static {
    /// Whether the job has reached a state that must no longer change.
    fn is_terminal(&self) -> bool;
}

/// Errors returned when updating tracked state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    /// No state is registered for the id.
    #[error("no progress registered for job {0}")]
    Unknown(u64),
    /// The job is terminal; its state is frozen.
    #[error("job {0} is already terminal")]
    Terminal(u64),
}

/// Authoritative live state per job id.
///
/// Each entry is a `watch` channel: a writer replaces the whole state in one step, so readers
/// always observe a consistent snapshot, and waiters are woken on every change. The outer map
/// lock is only held long enough to find the entry.
pub struct ProgressTracker<S> {
    entries: RwLock<HashMap<u64, watch::Sender<S>>>,
}

impl<S: TrackedState> Default for ProgressTracker<S> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<S: TrackedState> ProgressTracker<S> {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Returns `false` when the id is already tracked.
    pub fn insert(&self, id: u64, state: S) -> bool {
        let mut guard = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if guard.contains_key(&id) {
            return false;
        }
        let (sender, _) = watch::channel(state);
        guard.insert(id, sender);
        true
    }

    /// Current state of a job.
    pub fn snapshot(&self, id: u64) -> Option<S> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(&id).map(|sender| sender.borrow().clone())
    }

    /// Apply `change` atomically. Terminal states are rejected unchanged.
    pub fn update<F>(&self, id: u64, change: F) -> Result<S, TrackerError>
    where
        F: FnOnce(&mut S),
    {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.get(&id).ok_or(TrackerError::Unknown(id))?;
        let mut frozen = false;
        sender.send_if_modified(|state| {
            if state.is_terminal() {
                frozen = true;
                return false;
            }
            change(state);
            true
        });
        if frozen {
            return Err(TrackerError::Terminal(id));
        }
        Ok(sender.borrow().clone())
    }

    /// Replace the state regardless of terminality (explicit retry transitions).
    pub fn reset(&self, id: u64, state: S) -> Result<(), TrackerError> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let sender = guard.get(&id).ok_or(TrackerError::Unknown(id))?;
        sender.send_replace(state);
        Ok(())
    }

    /// Stop tracking a job and return its last state. Existing subscribers keep the final value.
    pub fn remove(&self, id: u64) -> Option<S> {
        let sender = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)?;
        let last = sender.borrow().clone();
        Some(last)
    }

    /// Subscribe to every subsequent change of a job.
    pub fn subscribe(&self, id: u64) -> Option<watch::Receiver<S>> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(&id).map(watch::Sender::subscribe)
    }

    /// Wait until the job is terminal and return that state.
    pub async fn wait_terminal(&self, id: u64) -> Option<S> {
        let mut receiver = self.subscribe(id)?;
        let state = match receiver.wait_for(|state| state.is_terminal()).await {
            Ok(state) => state.clone(),
            Err(_) => return self.snapshot(id),
        };
        Some(state)
    }

    /// Snapshots of every tracked job, ordered by id.
    pub fn snapshots(&self) -> Vec<(u64, S)> {
        let guard = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<(u64, S)> = guard
            .iter()
            .map(|(id, sender)| (*id, sender.borrow().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }
}
