use shared::record::Record;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::{
    loader::{CollectionState, LoadOutcome, PagedCollectionLoader},
    source::{ListEndpoint, PageSource},
    view::LocalFilter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Loading,
    LoadingMore,
    Searching,
    Loaded { has_more: bool },
}

impl Phase {
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Loading | Self::LoadingMore | Self::Searching)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("another fetch is still pending for this list")]
    Busy,
    #[error("list has not been loaded yet")]
    NotLoaded,
}

/// One list view's session: the caller side of the loader contract. Holds the
/// collection state and refuses to start an operation while another one is
/// in flight, so results are never applied out of order.
pub struct ListSession<S: PageSource> {
    loader: PagedCollectionLoader<S>,
    endpoint: ListEndpoint,
    page_size: usize,
    state: Mutex<Option<CollectionState>>,
    phase: watch::Sender<Phase>,
}

impl<S: PageSource> ListSession<S> {
    pub fn new(loader: PagedCollectionLoader<S>, endpoint: ListEndpoint, page_size: usize) -> Self {
        let (phase, _) = watch::channel(Phase::Empty);
        Self {
            loader,
            endpoint,
            page_size,
            state: Mutex::new(None),
            phase,
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub async fn snapshot(&self) -> Option<CollectionState> {
        self.state.lock().await.clone()
    }

    pub async fn displayed(&self) -> Vec<Record> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(CollectionState::displayed)
            .unwrap_or_default()
    }

    pub async fn open(&self) -> Result<LoadOutcome, SessionError> {
        let mut guard = self.state.try_lock().map_err(|_| SessionError::Busy)?;
        let pending = self.enter(Phase::Loading, &guard);
        let outcome = self.loader.load_initial(&self.endpoint, self.page_size).await;
        pending.disarm();
        Ok(self.settle(&mut guard, outcome))
    }

    pub async fn load_more(&self) -> Result<LoadOutcome, SessionError> {
        let mut guard = self.state.try_lock().map_err(|_| SessionError::Busy)?;
        let current = guard.clone().ok_or(SessionError::NotLoaded)?;
        if !current.has_more() {
            return Ok(LoadOutcome {
                state: current,
                error: None,
            });
        }
        let pending = self.enter(Phase::LoadingMore, &guard);
        let outcome = self.loader.load_more(current, &self.endpoint).await;
        pending.disarm();
        Ok(self.settle(&mut guard, outcome))
    }

    pub async fn search(&self, query: &str) -> Result<LoadOutcome, SessionError> {
        let mut guard = self.state.try_lock().map_err(|_| SessionError::Busy)?;
        let current = guard.clone().ok_or(SessionError::NotLoaded)?;
        let pending = self.enter(Phase::Searching, &guard);
        let outcome = self.loader.search(current, &self.endpoint, query).await;
        pending.disarm();
        Ok(self.settle(&mut guard, outcome))
    }

    pub fn sort(&self, field: &str) -> Result<CollectionState, SessionError> {
        let mut guard = self.state.try_lock().map_err(|_| SessionError::Busy)?;
        let current = guard.take().ok_or(SessionError::NotLoaded)?;
        let next = self.loader.sort(current, field);
        *guard = Some(next.clone());
        Ok(next)
    }

    pub fn filter(&self, filter: Option<LocalFilter>) -> Result<CollectionState, SessionError> {
        let mut guard = self.state.try_lock().map_err(|_| SessionError::Busy)?;
        let current = guard.take().ok_or(SessionError::NotLoaded)?;
        let next = self.loader.filter(current, filter);
        *guard = Some(next.clone());
        Ok(next)
    }

    fn enter(&self, phase: Phase, slot: &Option<CollectionState>) -> PendingPhase<'_> {
        self.publish(phase);
        PendingPhase {
            session_phase: &self.phase,
            resting: Some(resting_phase(slot)),
        }
    }

    fn publish(&self, phase: Phase) {
        debug!(entity_set = %self.endpoint.entity_set, ?phase, "list session phase");
        self.phase.send_replace(phase);
    }

    fn settle(&self, slot: &mut Option<CollectionState>, outcome: LoadOutcome) -> LoadOutcome {
        *slot = Some(outcome.state.clone());
        self.publish(resting_phase(slot));
        outcome
    }
}

fn resting_phase(slot: &Option<CollectionState>) -> Phase {
    match slot {
        Some(state) => Phase::Loaded {
            has_more: state.has_more(),
        },
        None => Phase::Empty,
    }
}

// A dropped operation future never reaches `settle`; the stored state is
// unchanged then, so the phase goes back to what it described.
struct PendingPhase<'a> {
    session_phase: &'a watch::Sender<Phase>,
    resting: Option<Phase>,
}

impl PendingPhase<'_> {
    fn disarm(mut self) {
        self.resting = None;
    }
}

impl Drop for PendingPhase<'_> {
    fn drop(&mut self) {
        if let Some(phase) = self.resting.take() {
            debug!(?phase, "list operation cancelled, restoring phase");
            self.session_phase.send_replace(phase);
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
