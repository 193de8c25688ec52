//! In-memory record of triggered reports
//!
//! Running reports are always kept. Finished reports are kept up to a fixed
//! count, after which the oldest finished one is dropped.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use crate::model::{StoreId, StoreLookup, UptimeReport};
use crate::report::ReportId;

#[derive(Debug, Clone, PartialEq)]
pub enum ReportState {
    Running {
        store_id: StoreId,
    },
    Complete {
        store_id: StoreId,
        artifact: String,
        lookup: StoreLookup,
        uptime: UptimeReport,
    },
    Failed {
        store_id: StoreId,
        reason: String,
    },
}

impl ReportState {
    pub fn store_id(&self) -> &StoreId {
        match self {
            ReportState::Running { store_id }
            | ReportState::Complete { store_id, .. }
            | ReportState::Failed { store_id, .. } => store_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReportState::Running { .. } => "Running",
            ReportState::Complete { .. } => "Complete",
            ReportState::Failed { .. } => "Failed",
        }
    }
}

/// Finished reports retained before the oldest is evicted
pub const MAX_FINISHED_REPORTS: usize = 1000;

#[derive(Debug, Default)]
struct Inner {
    reports: HashMap<ReportId, ReportState>,
    latest_by_store: HashMap<StoreId, ReportId>,
    /// Finished report ids, oldest first
    finished: VecDeque<ReportId>,
}

impl Inner {
    fn evict_beyond(&mut self, capacity: usize) {
        while self.finished.len() > capacity {
            let Some(id) = self.finished.pop_front() else {
                break;
            };
            if let Some(state) = self.reports.remove(&id) {
                let store_id = state.store_id();
                if self.latest_by_store.get(store_id) == Some(&id) {
                    self.latest_by_store.remove(store_id);
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct ReportRegistry {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl Default for ReportRegistry {
    fn default() -> Self {
        Self::with_capacity(MAX_FINISHED_REPORTS)
    }
}

impl ReportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry keeping at most `capacity` finished reports
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity,
        }
    }

    /// Register a new report as running; it becomes the store's latest
    pub fn start(&self, id: ReportId, store_id: StoreId) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.latest_by_store.insert(store_id.clone(), id.clone());
        inner.reports.insert(id, ReportState::Running { store_id });
    }

    pub fn complete(&self, id: &ReportId, artifact: String, lookup: StoreLookup, uptime: UptimeReport) {
        self.transition(id, |store_id| ReportState::Complete {
            store_id,
            artifact,
            lookup,
            uptime,
        });
    }

    pub fn fail(&self, id: &ReportId, reason: String) {
        self.transition(id, |store_id| ReportState::Failed { store_id, reason });
    }

    /// Only running reports move on; a finished report is written once
    fn transition(&self, id: &ReportId, next: impl FnOnce(StoreId) -> ReportState) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = inner.reports.get_mut(id) else {
            return;
        };
        let store_id = match state {
            ReportState::Running { store_id } => store_id.clone(),
            _ => return,
        };
        *state = next(store_id);
        inner.finished.push_back(id.clone());
        inner.evict_beyond(self.capacity);
    }

    pub fn get(&self, id: &ReportId) -> Option<ReportState> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.reports.get(id).cloned()
    }

    /// Latest report triggered for a store
    pub fn latest_for_store(&self, store_id: &StoreId) -> Option<(ReportId, ReportState)> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = inner.latest_by_store.get(store_id)?;
        inner
            .reports
            .get(id)
            .map(|state| (id.clone(), state.clone()))
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reports
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
