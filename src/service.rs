//! Report orchestration
//!
//! Coordinates store selection, snapshotting, estimation, packaging,
//! persistence and the report registry.

use anyhow::{anyhow, Context, Result};
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::ReferenceTime;
use crate::estimator;
use crate::health::HealthMetrics;
use crate::ingest::{self, DataFiles, IngestError, IngestReport, RowPolicy};
use crate::model::{StoreId, StoreLookup};
use crate::registry::{ReportRegistry, ReportState};
use crate::report::{Report, ReportBuilder, ReportId, ReportSink};
use crate::samples::{SampleStore, Snapshot};

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("no stores are loaded")]
    NoStores,
}

/// How a caller identifies the report it wants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportQuery {
    ById(ReportId),
    /// Latest report triggered for the store
    ByStore(StoreId),
}

const GATE_OPEN: u8 = 0;
const GATE_PERSISTING: u8 = 1;
const GATE_CANCELLED: u8 = 2;

/// Settles the race between a report's timeout and its artifact write.
/// Exactly one of `enter` and `cancel` succeeds.
#[derive(Debug, Default)]
pub struct PersistGate(AtomicU8);

impl PersistGate {
    /// Claim the write; false once the report has been cancelled
    pub fn enter(&self) -> bool {
        self.0
            .compare_exchange(GATE_OPEN, GATE_PERSISTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Cancel the report; false if its artifact is already being written
    pub fn cancel(&self) -> bool {
        self.0
            .compare_exchange(GATE_OPEN, GATE_CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub struct ReportService {
    store: Arc<SampleStore>,
    registry: ReportRegistry,
    sink: Arc<dyn ReportSink>,
    metrics: Arc<HealthMetrics>,
    reference: ReferenceTime,
    timeout: Duration,
}

impl ReportService {
    pub fn new(
        store: Arc<SampleStore>,
        sink: Arc<dyn ReportSink>,
        metrics: Arc<HealthMetrics>,
        reference: ReferenceTime,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry: ReportRegistry::new(),
            sink,
            metrics,
            reference,
            timeout,
        }
    }

    pub fn metrics(&self) -> &HealthMetrics {
        &self.metrics
    }

    pub fn registry(&self) -> &ReportRegistry {
        &self.registry
    }

    /// Load the input tables and swap them in as the current snapshot
    pub fn reload(&self, files: &DataFiles, policy: RowPolicy) -> Result<IngestReport, IngestError> {
        let (snapshot, report) = ingest::load_snapshot(files, policy)?;
        for rejected in report.rejected.iter().take(10) {
            warn!("Rejected row: {}", rejected);
        }
        if report.rejected.len() > 10 {
            warn!("... and {} more rejected rows", report.rejected.len() - 10);
        }
        self.metrics.set_rows_rejected(report.rejected.len() as u64);
        self.store.replace(snapshot);
        Ok(report)
    }

    /// Explicit id, or a uniformly random known store when none is given.
    /// The random choice is not reproducible between calls.
    fn select_store(&self, snapshot: &Snapshot, requested: Option<StoreId>) -> Result<StoreId, TriggerError> {
        match requested {
            Some(id) => Ok(id),
            None => snapshot
                .store_ids()
                .choose(&mut rand::thread_rng())
                .cloned()
                .ok_or(TriggerError::NoStores),
        }
    }

    /// Register a report and compute it in the background.
    /// Returns as soon as the report id is issued.
    pub fn trigger(self: &Arc<Self>, requested: Option<StoreId>) -> Result<ReportId, TriggerError> {
        let snapshot = self.store.snapshot();
        let store_id = self.select_store(&snapshot, requested)?;
        let id = ReportId::generate();
        self.registry.start(id.clone(), store_id.clone());
        info!("Report {} triggered for store {}", id, store_id);

        let service = Arc::clone(self);
        let task_id = id.clone();
        tokio::spawn(async move {
            service.run(task_id, store_id, snapshot).await;
        });

        Ok(id)
    }

    async fn run(self: Arc<Self>, id: ReportId, store_id: StoreId, snapshot: Arc<Snapshot>) {
        let gate = Arc::new(PersistGate::default());
        let mut worker = {
            let service = Arc::clone(&self);
            let id = id.clone();
            let gate = Arc::clone(&gate);
            tokio::task::spawn_blocking(move || service.generate_gated(id, &store_id, &snapshot, &gate))
        };

        let waited = timeout(self.timeout, &mut worker).await;
        let joined = match waited {
            Ok(joined) => joined,
            Err(_) if gate.cancel() => {
                self.finish(&id, Err(anyhow!("report timed out after {:?}", self.timeout)));
                return;
            }
            Err(_) => {
                warn!("Report {} passed its timeout while writing, waiting for the write", id);
                worker.await
            }
        };

        let outcome = match joined {
            Ok(result) => result,
            Err(join_error) => Err(anyhow!("report task failed: {}", join_error)),
        };
        self.finish(&id, outcome);
    }

    /// Compute and persist a report synchronously (used by `--once`)
    pub fn report_now(&self, requested: Option<StoreId>) -> Result<ReportState, TriggerError> {
        let snapshot = self.store.snapshot();
        let store_id = self.select_store(&snapshot, requested)?;
        let id = ReportId::generate();
        self.registry.start(id.clone(), store_id.clone());

        let outcome = self.generate(id.clone(), &store_id, &snapshot);
        self.finish(&id, outcome);

        Ok(self
            .registry
            .get(&id)
            .unwrap_or(ReportState::Running { store_id }))
    }

    /// Estimate, package and persist one report from a fixed snapshot
    pub fn generate(&self, id: ReportId, store_id: &StoreId, snapshot: &Snapshot) -> Result<(Report, String)> {
        self.generate_gated(id, store_id, snapshot, &PersistGate::default())
    }

    /// As `generate`, but nothing is written once `gate` has been cancelled
    pub fn generate_gated(
        &self,
        id: ReportId,
        store_id: &StoreId,
        snapshot: &Snapshot,
        gate: &PersistGate,
    ) -> Result<(Report, String)> {
        let reference = self.reference.resolve(snapshot);
        let estimate = estimator::estimate(
            store_id,
            snapshot.samples_for(store_id),
            snapshot.calendar(),
            reference,
        );
        let report = ReportBuilder::build(id, &estimate);
        if !gate.enter() {
            return Err(anyhow!("report {} cancelled before it was written", report.id));
        }
        let artifact = self
            .sink
            .persist(&report)
            .with_context(|| format!("Failed to persist report {}", report.id))?;
        Ok((report, artifact))
    }

    fn finish(&self, id: &ReportId, outcome: Result<(Report, String)>) {
        match outcome {
            Ok((report, artifact)) => {
                if report.lookup == StoreLookup::NotFound {
                    warn!(
                        "Report {}: store {} not found, wrote zero report",
                        id, report.uptime.store_id
                    );
                }
                info!("Report {} complete: {}", id, artifact);
                self.registry
                    .complete(id, artifact, report.lookup, report.uptime);
                self.metrics.record_success();
            }
            Err(e) => {
                error!("Report {} failed: {:#}", id, e);
                self.registry.fail(id, format!("{:#}", e));
                self.metrics.record_failure();
            }
        }
    }

    pub fn lookup(&self, query: &ReportQuery) -> Option<(ReportId, ReportState)> {
        match query {
            ReportQuery::ById(id) => self.registry.get(id).map(|state| (id.clone(), state)),
            ReportQuery::ByStore(store_id) => self.registry.latest_for_store(store_id),
        }
    }

    /// Like `lookup`, but a store with no report yet gets one triggered and
    /// comes back as running. Unknown stores are triggered too and finish
    /// as zero reports.
    pub fn lookup_or_trigger(self: &Arc<Self>, query: &ReportQuery) -> Option<(ReportId, ReportState)> {
        if let Some(found) = self.lookup(query) {
            return Some(found);
        }
        let ReportQuery::ByStore(store_id) = query else {
            return None;
        };
        let id = self.trigger(Some(store_id.clone())).ok()?;
        Some((
            id,
            ReportState::Running {
                store_id: store_id.clone(),
            },
        ))
    }
}
