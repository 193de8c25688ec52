/// Report assembly and persistence
/// Wraps an estimate in a report id and renders it as a one-row CSV artifact

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::estimator::UptimeEstimate;
use crate::model::{StoreLookup, UptimeReport};

pub const REPORT_ID_LEN: usize = 10;
const REPORT_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Column order of the CSV artifact, matching [`UptimeReport`]
pub const CSV_HEADER: &str = "store_id,uptime_last_hour,uptime_last_day,uptime_last_week,\
downtime_last_hour,downtime_last_day,downtime_last_week";

/// Opaque report identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ReportId(String);

impl ReportId {
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let id: String = (0..REPORT_ID_LEN)
            .map(|_| REPORT_ID_ALPHABET[rng.gen_range(0..REPORT_ID_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    /// Accepts only well-formed ids, so request input never reaches a file name
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = raw.len() == REPORT_ID_LEN && raw.bytes().all(|b| REPORT_ID_ALPHABET.contains(&b));
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A finished report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub id: ReportId,
    pub lookup: StoreLookup,
    pub reference: DateTime<Utc>,
    pub uptime: UptimeReport,
}

pub struct ReportBuilder;

impl ReportBuilder {
    /// Package an estimate under `id`; unit conversion happens here
    pub fn build(id: ReportId, estimate: &UptimeEstimate) -> Report {
        let uptime = if estimate.lookup.is_found() {
            estimate.to_report()
        } else {
            UptimeReport::zeroed(estimate.store_id.clone())
        };
        Report {
            id,
            lookup: estimate.lookup,
            reference: estimate.reference,
            uptime,
        }
    }
}

/// Render a report as a header plus one data row
pub fn render_csv(report: &UptimeReport) -> String {
    format!(
        "{}\n{},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2}\n",
        CSV_HEADER,
        report.store_id,
        report.uptime_last_hour,
        report.uptime_last_day,
        report.uptime_last_week,
        report.downtime_last_hour,
        report.downtime_last_day,
        report.downtime_last_week,
    )
}

/// Destination for finished reports
pub trait ReportSink: Send + Sync {
    /// Persist the report and return a reference to the stored artifact
    fn persist(&self, report: &Report) -> Result<String>;
}

/// Writes `report_<id>.csv` into a directory
#[derive(Debug, Clone)]
pub struct CsvDirectorySink {
    dir: PathBuf,
}

impl CsvDirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, id: &ReportId) -> PathBuf {
        self.dir.join(format!("report_{}.csv", id))
    }
}

impl ReportSink for CsvDirectorySink {
    fn persist(&self, report: &Report) -> Result<String> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create report directory {}", self.dir.display()))?;
        let path = self.path_for(&report.id);
        fs::write(&path, render_csv(&report.uptime))
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        debug!("Wrote report {} to {}", report.id, path.display());
        Ok(path.display().to_string())
    }
}
