//! CSV ingestion for polls, business hours and store timezones
//!
//! Tables are read with the `csv` crate, so quoted fields may hold commas,
//! doubled quotes and line breaks. Columns are located by header name. Each
//! data row is validated on its own:
//! a bad row produces a [`RowError`] and is either skipped or aborts the load,
//! depending on the [`RowPolicy`]. A missing column always aborts.

use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use csv::{Position, ReaderBuilder, StringRecord};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{BusinessInterval, PollSample, Status, StoreId, StoreProfile};
use crate::samples::Snapshot;

pub const STATUS_COLUMNS: [&str; 3] = ["store_id", "status", "timestamp_utc"];
pub const HOURS_COLUMNS: [&str; 4] = ["store_id", "day", "start_time_local", "end_time_local"];
pub const TIMEZONE_COLUMNS: [&str; 2] = ["store_id", "timezone_str"];

/// A rejected data row
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{file} line {line}: {reason}")]
pub struct RowError {
    pub file: String,
    /// 1-based line number in the source file
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{file}: no header row")]
    EmptyInput { file: String },
    #[error("{file}: {source}")]
    Csv {
        file: String,
        #[source]
        source: csv::Error,
    },
    #[error("{file}: missing required column '{column}'")]
    MissingColumn { file: String, column: &'static str },
    #[error("aborting load: {0}")]
    Rejected(RowError),
}

/// What to do with a malformed row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowPolicy {
    #[default]
    SkipInvalid,
    Abort,
}

/// Locations of the three input tables
#[derive(Debug, Clone)]
pub struct DataFiles {
    pub store_status: PathBuf,
    pub business_hours: PathBuf,
    pub timezones: PathBuf,
}

/// Summary of one load
#[derive(Debug, Default)]
pub struct IngestReport {
    pub samples: usize,
    pub intervals: usize,
    pub profiles: usize,
    pub rejected: Vec<RowError>,
}

/// Rows accepted from one table plus the rows that were rejected
#[derive(Debug)]
pub struct Parsed<T> {
    pub rows: Vec<T>,
    pub rejected: Vec<RowError>,
}

/// Load all three tables into a fresh snapshot
pub fn load_snapshot(files: &DataFiles, policy: RowPolicy) -> Result<(Snapshot, IngestReport), IngestError> {
    let samples = parse_samples(&label(&files.store_status), &read(&files.store_status)?, policy)?;
    let hours = parse_business_hours(&label(&files.business_hours), &read(&files.business_hours)?, policy)?;
    let zones = parse_timezones(&label(&files.timezones), &read(&files.timezones)?, policy)?;

    let mut report = IngestReport {
        samples: samples.rows.len(),
        intervals: hours.rows.len(),
        profiles: zones.rows.len(),
        rejected: Vec::new(),
    };
    report.rejected.extend(samples.rejected);
    report.rejected.extend(hours.rejected);
    report.rejected.extend(zones.rejected);

    let mut builder = Snapshot::builder();
    for sample in samples.rows {
        builder.push_sample(sample);
    }
    for interval in hours.rows {
        builder.push_interval(interval);
    }
    for profile in zones.rows {
        builder.push_profile(profile);
    }

    info!(
        "Loaded {} polls, {} business intervals, {} timezones ({} rows rejected)",
        report.samples,
        report.intervals,
        report.profiles,
        report.rejected.len()
    );

    Ok((builder.build(), report))
}

pub fn parse_samples(file: &str, text: &str, policy: RowPolicy) -> Result<Parsed<PollSample>, IngestError> {
    parse_table(file, text, &STATUS_COLUMNS, policy, |f| {
        Ok(PollSample {
            store_id: parse_store_id(f[0])?,
            status: f[1].parse::<Status>()?,
            timestamp_utc: parse_timestamp(f[2])?,
        })
    })
}

pub fn parse_business_hours(
    file: &str,
    text: &str,
    policy: RowPolicy,
) -> Result<Parsed<BusinessInterval>, IngestError> {
    parse_table(file, text, &HOURS_COLUMNS, policy, |f| {
        Ok(BusinessInterval {
            store_id: parse_store_id(f[0])?,
            day: parse_weekday(f[1])?,
            open: parse_local_time(f[2])?,
            close: parse_local_time(f[3])?,
        })
    })
}

pub fn parse_timezones(file: &str, text: &str, policy: RowPolicy) -> Result<Parsed<StoreProfile>, IngestError> {
    parse_table(file, text, &TIMEZONE_COLUMNS, policy, |f| {
        Ok(StoreProfile {
            store_id: parse_store_id(f[0])?,
            timezone: parse_timezone(f[1])?,
        })
    })
}

/// Parse a UTC timestamp such as `2023-01-22 12:09:39.388884 UTC` or an
/// RFC 3339 string with any offset
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let s = raw.trim();
    if s.is_empty() {
        return Err("empty timestamp".to_string());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = s.strip_suffix("UTC").unwrap_or(s).trim_end();
    NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S%.f")
        .map(|dt| dt.and_utc())
        .map_err(|e| format!("invalid timestamp '{}': {}", s, e))
}

/// Parse a local time of day as `HH:MM`, `HH:MM:SS` or `HH:MM:SS.ffffff`
pub fn parse_local_time(raw: &str) -> Result<NaiveTime, String> {
    let s = raw.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| format!("invalid local time '{}'", s))
}

/// Parse a day index where 0 is Monday and 6 is Sunday
pub fn parse_weekday(raw: &str) -> Result<Weekday, String> {
    let s = raw.trim();
    let day = match s.parse::<u8>() {
        Ok(0) => Weekday::Mon,
        Ok(1) => Weekday::Tue,
        Ok(2) => Weekday::Wed,
        Ok(3) => Weekday::Thu,
        Ok(4) => Weekday::Fri,
        Ok(5) => Weekday::Sat,
        Ok(6) => Weekday::Sun,
        _ => return Err(format!("invalid day '{}', expected 0 (Monday) to 6 (Sunday)", s)),
    };
    Ok(day)
}

pub fn parse_timezone(raw: &str) -> Result<Tz, String> {
    let s = raw.trim();
    s.parse::<Tz>()
        .map_err(|_| format!("unknown timezone '{}'", s))
}

fn parse_store_id(raw: &str) -> Result<StoreId, String> {
    let s = raw.trim();
    if s.is_empty() {
        return Err("empty store_id".to_string());
    }
    Ok(StoreId::new(s))
}

fn parse_table<T, F>(
    file: &str,
    text: &str,
    columns: &[&'static str],
    policy: RowPolicy,
    parse_row: F,
) -> Result<Parsed<T>, IngestError>
where
    F: Fn(&[&str]) -> Result<T, String>,
{
    let body = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let header: Vec<String> = reader
        .headers()
        .map_err(|source| IngestError::Csv {
            file: file.to_string(),
            source,
        })?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();
    if header.iter().all(|h| h.is_empty()) {
        return Err(IngestError::EmptyInput {
            file: file.to_string(),
        });
    }

    let mut positions = Vec::with_capacity(columns.len());
    for column in columns {
        match header.iter().position(|h| h.as_str() == *column) {
            Some(pos) => positions.push(pos),
            None => {
                return Err(IngestError::MissingColumn {
                    file: file.to_string(),
                    column: *column,
                })
            }
        }
    }

    let mut parsed = Parsed {
        rows: Vec::new(),
        rejected: Vec::new(),
    };

    for result in reader.records() {
        let (line, result) = match result {
            Ok(record) => {
                if is_blank(&record) {
                    continue;
                }
                let line = record_line(body.as_bytes(), record.position());
                (line, select_fields(&record, &positions, header.len()).and_then(|f| parse_row(&f)))
            }
            Err(e) => (record_line(body.as_bytes(), e.position()), Err(e.to_string())),
        };

        match result {
            Ok(row) => parsed.rows.push(row),
            Err(reason) => {
                let error = RowError {
                    file: file.to_string(),
                    line,
                    reason,
                };
                if policy == RowPolicy::Abort {
                    return Err(IngestError::Rejected(error));
                }
                debug!("Skipping row: {}", error);
                parsed.rejected.push(error);
            }
        }
    }

    if !parsed.rejected.is_empty() {
        warn!("{}: rejected {} malformed rows", file, parsed.rejected.len());
    }

    Ok(parsed)
}

fn select_fields<'r>(record: &'r StringRecord, positions: &[usize], width: usize) -> Result<Vec<&'r str>, String> {
    if record.len() != width {
        return Err(format!("expected {} fields, found {}", width, record.len()));
    }
    Ok(positions.iter().map(|&p| &record[p]).collect())
}

/// A whitespace-only line
fn is_blank(record: &StringRecord) -> bool {
    record.len() == 1 && record[0].trim().is_empty()
}

/// 1-based line on which a record starts. The reader may place a record's
/// position ahead of line breaks it skipped, so step over blank lines.
fn record_line(body: &[u8], position: Option<&Position>) -> usize {
    let Some(position) = position else {
        return 0;
    };
    let mut line = position.line() as usize;
    let mut rest = usize::try_from(position.byte())
        .ok()
        .and_then(|offset| body.get(offset..))
        .unwrap_or_default();
    while let Some(end) = rest.iter().position(|&b| b == b'\n') {
        if !rest[..end].iter().all(u8::is_ascii_whitespace) {
            break;
        }
        line += 1;
        rest = &rest[end + 1..];
    }
    line
}

fn read(path: &Path) -> Result<String, IngestError> {
    fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
