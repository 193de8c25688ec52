use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
#[cfg(test)]
use std::collections::HashMap;
use std::env;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::ingest::{parse_timestamp, DataFiles, RowPolicy};
use crate::samples::Snapshot;

/// Instant the trailing windows end at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTime {
    /// First whole second after the newest poll in the loaded data, so that
    /// poll lies inside every window (falls back to now when there are none)
    Latest,
    /// Wall clock at report time
    Now,
    Fixed(DateTime<Utc>),
}

impl ReferenceTime {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "latest" => Ok(ReferenceTime::Latest),
            "now" => Ok(ReferenceTime::Now),
            _ => parse_timestamp(raw)
                .map(ReferenceTime::Fixed)
                .map_err(anyhow::Error::msg),
        }
    }

    pub fn resolve(&self, snapshot: &Snapshot) -> DateTime<Utc> {
        match self {
            ReferenceTime::Latest => snapshot
                .latest_sample_time()
                .and_then(|t| DateTime::from_timestamp(t.timestamp() + 1, 0))
                .unwrap_or_else(Utc::now),
            ReferenceTime::Now => Utc::now(),
            ReferenceTime::Fixed(t) => *t,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Input tables
    pub data_dir: PathBuf,
    pub store_status_csv: String,
    pub business_hours_csv: String,
    pub timezones_csv: String,

    /// Abort the load on the first malformed row instead of skipping it
    pub ingest_strict: bool,

    // Report output
    pub report_dir: PathBuf,
    pub reference_time: ReferenceTime,
    pub report_timeout_secs: u64,

    // HTTP server
    pub bind_addr: String,
    pub http_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config {
            data_dir: PathBuf::from(get("DATA_DIR").unwrap_or_else(|| "./data".to_string())),
            store_status_csv: get("STORE_STATUS_CSV")
                .unwrap_or_else(|| "store status.csv".to_string()),
            business_hours_csv: get("BUSINESS_HOURS_CSV")
                .unwrap_or_else(|| "Menu hours.csv".to_string()),
            timezones_csv: get("TIMEZONES_CSV").unwrap_or_else(|| "bq-results.csv".to_string()),

            ingest_strict: match get("INGEST_STRICT") {
                Some(v) => parse_bool(&v).context("INGEST_STRICT must be true or false")?,
                None => false,
            },

            report_dir: PathBuf::from(get("REPORT_DIR").unwrap_or_else(|| "./reports".to_string())),
            reference_time: match get("REFERENCE_TIME") {
                Some(v) => ReferenceTime::parse(&v)
                    .context("REFERENCE_TIME must be 'latest', 'now' or a timestamp")?,
                None => ReferenceTime::Latest,
            },
            report_timeout_secs: get("REPORT_TIMEOUT_SECS")
                .unwrap_or_else(|| "30".to_string())
                .parse()
                .unwrap_or(30),

            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            http_port: get("HTTP_PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("HTTP_PORT must be a valid port number")?,
        })
    }

    /// Create config from a HashMap (convenience for testing)
    #[cfg(test)]
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    pub fn data_files(&self) -> DataFiles {
        DataFiles {
            store_status: self.data_dir.join(&self.store_status_csv),
            business_hours: self.data_dir.join(&self.business_hours_csv),
            timezones: self.data_dir.join(&self.timezones_csv),
        }
    }

    pub fn row_policy(&self) -> RowPolicy {
        if self.ingest_strict {
            RowPolicy::Abort
        } else {
            RowPolicy::SkipInvalid
        }
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        let files = self.data_files();
        for (var, path) in [
            ("STORE_STATUS_CSV", &files.store_status),
            ("BUSINESS_HOURS_CSV", &files.business_hours),
            ("TIMEZONES_CSV", &files.timezones),
        ] {
            if !path.is_file() {
                errors.push(format!("{} not found at '{}'.", var, path.display()));
            }
        }

        if self.report_dir.is_file() {
            errors.push(format!(
                "REPORT_DIR '{}' is a file, expected a directory.",
                self.report_dir.display()
            ));
        }

        if self.bind_addr.parse::<IpAddr>().is_err() {
            errors.push(format!(
                "BIND_ADDR '{}' is not an IP address.",
                self.bind_addr
            ));
        }

        if self.report_timeout_secs == 0 {
            errors.push("REPORT_TIMEOUT_SECS must be greater than 0.".to_string());
        } else if self.report_timeout_secs > 600 {
            errors.push(format!(
                "REPORT_TIMEOUT_SECS={} seems too long (max recommended: 600).",
                self.report_timeout_secs
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("invalid boolean '{}'", other),
    }
}
