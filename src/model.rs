//! Core data types shared by ingestion, estimation and reporting

use chrono::{DateTime, NaiveTime, TimeDelta, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque store identifier. Source data uses very large integers, so the id
/// is kept as text and never interpreted numerically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(String);

impl StoreId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoreId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Operational status reported by a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Inactive,
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Status::Active),
            "inactive" => Ok(Status::Inactive),
            other => Err(format!("unknown status '{}', expected active or inactive", other)),
        }
    }
}

/// One observation of a store's status at a single instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSample {
    pub store_id: StoreId,
    pub timestamp_utc: DateTime<Utc>,
    pub status: Status,
}

/// Weekly recurring opening interval in store-local time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessInterval {
    pub store_id: StoreId,
    pub day: Weekday,
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl BusinessInterval {
    pub fn span(&self) -> LocalSpan {
        LocalSpan {
            open: self.open,
            close: self.close,
        }
    }
}

/// Local opening span within one day.
///
/// A `close` at or before `open` runs past midnight into the next day, so
/// `open == close` describes a full 24 hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalSpan {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl LocalSpan {
    pub const FULL_DAY: LocalSpan = LocalSpan {
        open: NaiveTime::MIN,
        close: NaiveTime::MIN,
    };

    /// Wall-clock length of the span (DST shifts are applied later, when the
    /// span is resolved against a concrete date)
    pub fn length(&self) -> TimeDelta {
        if self.close > self.open {
            self.close - self.open
        } else {
            TimeDelta::days(1) - (self.open - self.close)
        }
    }
}

/// Timezone assignment for a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreProfile {
    pub store_id: StoreId,
    pub timezone: Tz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    LastHour,
    LastDay,
    LastWeek,
}

impl WindowKind {
    pub const ALL: [WindowKind; 3] = [WindowKind::LastHour, WindowKind::LastDay, WindowKind::LastWeek];

    pub fn length(self) -> TimeDelta {
        match self {
            WindowKind::LastHour => TimeDelta::hours(1),
            WindowKind::LastDay => TimeDelta::days(1),
            WindowKind::LastWeek => TimeDelta::weeks(1),
        }
    }
}

/// Rolling window `[start, end)` ending at the reference instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimationWindow {
    pub kind: WindowKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EstimationWindow {
    pub fn trailing(kind: WindowKind, reference: DateTime<Utc>) -> Self {
        Self {
            kind,
            start: reference - kind.length(),
            end: reference,
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

/// Whether the requested store exists in any loaded table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLookup {
    Found,
    NotFound,
}

impl StoreLookup {
    pub fn is_found(self) -> bool {
        self == StoreLookup::Found
    }
}

/// Reported uptime/downtime for one store.
///
/// Hour-window fields are minutes, day and week fields are hours. The mixed
/// units are kept for compatibility with existing consumers of the CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeReport {
    pub store_id: StoreId,
    pub uptime_last_hour: f64,
    pub uptime_last_day: f64,
    pub uptime_last_week: f64,
    pub downtime_last_hour: f64,
    pub downtime_last_day: f64,
    pub downtime_last_week: f64,
}

impl UptimeReport {
    pub fn zeroed(store_id: StoreId) -> Self {
        Self {
            store_id,
            uptime_last_hour: 0.0,
            uptime_last_day: 0.0,
            uptime_last_week: 0.0,
            downtime_last_hour: 0.0,
            downtime_last_day: 0.0,
            downtime_last_week: 0.0,
        }
    }
}
