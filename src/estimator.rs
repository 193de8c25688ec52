//! Uptime estimation
//!
//! Turns sparse status polls into uptime/downtime over the trailing hour, day
//! and week, counting only time that falls inside the store's business hours.
//!
//! Each poll is extended to the midpoints between it and its neighbours
//! (nearest-neighbour extrapolation). A window whose business hours contain no
//! polls is assumed fully up; a window with no business hours counts nothing.

use chrono::{DateTime, Datelike, TimeDelta, Utc};
use tracing::debug;

use crate::calendar::{resolve_local, BusinessCalendar};
use crate::model::{
    EstimationWindow, PollSample, Status, StoreId, StoreLookup, UptimeReport, WindowKind,
};

/// Half-open UTC span `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UtcSpan {
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }

    /// Overlap with `[from, to)`; a missing bound is unbounded
    fn overlap(&self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> TimeDelta {
        let start = from.map_or(self.start, |f| f.max(self.start));
        let end = to.map_or(self.end, |t| t.min(self.end));
        if end > start {
            end - start
        } else {
            TimeDelta::zero()
        }
    }
}

/// Durations accumulated for one window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTally {
    /// Business hours inside the window
    pub business: TimeDelta,
    pub uptime: TimeDelta,
    pub downtime: TimeDelta,
}

impl WindowTally {
    pub fn closed() -> Self {
        Self {
            business: TimeDelta::zero(),
            uptime: TimeDelta::zero(),
            downtime: TimeDelta::zero(),
        }
    }

    pub fn business_minutes(&self) -> f64 {
        minutes(self.business)
    }

    pub fn uptime_minutes(&self) -> f64 {
        minutes(self.uptime)
    }

    pub fn downtime_minutes(&self) -> f64 {
        minutes(self.downtime)
    }
}

fn minutes(d: TimeDelta) -> f64 {
    d.num_milliseconds() as f64 / 60_000.0
}

/// Estimator output for one store at one reference instant
#[derive(Debug, Clone, PartialEq)]
pub struct UptimeEstimate {
    pub store_id: StoreId,
    pub lookup: StoreLookup,
    pub reference: DateTime<Utc>,
    pub last_hour: WindowTally,
    pub last_day: WindowTally,
    pub last_week: WindowTally,
}

impl UptimeEstimate {
    pub fn tally(&self, kind: WindowKind) -> &WindowTally {
        match kind {
            WindowKind::LastHour => &self.last_hour,
            WindowKind::LastDay => &self.last_day,
            WindowKind::LastWeek => &self.last_week,
        }
    }

    /// Convert to reporting units: minutes for the hour window, hours for
    /// the day and week windows
    pub fn to_report(&self) -> UptimeReport {
        UptimeReport {
            store_id: self.store_id.clone(),
            uptime_last_hour: self.last_hour.uptime_minutes(),
            uptime_last_day: self.last_day.uptime_minutes() / 60.0,
            uptime_last_week: self.last_week.uptime_minutes() / 60.0,
            downtime_last_hour: self.last_hour.downtime_minutes(),
            downtime_last_day: self.last_day.downtime_minutes() / 60.0,
            downtime_last_week: self.last_week.downtime_minutes() / 60.0,
        }
    }
}

/// Estimate uptime and downtime for `store_id` over the three trailing
/// windows ending at `reference`.
///
/// `samples` may be unordered and may contain other stores' polls; only the
/// matching store's polls are used. A store that has no polls and is absent
/// from the calendar yields an all-zero estimate marked `NotFound`.
pub fn estimate(
    store_id: &StoreId,
    samples: &[PollSample],
    calendar: &BusinessCalendar,
    reference: DateTime<Utc>,
) -> UptimeEstimate {
    let mut ordered: Vec<&PollSample> = samples
        .iter()
        .filter(|s| &s.store_id == store_id)
        .collect();

    if ordered.is_empty() && !calendar.knows(store_id) {
        debug!(store_id = %store_id, "Store not found in any table");
        return UptimeEstimate {
            store_id: store_id.clone(),
            lookup: StoreLookup::NotFound,
            reference,
            last_hour: WindowTally::closed(),
            last_day: WindowTally::closed(),
            last_week: WindowTally::closed(),
        };
    }

    // Status breaks ties so equal timestamps always resolve the same way
    ordered.sort_by(|a, b| {
        a.timestamp_utc
            .cmp(&b.timestamp_utc)
            .then(a.status.cmp(&b.status))
    });

    let tally_for = |kind: WindowKind| {
        let window = EstimationWindow::trailing(kind, reference);
        let periods = business_periods(calendar, store_id, &window);
        let lo = ordered.partition_point(|s| s.timestamp_utc < window.start);
        let hi = ordered.partition_point(|s| s.timestamp_utc < window.end);
        tally_window(&periods, &ordered[lo..hi])
    };

    let result = UptimeEstimate {
        store_id: store_id.clone(),
        lookup: StoreLookup::Found,
        reference,
        last_hour: tally_for(WindowKind::LastHour),
        last_day: tally_for(WindowKind::LastDay),
        last_week: tally_for(WindowKind::LastWeek),
    };

    debug!(
        store_id = %store_id,
        samples = ordered.len(),
        hour_up = result.last_hour.uptime_minutes(),
        day_up = result.last_day.uptime_minutes(),
        week_up = result.last_week.uptime_minutes(),
        "Estimated uptime"
    );

    result
}

/// Business hours inside `window`, as sorted, non-overlapping UTC spans.
///
/// Local opening spans are resolved against every local date the window
/// touches (plus the day before, for spans running past midnight) in the
/// store's timezone, then clipped to the window.
pub fn business_periods(
    calendar: &BusinessCalendar,
    store_id: &StoreId,
    window: &EstimationWindow,
) -> Vec<UtcSpan> {
    let tz = calendar.timezone_of(store_id);
    let last = window.end.with_timezone(&tz).date_naive();
    let first = window.start.with_timezone(&tz).date_naive();
    let mut date = first.pred_opt().unwrap_or(first);

    let mut periods = Vec::new();
    loop {
        for span in calendar.open_intervals(store_id, date.weekday()) {
            let open = date.and_time(span.open);
            let start = resolve_local(&tz, open).max(window.start);
            let end = resolve_local(&tz, open + span.length()).min(window.end);
            if end > start {
                periods.push(UtcSpan { start, end });
            }
        }
        if date >= last {
            break;
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }

    merge_spans(periods)
}

fn merge_spans(mut spans: Vec<UtcSpan>) -> Vec<UtcSpan> {
    spans.sort_by_key(|s| s.start);
    let mut merged: Vec<UtcSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(prev) if span.start <= prev.end => prev.end = prev.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// Attribute the business `periods` of one window to uptime or downtime.
///
/// `samples` must be sorted by timestamp. Samples outside `periods` carry no
/// information about business hours and are ignored.
pub fn tally_window(periods: &[UtcSpan], samples: &[&PollSample]) -> WindowTally {
    let business = periods
        .iter()
        .fold(TimeDelta::zero(), |acc, p| acc + p.duration());
    if business.is_zero() {
        return WindowTally::closed();
    }

    let observed: Vec<&PollSample> = samples
        .iter()
        .copied()
        .filter(|s| periods.iter().any(|p| p.contains(s.timestamp_utc)))
        .collect();

    if observed.is_empty() {
        return WindowTally {
            business,
            uptime: business,
            downtime: TimeDelta::zero(),
        };
    }

    let midpoints: Vec<DateTime<Utc>> = observed
        .windows(2)
        .map(|pair| midpoint(pair[0].timestamp_utc, pair[1].timestamp_utc))
        .collect();

    let mut uptime = TimeDelta::zero();
    let mut downtime = TimeDelta::zero();
    for (i, sample) in observed.iter().enumerate() {
        let from = i.checked_sub(1).map(|j| midpoints[j]);
        let to = midpoints.get(i).copied();
        let covered = periods
            .iter()
            .fold(TimeDelta::zero(), |acc, p| acc + p.overlap(from, to));
        match sample.status {
            Status::Active => uptime = uptime + covered,
            Status::Inactive => downtime = downtime + covered,
        }
    }

    WindowTally {
        business,
        uptime,
        downtime,
    }
}

fn midpoint(a: DateTime<Utc>, b: DateTime<Utc>) -> DateTime<Utc> {
    a + (b - a) / 2
}
