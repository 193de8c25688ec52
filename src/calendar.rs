/// Business calendar
/// Weekly opening hours and timezone per store, with an explicit default-open policy

use chrono::{NaiveDateTime, TimeDelta, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::HashMap;

use crate::model::{BusinessInterval, LocalSpan, StoreId, StoreProfile};

/// Timezone assumed for stores without a profile
pub const DEFAULT_TIMEZONE: Tz = Tz::UTC;

#[derive(Debug, Clone, Default)]
pub struct BusinessCalendar {
    /// Spans indexed by `Weekday::num_days_from_monday`
    hours: HashMap<StoreId, [Vec<LocalSpan>; 7]>,
    timezones: HashMap<StoreId, Tz>,
}

impl BusinessCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_interval(&mut self, interval: BusinessInterval) {
        let days = self.hours.entry(interval.store_id.clone()).or_default();
        let spans = &mut days[interval.day.num_days_from_monday() as usize];
        let span = interval.span();
        let pos = spans.partition_point(|s| *s <= span);
        spans.insert(pos, span);
    }

    pub fn insert_profile(&mut self, profile: StoreProfile) {
        self.timezones.insert(profile.store_id, profile.timezone);
    }

    /// Opening spans for a local weekday, ordered by open time.
    ///
    /// A day without any configured spans is treated as open all day. This
    /// covers stores with no hours at all, which are therefore always open.
    pub fn open_intervals(&self, store_id: &StoreId, day: Weekday) -> Vec<LocalSpan> {
        match self.hours.get(store_id) {
            Some(days) if !days[day.num_days_from_monday() as usize].is_empty() => {
                days[day.num_days_from_monday() as usize].clone()
            }
            _ => vec![LocalSpan::FULL_DAY],
        }
    }

    pub fn timezone_of(&self, store_id: &StoreId) -> Tz {
        self.timezones
            .get(store_id)
            .copied()
            .unwrap_or(DEFAULT_TIMEZONE)
    }

    /// Whether the store appears in the hours or timezone tables
    pub fn knows(&self, store_id: &StoreId) -> bool {
        self.hours.contains_key(store_id) || self.timezones.contains_key(store_id)
    }

    pub fn store_ids(&self) -> impl Iterator<Item = &StoreId> {
        self.hours
            .keys()
            .chain(self.timezones.keys().filter(move |id| !self.hours.contains_key(*id)))
    }

    pub fn interval_count(&self) -> usize {
        self.hours
            .values()
            .map(|days| days.iter().map(Vec::len).sum::<usize>())
            .sum()
    }

    pub fn profile_count(&self) -> usize {
        self.timezones.len()
    }
}

/// Resolve a store-local wall-clock time to a UTC instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant. Times inside a
/// spring-forward gap do not exist and are shifted forward by one hour.
pub fn resolve_local(tz: &Tz, local: NaiveDateTime) -> chrono::DateTime<Utc> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + TimeDelta::hours(1))).earliest())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| local.and_utc())
}
