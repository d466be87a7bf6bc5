//! Per-site and per-day usage aggregate. The background credits time as the site timer ticks
//! and periodically folds it into the stored [AnalyticsData].

use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, Utc};
use clap::ValueEnum;

use crate::{
    domain::SiteIdentity,
    host::storage::entities::{AnalyticsData, SiteStats},
    utils::time::{date_key, elapsed_seconds},
};

/// Longest gap between two credits that still counts as browsing. Anything longer means the
/// machine slept or the host was starved.
pub const MAX_CREDIT_SECONDS: u64 = 60;

/// Collects usage in memory between flushes.
#[derive(Debug, Default)]
pub struct UsageRecorder {
    cursor: Option<(SiteIdentity, DateTime<Utc>)>,
    pending_sites: BTreeMap<String, SiteStats>,
    pending_days: BTreeMap<String, u64>,
}

impl UsageRecorder {
    /// Counts a visit and starts crediting time to `site`.
    pub fn visit(&mut self, site: SiteIdentity, now: DateTime<Utc>) {
        let stats = self.pending_sites.entry(site.to_string()).or_default();
        stats.visits += 1;
        stats.last_visit = Some(now);
        self.track(site, now);
    }

    /// Starts crediting time to `site` without counting a visit.
    pub fn track(&mut self, site: SiteIdentity, now: DateTime<Utc>) {
        self.cursor = Some((site, now));
    }

    pub fn stop(&mut self) {
        self.cursor = None;
    }

    /// Credits the time since the previous credit to the tracked site.
    pub fn credit(&mut self, now: DateTime<Utc>) {
        let Some((site, last)) = self.cursor.as_mut() else {
            return;
        };
        let seconds = elapsed_seconds(*last, now).min(MAX_CREDIT_SECONDS);
        *last = now;
        if seconds == 0 {
            return;
        }

        let day = date_key(now.date_naive());
        let stats = self.pending_sites.entry(site.to_string()).or_default();
        stats.total_time += seconds;
        stats.last_visit = Some(now);
        *stats.daily_data.entry(day.clone()).or_default() += seconds;
        *self.pending_days.entry(day).or_default() += seconds;
    }

    pub fn is_empty(&self) -> bool {
        self.pending_sites.is_empty() && self.pending_days.is_empty()
    }

    /// Folds everything collected so far into `data`. Returns false if there was nothing to add.
    pub fn flush_into(&mut self, data: &mut AnalyticsData, now: DateTime<Utc>) -> bool {
        if self.is_empty() {
            return false;
        }

        for (site, pending) in std::mem::take(&mut self.pending_sites) {
            let stats = data.sites.entry(site).or_default();
            stats.total_time += pending.total_time;
            stats.visits += pending.visits;
            stats.last_visit = stats.last_visit.max(pending.last_visit);
            for (day, seconds) in pending.daily_data {
                *stats.daily_data.entry(day).or_default() += seconds;
            }
        }
        for (day, seconds) in std::mem::take(&mut self.pending_days) {
            *data.daily_totals.entry(day).or_default() += seconds;
        }
        data.last_updated = Some(now);
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Period {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Period {
    pub fn days(self) -> u64 {
        match self {
            Period::Daily => 1,
            Period::Weekly => 7,
            Period::Monthly => 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsSummary {
    /// Site with the most time in the period.
    pub most_visited: Option<(String, u64)>,
    pub total_time: u64,
    /// Total time divided by the days of the period that have any usage.
    pub daily_average: u64,
    pub site_count: usize,
    /// Sorted by time, most used first.
    pub sites: Vec<(String, u64)>,
    /// Oldest day first, days without usage included.
    pub trend: Vec<(String, u64)>,
}

/// Summarizes the `period` ending with `today` (inclusive).
pub fn summarize(data: &AnalyticsData, period: Period, today: NaiveDate) -> AnalyticsSummary {
    let days = (0..period.days())
        .rev()
        .filter_map(|back| today.checked_sub_days(Days::new(back)))
        .map(date_key)
        .collect::<Vec<_>>();

    let mut sites = data
        .sites
        .iter()
        .map(|(site, stats)| {
            let seconds = days
                .iter()
                .filter_map(|day| stats.daily_data.get(day))
                .sum::<u64>();
            (site.clone(), seconds)
        })
        .filter(|(_, seconds)| *seconds > 0)
        .collect::<Vec<_>>();
    sites.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let trend = days
        .iter()
        .map(|day| (day.clone(), data.daily_totals.get(day).copied().unwrap_or(0)))
        .collect::<Vec<_>>();

    let total_time = sites.iter().map(|(_, seconds)| seconds).sum::<u64>();
    let active_days = trend.iter().filter(|(_, seconds)| *seconds > 0).count().max(1) as u64;

    AnalyticsSummary {
        most_visited: sites.first().cloned(),
        total_time,
        daily_average: total_time / active_days,
        site_count: sites.len(),
        sites,
        trend,
    }
}
