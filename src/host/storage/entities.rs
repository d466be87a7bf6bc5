use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{domain::SiteIdentity, error::TrackerError};

/// Keys of the persisted store. Names are shared with the extension pages, so they stay in
/// camelCase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    NudgeTimings,
    NudgeMessages,
    TimerSettings,
    SiteBlacklist,
    DoNotDisturb,
    SiteTimers,
    AnalyticsData,
    PomodoroSettings,
    SyncSettings,
    UserFeedback,
    AccessibilitySettings,
    SyncMetadata,
}

impl StorageKey {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKey::NudgeTimings => "nudgeTimings",
            StorageKey::NudgeMessages => "nudgeMessages",
            StorageKey::TimerSettings => "timerSettings",
            StorageKey::SiteBlacklist => "siteBlacklist",
            StorageKey::DoNotDisturb => "doNotDisturb",
            StorageKey::SiteTimers => "siteTimers",
            StorageKey::AnalyticsData => "analyticsData",
            StorageKey::PomodoroSettings => "pomodoroSettings",
            StorageKey::SyncSettings => "syncSettings",
            StorageKey::UserFeedback => "userFeedback",
            StorageKey::AccessibilitySettings => "accessibilitySettings",
            StorageKey::SyncMetadata => "syncMetadata",
        }
    }
}

/// Nudge thresholds in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NudgeTimings {
    pub first: u32,
    pub second: u32,
    pub third: u32,
}

impl Default for NudgeTimings {
    fn default() -> Self {
        Self {
            first: 5,
            second: 10,
            third: 15,
        }
    }
}

impl NudgeTimings {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.first < 1 {
            return Err(TrackerError::Validation(
                "Nudge timings must be at least 1 minute".into(),
            ));
        }
        if self.first >= self.second || self.second >= self.third {
            return Err(TrackerError::Validation(
                "Nudge timings must be in ascending order".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NudgeMessages {
    pub first: String,
    pub second: String,
    pub third: String,
}

impl Default for NudgeMessages {
    fn default() -> Self {
        Self {
            first: "Time flies when you're scrolling 🕊 — 5 minutes gone!".into(),
            second: "10 minutes already! Want to take a stretch break?".into(),
            third: "15 minutes here. Still intentional?".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimerPosition {
    TopRight,
    TopLeft,
    BottomRight,
    BottomLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerSize {
    Small,
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

/// Display preferences of the floating timer. The host only stores and serves them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerSettings {
    pub position: TimerPosition,
    pub size: TimerSize,
    pub opacity: f64,
    pub show_seconds: bool,
    pub theme: Theme,
    pub use_dark_mode: bool,
    pub high_contrast: bool,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            position: TimerPosition::TopRight,
            size: TimerSize::Medium,
            opacity: 0.8,
            show_seconds: true,
            theme: Theme::Light,
            use_dark_mode: false,
            high_contrast: false,
        }
    }
}

/// Durations are in minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PomodoroSettings {
    pub enabled: bool,
    pub work_duration: u32,
    pub short_break_duration: u32,
    pub long_break_duration: u32,
    pub sessions_before_long_break: u32,
    pub auto_start_breaks: bool,
    pub auto_start_work: bool,
    pub notifications: bool,
}

impl Default for PomodoroSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            work_duration: 25,
            short_break_duration: 5,
            long_break_duration: 15,
            sessions_before_long_break: 4,
            auto_start_breaks: true,
            auto_start_work: false,
            notifications: true,
        }
    }
}

impl PomodoroSettings {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.work_duration < 1
            || self.short_break_duration < 1
            || self.long_break_duration < 1
            || self.sessions_before_long_break < 1
        {
            return Err(TrackerError::Validation(
                "All durations must be at least 1 minute".into(),
            ));
        }
        Ok(())
    }

    pub fn work_seconds(&self) -> u64 {
        u64::from(self.work_duration) * 60
    }

    pub fn short_break_seconds(&self) -> u64 {
        u64::from(self.short_break_duration) * 60
    }

    pub fn long_break_seconds(&self) -> u64 {
        u64::from(self.long_break_duration) * 60
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncFrequency {
    #[default]
    Daily,
    Hourly,
    Realtime,
}

impl SyncFrequency {
    /// Time between scheduled syncs. Realtime syncs only follow settings changes.
    pub fn period(self) -> Option<chrono::Duration> {
        match self {
            SyncFrequency::Daily => Some(chrono::Duration::hours(24)),
            SyncFrequency::Hourly => Some(chrono::Duration::hours(1)),
            SyncFrequency::Realtime => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub enabled: bool,
    pub sync_frequency: SyncFrequency,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_synced: Option<DateTime<Utc>>,
    pub device_id: Option<String>,
    pub sync_token: Option<String>,
}

/// Written next to the mirrored keys, tells other devices who wrote them and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub device_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessibilitySettings {
    pub high_contrast: bool,
    pub large_text: bool,
    pub screen_reader_optimized: bool,
    pub reduced_motion: bool,
    pub keyboard_shortcuts: bool,
}

impl Default for AccessibilitySettings {
    fn default() -> Self {
        Self {
            high_contrast: false,
            large_text: false,
            screen_reader_optimized: false,
            reduced_motion: false,
            keyboard_shortcuts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntry {
    pub rating: Option<String>,
    #[serde(default)]
    pub likes: Option<String>,
    #[serde(default)]
    pub improvements: Option<String>,
    #[serde(default)]
    pub feature_requests: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub version: Option<String>,
}

impl FeedbackEntry {
    pub fn validate(&self) -> Result<(), TrackerError> {
        match self.rating.as_deref().map(str::trim) {
            Some(rating) if !rating.is_empty() => Ok(()),
            _ => Err(TrackerError::Validation("Please provide a rating.".into())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionStart(#[serde(with = "chrono::serde::ts_milliseconds")] pub DateTime<Utc>);

/// Per-site session start times. Entries only disappear on explicit reset or clear.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteTimers(BTreeMap<SiteIdentity, SessionStart>);

impl SiteTimers {
    pub fn get(&self, site: &SiteIdentity) -> Option<DateTime<Utc>> {
        self.0.get(site).map(|v| v.0)
    }

    pub fn insert(&mut self, site: SiteIdentity, start: DateTime<Utc>) {
        self.0.insert(site, SessionStart(start));
    }

    pub fn remove(&mut self, site: &SiteIdentity) -> Option<DateTime<Utc>> {
        self.0.remove(site).map(|v| v.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SiteIdentity, DateTime<Utc>)> {
        self.0.iter().map(|(site, start)| (site, start.0))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteStats {
    /// Seconds.
    pub total_time: u64,
    pub visits: u32,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_visit: Option<DateTime<Utc>>,
    /// Seconds per `YYYY-MM-DD` day.
    pub daily_data: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyticsData {
    pub sites: BTreeMap<String, SiteStats>,
    pub daily_totals: BTreeMap<String, u64>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_updated: Option<DateTime<Utc>>,
}
