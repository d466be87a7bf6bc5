use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

use crate::{domain::SiteBlacklist, error::TrackerError};

use super::{
    entities::{
        AccessibilitySettings, AnalyticsData, FeedbackEntry, NudgeMessages, NudgeTimings,
        PomodoroSettings, SiteTimers, StorageKey, SyncSettings, TimerSettings,
    },
    store::KeyValueStore,
};

/// Everything the extension pages need to render, as returned for `getSettings`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSnapshot {
    pub nudge_timings: NudgeTimings,
    pub nudge_messages: NudgeMessages,
    pub timer_settings: TimerSettings,
    pub site_blacklist: SiteBlacklist,
    pub do_not_disturb: bool,
    pub pomodoro_settings: PomodoroSettings,
    pub accessibility_settings: AccessibilitySettings,
}

/// Partial update sent with `updateSettings`. Missing parts stay as they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub nudge_timings: Option<NudgeTimings>,
    pub nudge_messages: Option<NudgeMessages>,
    pub timer_settings: Option<TimerSettings>,
    pub site_blacklist: Option<Vec<String>>,
    pub pomodoro_settings: Option<PomodoroSettings>,
    pub accessibility_settings: Option<AccessibilitySettings>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Typed access to the persisted store. Reads never fail: a missing key, a broken store or a
/// value of the wrong shape all fall back to the documented default.
pub struct SettingsStore<S> {
    store: S,
}

impl<S: KeyValueStore> SettingsStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    pub async fn load<T: DeserializeOwned>(&self, key: StorageKey) -> Option<T> {
        let value = match self.store.get(key.as_str()).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(e) => {
                warn!("{}", TrackerError::storage(key.as_str(), format!("{e:?}")));
                return None;
            }
        };
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Stored {} has unexpected shape {e}", key.as_str());
                None
            }
        }
    }

    pub async fn load_or_default<T: DeserializeOwned + Default>(&self, key: StorageKey) -> T {
        self.load(key).await.unwrap_or_default()
    }

    pub async fn save<T: Serialize>(&self, key: StorageKey, value: &T) -> Result<(), TrackerError> {
        let value =
            serde_json::to_value(value).map_err(|e| TrackerError::storage(key.as_str(), e))?;
        self.store
            .set(key.as_str(), value)
            .await
            .map_err(|e| TrackerError::storage(key.as_str(), format!("{e:?}")))
    }

    pub async fn remove(&self, key: StorageKey) -> Result<(), TrackerError> {
        self.store
            .remove(key.as_str())
            .await
            .map_err(|e| TrackerError::storage(key.as_str(), format!("{e:?}")))
    }

    /// Writes defaults for keys that were never set. Existing values are left alone.
    pub async fn initialize_defaults(&self) -> Result<(), TrackerError> {
        async fn ensure<S: KeyValueStore, T: Serialize + Default>(
            settings: &SettingsStore<S>,
            key: StorageKey,
        ) -> Result<(), TrackerError> {
            let present = settings
                .store
                .get(key.as_str())
                .await
                .map_err(|e| TrackerError::storage(key.as_str(), format!("{e:?}")))?
                .is_some_and(|v| !v.is_null());
            if !present {
                info!("Initializing {} with defaults", key.as_str());
                settings.save(key, &T::default()).await?;
            }
            Ok(())
        }

        ensure::<S, NudgeTimings>(self, StorageKey::NudgeTimings).await?;
        ensure::<S, NudgeMessages>(self, StorageKey::NudgeMessages).await?;
        ensure::<S, TimerSettings>(self, StorageKey::TimerSettings).await?;
        ensure::<S, SiteBlacklist>(self, StorageKey::SiteBlacklist).await?;
        ensure::<S, bool>(self, StorageKey::DoNotDisturb).await?;
        ensure::<S, SiteTimers>(self, StorageKey::SiteTimers).await?;
        Ok(())
    }

    pub async fn nudge_timings(&self) -> NudgeTimings {
        self.load_or_default(StorageKey::NudgeTimings).await
    }

    pub async fn nudge_messages(&self) -> NudgeMessages {
        self.load_or_default(StorageKey::NudgeMessages).await
    }

    pub async fn timer_settings(&self) -> TimerSettings {
        self.load_or_default(StorageKey::TimerSettings).await
    }

    /// Stored lists written by older pages may hold duplicates, they are dropped on read.
    pub async fn blacklist(&self) -> SiteBlacklist {
        let entries: Vec<String> = self.load_or_default(StorageKey::SiteBlacklist).await;
        SiteBlacklist::from_entries(entries)
    }

    pub async fn do_not_disturb(&self) -> bool {
        self.load_or_default(StorageKey::DoNotDisturb).await
    }

    pub async fn site_timers(&self) -> SiteTimers {
        self.load_or_default(StorageKey::SiteTimers).await
    }

    pub async fn pomodoro_settings(&self) -> PomodoroSettings {
        self.load_or_default(StorageKey::PomodoroSettings).await
    }

    pub async fn sync_settings(&self) -> SyncSettings {
        self.load_or_default(StorageKey::SyncSettings).await
    }

    pub async fn accessibility_settings(&self) -> AccessibilitySettings {
        self.load_or_default(StorageKey::AccessibilitySettings).await
    }

    pub async fn analytics(&self) -> AnalyticsData {
        self.load_or_default(StorageKey::AnalyticsData).await
    }

    pub async fn feedback(&self) -> Vec<FeedbackEntry> {
        self.load_or_default(StorageKey::UserFeedback).await
    }

    pub async fn snapshot(&self) -> SettingsSnapshot {
        SettingsSnapshot {
            nudge_timings: self.nudge_timings().await,
            nudge_messages: self.nudge_messages().await,
            timer_settings: self.timer_settings().await,
            site_blacklist: self.blacklist().await,
            do_not_disturb: self.do_not_disturb().await,
            pomodoro_settings: self.pomodoro_settings().await,
            accessibility_settings: self.accessibility_settings().await,
        }
    }

    /// Writes every valid part of the patch. Invalid parts are skipped and reported together
    /// in the returned error.
    pub async fn apply_patch(&self, patch: SettingsPatch) -> Result<(), TrackerError> {
        let mut rejected = vec![];

        if let Some(timings) = patch.nudge_timings {
            match timings.validate() {
                Ok(()) => self.save(StorageKey::NudgeTimings, &timings).await?,
                Err(e) => rejected.push(e.to_string()),
            }
        }
        if let Some(messages) = patch.nudge_messages {
            self.save(StorageKey::NudgeMessages, &messages).await?;
        }
        if let Some(timer) = patch.timer_settings {
            self.save(StorageKey::TimerSettings, &timer).await?;
        }
        if let Some(entries) = patch.site_blacklist {
            self.save(StorageKey::SiteBlacklist, &SiteBlacklist::from_entries(entries))
                .await?;
        }
        if let Some(pomodoro) = patch.pomodoro_settings {
            match pomodoro.validate() {
                Ok(()) => self.save(StorageKey::PomodoroSettings, &pomodoro).await?,
                Err(e) => rejected.push(e.to_string()),
            }
        }
        if let Some(accessibility) = patch.accessibility_settings {
            self.save(StorageKey::AccessibilitySettings, &accessibility)
                .await?;
        }

        if rejected.is_empty() {
            Ok(())
        } else {
            Err(TrackerError::Validation(rejected.join("; ")))
        }
    }
}
