//! Mirrors a fixed set of settings into a second store that some external tool keeps in sync
//! between machines. Best-effort and last-write-wins: the newest writer from another device
//! replaces our values wholesale.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    browser::{
        messages::{BrowserMessage, SyncStatusReport},
        BrowserApi,
    },
    error::TrackerError,
    host::storage::{
        entities::{StorageKey, SyncFrequency, SyncMetadata, SyncSettings},
        settings::{SettingsPatch, SettingsStore},
        store::KeyValueStore,
    },
};

/// Keys copied between the stores. Timers, analytics and feedback stay local.
pub const MIRRORED_KEYS: [StorageKey; 6] = [
    StorageKey::NudgeTimings,
    StorageKey::NudgeMessages,
    StorageKey::TimerSettings,
    StorageKey::SiteBlacklist,
    StorageKey::PomodoroSettings,
    StorageKey::AccessibilitySettings,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub enabled: bool,
    pub is_syncing: bool,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_sync_time: Option<DateTime<Utc>>,
    pub sync_error: Option<String>,
    pub device_id: Option<String>,
}

pub fn generate_device_id(now: DateTime<Utc>) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("device_{}_{}", now.timestamp_millis(), &random[..9])
}

pub struct SettingsSync<R> {
    remote: R,
    enabled: bool,
    is_syncing: bool,
    device_id: Option<String>,
    last_sync_time: Option<DateTime<Utc>>,
    sync_error: Option<String>,
}

impl<R: KeyValueStore> SettingsSync<R> {
    pub fn new(remote: R) -> Self {
        Self {
            remote,
            enabled: false,
            is_syncing: false,
            device_id: None,
            last_sync_time: None,
            sync_error: None,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Loads the sync settings and makes sure this device has an id.
    pub async fn initialize<S: KeyValueStore>(
        &mut self,
        local: &SettingsStore<S>,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let mut settings = local.sync_settings().await;
        if settings.device_id.is_none() {
            settings.device_id = Some(generate_device_id(now));
            local.save(StorageKey::SyncSettings, &settings).await?;
        }
        self.enabled = settings.enabled;
        self.device_id = settings.device_id;
        self.last_sync_time = settings.last_synced;
        Ok(())
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            enabled: self.enabled,
            is_syncing: self.is_syncing,
            last_sync_time: self.last_sync_time,
            sync_error: self.sync_error.clone(),
            device_id: self.device_id.clone(),
        }
    }

    /// Whether the schedule asks for a sync at `now`. Realtime syncs are never scheduled.
    pub fn is_due(&self, settings: &SyncSettings, now: DateTime<Utc>) -> bool {
        settings.enabled
            && settings.sync_frequency.period().is_some_and(|period| {
                settings
                    .last_synced
                    .map_or(true, |last| now - last >= period)
            })
    }

    /// Pulls newer settings from other devices, then pushes ours. Returns whether local
    /// settings were replaced. The outcome is broadcast to the extension pages either way.
    #[instrument(skip_all)]
    pub async fn sync<S: KeyValueStore>(
        &mut self,
        local: &SettingsStore<S>,
        browser: &impl BrowserApi,
        now: DateTime<Utc>,
    ) -> Result<bool, TrackerError> {
        if self.is_syncing {
            debug!("Sync already in progress");
            return Ok(false);
        }
        let mut settings = local.sync_settings().await;
        if !settings.enabled {
            return Ok(false);
        }

        self.is_syncing = true;
        let result = self.exchange(local, &settings, now).await;
        self.is_syncing = false;

        let report = match &result {
            Ok(applied) => {
                info!("Synced settings, remote applied: {applied}");
                settings.last_synced = Some(now);
                self.last_sync_time = Some(now);
                self.sync_error = None;
                local.save(StorageKey::SyncSettings, &settings).await?;
                SyncStatusReport {
                    success: true,
                    timestamp: Some(now.timestamp_millis()),
                    error: None,
                }
            }
            Err(e) => {
                warn!("Sync failed {e}");
                self.sync_error = Some("Failed to sync settings".into());
                SyncStatusReport {
                    success: false,
                    timestamp: None,
                    error: Some(e.to_string()),
                }
            }
        };
        if let Err(e) = browser.broadcast(BrowserMessage::SyncStatus(report)) {
            debug!("Nobody received sync status: {e}");
        }
        result
    }

    /// Enables or disables sync. Enabling runs a sync right away.
    pub async fn toggle<S: KeyValueStore>(
        &mut self,
        local: &SettingsStore<S>,
        browser: &impl BrowserApi,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<bool, TrackerError> {
        let mut settings = local.sync_settings().await;
        settings.enabled = enabled;
        if settings.device_id.is_none() {
            settings.device_id = Some(generate_device_id(now));
        }
        local.save(StorageKey::SyncSettings, &settings).await?;
        self.enabled = enabled;
        self.device_id = settings.device_id;

        if enabled {
            self.sync(local, browser, now).await
        } else {
            Ok(false)
        }
    }

    pub async fn update_frequency<S: KeyValueStore>(
        &mut self,
        local: &SettingsStore<S>,
        frequency: SyncFrequency,
    ) -> Result<(), TrackerError> {
        let mut settings = local.sync_settings().await;
        settings.sync_frequency = frequency;
        local.save(StorageKey::SyncSettings, &settings).await
    }

    /// Realtime sync hook, called after local settings were written.
    pub async fn settings_changed<S: KeyValueStore>(
        &mut self,
        local: &SettingsStore<S>,
        browser: &impl BrowserApi,
        now: DateTime<Utc>,
    ) -> Result<bool, TrackerError> {
        let settings = local.sync_settings().await;
        if settings.enabled && settings.sync_frequency == SyncFrequency::Realtime {
            self.sync(local, browser, now).await
        } else {
            Ok(false)
        }
    }

    async fn exchange<S: KeyValueStore>(
        &self,
        local: &SettingsStore<S>,
        settings: &SyncSettings,
        now: DateTime<Utc>,
    ) -> Result<bool, TrackerError> {
        let applied = self.pull(local, settings).await?;
        self.push(local, now).await?;
        Ok(applied)
    }

    async fn pull<S: KeyValueStore>(
        &self,
        local: &SettingsStore<S>,
        settings: &SyncSettings,
    ) -> Result<bool, TrackerError> {
        let metadata = self.remote_value(StorageKey::SyncMetadata).await?;
        let Some(metadata) = metadata else {
            return Ok(false);
        };
        let metadata: SyncMetadata = match serde_json::from_value(metadata) {
            Ok(v) => v,
            Err(e) => {
                warn!("Ignoring remote settings with broken metadata {e}");
                return Ok(false);
            }
        };

        if Some(&metadata.device_id) == self.device_id.as_ref() {
            return Ok(false);
        }
        if settings
            .last_synced
            .is_some_and(|last| metadata.timestamp <= last)
        {
            debug!("Remote settings from {} are stale", metadata.device_id);
            return Ok(false);
        }

        info!("Applying settings from {}", metadata.device_id);
        let patch = SettingsPatch {
            nudge_timings: self.remote_typed(StorageKey::NudgeTimings).await?,
            nudge_messages: self.remote_typed(StorageKey::NudgeMessages).await?,
            timer_settings: self.remote_typed(StorageKey::TimerSettings).await?,
            site_blacklist: self.remote_typed(StorageKey::SiteBlacklist).await?,
            pomodoro_settings: self.remote_typed(StorageKey::PomodoroSettings).await?,
            accessibility_settings: self
                .remote_typed(StorageKey::AccessibilitySettings)
                .await?,
        };
        // Invalid parts are skipped, the rest still lands.
        match local.apply_patch(patch).await {
            Err(TrackerError::Validation(reason)) => {
                warn!("Skipped remote settings from {}: {reason}", metadata.device_id)
            }
            other => other?,
        }
        Ok(true)
    }

    async fn push<S: KeyValueStore>(
        &self,
        local: &SettingsStore<S>,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let snapshot = local.snapshot().await;
        let values = [
            (StorageKey::NudgeTimings, to_value(&snapshot.nudge_timings)?),
            (StorageKey::NudgeMessages, to_value(&snapshot.nudge_messages)?),
            (StorageKey::TimerSettings, to_value(&snapshot.timer_settings)?),
            (StorageKey::SiteBlacklist, to_value(&snapshot.site_blacklist)?),
            (
                StorageKey::PomodoroSettings,
                to_value(&snapshot.pomodoro_settings)?,
            ),
            (
                StorageKey::AccessibilitySettings,
                to_value(&snapshot.accessibility_settings)?,
            ),
        ];
        for (key, value) in values {
            self.set_remote(key, value).await?;
        }

        let metadata = SyncMetadata {
            device_id: self.device_id.clone().unwrap_or_default(),
            timestamp: now,
            version: env!("CARGO_PKG_VERSION").into(),
        };
        self.set_remote(StorageKey::SyncMetadata, to_value(&metadata)?)
            .await
    }

    /// A remote value of the wrong shape is treated as missing.
    async fn remote_typed<T: DeserializeOwned>(
        &self,
        key: StorageKey,
    ) -> Result<Option<T>, TrackerError> {
        let Some(value) = self.remote_value(key).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_value(value)
            .inspect_err(|e| warn!("Ignoring remote {}: {e}", key.as_str()))
            .ok())
    }

    async fn remote_value(&self, key: StorageKey) -> Result<Option<Value>, TrackerError> {
        self.remote
            .get(key.as_str())
            .await
            .map(|v| v.filter(|v| !v.is_null()))
            .map_err(|e| TrackerError::storage(format!("remote {}", key.as_str()), format!("{e:?}")))
    }

    async fn set_remote(&self, key: StorageKey, value: Value) -> Result<(), TrackerError> {
        self.remote
            .set(key.as_str(), value)
            .await
            .map_err(|e| TrackerError::storage(format!("remote {}", key.as_str()), format!("{e:?}")))
    }
}

fn to_value(value: &impl Serialize) -> Result<Value, TrackerError> {
    serde_json::to_value(value).map_err(|e| TrackerError::storage("sync", e))
}
