//! Wire contract between the host and the extension. Inbound messages come from the extension
//! shim (tab events) and from the extension pages (commands), outbound messages are relayed by
//! the shim to tabs, to the runtime or to the notifications api.

use serde::{Deserialize, Serialize};

use crate::{
    domain::SiteIdentity,
    host::{
        pomodoro::PomodoroView,
        storage::{
            entities::{AccessibilitySettings, AnalyticsData, FeedbackEntry, SyncFrequency},
            settings::{SettingsPatch, SettingsSnapshot},
        },
        sync::SyncStatus,
        tracker::nudge::NudgeLevel,
    },
};

pub type TabId = i64;
pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Loading,
    Complete,
}

/// One inbound frame. Messages with a `requestId` expect exactly one reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEnvelope {
    #[serde(default)]
    pub request_id: Option<RequestId>,
    pub message: InboundMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum InboundMessage {
    #[serde(rename_all = "camelCase")]
    TabActivated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TabUpdated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        status: Option<TabStatus>,
    },
    #[serde(rename_all = "camelCase")]
    TabRemoved { tab_id: TabId },

    GetSettings,
    UpdateSettings(SettingsPatch),
    TimerPause,
    TimerResume,
    TimerReset,
    ToggleDoNotDisturb(bool),
    AddToBlacklist(String),
    RemoveFromBlacklist(String),
    ClearSiteTimers,

    StartPomodoro,
    PausePomodoro,
    StopPomodoro,
    SkipBreak,
    GetPomodoroState,

    GetAnalyticsData,
    ClearAnalyticsData,
    SubmitFeedback(FeedbackEntry),
    UpdateAccessibility(AccessibilitySettings),

    SyncData,
    ToggleSync(bool),
    UpdateSyncFrequency(SyncFrequency),
    GetSyncStatus,
}

/// Messages pushed from the host to content scripts and extension pages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum BrowserMessage {
    #[serde(rename_all = "camelCase")]
    TimerUpdate {
        elapsed_seconds: u64,
        domain: SiteIdentity,
    },
    ShowNudge {
        level: NudgeLevel,
        message: String,
    },
    PomodoroUpdate(PomodoroView),
    SyncStatus(SyncStatusReport),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ack {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Payload of a reply. Serialized without a tag, the requester knows what it asked for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ack(Ack),
    Settings(Box<SettingsSnapshot>),
    Pomodoro(PomodoroView),
    Analytics(Box<AnalyticsData>),
    Sync(SyncStatus),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

/// One outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "target", rename_all = "camelCase")]
pub enum Outbound {
    #[serde(rename_all = "camelCase")]
    Tab {
        tab_id: TabId,
        message: BrowserMessage,
    },
    Runtime {
        message: BrowserMessage,
    },
    Notification(Notification),
    #[serde(rename_all = "camelCase")]
    Reply {
        request_id: RequestId,
        payload: Response,
    },
}
