use chrono::{DateTime, Utc};

use crate::{browser::messages::TabId, domain::SiteIdentity, utils::time::elapsed_seconds};

use super::nudge::NudgeFlags;

/// Site currently accruing time and the tab showing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub tab_id: TabId,
    pub site: SiteIdentity,
    pub started_at: DateTime<Utc>,
}

/// State of the site timer. There is either one active session or none, a site and its start
/// time can't exist without each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerSession {
    active: Option<ActiveSession>,
    pub paused: bool,
    pub nudges: NudgeFlags,
}

impl TimerSession {
    pub fn active(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    pub fn site(&self) -> Option<&SiteIdentity> {
        self.active.as_ref().map(|v| &v.site)
    }

    /// Replaces whatever was active. Nudges start from a clean slate.
    pub fn begin(&mut self, tab_id: TabId, site: SiteIdentity, started_at: DateTime<Utc>) {
        self.active = Some(ActiveSession {
            tab_id,
            site,
            started_at,
        });
        self.nudges.reset();
    }

    /// Returns the session that was active.
    pub fn tear_down(&mut self) -> Option<ActiveSession> {
        self.paused = false;
        self.nudges.reset();
        self.active.take()
    }

    pub fn restart_at(&mut self, now: DateTime<Utc>) {
        if let Some(active) = self.active.as_mut() {
            active.started_at = now;
        }
        self.nudges.reset();
    }

    /// Whether the session is accruing time right now.
    pub fn is_running(&self) -> bool {
        self.active.is_some() && !self.paused
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<u64> {
        self.active
            .as_ref()
            .map(|v| elapsed_seconds(v.started_at, now))
    }
}
