//! Site timer. Follows the focused tab, keeps at most one site accruing time and nudges the
//! user when thresholds pass.

pub mod nudge;
pub mod session;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use nudge::evaluate_nudges;
use session::TimerSession;
use tracing::{debug, info, instrument, warn};

use crate::{
    browser::{
        deliver_to_tab,
        messages::{BrowserMessage, TabId, TabStatus},
        BrowserApi,
    },
    domain::{extract_identity, SiteIdentity},
    error::TrackerError,
    host::{
        analytics::UsageRecorder,
        storage::{entities::StorageKey, store::KeyValueStore},
        HostContext,
    },
    utils::time::elapsed_seconds,
};

#[derive(Debug, Default)]
pub struct Tracker {
    session: TimerSession,
    /// Last known url of every tab the browser told us about.
    tabs: HashMap<TabId, Option<String>>,
    focused_tab: Option<TabId>,
    /// Elapsed minute of the active session that was last written to the store.
    persisted_minute: Option<u64>,
    usage: UsageRecorder,
}

impl Tracker {
    pub fn session(&self) -> &TimerSession {
        &self.session
    }

    pub fn focused_tab(&self) -> Option<TabId> {
        self.focused_tab
    }

    pub async fn on_tab_activated<S: KeyValueStore, B: BrowserApi>(
        &mut self,
        ctx: &HostContext<S, B>,
        tab_id: TabId,
        url: Option<String>,
    ) -> Result<(), TrackerError> {
        if let Some(url) = url {
            self.tabs.insert(tab_id, Some(url));
        }
        self.focused_tab = Some(tab_id);
        self.handle_tab_change(ctx, tab_id).await
    }

    /// Only a finished navigation of the focused tab that lands on a different site switches
    /// the session.
    pub async fn on_tab_updated<S: KeyValueStore, B: BrowserApi>(
        &mut self,
        ctx: &HostContext<S, B>,
        tab_id: TabId,
        url: Option<String>,
        status: Option<TabStatus>,
    ) -> Result<(), TrackerError> {
        let known_url = self.tabs.entry(tab_id).or_default();
        if url.is_some() {
            *known_url = url;
        }

        if status != Some(TabStatus::Complete) || self.focused_tab != Some(tab_id) {
            return Ok(());
        }
        let identity = known_url.as_deref().and_then(|v| extract_identity(v).ok());
        if identity.as_ref() != self.session.site() {
            self.handle_tab_change(ctx, tab_id).await?;
        }
        Ok(())
    }

    pub async fn on_tab_removed<S: KeyValueStore, B: BrowserApi>(
        &mut self,
        ctx: &HostContext<S, B>,
        tab_id: TabId,
    ) -> Result<(), TrackerError> {
        self.tabs.remove(&tab_id);
        if self.focused_tab == Some(tab_id) {
            self.focused_tab = None;
        }
        if self.session.active().is_some_and(|v| v.tab_id == tab_id) {
            let result = self.persist(ctx).await;
            self.tear_down();
            result?;
        }
        Ok(())
    }

    /// Switches the session to whatever `tab_id` shows. The outgoing session is persisted
    /// first, and an untrackable or blacklisted site leaves no session at all.
    #[instrument(skip(self, ctx))]
    pub async fn handle_tab_change<S: KeyValueStore, B: BrowserApi>(
        &mut self,
        ctx: &HostContext<S, B>,
        tab_id: TabId,
    ) -> Result<(), TrackerError> {
        if self.session.active().is_some() {
            if let Err(e) = self.persist(ctx).await {
                warn!("Couldn't persist outgoing session {e}");
            }
        }

        let site = match self.resolve(tab_id) {
            Ok(site) => site,
            Err(e @ TrackerError::TabNotFound(_)) => {
                self.tear_down();
                return Err(e);
            }
            Err(e) => {
                debug!("Not tracking tab {tab_id}: {e}");
                self.tear_down();
                return Ok(());
            }
        };

        if ctx.store.blacklist().await.contains(&site) {
            debug!("{site} is blacklisted");
            self.tear_down();
            return Ok(());
        }

        let now = ctx.now();
        let started_at = ctx.store.site_timers().await.get(&site).unwrap_or(now);
        info!("Tracking {site} from {started_at}");

        self.usage.visit(site.clone(), now);
        self.session.begin(tab_id, site, started_at);
        self.session.paused = false;
        self.persisted_minute = self.session.elapsed(now).map(|v| v / 60);

        self.tick(ctx).await
    }

    /// One step of the site timer: nudges, snapshot for the tab and periodic persistence.
    pub async fn tick<S: KeyValueStore, B: BrowserApi>(
        &mut self,
        ctx: &HostContext<S, B>,
    ) -> Result<(), TrackerError> {
        if !self.session.is_running() {
            return Ok(());
        }
        let now = ctx.now();
        let Some(active) = self.session.active() else {
            return Ok(());
        };
        let (tab_id, site) = (active.tab_id, active.site.clone());
        let elapsed = elapsed_seconds(active.started_at, now);

        let timings = ctx.store.nudge_timings().await;
        let do_not_disturb = ctx.store.do_not_disturb().await;
        let levels = evaluate_nudges(elapsed, &timings, &mut self.session.nudges, do_not_disturb);
        if !levels.is_empty() {
            let messages = ctx.store.nudge_messages().await;
            for level in levels {
                info!("Nudging {level:?} on {site} after {elapsed}s");
                deliver_to_tab(
                    &ctx.browser,
                    tab_id,
                    BrowserMessage::ShowNudge {
                        level,
                        message: level.message(&messages).to_string(),
                    },
                );
            }
        }

        deliver_to_tab(
            &ctx.browser,
            tab_id,
            BrowserMessage::TimerUpdate {
                elapsed_seconds: elapsed,
                domain: site,
            },
        );

        self.usage.credit(now);

        let minute = elapsed / 60;
        if elapsed % 60 == 0 || self.persisted_minute.map_or(true, |v| v < minute) {
            self.persist(ctx).await?;
        }
        Ok(())
    }

    pub fn pause(&mut self, now: DateTime<Utc>) {
        if self.session.active().is_some() && !self.session.paused {
            self.usage.credit(now);
            self.usage.stop();
        }
        self.session.paused = true;
    }

    pub fn resume(&mut self, now: DateTime<Utc>) {
        if self.session.paused {
            if let Some(site) = self.session.site() {
                self.usage.track(site.clone(), now);
            }
        }
        self.session.paused = false;
    }

    /// Restarts the active site from zero, both in memory and in the store.
    pub async fn reset<S: KeyValueStore, B: BrowserApi>(
        &mut self,
        ctx: &HostContext<S, B>,
    ) -> Result<(), TrackerError> {
        if self.session.active().is_none() {
            return Ok(());
        }
        self.session.restart_at(ctx.now());
        self.persist(ctx).await
    }

    /// Forgets every stored session start. The active site keeps being tracked from now.
    pub async fn clear_site_timers<S: KeyValueStore, B: BrowserApi>(
        &mut self,
        ctx: &HostContext<S, B>,
    ) -> Result<(), TrackerError> {
        ctx.store.remove(StorageKey::SiteTimers).await?;
        if self.session.active().is_some() {
            self.session.restart_at(ctx.now());
            self.persisted_minute = Some(0);
        }
        Ok(())
    }

    /// Re-resolves the focused tab after the blacklist changed.
    pub async fn refresh_focus<S: KeyValueStore, B: BrowserApi>(
        &mut self,
        ctx: &HostContext<S, B>,
    ) -> Result<(), TrackerError> {
        let Some(tab_id) = self.focused_tab else {
            return Ok(());
        };
        let blacklist = ctx.store.blacklist().await;
        let target = self.resolve(tab_id).ok().filter(|v| !blacklist.contains(v));
        if target.as_ref() != self.session.site() {
            self.handle_tab_change(ctx, tab_id).await?;
        }
        Ok(())
    }

    /// Writes pending analytics and the active session start.
    pub async fn persist<S: KeyValueStore, B: BrowserApi>(
        &mut self,
        ctx: &HostContext<S, B>,
    ) -> Result<(), TrackerError> {
        let now = ctx.now();
        let analytics = self.flush_analytics(ctx, now).await;

        if let Some(active) = self.session.active() {
            let mut timers = ctx.store.site_timers().await;
            timers.insert(active.site.clone(), active.started_at);
            ctx.store.save(StorageKey::SiteTimers, &timers).await?;
            debug!("Persisted start of {}", active.site);
            self.persisted_minute = self.session.elapsed(now).map(|v| v / 60);
        }
        analytics
    }

    /// Folds the usage collected since the last flush into the stored aggregate.
    pub async fn flush_analytics<S: KeyValueStore, B: BrowserApi>(
        &mut self,
        ctx: &HostContext<S, B>,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        self.usage.credit(now);
        if self.usage.is_empty() {
            return Ok(());
        }
        let mut data = ctx.store.analytics().await;
        self.usage.flush_into(&mut data, now);
        ctx.store.save(StorageKey::AnalyticsData, &data).await
    }

    fn resolve(&self, tab_id: TabId) -> Result<SiteIdentity, TrackerError> {
        let url = self
            .tabs
            .get(&tab_id)
            .ok_or(TrackerError::TabNotFound(tab_id))?;
        match url {
            Some(url) => extract_identity(url),
            None => Err(TrackerError::InvalidUrl(String::new())),
        }
    }

    fn tear_down(&mut self) {
        if let Some(previous) = self.session.tear_down() {
            debug!("Stopped tracking {}", previous.site);
        }
        self.usage.stop();
        self.persisted_minute = None;
    }
}
