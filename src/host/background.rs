//! The single owner of all mutable host state. Events are handled one at a time, each one
//! completes (awaits included) before the next is taken from the queue.

use anyhow::Result;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    browser::{
        deliver_to_tab,
        messages::{Ack, BrowserMessage, InboundEnvelope, InboundMessage, Response},
        BrowserApi,
    },
    error::TrackerError,
    host::{
        event::{HostEvent, TickKind},
        pomodoro::{Pomodoro, TickOutcome},
        storage::{entities::StorageKey, store::KeyValueStore},
        sync::SettingsSync,
        tracker::Tracker,
        HostContext,
    },
};

pub struct Background<S, B, R> {
    ctx: HostContext<S, B>,
    tracker: Tracker,
    pomodoro: Pomodoro,
    sync: SettingsSync<R>,
}

impl<S: KeyValueStore, B: BrowserApi, R: KeyValueStore> Background<S, B, R> {
    pub fn new(ctx: HostContext<S, B>, sync: SettingsSync<R>) -> Self {
        Self {
            ctx,
            tracker: Tracker::default(),
            pomodoro: Pomodoro::new(Default::default()),
            sync,
        }
    }

    /// Writes missing defaults and loads settings the state machines depend on.
    pub async fn initialize(&mut self) -> Result<(), TrackerError> {
        self.pomodoro = Pomodoro::new(self.ctx.store.pomodoro_settings().await);
        let defaults = self.ctx.store.initialize_defaults().await;
        self.sync.initialize(&self.ctx.store, self.ctx.now()).await?;
        defaults
    }

    pub async fn run(mut self, mut receiver: Receiver<HostEvent>) -> Result<()> {
        while let Some(event) = receiver.recv().await {
            debug!("Processing event {:?}", event);
            let span = info_span!("Handling event");
            if let Err(e) = self.handle(event.clone()).instrument(span).await {
                error!("Error processing event {:?}: {e}", event)
            }
        }
        receiver.close();

        info!("Event queue is closed, saving state");
        self.tracker.persist(&self.ctx).await?;
        Ok(())
    }

    pub async fn handle(&mut self, event: HostEvent) -> Result<(), TrackerError> {
        match event {
            HostEvent::Tick(TickKind::Timer) => self.tracker.tick(&self.ctx).await,
            HostEvent::Tick(TickKind::Pomodoro) => self.pomodoro_tick().await,
            HostEvent::Tick(TickKind::Sync) => self.scheduled_sync().await,
            HostEvent::Inbound(envelope) => self.handle_envelope(envelope).await,
        }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn pomodoro(&self) -> &Pomodoro {
        &self.pomodoro
    }

    /// Requests get exactly one reply, a failed one carries the error in the ack.
    async fn handle_envelope(&mut self, envelope: InboundEnvelope) -> Result<(), TrackerError> {
        let InboundEnvelope {
            request_id,
            message,
        } = envelope;
        let outcome = self.dispatch(message).await;

        let Some(request_id) = request_id else {
            return outcome.map(|_| ());
        };
        let payload = match outcome {
            Ok(Some(response)) => response,
            Ok(None) => Response::Ack(Ack::ok()),
            Err(e) => {
                warn!("Request {request_id} failed {e}");
                Response::Ack(Ack::failed(e))
            }
        };
        self.ctx.browser.reply(request_id, payload)
    }

    async fn dispatch(&mut self, message: InboundMessage) -> Result<Option<Response>, TrackerError> {
        let ctx = &self.ctx;
        let now = ctx.now();
        match message {
            InboundMessage::TabActivated { tab_id, url } => {
                self.tracker.on_tab_activated(ctx, tab_id, url).await?;
            }
            InboundMessage::TabUpdated {
                tab_id,
                url,
                status,
            } => {
                self.tracker.on_tab_updated(ctx, tab_id, url, status).await?;
            }
            InboundMessage::TabRemoved { tab_id } => {
                self.tracker.on_tab_removed(ctx, tab_id).await?;
            }

            InboundMessage::GetSettings => {
                return Ok(Some(Response::Settings(Box::new(ctx.store.snapshot().await))));
            }
            InboundMessage::UpdateSettings(patch) => {
                let pomodoro_changed = patch.pomodoro_settings.is_some();
                let blacklist_changed = patch.site_blacklist.is_some();
                let result = ctx.store.apply_patch(patch).await;
                if pomodoro_changed {
                    self.pomodoro
                        .settings_changed(ctx.store.pomodoro_settings().await);
                }
                if blacklist_changed {
                    self.tracker.refresh_focus(ctx).await?;
                }
                self.settings_written().await;
                result?;
            }
            InboundMessage::TimerPause => self.tracker.pause(now),
            InboundMessage::TimerResume => self.tracker.resume(now),
            InboundMessage::TimerReset => self.tracker.reset(ctx).await?,
            InboundMessage::ToggleDoNotDisturb(enabled) => {
                info!("Do not disturb {enabled}");
                ctx.store.save(StorageKey::DoNotDisturb, &enabled).await?;
            }
            InboundMessage::AddToBlacklist(domain) => {
                let mut blacklist = ctx.store.blacklist().await;
                if !blacklist.insert(&domain) {
                    return Err(TrackerError::Validation(format!(
                        "{domain:?} is empty or already blacklisted"
                    )));
                }
                ctx.store.save(StorageKey::SiteBlacklist, &blacklist).await?;
                self.tracker.refresh_focus(ctx).await?;
                self.settings_written().await;
            }
            InboundMessage::RemoveFromBlacklist(domain) => {
                let mut blacklist = ctx.store.blacklist().await;
                if blacklist.remove(&domain) {
                    ctx.store.save(StorageKey::SiteBlacklist, &blacklist).await?;
                    self.tracker.refresh_focus(ctx).await?;
                    self.settings_written().await;
                }
            }
            InboundMessage::ClearSiteTimers => self.tracker.clear_site_timers(ctx).await?,

            InboundMessage::StartPomodoro => {
                if self.pomodoro.start(now) {
                    self.push_pomodoro();
                }
            }
            InboundMessage::PausePomodoro => {
                if self.pomodoro.pause(now) {
                    self.push_pomodoro();
                }
            }
            InboundMessage::StopPomodoro => {
                self.pomodoro.stop();
                self.push_pomodoro();
            }
            InboundMessage::SkipBreak => {
                self.pomodoro.skip_break(now)?;
                self.push_pomodoro();
            }
            InboundMessage::GetPomodoroState => {
                return Ok(Some(Response::Pomodoro(self.pomodoro.view())));
            }

            InboundMessage::GetAnalyticsData => {
                self.tracker.flush_analytics(ctx, now).await?;
                return Ok(Some(Response::Analytics(Box::new(
                    ctx.store.analytics().await,
                ))));
            }
            InboundMessage::ClearAnalyticsData => {
                self.tracker.flush_analytics(ctx, now).await?;
                ctx.store.remove(StorageKey::AnalyticsData).await?;
            }
            InboundMessage::SubmitFeedback(entry) => {
                entry.validate()?;
                let mut feedback = ctx.store.feedback().await;
                feedback.push(entry);
                ctx.store.save(StorageKey::UserFeedback, &feedback).await?;
            }
            InboundMessage::UpdateAccessibility(settings) => {
                ctx.store
                    .save(StorageKey::AccessibilitySettings, &settings)
                    .await?;
                self.settings_written().await;
            }

            InboundMessage::SyncData => {
                let applied = self.sync.sync(&ctx.store, &ctx.browser, now).await?;
                if applied {
                    self.reload_settings().await?;
                }
                return Ok(Some(Response::Sync(self.sync.status())));
            }
            InboundMessage::ToggleSync(enabled) => {
                let applied = self
                    .sync
                    .toggle(&ctx.store, &ctx.browser, enabled, now)
                    .await?;
                if applied {
                    self.reload_settings().await?;
                }
                return Ok(Some(Response::Sync(self.sync.status())));
            }
            InboundMessage::UpdateSyncFrequency(frequency) => {
                self.sync.update_frequency(&ctx.store, frequency).await?;
            }
            InboundMessage::GetSyncStatus => {
                return Ok(Some(Response::Sync(self.sync.status())));
            }
        }
        Ok(None)
    }

    async fn pomodoro_tick(&mut self) -> Result<(), TrackerError> {
        match self.pomodoro.tick(self.ctx.now()) {
            TickOutcome::Skipped => return Ok(()),
            TickOutcome::Advanced => {}
            TickOutcome::Completed(completion) => {
                info!("Pomodoro phase completed {completion:?}");
                if self.pomodoro.settings().notifications {
                    if let Err(e) = self.ctx.browser.notify(completion.notification()) {
                        warn!("Couldn't show notification {e}");
                    }
                }
            }
        }
        self.push_pomodoro();
        Ok(())
    }

    async fn scheduled_sync(&mut self) -> Result<(), TrackerError> {
        let settings = self.ctx.store.sync_settings().await;
        let now = self.ctx.now();
        if !self.sync.is_due(&settings, now) {
            return Ok(());
        }
        if self.sync.sync(&self.ctx.store, &self.ctx.browser, now).await? {
            self.reload_settings().await?;
        }
        Ok(())
    }

    /// Realtime sync after a local settings change. A failed sync doesn't fail the change.
    async fn settings_written(&mut self) {
        let ctx = &self.ctx;
        match self
            .sync
            .settings_changed(&ctx.store, &ctx.browser, ctx.now())
            .await
        {
            Ok(true) => {
                if let Err(e) = self.reload_settings().await {
                    warn!("Couldn't apply synced settings {e}");
                }
            }
            Ok(false) => {}
            Err(e) => warn!("Realtime sync failed {e}"),
        }
    }

    /// Settings were replaced from another device.
    async fn reload_settings(&mut self) -> Result<(), TrackerError> {
        self.pomodoro
            .settings_changed(self.ctx.store.pomodoro_settings().await);
        self.tracker.refresh_focus(&self.ctx).await
    }

    fn push_pomodoro(&self) {
        if let Some(tab_id) = self.tracker.focused_tab() {
            deliver_to_tab(
                &self.ctx.browser,
                tab_id,
                BrowserMessage::PomodoroUpdate(self.pomodoro.view()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use crate::{
        browser::{
            messages::{
                BrowserMessage, InboundEnvelope, InboundMessage, Notification, Outbound,
                RequestId,
            },
            native::NativeMessagingBrowser,
        },
        host::{
            event::{HostEvent, TickKind},
            storage::{
                entities::{FeedbackEntry, PomodoroSettings, StorageKey},
                settings::SettingsPatch,
                store::MemoryStore,
            },
            sync::SettingsSync,
            testing::{Harness, Outbox},
        },
        utils::{clock::ManualClock, logging::TEST_LOGGING},
    };

    use super::Background;

    type TestBackground = Background<MemoryStore, NativeMessagingBrowser, MemoryStore>;

    async fn background() -> (TestBackground, ManualClock, Outbox) {
        let Harness { ctx, clock, outbox } = Harness::new();
        let mut background = Background::new(ctx, SettingsSync::new(MemoryStore::new()));
        background.initialize().await.unwrap();
        (background, clock, outbox)
    }

    fn envelope(request_id: Option<RequestId>, message: InboundMessage) -> HostEvent {
        HostEvent::Inbound(InboundEnvelope {
            request_id,
            message,
        })
    }

    async fn request(background: &mut TestBackground, id: RequestId, message: InboundMessage) {
        background
            .handle(envelope(Some(id), message))
            .await
            .unwrap();
    }

    fn reply(sent: &[Outbound], id: RequestId) -> Value {
        sent.iter()
            .find_map(|v| match v {
                Outbound::Reply {
                    request_id,
                    payload,
                } if *request_id == id => Some(serde_json::to_value(payload).unwrap()),
                _ => None,
            })
            .unwrap_or_else(|| panic!("No reply to {id}"))
    }

    fn notifications(sent: &[Outbound]) -> Vec<Notification> {
        sent.iter()
            .filter_map(|v| match v {
                Outbound::Notification(notification) => Some(notification.clone()),
                _ => None,
            })
            .collect()
    }

    async fn focus(background: &mut TestBackground, url: &str) {
        background
            .handle(envelope(
                None,
                InboundMessage::TabActivated {
                    tab_id: 1,
                    url: Some(url.into()),
                },
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn settings_are_served_with_defaults() {
        let (mut background, _, mut outbox) = background().await;
        request(&mut background, 1, InboundMessage::GetSettings).await;

        let settings = reply(&outbox.sent(), 1);
        assert_eq!(settings["nudgeTimings"], json!({ "first": 5, "second": 10, "third": 15 }));
        assert_eq!(settings["doNotDisturb"], false);
        assert_eq!(settings["siteBlacklist"], json!([]));
        assert_eq!(settings["pomodoroSettings"]["workDuration"], 25);
    }

    #[tokio::test]
    async fn invalid_parts_of_a_patch_are_reported() {
        let (mut background, _, mut outbox) = background().await;
        let patch: SettingsPatch = serde_json::from_value(json!({
            "nudgeTimings": { "first": 10, "second": 5, "third": 15 },
            "siteBlacklist": ["b.com", "b.com", "a.com"],
        }))
        .unwrap();
        request(&mut background, 2, InboundMessage::UpdateSettings(patch)).await;

        let ack = reply(&outbox.sent(), 2);
        assert_eq!(ack["success"], false);
        assert!(ack["error"].as_str().unwrap().contains("ascending"));

        request(&mut background, 3, InboundMessage::GetSettings).await;
        let settings = reply(&outbox.sent(), 3);
        assert_eq!(settings["nudgeTimings"]["first"], 5);
        assert_eq!(settings["siteBlacklist"], json!(["b.com", "a.com"]));
    }

    #[tokio::test]
    async fn pomodoro_runs_on_its_own_ticks() {
        let (mut background, clock, mut outbox) = background().await;
        focus(&mut background, "https://a.com/").await;
        let patch = SettingsPatch {
            pomodoro_settings: Some(PomodoroSettings {
                work_duration: 1,
                ..Default::default()
            }),
            ..Default::default()
        };
        request(&mut background, 1, InboundMessage::UpdateSettings(patch)).await;
        request(&mut background, 2, InboundMessage::StartPomodoro).await;
        // The site timer being paused doesn't hold the cycle back.
        request(&mut background, 3, InboundMessage::TimerPause).await;
        outbox.sent();

        for _ in 0..10 {
            clock.advance(6);
            background
                .handle(HostEvent::Tick(TickKind::Pomodoro))
                .await
                .unwrap();
        }

        let sent = outbox.sent();
        assert_eq!(
            notifications(&sent),
            vec![Notification {
                title: "Work session completed!".into(),
                message: "Time for a short break.".into(),
            }]
        );
        let updates = sent
            .iter()
            .filter(|v| {
                matches!(
                    v,
                    Outbound::Tab {
                        tab_id: 1,
                        message: BrowserMessage::PomodoroUpdate(_)
                    }
                )
            })
            .count();
        assert_eq!(updates, 10);

        request(&mut background, 4, InboundMessage::GetPomodoroState).await;
        let state = reply(&outbox.sent(), 4);
        assert_eq!(state["isBreak"], true);
        assert_eq!(state["totalSessions"], 1);
        assert_eq!(state["formattedTime"], "05:00");
    }

    #[tokio::test]
    async fn notifications_follow_the_setting() {
        let (mut background, clock, mut outbox) = background().await;
        background
            .ctx
            .store
            .save(
                StorageKey::PomodoroSettings,
                &PomodoroSettings {
                    work_duration: 1,
                    notifications: false,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        background.initialize().await.unwrap();

        request(&mut background, 1, InboundMessage::StartPomodoro).await;
        clock.advance(60);
        background
            .handle(HostEvent::Tick(TickKind::Pomodoro))
            .await
            .unwrap();
        assert!(notifications(&outbox.sent()).is_empty());
        assert!(background.pomodoro().phase().is_break());
    }

    #[tokio::test]
    async fn skipping_without_a_break_fails() {
        let (mut background, _, mut outbox) = background().await;
        request(&mut background, 1, InboundMessage::SkipBreak).await;
        let ack = reply(&outbox.sent(), 1);
        assert_eq!(ack["success"], false);
    }

    #[tokio::test]
    async fn feedback_needs_a_rating() {
        let (mut background, _, mut outbox) = background().await;
        let entry = |rating: Option<&str>| -> FeedbackEntry {
            serde_json::from_value(json!({
                "rating": rating,
                "likes": "the timer",
                "timestamp": 1_712_050_200_000i64,
            }))
            .unwrap()
        };

        request(&mut background, 1, InboundMessage::SubmitFeedback(entry(None))).await;
        request(&mut background, 2, InboundMessage::SubmitFeedback(entry(Some("5")))).await;
        let sent = outbox.sent();
        assert_eq!(reply(&sent, 1)["success"], false);
        assert_eq!(reply(&sent, 2)["success"], true);

        let feedback = background.ctx.store.feedback().await;
        assert_eq!(feedback.len(), 1);
        assert_eq!(feedback[0].rating.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn blacklisting_the_current_site_stops_tracking() {
        let (mut background, _, mut outbox) = background().await;
        focus(&mut background, "https://news.site.org/").await;
        assert!(background.tracker().session().site().is_some());

        request(
            &mut background,
            1,
            InboundMessage::AddToBlacklist("Site.org".into()),
        )
        .await;
        request(
            &mut background,
            2,
            InboundMessage::AddToBlacklist("site.org".into()),
        )
        .await;
        let sent = outbox.sent();
        assert_eq!(reply(&sent, 1)["success"], true);
        assert_eq!(reply(&sent, 2)["success"], false);
        assert!(background.tracker().session().site().is_none());

        request(
            &mut background,
            3,
            InboundMessage::RemoveFromBlacklist("site.org".into()),
        )
        .await;
        assert_eq!(
            background.tracker().session().site().map(|v| v.to_string()),
            Some("news.site.org".into())
        );
    }

    #[tokio::test]
    async fn do_not_disturb_is_stored() {
        let (mut background, _, mut outbox) = background().await;
        request(&mut background, 1, InboundMessage::ToggleDoNotDisturb(true)).await;
        assert_eq!(reply(&outbox.sent(), 1), json!({ "success": true }));
        assert!(background.ctx.store.do_not_disturb().await);
    }

    #[tokio::test]
    async fn enabling_sync_reports_status() {
        let (mut background, _, mut outbox) = background().await;
        request(&mut background, 1, InboundMessage::ToggleSync(true)).await;

        let sent = outbox.sent();
        let status = reply(&sent, 1);
        assert_eq!(status["enabled"], true);
        assert_eq!(status["isSyncing"], false);
        assert!(status["deviceId"].as_str().unwrap().starts_with("device_"));
        assert!(sent.iter().any(|v| matches!(
            v,
            Outbound::Runtime {
                message: BrowserMessage::SyncStatus(report)
            } if report.success
        )));
    }

    #[tokio::test]
    async fn analytics_include_unflushed_time() {
        let (mut background, clock, mut outbox) = background().await;
        focus(&mut background, "https://a.com/").await;
        for _ in 0..3 {
            clock.advance(6);
            background
                .handle(HostEvent::Tick(TickKind::Timer))
                .await
                .unwrap();
        }

        request(&mut background, 1, InboundMessage::GetAnalyticsData).await;
        let analytics = reply(&outbox.sent(), 1);
        assert_eq!(analytics["sites"]["a.com"]["totalTime"], 18);

        request(&mut background, 2, InboundMessage::ClearAnalyticsData).await;
        request(&mut background, 3, InboundMessage::GetAnalyticsData).await;
        let analytics = reply(&outbox.sent(), 3);
        assert_eq!(analytics["sites"], json!({}));
    }

    #[tokio::test]
    async fn failing_events_do_not_stop_the_loop() {
        *TEST_LOGGING;
        let (background, _, mut outbox) = background().await;
        let (sender, receiver) = mpsc::channel(8);

        sender
            .send(envelope(
                None,
                InboundMessage::TabActivated {
                    tab_id: 5,
                    url: None,
                },
            ))
            .await
            .unwrap();
        sender
            .send(envelope(
                None,
                InboundMessage::TabActivated {
                    tab_id: 6,
                    url: Some("https://a.com/".into()),
                },
            ))
            .await
            .unwrap();
        sender
            .send(envelope(Some(1), InboundMessage::GetSyncStatus))
            .await
            .unwrap();
        drop(sender);

        background.run(receiver).await.unwrap();

        let sent = outbox.sent();
        assert_eq!(reply(&sent, 1)["enabled"], false);
        assert!(sent.iter().any(|v| matches!(v, Outbound::Tab { tab_id: 6, .. })));
    }
}
