use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use crate::{
    browser::{
        messages::{BrowserMessage, Outbound, TabId},
        native::NativeMessagingBrowser,
    },
    host::{
        storage::{settings::SettingsStore, store::MemoryStore},
        tracker::nudge::NudgeLevel,
        HostContext,
    },
    utils::clock::ManualClock,
};

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 2, 9, 30, 0).unwrap()
}

/// Host context over memory with a clock the test moves by hand. Everything sent to the
/// browser ends up in [Outbox].
pub struct Harness {
    pub ctx: HostContext<MemoryStore, NativeMessagingBrowser>,
    pub clock: ManualClock,
    pub outbox: Outbox,
}

pub struct Outbox(mpsc::Receiver<Outbound>);

impl Outbox {
    /// Drains what was sent since the previous call.
    pub fn sent(&mut self) -> Vec<Outbound> {
        let mut sent = vec![];
        while let Ok(outbound) = self.0.try_recv() {
            sent.push(outbound);
        }
        sent
    }
}

impl Harness {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(1024);
        let clock = ManualClock::new(start_time());
        Self {
            ctx: HostContext::new(
                SettingsStore::new(MemoryStore::new()),
                NativeMessagingBrowser::new(sender),
                Box::new(clock.clone()),
            ),
            clock,
            outbox: Outbox(receiver),
        }
    }

    pub fn sent(&mut self) -> Vec<Outbound> {
        self.outbox.sent()
    }
}

pub fn timer_updates(sent: &[Outbound]) -> Vec<(TabId, String, u64)> {
    sent.iter()
        .filter_map(|v| match v {
            Outbound::Tab {
                tab_id,
                message:
                    BrowserMessage::TimerUpdate {
                        elapsed_seconds,
                        domain,
                    },
            } => Some((*tab_id, domain.to_string(), *elapsed_seconds)),
            _ => None,
        })
        .collect()
}

pub fn nudges(sent: &[Outbound]) -> Vec<NudgeLevel> {
    sent.iter()
        .filter_map(|v| match v {
            Outbound::Tab {
                message: BrowserMessage::ShowNudge { level, .. },
                ..
            } => Some(*level),
            _ => None,
        })
        .collect()
}
