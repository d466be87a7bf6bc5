//! Work/break cycle. Independent from the site timer: it keeps running while the site timer is
//! paused and lives only in memory, a restart loses the cycle in progress.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    browser::messages::Notification,
    error::TrackerError,
    host::storage::entities::PomodoroSettings,
    utils::time::{elapsed_seconds, format_countdown},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PomodoroPhase {
    #[default]
    Idle,
    Working,
    ShortBreak,
    LongBreak,
}

impl PomodoroPhase {
    pub fn is_break(self) -> bool {
        matches!(self, PomodoroPhase::ShortBreak | PomodoroPhase::LongBreak)
    }
}

/// A phase that ran out on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Work { long_break: bool },
    Break,
}

impl Completion {
    pub fn notification(self) -> Notification {
        match self {
            Completion::Work { long_break } => Notification {
                title: "Work session completed!".into(),
                message: format!(
                    "Time for a {} break.",
                    if long_break { "long" } else { "short" }
                ),
            },
            Completion::Break => Notification {
                title: "Break completed!".into(),
                message: "Time to get back to work.".into(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Idle or paused, nothing moved.
    Skipped,
    Advanced,
    Completed(Completion),
}

/// What the pages and the content script render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroView {
    pub is_active: bool,
    pub is_paused: bool,
    pub is_break: bool,
    pub is_long_break: bool,
    pub current_session: u32,
    pub time_remaining: u64,
    pub total_sessions: u32,
    pub sessions_before_long_break: u32,
    pub formatted_time: String,
}

#[derive(Debug, Clone)]
pub struct Pomodoro {
    settings: PomodoroSettings,
    phase: PomodoroPhase,
    paused: bool,
    current_session: u32,
    time_remaining: u64,
    total_completed: u32,
    /// Point the remaining time was last brought up to date.
    cycle_start: Option<DateTime<Utc>>,
}

impl Pomodoro {
    pub fn new(settings: PomodoroSettings) -> Self {
        Self {
            phase: PomodoroPhase::Idle,
            paused: false,
            current_session: 1,
            time_remaining: settings.work_seconds(),
            total_completed: 0,
            cycle_start: None,
            settings,
        }
    }

    pub fn phase(&self) -> PomodoroPhase {
        self.phase
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn time_remaining(&self) -> u64 {
        self.time_remaining
    }

    pub fn settings(&self) -> &PomodoroSettings {
        &self.settings
    }

    /// Starts a fresh work session when idle, resumes when paused. A running cycle is left
    /// alone. Returns whether anything changed.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        match (self.phase, self.paused) {
            (PomodoroPhase::Idle, _) => {
                self.phase = PomodoroPhase::Working;
                self.paused = false;
                self.time_remaining = self.settings.work_seconds();
            }
            (_, true) => self.paused = false,
            (_, false) => return false,
        }
        self.cycle_start = Some(now);
        true
    }

    /// Freezes the remaining time. Returns whether anything changed.
    pub fn pause(&mut self, now: DateTime<Utc>) -> bool {
        if self.phase == PomodoroPhase::Idle || self.paused {
            return false;
        }
        self.consume_elapsed(now);
        self.paused = true;
        true
    }

    /// Back to idle with a full work session queued. Lifetime count of sessions stays.
    pub fn stop(&mut self) {
        self.phase = PomodoroPhase::Idle;
        self.paused = false;
        self.current_session = 1;
        self.time_remaining = self.settings.work_seconds();
        self.cycle_start = None;
    }

    pub fn skip_break(&mut self, now: DateTime<Utc>) -> Result<(), TrackerError> {
        if !self.phase.is_break() {
            return Err(TrackerError::Validation("There is no break to skip".into()));
        }
        self.phase = PomodoroPhase::Working;
        self.paused = false;
        self.time_remaining = self.settings.work_seconds();
        self.cycle_start = Some(now);
        Ok(())
    }

    /// Advances the running phase by the time since the previous tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if self.phase == PomodoroPhase::Idle || self.paused {
            return TickOutcome::Skipped;
        }

        self.consume_elapsed(now);
        if self.time_remaining > 0 {
            return TickOutcome::Advanced;
        }

        let completion = if self.phase.is_break() {
            self.phase = PomodoroPhase::Working;
            self.time_remaining = self.settings.work_seconds();
            self.paused = !self.settings.auto_start_work;
            Completion::Break
        } else {
            self.total_completed += 1;
            let long_break = self.current_session >= self.settings.sessions_before_long_break;
            if long_break {
                self.phase = PomodoroPhase::LongBreak;
                self.time_remaining = self.settings.long_break_seconds();
                self.current_session = 1;
            } else {
                self.phase = PomodoroPhase::ShortBreak;
                self.time_remaining = self.settings.short_break_seconds();
                self.current_session += 1;
            }
            self.paused = !self.settings.auto_start_breaks;
            Completion::Work { long_break }
        };
        TickOutcome::Completed(completion)
    }

    /// New settings apply from the next phase on. An idle cycle picks up the new work length
    /// right away.
    pub fn settings_changed(&mut self, settings: PomodoroSettings) {
        self.settings = settings;
        if self.phase == PomodoroPhase::Idle {
            self.time_remaining = self.settings.work_seconds();
        }
    }

    pub fn view(&self) -> PomodoroView {
        PomodoroView {
            is_active: self.phase != PomodoroPhase::Idle,
            is_paused: self.paused,
            is_break: self.phase.is_break(),
            is_long_break: self.phase == PomodoroPhase::LongBreak,
            current_session: self.current_session,
            time_remaining: self.time_remaining,
            total_sessions: self.total_completed,
            sessions_before_long_break: self.settings.sessions_before_long_break,
            formatted_time: format_countdown(self.time_remaining),
        }
    }

    fn consume_elapsed(&mut self, now: DateTime<Utc>) {
        let elapsed = self
            .cycle_start
            .map(|start| elapsed_seconds(start, now))
            .unwrap_or(0);
        self.time_remaining = self.time_remaining.saturating_sub(elapsed);
        self.cycle_start = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::host::storage::entities::PomodoroSettings;

    use super::{Completion, Pomodoro, PomodoroPhase, TickOutcome};

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap()
    }

    fn quick_settings(sessions_before_long_break: u32) -> PomodoroSettings {
        PomodoroSettings {
            enabled: true,
            work_duration: 1,
            short_break_duration: 1,
            long_break_duration: 2,
            sessions_before_long_break,
            auto_start_breaks: true,
            auto_start_work: true,
            notifications: true,
        }
    }

    /// Ticks every 6 seconds until a phase completes.
    fn run_until_completion(pomodoro: &mut Pomodoro, now: &mut DateTime<Utc>) -> Completion {
        for _ in 0..1000 {
            *now += Duration::seconds(6);
            if let TickOutcome::Completed(completion) = pomodoro.tick(*now) {
                return completion;
            }
        }
        panic!("Phase never completed");
    }

    #[test]
    fn third_completion_goes_to_long_break() {
        let mut now = start_time();
        let mut pomodoro = Pomodoro::new(quick_settings(3));
        assert!(pomodoro.start(now));

        for expected_session in [2, 3] {
            assert_eq!(
                run_until_completion(&mut pomodoro, &mut now),
                Completion::Work { long_break: false }
            );
            assert_eq!(pomodoro.phase(), PomodoroPhase::ShortBreak);
            assert_eq!(pomodoro.view().current_session, expected_session);
            assert_eq!(run_until_completion(&mut pomodoro, &mut now), Completion::Break);
            assert_eq!(pomodoro.phase(), PomodoroPhase::Working);
        }

        assert_eq!(
            run_until_completion(&mut pomodoro, &mut now),
            Completion::Work { long_break: true }
        );
        let view = pomodoro.view();
        assert!(view.is_long_break);
        assert_eq!(view.current_session, 1);
        assert_eq!(view.total_sessions, 3);
        assert_eq!(view.time_remaining, 120);
    }

    #[test]
    fn long_break_follows_reaching_the_session_count() {
        let mut now = start_time();
        let mut pomodoro = Pomodoro::new(quick_settings(2));
        pomodoro.start(now);

        let mut breaks = vec![];
        for _ in 0..4 {
            if let Completion::Work { long_break } = run_until_completion(&mut pomodoro, &mut now)
            {
                breaks.push(long_break);
            }
            run_until_completion(&mut pomodoro, &mut now);
        }
        assert_eq!(breaks, vec![false, true, false, true]);
        assert_eq!(pomodoro.view().total_sessions, 4);
    }

    #[test]
    fn a_late_tick_only_catches_up_once() {
        let mut now = start_time();
        let mut pomodoro = Pomodoro::new(PomodoroSettings::default());
        pomodoro.start(now);

        now += Duration::seconds(6);
        assert_eq!(pomodoro.tick(now), TickOutcome::Advanced);
        now += Duration::seconds(90);
        pomodoro.tick(now);
        assert_eq!(pomodoro.time_remaining(), 25 * 60 - 96);
    }

    #[test]
    fn remaining_time_never_goes_negative() {
        let mut now = start_time();
        let mut pomodoro = Pomodoro::new(quick_settings(4));
        pomodoro.start(now);
        now += Duration::seconds(3600);
        assert!(matches!(pomodoro.tick(now), TickOutcome::Completed(_)));
        assert_eq!(pomodoro.time_remaining(), 60);
    }

    #[test]
    fn breaks_start_paused_without_auto_start() {
        let mut now = start_time();
        let mut pomodoro = Pomodoro::new(PomodoroSettings {
            auto_start_breaks: false,
            auto_start_work: false,
            ..quick_settings(4)
        });
        pomodoro.start(now);
        run_until_completion(&mut pomodoro, &mut now);
        assert!(pomodoro.is_paused());
        assert_eq!(pomodoro.tick(now + Duration::seconds(600)), TickOutcome::Skipped);
        assert_eq!(pomodoro.time_remaining(), 60);

        now += Duration::seconds(600);
        assert!(pomodoro.start(now));
        run_until_completion(&mut pomodoro, &mut now);
        assert_eq!(pomodoro.phase(), PomodoroPhase::Working);
        assert!(pomodoro.is_paused());
    }

    #[test]
    fn pause_freezes_and_start_resumes() {
        let mut now = start_time();
        let mut pomodoro = Pomodoro::new(PomodoroSettings::default());
        pomodoro.start(now);

        now += Duration::seconds(100);
        assert!(pomodoro.pause(now));
        assert!(!pomodoro.pause(now));
        assert_eq!(pomodoro.time_remaining(), 1400);

        now += Duration::seconds(1000);
        assert_eq!(pomodoro.tick(now), TickOutcome::Skipped);
        assert!(pomodoro.start(now));
        assert!(!pomodoro.start(now));

        now += Duration::seconds(6);
        pomodoro.tick(now);
        assert_eq!(pomodoro.time_remaining(), 1394);
    }

    #[test]
    fn stop_keeps_lifetime_count() {
        let mut now = start_time();
        let mut pomodoro = Pomodoro::new(quick_settings(4));
        pomodoro.start(now);
        run_until_completion(&mut pomodoro, &mut now);

        pomodoro.stop();
        let view = pomodoro.view();
        assert!(!view.is_active);
        assert_eq!(view.current_session, 1);
        assert_eq!(view.total_sessions, 1);
        assert_eq!(view.time_remaining, 60);
        assert_eq!(view.formatted_time, "01:00");
    }

    #[test]
    fn skip_break_only_from_breaks() {
        let mut now = start_time();
        let mut pomodoro = Pomodoro::new(quick_settings(4));
        assert!(pomodoro.skip_break(now).is_err());
        pomodoro.start(now);
        assert!(pomodoro.skip_break(now).is_err());

        run_until_completion(&mut pomodoro, &mut now);
        now += Duration::seconds(6);
        pomodoro.tick(now);
        pomodoro.skip_break(now).unwrap();
        assert_eq!(pomodoro.phase(), PomodoroPhase::Working);
        assert_eq!(pomodoro.time_remaining(), 60);
    }

    #[test]
    fn idle_cycle_follows_new_settings() {
        let mut pomodoro = Pomodoro::new(PomodoroSettings::default());
        pomodoro.settings_changed(PomodoroSettings {
            work_duration: 50,
            ..Default::default()
        });
        assert_eq!(pomodoro.view().formatted_time, "50:00");

        pomodoro.start(start_time());
        pomodoro.settings_changed(PomodoroSettings::default());
        assert_eq!(pomodoro.time_remaining(), 50 * 60);
    }

    #[test]
    fn notifications_describe_the_next_phase() {
        assert_eq!(
            Completion::Work { long_break: true }.notification().message,
            "Time for a long break."
        );
        assert_eq!(Completion::Break.notification().title, "Break completed!");
    }
}
