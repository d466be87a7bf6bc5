use serde::Serialize;

use crate::host::storage::entities::{NudgeMessages, NudgeTimings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NudgeLevel {
    First,
    Second,
    Third,
}

impl NudgeLevel {
    pub const ALL: [NudgeLevel; 3] = [NudgeLevel::First, NudgeLevel::Second, NudgeLevel::Third];

    pub fn threshold_seconds(self, timings: &NudgeTimings) -> u64 {
        let minutes = match self {
            NudgeLevel::First => timings.first,
            NudgeLevel::Second => timings.second,
            NudgeLevel::Third => timings.third,
        };
        u64::from(minutes) * 60
    }

    pub fn message(self, messages: &NudgeMessages) -> &str {
        match self {
            NudgeLevel::First => &messages.first,
            NudgeLevel::Second => &messages.second,
            NudgeLevel::Third => &messages.third,
        }
    }
}

/// Which nudges were already shown in the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NudgeFlags {
    pub first: bool,
    pub second: bool,
    pub third: bool,
}

impl NudgeFlags {
    fn flag(&mut self, level: NudgeLevel) -> &mut bool {
        match level {
            NudgeLevel::First => &mut self.first,
            NudgeLevel::Second => &mut self.second,
            NudgeLevel::Third => &mut self.third,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Decides which nudges fire for `elapsed` seconds and marks them as sent. Levels come back in
/// ascending order, several of them if the elapsed time jumped past more than one threshold.
///
/// With do-not-disturb on nothing fires and nothing is marked, so a threshold passed during
/// do-not-disturb fires on the first tick after it's turned off.
pub fn evaluate_nudges(
    elapsed: u64,
    timings: &NudgeTimings,
    flags: &mut NudgeFlags,
    do_not_disturb: bool,
) -> Vec<NudgeLevel> {
    if do_not_disturb {
        return vec![];
    }

    NudgeLevel::ALL
        .into_iter()
        .filter(|level| {
            let sent = flags.flag(*level);
            if elapsed >= level.threshold_seconds(timings) && !*sent {
                *sent = true;
                true
            } else {
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::host::storage::entities::{NudgeMessages, NudgeTimings};

    use super::{evaluate_nudges, NudgeFlags, NudgeLevel};

    #[test]
    fn nothing_fires_before_first_threshold() {
        let mut flags = NudgeFlags::default();
        let fired = evaluate_nudges(299, &NudgeTimings::default(), &mut flags, false);
        assert!(fired.is_empty());
        assert_eq!(flags, NudgeFlags::default());
    }

    #[test]
    fn all_thresholds_fire_once_in_ascending_order() {
        let timings = NudgeTimings::default();
        let mut flags = NudgeFlags::default();

        let fired = evaluate_nudges(15 * 60 + 3, &timings, &mut flags, false);
        assert_eq!(
            fired,
            vec![NudgeLevel::First, NudgeLevel::Second, NudgeLevel::Third]
        );

        for elapsed in [15 * 60 + 9, 20 * 60, 3600] {
            assert!(evaluate_nudges(elapsed, &timings, &mut flags, false).is_empty());
        }
    }

    #[test]
    fn monotonic_ticks_fire_each_level_once() {
        let timings = NudgeTimings::default();
        let mut flags = NudgeFlags::default();
        let fired = (0..=16 * 60)
            .step_by(6)
            .flat_map(|elapsed| evaluate_nudges(elapsed, &timings, &mut flags, false))
            .collect::<Vec<_>>();
        assert_eq!(
            fired,
            vec![NudgeLevel::First, NudgeLevel::Second, NudgeLevel::Third]
        );
    }

    #[test]
    fn do_not_disturb_defers_instead_of_dropping() {
        let timings = NudgeTimings::default();
        let mut flags = NudgeFlags::default();

        assert!(evaluate_nudges(6 * 60, &timings, &mut flags, true).is_empty());
        assert!(!flags.first);

        assert_eq!(
            evaluate_nudges(6 * 60 + 6, &timings, &mut flags, false),
            vec![NudgeLevel::First]
        );
    }

    #[test]
    fn custom_timings_and_messages() {
        let timings = NudgeTimings {
            first: 1,
            second: 2,
            third: 30,
        };
        assert_eq!(NudgeLevel::Second.threshold_seconds(&timings), 120);
        let messages = NudgeMessages::default();
        assert_eq!(NudgeLevel::Third.message(&messages), messages.third);
    }
}
