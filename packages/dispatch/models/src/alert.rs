//! Priority-dependent alert presentation: how long a toast stays up and
//! which tone sequence plays.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::PriorityLevel;

/// Oscillator shape used to synthesize an alert tone.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Waveform {
    Sine,
    Sawtooth,
}

/// A sequence of notes, played back to back and repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertTone {
    /// Note frequencies in Hz, in playback order.
    pub frequencies: &'static [u32],
    /// Duration of each note in milliseconds.
    pub note_duration_ms: u32,
    /// How many times the whole sequence plays.
    pub repeat: u32,
    pub waveform: Waveform,
}

impl AlertTone {
    /// Total playback length of the tone.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        let notes = u32::try_from(self.frequencies.len()).unwrap_or(u32::MAX);
        Duration::from_millis(u64::from(self.note_duration_ms) * u64::from(notes * self.repeat))
    }
}

/// How an alert of a given priority is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertUrgency {
    /// How long the toast stays visible if not dismissed.
    pub display_for: Duration,
    /// Whether the toast stays until the user dismisses it.
    pub requires_dismissal: bool,
    pub tone: AlertTone,
}

const LOW_TONE: AlertTone = AlertTone {
    frequencies: &[440],
    note_duration_ms: 200,
    repeat: 1,
    waveform: Waveform::Sine,
};

const MEDIUM_TONE: AlertTone = AlertTone {
    frequencies: &[523, 659],
    note_duration_ms: 150,
    repeat: 2,
    waveform: Waveform::Sine,
};

const HIGH_TONE: AlertTone = AlertTone {
    frequencies: &[659, 784, 880],
    note_duration_ms: 120,
    repeat: 3,
    waveform: Waveform::Sine,
};

const CRITICAL_TONE: AlertTone = AlertTone {
    frequencies: &[880, 1047, 880, 1047],
    note_duration_ms: 100,
    repeat: 4,
    waveform: Waveform::Sawtooth,
};

impl PriorityLevel {
    /// The tone played for an alert at this priority.
    #[must_use]
    pub const fn alert_tone(self) -> AlertTone {
        match self {
            Self::Low => LOW_TONE,
            Self::Medium => MEDIUM_TONE,
            Self::High => HIGH_TONE,
            Self::Critical => CRITICAL_TONE,
        }
    }

    /// Presentation rules for an alert at this priority. Critical alerts
    /// stay twice as long and must be dismissed.
    #[must_use]
    pub const fn alert_urgency(self) -> AlertUrgency {
        let critical = matches!(self, Self::Critical);
        AlertUrgency {
            display_for: Duration::from_secs(if critical { 10 } else { 5 }),
            requires_dismissal: critical,
            tone: self.alert_tone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_alert_is_loudest_and_sticky() {
        let urgency = PriorityLevel::Critical.alert_urgency();
        assert!(urgency.requires_dismissal);
        assert_eq!(urgency.display_for, Duration::from_secs(10));
        assert_eq!(urgency.tone.waveform, Waveform::Sawtooth);
        assert_eq!(urgency.tone.repeat, 4);
    }

    #[test]
    fn non_critical_alerts_auto_dismiss() {
        for level in [PriorityLevel::Low, PriorityLevel::Medium, PriorityLevel::High] {
            let urgency = level.alert_urgency();
            assert!(!urgency.requires_dismissal);
            assert_eq!(urgency.display_for, Duration::from_secs(5));
            assert_eq!(urgency.tone.waveform, Waveform::Sine);
        }
    }

    #[test]
    fn tone_length_grows_with_priority() {
        let lengths: Vec<_> = PriorityLevel::all()
            .iter()
            .map(|level| level.alert_tone().total_duration())
            .collect();
        assert!(lengths.windows(2).all(|pair| pair[0] < pair[1]), "{lengths:?}");
        assert_eq!(
            PriorityLevel::High.alert_tone().total_duration(),
            Duration::from_millis(1080)
        );
    }
}
