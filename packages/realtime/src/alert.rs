//! User-facing alerts and the preferences that shape them.

use serde::{Deserialize, Serialize};
use sigor_database_models::OccurrenceRow;
use sigor_dispatch_models::{AlertTone, PriorityLevel};
use uuid::Uuid;

/// Fraction of the configured volume used as oscillator gain.
const GAIN_SCALE: f32 = 0.3;

/// Per-user alert settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertPreferences {
    pub sound_enabled: bool,
    /// Playback volume between 0 and 1.
    pub sound_volume: f32,
    /// Whether critical-priority alerts are shown.
    pub critical_alerts: bool,
    /// Whether high-priority alerts are shown.
    pub high_priority_alerts: bool,
}

impl Default for AlertPreferences {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            sound_volume: 0.5,
            critical_alerts: true,
            high_priority_alerts: true,
        }
    }
}

impl AlertPreferences {
    /// Whether an alert at `priority` should be raised at all.
    #[must_use]
    pub const fn allows(&self, priority: PriorityLevel) -> bool {
        match priority {
            PriorityLevel::Critical => self.critical_alerts,
            PriorityLevel::High => self.high_priority_alerts,
            PriorityLevel::Medium | PriorityLevel::Low => true,
        }
    }

    #[must_use]
    pub fn gain(&self) -> f32 {
        self.sound_volume.clamp(0.0, 1.0) * GAIN_SCALE
    }
}

/// What the alert announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A vehicle the user is crewing was dispatched.
    NewDispatch,
    /// An occurrence matching the user's dashboard was registered.
    NewOccurrence,
}

/// The tone to play and how loud.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundCue {
    pub tone: AlertTone,
    pub gain: f32,
}

/// A toast-style notification annotated onto a change event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    pub occurrence_id: Uuid,
    pub dispatch_id: Option<Uuid>,
    pub priority: PriorityLevel,
    pub title: String,
    pub body: String,
    /// How long the toast stays up unless it requires dismissal.
    pub display_for_ms: u64,
    pub requires_dismissal: bool,
    /// `None` when sound is disabled.
    pub sound: Option<SoundCue>,
}

impl Alert {
    /// Builds the alert for `occurrence`, or `None` if the user's
    /// preferences suppress alerts at its priority.
    #[must_use]
    pub fn new(
        kind: AlertKind,
        occurrence: &OccurrenceRow,
        dispatch_id: Option<Uuid>,
        preferences: &AlertPreferences,
    ) -> Option<Self> {
        let priority = occurrence.priority;
        if !preferences.allows(priority) {
            return None;
        }

        let urgency = priority.alert_urgency();
        let headline = match kind {
            AlertKind::NewDispatch => "Vehicle dispatched",
            AlertKind::NewOccurrence => "New occurrence",
        };
        let mut body = format!("{} - {}", occurrence.code, occurrence.title);
        if let Some(address) = &occurrence.location_address {
            body.push('\n');
            body.push_str(address);
        }

        Some(Self {
            kind,
            occurrence_id: occurrence.id,
            dispatch_id,
            priority,
            title: format!("{} {headline}!", priority_label(priority)),
            body,
            display_for_ms: u64::try_from(urgency.display_for.as_millis()).unwrap_or(u64::MAX),
            requires_dismissal: urgency.requires_dismissal,
            sound: preferences.sound_enabled.then(|| SoundCue {
                tone: urgency.tone,
                gain: preferences.gain(),
            }),
        })
    }
}

const fn priority_label(priority: PriorityLevel) -> &'static str {
    match priority {
        PriorityLevel::Critical => "CRITICAL",
        PriorityLevel::High => "HIGH",
        PriorityLevel::Medium => "MEDIUM",
        PriorityLevel::Low => "LOW",
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sigor_dispatch_models::{OccurrenceStatus, OccurrenceType};

    use super::*;

    fn occurrence(priority: PriorityLevel) -> OccurrenceRow {
        let now = Utc::now();
        OccurrenceRow {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            code: "SAMU-2026-00042".to_string(),
            occurrence_type: OccurrenceType::Medical,
            priority,
            status: OccurrenceStatus::Pending,
            title: "Cardiac arrest".to_string(),
            description: None,
            caller_name: None,
            caller_phone: None,
            location_address: Some("Rua das Flores, 100".to_string()),
            location_reference: None,
            latitude: None,
            longitude: None,
            created_by: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            closed_at: None,
            closed_by: None,
        }
    }

    #[test]
    fn critical_alert_requires_dismissal() {
        let alert = Alert::new(
            AlertKind::NewDispatch,
            &occurrence(PriorityLevel::Critical),
            None,
            &AlertPreferences::default(),
        )
        .unwrap();
        assert!(alert.requires_dismissal);
        assert_eq!(alert.display_for_ms, 10_000);
        assert_eq!(alert.title, "CRITICAL Vehicle dispatched!");
        assert_eq!(alert.body, "SAMU-2026-00042 - Cardiac arrest\nRua das Flores, 100");
        let sound = alert.sound.unwrap();
        assert_eq!(sound.tone.frequencies, &[880, 1047, 880, 1047]);
        assert!((sound.gain - 0.15).abs() < f32::EPSILON);
    }

    #[test]
    fn disabled_classes_are_suppressed() {
        let preferences = AlertPreferences {
            high_priority_alerts: false,
            ..AlertPreferences::default()
        };
        let high = occurrence(PriorityLevel::High);
        assert!(Alert::new(AlertKind::NewOccurrence, &high, None, &preferences).is_none());

        let low = occurrence(PriorityLevel::Low);
        let alert = Alert::new(AlertKind::NewOccurrence, &low, None, &preferences).unwrap();
        assert!(!alert.requires_dismissal);
        assert_eq!(alert.display_for_ms, 5_000);
    }

    #[test]
    fn muted_alerts_carry_no_sound() {
        let preferences = AlertPreferences {
            sound_enabled: false,
            ..AlertPreferences::default()
        };
        let alert = Alert::new(
            AlertKind::NewOccurrence,
            &occurrence(PriorityLevel::Medium),
            None,
            &preferences,
        )
        .unwrap();
        assert_eq!(alert.sound, None);
    }
}
