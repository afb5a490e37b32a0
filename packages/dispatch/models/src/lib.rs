#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Dispatch domain taxonomy and state-machine rules.
//!
//! This crate defines the canonical enums shared by every layer of the
//! dispatch system (organizations, occurrences, dispatches, vehicles and
//! user roles) together with the pure rules that govern how their
//! statuses may change. Nothing in here touches storage; the engine
//! evaluates these rules inside store transactions.

pub mod alert;
pub mod status;

pub use alert::{AlertTone, AlertUrgency, Waveform};
pub use status::{DispatchStatus, OccurrenceStatus, TimestampField, VehicleStatus};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// The kind of dispatch authority an organization represents.
///
/// Fixed at creation; an organization never changes type.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrganizationType {
    /// Military/civil police.
    Police,
    /// Mobile emergency medical service.
    Samu,
    /// Fire brigade.
    Fire,
}

impl OrganizationType {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Police, Self::Samu, Self::Fire]
    }
}

/// The nature of an occurrence.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OccurrenceType {
    /// Public-order incident handled by police.
    Police,
    /// Medical emergency.
    Medical,
    /// Fire.
    Fire,
    /// Rescue (entrapment, drowning, height rescue).
    Rescue,
    /// Anything else.
    Other,
}

impl OccurrenceType {
    /// Whether responding to this kind of incident involves conveying a
    /// patient or victim, which makes the `transporting` step reachable.
    #[must_use]
    pub const fn requires_transport(self) -> bool {
        matches!(self, Self::Medical | Self::Rescue)
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Police,
            Self::Medical,
            Self::Fire,
            Self::Rescue,
            Self::Other,
        ]
    }
}

/// Priority of an occurrence. Variants are declared in ascending order so
/// the derived `Ord` sorts `Critical` highest.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PriorityLevel {
    /// Routine, no time pressure.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// Urgent.
    High,
    /// Life-threatening.
    Critical,
}

impl PriorityLevel {
    /// Returns all variants of this enum, lowest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Low, Self::Medium, Self::High, Self::Critical]
    }
}

/// Role of a user within the dispatch system.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AppRole {
    /// System administrator with access to every organization.
    Admin,
    /// Police dispatcher.
    DispatcherPolice,
    /// Police field officer.
    PoliceOfficer,
    /// SAMU (medical) dispatcher.
    DispatcherSamu,
    /// SAMU field team member.
    SamuTeam,
    /// Fire dispatcher.
    DispatcherFire,
    /// Firefighter.
    Firefighter,
    /// Read-only observer.
    Observer,
}

impl AppRole {
    /// Whether this role dispatches vehicles (admins included).
    #[must_use]
    pub const fn is_dispatcher(self) -> bool {
        matches!(
            self,
            Self::Admin | Self::DispatcherPolice | Self::DispatcherSamu | Self::DispatcherFire
        )
    }

    /// Whether this role rides vehicles as field crew.
    #[must_use]
    pub const fn is_field_crew(self) -> bool {
        matches!(
            self,
            Self::PoliceOfficer | Self::SamuTeam | Self::Firefighter
        )
    }

    /// Whether this role may register occurrences and assign vehicles.
    #[must_use]
    pub const fn can_dispatch(self) -> bool {
        self.is_dispatcher()
    }

    /// Whether this role may cancel an occurrence.
    #[must_use]
    pub const fn can_cancel(self) -> bool {
        self.is_dispatcher()
    }

    /// Whether this role may advance occurrence and dispatch statuses.
    /// Observers are read-only.
    #[must_use]
    pub const fn can_operate(self) -> bool {
        !matches!(self, Self::Observer)
    }

    /// Whether this role may join a vehicle's crew.
    #[must_use]
    pub const fn can_crew(self) -> bool {
        self.is_field_crew() || matches!(self, Self::Admin)
    }

    /// Whether this role may manage organizations, bases and vehicles.
    #[must_use]
    pub const fn can_manage_fleet(self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Occurrence types shown on this role's dashboard, and therefore the
    /// types that raise new-occurrence alerts for it.
    ///
    /// Field crews and observers watch no occurrence types: crews are
    /// alerted through dispatches to their vehicle instead.
    #[must_use]
    pub const fn watched_occurrence_types(self) -> &'static [OccurrenceType] {
        match self {
            Self::Admin => OccurrenceType::all(),
            Self::DispatcherPolice => &[OccurrenceType::Police],
            Self::DispatcherSamu => &[OccurrenceType::Medical],
            Self::DispatcherFire => &[OccurrenceType::Fire, OccurrenceType::Rescue],
            Self::PoliceOfficer | Self::SamuTeam | Self::Firefighter | Self::Observer => &[],
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Admin,
            Self::DispatcherPolice,
            Self::PoliceOfficer,
            Self::DispatcherSamu,
            Self::SamuTeam,
            Self::DispatcherFire,
            Self::Firefighter,
            Self::Observer,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_critical_highest() {
        let mut levels = PriorityLevel::all().to_vec();
        levels.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(levels[0], PriorityLevel::Critical);
        assert_eq!(levels[3], PriorityLevel::Low);
    }

    #[test]
    fn transport_only_for_conveyance_types() {
        assert!(OccurrenceType::Medical.requires_transport());
        assert!(OccurrenceType::Rescue.requires_transport());
        assert!(!OccurrenceType::Police.requires_transport());
        assert!(!OccurrenceType::Fire.requires_transport());
        assert!(!OccurrenceType::Other.requires_transport());
    }

    #[test]
    fn enum_strings_are_snake_case() {
        assert_eq!(AppRole::DispatcherSamu.to_string(), "dispatcher_samu");
        assert_eq!(
            "dispatcher_fire".parse::<AppRole>().unwrap(),
            AppRole::DispatcherFire
        );
        assert_eq!(OrganizationType::Samu.as_ref(), "samu");
        assert!("ambulance".parse::<OccurrenceType>().is_err());
    }

    #[test]
    fn only_dispatchers_cancel() {
        for role in AppRole::all() {
            assert_eq!(role.can_cancel(), role.is_dispatcher(), "{role:?}");
        }
        assert!(!AppRole::Observer.can_cancel());
        assert!(!AppRole::SamuTeam.can_cancel());
    }

    #[test]
    fn crews_watch_no_occurrence_types() {
        for role in AppRole::all() {
            if role.is_field_crew() {
                assert!(role.watched_occurrence_types().is_empty(), "{role:?}");
            }
        }
        assert_eq!(
            AppRole::DispatcherFire.watched_occurrence_types(),
            &[OccurrenceType::Fire, OccurrenceType::Rescue]
        );
    }
}
