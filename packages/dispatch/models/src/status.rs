//! Status enums and the transition rules between them.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::OccurrenceType;

/// Lifecycle status of an occurrence.
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
pub enum OccurrenceStatus {
    /// Registered, no vehicle assigned yet.
    Pending,
    /// At least one vehicle has been assigned.
    Dispatched,
    /// A responding vehicle acknowledged and is on its way.
    EnRoute,
    /// A responding vehicle arrived.
    OnScene,
    /// A patient or victim is being conveyed.
    Transporting,
    /// Closed after a successful response.
    Completed,
    /// Closed without completion.
    Cancelled,
}

impl OccurrenceStatus {
    /// Statuses an occurrence can hold while still open.
    pub const ACTIVE: &'static [Self] = &[
        Self::Pending,
        Self::Dispatched,
        Self::EnRoute,
        Self::OnScene,
        Self::Transporting,
    ];

    /// Whether no further transition is permitted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Position along the response progression, used to decide whether a
    /// derived status moves an occurrence forward.
    #[must_use]
    pub const fn progress_rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Dispatched => 1,
            Self::EnRoute => 2,
            Self::OnScene => 3,
            Self::Transporting => 4,
            Self::Completed => 5,
            Self::Cancelled => 6,
        }
    }

    /// Whether an explicit `advance` from `self` to `target` is legal for
    /// an occurrence of the given type.
    ///
    /// `pending -> dispatched` is deliberately absent: only a vehicle
    /// assignment moves an occurrence out of `pending`, other than
    /// cancellation.
    #[must_use]
    pub const fn can_advance_to(self, target: Self, occurrence_type: OccurrenceType) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, target) {
            (_, Self::Cancelled)
            | (Self::Dispatched, Self::EnRoute)
            | (Self::EnRoute, Self::OnScene)
            | (Self::Transporting, Self::Completed) => true,
            (Self::OnScene, Self::Transporting) => occurrence_type.requires_transport(),
            (Self::OnScene, Self::Completed) => !occurrence_type.requires_transport(),
            _ => false,
        }
    }

    /// Every status reachable from `self` through one explicit `advance`.
    #[must_use]
    pub fn successors(self, occurrence_type: OccurrenceType) -> Vec<Self> {
        Self::all()
            .iter()
            .copied()
            .filter(|target| self.can_advance_to(*target, occurrence_type))
            .collect()
    }

    /// Derives the canonical status of an open occurrence from the
    /// statuses of its dispatches.
    ///
    /// The occurrence follows its most advanced open dispatch; once no
    /// dispatch is open and at least one completed, it is `completed`.
    /// The result never moves backwards from `self`, so a step a
    /// dispatcher already took is kept.
    #[must_use]
    pub fn derive_from_dispatches<I>(self, dispatches: I) -> Self
    where
        I: IntoIterator<Item = DispatchStatus>,
    {
        if self.is_terminal() {
            return self;
        }

        let mut most_advanced_open: Option<DispatchStatus> = None;
        let mut any_completed = false;

        for status in dispatches {
            if status.is_open() {
                if most_advanced_open.is_none_or(|current| status.rank() > current.rank()) {
                    most_advanced_open = Some(status);
                }
            } else if status == DispatchStatus::Completed {
                any_completed = true;
            }
        }

        let candidate = match most_advanced_open {
            Some(status) => status.as_occurrence_status(),
            None if any_completed => Self::Completed,
            None => return self,
        };

        if candidate.progress_rank() > self.progress_rank() {
            candidate
        } else {
            self
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Pending,
            Self::Dispatched,
            Self::EnRoute,
            Self::OnScene,
            Self::Transporting,
            Self::Completed,
            Self::Cancelled,
        ]
    }
}

/// Status of a single vehicle's response to an occurrence.
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
pub enum DispatchStatus {
    /// Vehicle assigned.
    Dispatched,
    /// Crew acknowledged and is driving to the scene.
    EnRoute,
    /// Crew arrived.
    OnScene,
    /// Crew is conveying a patient or victim.
    Transporting,
    /// Response finished, vehicle released.
    Completed,
    /// Closed because the parent occurrence was cancelled.
    Cancelled,
}

/// Which timestamp column a dispatch transition stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampField {
    /// `acknowledged_at`, on entering `en_route`.
    Acknowledged,
    /// `arrived_at`, on entering `on_scene`.
    Arrived,
    /// `completed_at`, on entering `completed` or `cancelled`.
    Completed,
}

impl DispatchStatus {
    /// Whether the dispatch still holds its vehicle.
    #[must_use]
    pub const fn is_open(self) -> bool {
        !matches!(self, Self::Completed | Self::Cancelled)
    }

    const fn rank(self) -> u8 {
        self.as_occurrence_status().progress_rank()
    }

    /// The occurrence status this dispatch status mirrors.
    #[must_use]
    pub const fn as_occurrence_status(self) -> OccurrenceStatus {
        match self {
            Self::Dispatched => OccurrenceStatus::Dispatched,
            Self::EnRoute => OccurrenceStatus::EnRoute,
            Self::OnScene => OccurrenceStatus::OnScene,
            Self::Transporting => OccurrenceStatus::Transporting,
            Self::Completed => OccurrenceStatus::Completed,
            Self::Cancelled => OccurrenceStatus::Cancelled,
        }
    }

    /// Whether a crew or dispatcher may advance a dispatch from `self` to
    /// `target`. Forward single steps only; `cancelled` is never reached
    /// this way.
    #[must_use]
    pub const fn can_advance_to(self, target: Self, occurrence_type: OccurrenceType) -> bool {
        match (self, target) {
            (Self::Dispatched, Self::EnRoute)
            | (Self::EnRoute, Self::OnScene)
            | (Self::Transporting, Self::Completed) => true,
            (Self::OnScene, Self::Transporting) => occurrence_type.requires_transport(),
            (Self::OnScene, Self::Completed) => !occurrence_type.requires_transport(),
            _ => false,
        }
    }

    /// The next step offered to a crew for this dispatch, if any.
    #[must_use]
    pub const fn next(self, occurrence_type: OccurrenceType) -> Option<Self> {
        match self {
            Self::Dispatched => Some(Self::EnRoute),
            Self::EnRoute => Some(Self::OnScene),
            Self::OnScene if occurrence_type.requires_transport() => Some(Self::Transporting),
            Self::OnScene | Self::Transporting => Some(Self::Completed),
            Self::Completed | Self::Cancelled => None,
        }
    }

    /// The timestamp column stamped when a dispatch enters this status.
    #[must_use]
    pub const fn stamps(self) -> Option<TimestampField> {
        match self {
            Self::EnRoute => Some(TimestampField::Acknowledged),
            Self::OnScene => Some(TimestampField::Arrived),
            Self::Completed | Self::Cancelled => Some(TimestampField::Completed),
            Self::Dispatched | Self::Transporting => None,
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Dispatched,
            Self::EnRoute,
            Self::OnScene,
            Self::Transporting,
            Self::Completed,
            Self::Cancelled,
        ]
    }
}

/// Operational status of a vehicle.
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
pub enum VehicleStatus {
    /// Free to be dispatched or crewed.
    Available,
    /// Held by active crew and/or an open dispatch.
    Busy,
    /// Out of service for maintenance.
    Maintenance,
    /// Out of service, not staffed.
    OffDuty,
}

impl VehicleStatus {
    /// Recomputes a vehicle's status from the two independent reasons it
    /// can be held: active crew membership and open dispatches.
    ///
    /// A held vehicle is always `busy`. A vehicle that is no longer held
    /// reverts from `busy` to `available`; out-of-service statuses are
    /// left alone.
    #[must_use]
    pub const fn derive(self, active_crew: usize, open_dispatches: usize) -> Self {
        if active_crew > 0 || open_dispatches > 0 {
            Self::Busy
        } else {
            match self {
                Self::Busy => Self::Available,
                other => other,
            }
        }
    }

    /// Whether an administrator may put a vehicle into this status by hand.
    /// `busy` is only ever derived.
    #[must_use]
    pub const fn is_manually_settable(self) -> bool {
        !matches!(self, Self::Busy)
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Available, Self::Busy, Self::Maintenance, Self::OffDuty]
    }
}
