//! Input validation for commands that create entities.
//!
//! Validators collect every problem instead of stopping at the first one,
//! so a form can highlight all offending fields at once.

use serde::Deserialize;
use sigor_dispatch_models::{OccurrenceType, OrganizationType, PriorityLevel};
use uuid::Uuid;

use crate::ValidationErrors;

pub const TITLE_MIN: usize = 5;
pub const TITLE_MAX: usize = 200;
pub const DESCRIPTION_MAX: usize = 2000;
pub const CALLER_NAME_MAX: usize = 100;
pub const CALLER_PHONE_MAX: usize = 20;
pub const LOCATION_ADDRESS_MAX: usize = 300;
pub const LOCATION_REFERENCE_MAX: usize = 200;
pub const NAME_MAX: usize = 100;
pub const ORGANIZATION_CODE_MAX: usize = 10;
pub const VEHICLE_IDENTIFIER_MAX: usize = 30;
pub const NOTES_MAX: usize = 1000;

/// Input for `create_occurrence`. Required fields are optional here so that
/// their absence is reported as a field error rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOccurrence {
    pub organization_id: Option<Uuid>,
    pub occurrence_type: Option<OccurrenceType>,
    pub priority: Option<PriorityLevel>,
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    pub caller_name: Option<String>,
    pub caller_phone: Option<String>,
    pub location_address: Option<String>,
    pub location_reference: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A [`NewOccurrence`] that passed validation, with blank optional text
/// normalised to `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidOccurrence {
    pub organization_id: Uuid,
    pub occurrence_type: OccurrenceType,
    pub priority: PriorityLevel,
    pub title: String,
    pub description: Option<String>,
    pub caller_name: Option<String>,
    pub caller_phone: Option<String>,
    pub location_address: Option<String>,
    pub location_reference: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Input for `create_organization`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrganization {
    pub name: String,
    pub code: String,
    pub organization_type: OrganizationType,
    pub phone: Option<String>,
}

/// Input for `create_base`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBase {
    pub name: String,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Input for `register_vehicle`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVehicle {
    pub identifier: String,
    pub vehicle_type: String,
    pub capacity: Option<i32>,
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}

/// Trims `value`, maps blank to `None` and records an error if longer than
/// `max` characters.
fn optional_text(
    errors: &mut ValidationErrors,
    field: &'static str,
    value: Option<&str>,
    max: usize,
) -> Option<String> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    if char_len(value) > max {
        errors.push(field, format!("must be at most {max} characters"));
    }
    Some(value.to_string())
}

fn required_text(
    errors: &mut ValidationErrors,
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> String {
    let value = value.trim();
    let len = char_len(value);
    if len == 0 {
        errors.push(field, "is required");
    } else if len < min {
        errors.push(field, format!("must be at least {min} characters"));
    } else if len > max {
        errors.push(field, format!("must be at most {max} characters"));
    }
    value.to_string()
}

fn coordinates(errors: &mut ValidationErrors, latitude: Option<f64>, longitude: Option<f64>) {
    match (latitude, longitude) {
        (Some(lat), Some(lon)) => {
            if !(-90.0..=90.0).contains(&lat) {
                errors.push("latitude", "must be between -90 and 90");
            }
            if !(-180.0..=180.0).contains(&lon) {
                errors.push("longitude", "must be between -180 and 180");
            }
        }
        (Some(_), None) => errors.push("longitude", "is required when latitude is set"),
        (None, Some(_)) => errors.push("latitude", "is required when longitude is set"),
        (None, None) => {}
    }
}

/// Validates optional free-text notes attached to a transition.
///
/// # Errors
///
/// Returns [`ValidationErrors`] if the notes are too long.
pub fn validate_notes(notes: Option<&str>) -> Result<Option<String>, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let notes = optional_text(&mut errors, "notes", notes, NOTES_MAX);
    errors.into_result(notes)
}

impl NewOccurrence {
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] listing every missing or malformed
    /// field.
    pub fn validate(&self) -> Result<ValidOccurrence, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.organization_id.is_none() {
            errors.push("organization_id", "is required");
        }
        if self.occurrence_type.is_none() {
            errors.push("occurrence_type", "is required");
        }
        if self.priority.is_none() {
            errors.push("priority", "is required");
        }

        let title = required_text(&mut errors, "title", &self.title, TITLE_MIN, TITLE_MAX);
        let description = optional_text(
            &mut errors,
            "description",
            self.description.as_deref(),
            DESCRIPTION_MAX,
        );
        let caller_name = optional_text(
            &mut errors,
            "caller_name",
            self.caller_name.as_deref(),
            CALLER_NAME_MAX,
        );
        let caller_phone = optional_text(
            &mut errors,
            "caller_phone",
            self.caller_phone.as_deref(),
            CALLER_PHONE_MAX,
        );
        let location_address = optional_text(
            &mut errors,
            "location_address",
            self.location_address.as_deref(),
            LOCATION_ADDRESS_MAX,
        );
        let location_reference = optional_text(
            &mut errors,
            "location_reference",
            self.location_reference.as_deref(),
            LOCATION_REFERENCE_MAX,
        );
        coordinates(&mut errors, self.latitude, self.longitude);

        match (self.organization_id, self.occurrence_type, self.priority) {
            (Some(organization_id), Some(occurrence_type), Some(priority)) if errors.is_empty() => {
                Ok(ValidOccurrence {
                    organization_id,
                    occurrence_type,
                    priority,
                    title,
                    description,
                    caller_name,
                    caller_phone,
                    location_address,
                    location_reference,
                    latitude: self.latitude,
                    longitude: self.longitude,
                })
            }
            _ => Err(errors),
        }
    }
}

impl NewOrganization {
    /// Trims fields and upper-cases the code.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] listing every malformed field.
    pub fn validate(&self) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let name = required_text(&mut errors, "name", &self.name, 2, NAME_MAX);
        let code = required_text(&mut errors, "code", &self.code, 2, ORGANIZATION_CODE_MAX)
            .to_uppercase();
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            errors.push("code", "must contain only letters and digits");
        }
        let phone = optional_text(&mut errors, "phone", self.phone.as_deref(), CALLER_PHONE_MAX);
        errors.into_result(Self {
            name,
            code,
            organization_type: self.organization_type,
            phone,
        })
    }
}

impl NewBase {
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] listing every malformed field.
    pub fn validate(&self) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let name = required_text(&mut errors, "name", &self.name, 2, NAME_MAX);
        let address = optional_text(
            &mut errors,
            "address",
            self.address.as_deref(),
            LOCATION_ADDRESS_MAX,
        );
        coordinates(&mut errors, self.latitude, self.longitude);
        errors.into_result(Self {
            name,
            address,
            latitude: self.latitude,
            longitude: self.longitude,
        })
    }
}

impl NewVehicle {
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] listing every malformed field.
    pub fn validate(&self) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let identifier = required_text(
            &mut errors,
            "identifier",
            &self.identifier,
            1,
            VEHICLE_IDENTIFIER_MAX,
        );
        let vehicle_type = required_text(&mut errors, "vehicle_type", &self.vehicle_type, 1, NAME_MAX);
        if self.capacity.is_some_and(|c| c <= 0) {
            errors.push("capacity", "must be positive");
        }
        errors.into_result(Self {
            identifier,
            vehicle_type,
            capacity: self.capacity,
        })
    }
}
