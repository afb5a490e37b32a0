//! Human-readable occurrence codes.

/// Formats an occurrence code as `{ORG_CODE}-{YYYY}-{NNNNN}`.
///
/// Numbers wider than five digits are printed in full, so codes stay
/// unique past 99999 occurrences a year.
#[must_use]
pub fn occurrence_code(organization_code: &str, year: i32, number: i64) -> String {
    format!("{}-{year}-{number:05}", organization_code.to_uppercase())
}
