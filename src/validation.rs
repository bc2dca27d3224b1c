//! Input checks that run before any model is touched.
//!
//! All functions are pure. They either hand back the caller's input or a
//! [`AnalysisError::Validation`] naming the field and the offending value.

use crate::error::AnalysisError;

/// Check that every item is a member of `supported`.
///
/// Returns the input unchanged on success. On failure the error message
/// names every offending item and lists the full supported set.
pub fn validate_members<'a, S: AsRef<str>>(
    field: &str,
    items: &'a [String],
    supported: &[S],
) -> Result<&'a [String], AnalysisError> {
    let invalid: Vec<&str> = items
        .iter()
        .map(String::as_str)
        .filter(|item| !supported.iter().any(|s| s.as_ref() == *item))
        .collect();

    if invalid.is_empty() {
        return Ok(items);
    }

    let supported: Vec<&str> = supported.iter().map(AsRef::as_ref).collect();
    Err(AnalysisError::validation(
        field,
        format!(
            "Unsupported {}: {:?}. Supported: {:?}",
            field, invalid, supported
        ),
        Some(format!("{:?}", invalid)),
    ))
}

/// Check that a free-text value is non-empty after trimming.
///
/// Returns the trimmed text.
pub fn validate_non_empty<'a>(field: &str, text: &'a str) -> Result<&'a str, AnalysisError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        let label = capitalize(field);
        return Err(AnalysisError::validation(
            field,
            format!("{} cannot be empty", label),
            None,
        ));
    }
    Ok(trimmed)
}

/// Check that a list holds at least one item.
pub fn validate_required<'a, T>(
    field: &str,
    items: &'a [T],
    what: &str,
) -> Result<&'a [T], AnalysisError> {
    if items.is_empty() {
        return Err(AnalysisError::validation(
            field,
            format!("At least one {} is required", what),
            None,
        ));
    }
    Ok(items)
}

/// Check that a value lies in the closed interval [0, 1].
pub fn validate_probability(field: &str, value: f64) -> Result<f64, AnalysisError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AnalysisError::validation(
            field,
            "Must be between 0 and 1",
            Some(value.to_string()),
        ));
    }
    Ok(value)
}

/// Check that a count is at least `min`.
pub fn validate_at_least(field: &str, value: usize, min: usize) -> Result<usize, AnalysisError> {
    if value < min {
        return Err(AnalysisError::validation(
            field,
            format!("Must be at least {}", min),
            Some(value.to_string()),
        ));
    }
    Ok(value)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
