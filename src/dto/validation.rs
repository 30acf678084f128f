//! Validation helpers for DTOs.

use validator::ValidationError;

const MAX_KORT_ID_LEN: usize = 32;

/// Validates that a court id is 1 to 32 characters of ASCII letters, digits, `-` or `_`.
///
/// # Examples
///
/// ```ignore
/// validate_kort_id("1")           // Ok
/// validate_kort_id("centre-court") // Ok
/// validate_kort_id("court 1")     // Err - whitespace
/// ```
pub fn validate_kort_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_KORT_ID_LEN {
        let mut err = ValidationError::new("kort_id_length");
        err.message = Some(
            format!("Court ID must be 1 to {MAX_KORT_ID_LEN} characters (got {})", id.len()).into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new("kort_id_format");
        err.message = Some("Court ID may only contain letters, digits, '-' and '_'".into());
        return Err(err);
    }

    Ok(())
}

/// Validates activity multipliers: finite, at least 1 and non-decreasing.
pub fn validate_multipliers(multipliers: &[f64; 4]) -> Result<(), ValidationError> {
    if multipliers.iter().any(|value| !value.is_finite() || *value < 1.0) {
        let mut err = ValidationError::new("multiplier_range");
        err.message = Some("Activity multipliers must be finite and at least 1".into());
        return Err(err);
    }
    if multipliers.windows(2).any(|pair| pair[1] < pair[0]) {
        let mut err = ValidationError::new("multiplier_order");
        err.message = Some("Activity multipliers must not decrease".into());
        return Err(err);
    }
    Ok(())
}
