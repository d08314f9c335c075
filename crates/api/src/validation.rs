use crate::error::ApiError;
use validator::{Validate, ValidationError};

/// Checks a request body against its `validator` rules and hands it back.
pub fn validated<T: Validate>(body: T) -> Result<T, ApiError> {
    body.validate()
        .map_err(|err| ApiError::Validation(err.to_string()))?;
    Ok(body)
}

pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}
