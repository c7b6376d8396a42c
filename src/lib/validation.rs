//! Input validation helpers for the command-line layer.

use std::path::Path;

use crate::errors::{DsaError, Result};

/// Validates that a file exists.
///
/// # Errors
/// Returns [`DsaError::Io`] with a not-found error when it does not.
pub fn validate_file_exists<P: AsRef<Path>>(path: P, description: &str) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DsaError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{description} does not exist"),
            ),
        });
    }
    Ok(())
}

/// Validates that `value` lies in `[0, 1]`.
///
/// # Errors
/// Returns [`DsaError::InvalidParameter`] otherwise.
pub fn validate_unit_interval(value: f32, name: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(DsaError::InvalidParameter {
            parameter: name.to_string(),
            reason: format!("{value} is not between 0 and 1"),
        });
    }
    Ok(())
}

/// Validates that `value` is at least 1.
///
/// # Errors
/// Returns [`DsaError::InvalidParameter`] when it is 0.
pub fn validate_positive(value: usize, name: &str) -> Result<()> {
    if value == 0 {
        return Err(DsaError::InvalidParameter {
            parameter: name.to_string(),
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}
