// keel-config/src/validation.rs
//! Custom validation functions for configuration.
//!
//! Provides shared validation logic used across multiple configuration modules.

use validator::ValidationError;

/// Granularity every pool capacity must be a multiple of.
pub const CAPACITY_ALIGNMENT: usize = 16;

/// Validate that a pool capacity is a whole number of alignment units.
pub fn validate_alignment_multiple(value: usize) -> Result<(), ValidationError> {
    if value % CAPACITY_ALIGNMENT == 0 {
        Ok(())
    } else {
        Err(ValidationError::new("must_be_alignment_multiple"))
    }
}

/// Validate a log level name.
pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let re = regex::Regex::new("^(trace|debug|info|warn|error)$")
        .map_err(|_| ValidationError::new("invalid_regex"))?;
    if re.is_match(&level.to_lowercase()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels() {
        assert!(validate_log_level("info").is_ok());
        assert!(validate_log_level("WARN").is_ok());
        assert!(validate_log_level("verbose").is_err());
    }

    #[test]
    fn alignment_multiples() {
        assert!(validate_alignment_multiple(4096).is_ok());
        assert!(validate_alignment_multiple(4100).is_err());
    }
}
