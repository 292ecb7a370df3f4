//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.is_empty() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate that a lower bound does not exceed an upper bound
pub fn validate_bounds<T>(
    min: T,
    max: T,
    min_name: &str,
    max_name: &str,
    domain: &str,
) -> ConfigResult<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if min > max {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} ({}) cannot exceed {} ({})", min_name, min, max_name, max),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_required_string() {
        assert!(validate_required_string("worker", "name", "pool").is_ok());
        assert!(validate_required_string("", "name", "pool").is_err());
    }

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1usize, "min", "pool").is_ok());
        assert!(validate_positive(0usize, "min", "pool").is_err());
    }

    #[test]
    fn test_validate_bounds() {
        assert!(validate_bounds(1usize, 4usize, "min", "max", "pool").is_ok());
        assert!(validate_bounds(4usize, 4usize, "min", "max", "pool").is_ok());
        let err = validate_bounds(5usize, 4usize, "min", "max", "pool").unwrap_err();
        assert!(err.to_string().contains("min"));
    }
}
