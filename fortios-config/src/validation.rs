//! Settings validation.

use crate::{ConfigError, Result};

/// Trait for validating settings.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable field checks.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not blank.
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid(field, "cannot be empty"));
        }
        Ok(())
    }

    /// Validate that a number is within `min..=max`.
    pub fn in_range<T: PartialOrd + std::fmt::Display>(
        value: T,
        min: T,
        max: T,
        field: &str,
    ) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::invalid(
                field,
                format!("{} is outside {}..={}", value, min, max),
            ));
        }
        Ok(())
    }

    /// Validate that a number is at least `min`.
    pub fn at_least<T: PartialOrd + std::fmt::Display>(value: T, min: T, field: &str) -> Result<()> {
        if value < min {
            return Err(ConfigError::invalid(field, format!("must be at least {}", min)));
        }
        Ok(())
    }

    /// Validate that a value is one of the allowed strings, ignoring case.
    pub fn one_of(value: &str, allowed: &[&str], field: &str) -> Result<()> {
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(value)) {
            return Err(ConfigError::invalid(
                field,
                format!("must be one of: {}", allowed.join(", ")),
            ));
        }
        Ok(())
    }

    /// Validate a port number. Zero is accepted.
    pub fn is_port(value: u32, field: &str) -> Result<()> {
        Self::in_range(value, 0, u16::MAX as u32, field)
    }
}
