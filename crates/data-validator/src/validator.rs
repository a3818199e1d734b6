//! Range Validator for Sensor Readings

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Validation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Temperature valid range (°C)
    pub temperature_range: (f64, f64),
    /// Relative humidity valid range (%)
    pub humidity_range: (f64, f64),
}

impl Default for ValidationConfig {
    fn default() -> Self {
        // DHT22 operating envelope
        Self {
            temperature_range: (-40.0, 80.0),
            humidity_range: (0.0, 100.0),
        }
    }
}

/// Result of validation
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether all values are valid
    pub valid: bool,
    /// List of validation errors
    pub errors: Vec<ValidationError>,
    /// Number of fields validated
    pub fields_checked: usize,
}

impl ValidationResult {
    /// Create a valid result
    pub fn valid(fields_checked: usize) -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            fields_checked,
        }
    }

    /// Create an invalid result with errors
    pub fn invalid(errors: Vec<ValidationError>, fields_checked: usize) -> Self {
        Self {
            valid: false,
            errors,
            fields_checked,
        }
    }

    /// First error, if any
    pub fn first_error(&self) -> Option<&ValidationError> {
        self.errors.first()
    }
}

/// Validator for temperature/humidity readings
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    /// Create a new validator with given config
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Validate a single value against an inclusive range
    pub fn validate_range(
        &self,
        field: &'static str,
        value: f64,
        range: (f64, f64),
    ) -> Result<(), ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NotFinite { field });
        }
        if value < range.0 || value > range.1 {
            Err(ValidationError::OutOfRange {
                field,
                value,
                min: range.0,
                max: range.1,
            })
        } else {
            Ok(())
        }
    }

    /// Validate temperature
    pub fn validate_temperature(&self, temperature: f64) -> Result<(), ValidationError> {
        self.validate_range("temperature", temperature, self.config.temperature_range)
    }

    /// Validate relative humidity
    pub fn validate_humidity(&self, humidity: f64) -> Result<(), ValidationError> {
        self.validate_range("humidity", humidity, self.config.humidity_range)
    }

    /// Validate a complete reading, collecting every field error
    pub fn validate_reading(&self, temperature: f64, humidity: f64) -> ValidationResult {
        let errors: Vec<_> = [
            self.validate_temperature(temperature),
            self.validate_humidity(humidity),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if errors.is_empty() {
            ValidationResult::valid(2)
        } else {
            debug!("Reading rejected with {} error(s)", errors.len());
            ValidationResult::invalid(errors, 2)
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_valid_temperature() {
        let validator = Validator::default();
        assert!(validator.validate_temperature(21.5).is_ok());
        assert!(validator.validate_temperature(-40.0).is_ok());
        assert!(validator.validate_temperature(80.0).is_ok());
    }

    #[test]
    fn test_invalid_temperature() {
        let validator = Validator::default();
        assert!(validator.validate_temperature(-41.0).is_err());
        assert!(validator.validate_temperature(120.0).is_err());
    }

    #[test]
    fn test_humidity_range() {
        let validator = Validator::default();
        assert!(validator.validate_humidity(0.0).is_ok());
        assert!(validator.validate_humidity(55.0).is_ok());
        assert!(validator.validate_humidity(100.0).is_ok());
        assert!(validator.validate_humidity(-1.0).is_err());
        assert!(validator.validate_humidity(100.5).is_err());
    }

    #[test]
    fn test_non_finite_rejected() {
        let validator = Validator::default();
        assert_eq!(
            validator.validate_temperature(f64::NAN),
            Err(ValidationError::NotFinite { field: "temperature" })
        );
        assert!(validator.validate_humidity(f64::INFINITY).is_err());
    }

    #[test]
    fn test_reading_collects_all_errors() {
        let validator = Validator::default();
        let result = validator.validate_reading(200.0, 150.0);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.fields_checked, 2);
        assert_eq!(result.first_error().map(|e| e.field()), Some("temperature"));

        let result = validator.validate_reading(22.0, 45.0);
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_custom_ranges() {
        let validator = Validator::new(ValidationConfig {
            temperature_range: (0.0, 50.0),
            humidity_range: (20.0, 90.0),
        });
        assert!(validator.validate_temperature(-5.0).is_err());
        assert!(validator.validate_humidity(10.0).is_err());
        assert!(validator.validate_reading(25.0, 50.0).valid);
    }

    proptest! {
        #[test]
        fn prop_in_range_readings_accepted(t in -40.0f64..=80.0, h in 0.0f64..=100.0) {
            prop_assert!(Validator::default().validate_reading(t, h).valid);
        }

        #[test]
        fn prop_hot_readings_rejected(t in 80.001f64..1.0e6, h in 0.0f64..=100.0) {
            let result = Validator::default().validate_reading(t, h);
            prop_assert!(!result.valid);
            prop_assert_eq!(result.errors.len(), 1);
        }

        #[test]
        fn prop_cold_readings_rejected(t in -1.0e6f64..-40.001, h in 0.0f64..=100.0) {
            let result = Validator::default().validate_reading(t, h);
            prop_assert!(!result.valid);
            prop_assert_eq!(result.first_error().map(|e| e.field()), Some("temperature"));
        }

        #[test]
        fn prop_out_of_range_humidity_rejected(
            t in -40.0f64..=80.0,
            h in prop_oneof![-1.0e6f64..-0.001, 100.001f64..1.0e6],
        ) {
            let result = Validator::default().validate_reading(t, h);
            prop_assert!(!result.valid);
            prop_assert_eq!(result.errors.len(), 1);
            prop_assert_eq!(result.first_error().map(|e| e.field()), Some("humidity"));
        }
    }
}
