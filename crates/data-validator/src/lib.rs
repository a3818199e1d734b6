//! Reading Validation
//!
//! Range checking for temperature and humidity readings before they are persisted.

mod error;
mod validator;

pub use error::ValidationError;
pub use validator::{Validator, ValidationConfig, ValidationResult};
