//! Field validators.
//!
//! Validators run after a field's type coercion succeeded and check one
//! constraint each. They are attached to a
//! [`FormFieldDef`](crate::fields::FormFieldDef) with
//! [`validator`](crate::fields::FormFieldDef::validator).

use std::fmt;

use betterforms_core::{ValidationError, Value};

/// A trait for validating cleaned field values.
///
/// # Examples
///
/// ```
/// use betterforms_core::Value;
/// use betterforms_forms::validators::{MaxLengthValidator, Validator};
///
/// let v = MaxLengthValidator::new(5);
/// assert!(v.validate(&Value::from("hi")).is_ok());
/// assert!(v.validate(&Value::from("toolong")).is_err());
/// ```
pub trait Validator: Send + Sync + fmt::Debug {
    /// Validates the given value, returning an error if invalid.
    fn validate(&self, value: &Value) -> Result<(), ValidationError>;

    /// Returns a human-readable name for this validator.
    fn name(&self) -> &str;
}

/// Validates that a string value has at least `min_length` characters.
#[derive(Debug, Clone)]
pub struct MinLengthValidator {
    /// The minimum allowed length.
    pub min_length: usize,
}

impl MinLengthValidator {
    /// Creates a new `MinLengthValidator`.
    pub const fn new(min_length: usize) -> Self {
        Self { min_length }
    }
}

impl Validator for MinLengthValidator {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        if let Value::String(s) = value {
            let len = s.chars().count();
            if len < self.min_length {
                return Err(ValidationError::new(
                    format!(
                        "Ensure this value has at least {} characters (it has {len}).",
                        self.min_length
                    ),
                    "min_length",
                )
                .with_param("limit_value", self.min_length.to_string()));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MinLengthValidator"
    }
}

/// Validates that a string value does not exceed `max_length` characters.
#[derive(Debug, Clone)]
pub struct MaxLengthValidator {
    /// The maximum allowed length.
    pub max_length: usize,
}

impl MaxLengthValidator {
    /// Creates a new `MaxLengthValidator`.
    pub const fn new(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl Validator for MaxLengthValidator {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        if let Value::String(s) = value {
            let len = s.chars().count();
            if len > self.max_length {
                return Err(ValidationError::new(
                    format!(
                        "Ensure this value has at most {} characters (it has {len}).",
                        self.max_length
                    ),
                    "max_length",
                )
                .with_param("limit_value", self.max_length.to_string()));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MaxLengthValidator"
    }
}

/// Validates that a string value matches a regular expression.
#[derive(Debug, Clone)]
pub struct RegexValidator {
    regex: regex::Regex,
    message: String,
}

impl RegexValidator {
    /// Creates a new `RegexValidator`.
    ///
    /// Returns the regex compile error if `pattern` is invalid.
    pub fn new(pattern: &str, message: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: regex::Regex::new(pattern)?,
            message: message.into(),
        })
    }
}

impl Validator for RegexValidator {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        match value {
            Value::String(s) if !self.regex.is_match(s) => {
                Err(ValidationError::new(self.message.clone(), "invalid"))
            }
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "RegexValidator"
    }
}
