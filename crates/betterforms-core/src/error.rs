//! Error types.
//!
//! [`ValidationError`] is what validators and crossform checks return; it
//! ends up as messages in a form's error dict. [`FormsError`] is for
//! everything else: asking for an undeclared sub-form, saving before
//! validating, bad configuration, or a failing model store.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// A failed check, with optional per-field errors nested under it.
///
/// ```
/// use betterforms_core::error::ValidationError;
///
/// let mismatch = ValidationError::new("Passwords do not match.", "password_mismatch")
///     .for_field("confirm", ValidationError::message("Must match the password."));
///
/// assert_eq!(mismatch.code.as_deref(), Some("password_mismatch"));
/// assert_eq!(
///     mismatch.messages(),
///     vec!["Passwords do not match.".to_string(), "Must match the password.".to_string()],
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    /// May be empty when the error only groups field errors.
    pub message: String,
    /// Machine-readable kind, such as `required` or `min_length`.
    pub code: Option<String>,
    /// Values the message was formatted with (`limit_value`).
    pub params: BTreeMap<String, String>,
    pub field_errors: BTreeMap<String, Vec<Self>>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Self::message(message)
        }
    }

    /// An error with a message and no code.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// An error made only of per-field errors.
    pub fn with_field_errors<I, K>(field_errors: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<Self>)>,
        K: Into<String>,
    {
        Self {
            field_errors: field_errors.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Nests `error` under `field`.
    #[must_use]
    pub fn for_field(mut self, field: impl Into<String>, error: Self) -> Self {
        self.field_errors.entry(field.into()).or_default().push(error);
        self
    }

    /// The own message, then nested messages by field name.
    pub fn messages(&self) -> Vec<String> {
        let own = Some(self.message.clone()).filter(|m| !m.is_empty());
        own.into_iter()
            .chain(self.field_errors.values().flatten().flat_map(Self::messages))
            .collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.message.is_empty() {
            return f.write_str(&self.message);
        }
        let parts: Vec<String> = self
            .field_errors
            .iter()
            .flat_map(|(field, errors)| errors.iter().map(move |error| format!("{field}: {error}")))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// The primary error type for the betterforms crates.
///
/// Validation failures of submitted data are *not* reported through this
/// enum; they are recorded on the form and surfaced through `errors()`.
/// `FormsError` covers misuse (looking up an undeclared sub-form, saving an
/// unvalidated form), configuration problems, and failures of external
/// collaborators such as a model store.
#[derive(Error, Debug)]
pub enum FormsError {
    // ── Lookup ───────────────────────────────────────────────────────

    /// A sub-form name was never declared on the aggregate.
    #[error("Form '{name}' not found in '{container}'. Choices are: {}.", .choices.join(", "))]
    FormNotFound {
        /// The requested name.
        name: String,
        /// The aggregate that was searched.
        container: String,
        /// The declared names, sorted.
        choices: Vec<String>,
    },

    /// The same sub-form name was declared twice.
    #[error("Form '{0}' is declared more than once")]
    DuplicateForm(String),

    // ── Lifecycle ────────────────────────────────────────────────────

    /// An operation requiring prior validation was called too early.
    #[error("'{0}' has not been validated; call is_valid() first")]
    NotValidated(String),

    /// An operation requiring valid data was called on an invalid form.
    #[error("'{0}' did not validate")]
    InvalidForm(String),

    // ── Validation ───────────────────────────────────────────────────

    /// A validation error escaped into an error path.
    #[error("Validation error: {0}")]
    Validation(ValidationError),

    /// A form factory failed to construct a form.
    #[error("Failed to construct form '{name}': {reason}")]
    Factory {
        /// The sub-form name being constructed.
        name: String,
        /// Why construction failed.
        reason: String,
    },

    // ── Persistence ──────────────────────────────────────────────────

    /// The model store rejected an operation.
    #[error("Database error: {0}")]
    Database(String),

    // ── Submitted data ───────────────────────────────────────────────

    /// A mutation was attempted on an immutable `QueryDict`.
    #[error("This QueryDict instance is immutable")]
    ImmutableQueryDict,

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ValidationError> for FormsError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}

/// A convenience type alias for `Result<T, FormsError>`.
pub type FormsResult<T> = Result<T, FormsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_only() {
        let err = ValidationError::message("It broke");
        assert!(err.code.is_none());
        assert_eq!(err.to_string(), "It broke");
        assert_eq!(err.messages(), vec!["It broke".to_string()]);
    }

    #[test]
    fn test_field_errors_display_in_field_order() {
        let err = ValidationError::with_field_errors([
            ("username", vec![ValidationError::message("Taken.")]),
            ("email", vec![ValidationError::new("Invalid email.", "invalid")]),
        ]);
        assert_eq!(err.to_string(), "email: Invalid email.; username: Taken.");
        assert_eq!(err.messages(), vec!["Invalid email.".to_string(), "Taken.".to_string()]);
    }

    #[test]
    fn test_params() {
        let err = ValidationError::new("Too short.", "min_length").with_param("limit_value", "8");
        assert_eq!(err.params.get("limit_value").map(String::as_str), Some("8"));
    }

    #[test]
    fn test_form_not_found_lists_choices() {
        let err = FormsError::FormNotFound {
            name: "billing".into(),
            container: "CheckoutForm".into(),
            choices: vec!["profile".into(), "user".into()],
        };
        assert_eq!(
            err.to_string(),
            "Form 'billing' not found in 'CheckoutForm'. Choices are: profile, user."
        );
    }

    #[test]
    fn test_conversions() {
        let err: FormsError = ValidationError::message("nope").into();
        assert_eq!(err.to_string(), "Validation error: nope");

        let err: FormsError = std::io::Error::new(std::io::ErrorKind::NotFound, "forms.toml").into();
        assert!(matches!(err, FormsError::Io(_)));
    }
}
