//! Field definitions and the coercion of submitted text into [`Value`]s.
//!
//! A [`FormFieldDef`] is declared once per field; [`clean_field_value`]
//! turns what was submitted for it into a typed value or a list of
//! messages. Cleaning happens in three passes: the required check, the
//! type's own parsing and constraints, then the extra validators, which only
//! run on a value that passed the first two.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use betterforms_core::{UploadedFile, Value};

use crate::validators::Validator;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$").expect("email pattern")
});
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").expect("url pattern"));
static SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-a-zA-Z0-9_]+$").expect("slug pattern"));

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// The kind of a field and its type-specific constraints.
#[derive(Debug, Clone)]
pub enum FormFieldType {
    Char {
        min_length: Option<usize>,
        max_length: Option<usize>,
        /// Trim surrounding whitespace before measuring and storing.
        strip: bool,
    },
    Integer {
        min_value: Option<i64>,
        max_value: Option<i64>,
    },
    Float {
        min_value: Option<f64>,
        max_value: Option<f64>,
    },
    /// An unchecked checkbox submits nothing, so declare it with
    /// `required(false)`. `false`, `0`, `no` and `off` clean to `false`.
    Boolean,
    /// `YYYY-MM-DD`.
    Date,
    /// `YYYY-MM-DD HH:MM[:SS]`, with a space or a `T`.
    DateTime,
    Email,
    /// `http` or `https` only.
    Url,
    Uuid,
    Slug,
    /// `(value, label)` pairs; the submitted value must be one of them.
    Choice { choices: Vec<(String, String)> },
    /// Cleans every submitted value into a [`Value::List`].
    MultipleChoice { choices: Vec<(String, String)> },
    /// Reads the bound files rather than the data and cleans to the file
    /// name. `allowed_extensions` compares case-insensitively.
    File {
        max_size: Option<usize>,
        allowed_extensions: Vec<String>,
    },
    Json,
    Regex { regex: String },
}

impl FormFieldType {
    /// A trimmed `Char` without length limits.
    pub const fn char() -> Self {
        Self::Char {
            min_length: None,
            max_length: None,
            strip: true,
        }
    }

    /// An unbounded `Integer`.
    pub const fn integer() -> Self {
        Self::Integer {
            min_value: None,
            max_value: None,
        }
    }

    pub const fn is_file(&self) -> bool {
        matches!(self, Self::File { .. })
    }

    fn is_blank(&self, raw: &[String], files: &[UploadedFile]) -> bool {
        match self {
            Self::File { .. } => files.is_empty(),
            Self::MultipleChoice { .. } => raw.iter().all(String::is_empty),
            _ => !raw.last().is_some_and(|text| !text.is_empty()),
        }
    }

    /// What an optional field left blank cleans to.
    fn blank_value(&self) -> Value {
        match self {
            Self::Char { .. }
            | Self::Email
            | Self::Url
            | Self::Slug
            | Self::Regex { .. }
            | Self::Choice { .. } => Value::String(String::new()),
            Self::Boolean => Value::Bool(false),
            Self::MultipleChoice { .. } => Value::List(Vec::new()),
            _ => Value::Null,
        }
    }
}

/// One declared field.
#[derive(Debug, Clone)]
pub struct FormFieldDef {
    /// Unprefixed; the form adds its prefix when reading a submission.
    pub name: String,
    pub field_type: FormFieldType,
    pub required: bool,
    /// Used when an optional field is left blank, and always when disabled.
    pub initial: Option<Value>,
    pub help_text: String,
    pub label: String,
    pub validators: Vec<Arc<dyn Validator>>,
    /// Replacement messages by code (`required`, `invalid`).
    pub error_messages: HashMap<String, String>,
    /// Ignore the submission and keep the initial value.
    pub disabled: bool,
}

impl FormFieldDef {
    /// A required field labelled after its name (`first_name` → `first name`).
    pub fn new(name: impl Into<String>, field_type: FormFieldType) -> Self {
        let name = name.into();
        Self {
            label: name.replace('_', " "),
            name,
            field_type,
            required: true,
            initial: None,
            help_text: String::new(),
            validators: Vec::new(),
            error_messages: HashMap::new(),
            disabled: false,
        }
    }

    #[must_use]
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    #[must_use]
    pub fn initial(mut self, value: impl Into<Value>) -> Self {
        self.initial = Some(value.into());
        self
    }

    #[must_use]
    pub fn help_text(mut self, text: impl Into<String>) -> Self {
        self.help_text = text.into();
        self
    }

    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.validators.push(Arc::from(validator));
        self
    }

    #[must_use]
    pub fn error_message(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_messages.insert(code.into(), message.into());
        self
    }

    #[must_use]
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// A copy of this field under another name.
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    fn message_for(&self, code: &str, fallback: &str) -> String {
        self.error_messages
            .get(code)
            .map_or_else(|| fallback.to_string(), Clone::clone)
    }

    fn invalid(&self, fallback: &str) -> Vec<String> {
        vec![self.message_for("invalid", fallback)]
    }

    /// Parses `text` as the field's type and checks the type's constraints.
    fn coerce(&self, text: &str, raw: &[String], files: &[UploadedFile]) -> Result<Value, Vec<String>> {
        match &self.field_type {
            FormFieldType::Char {
                min_length,
                max_length,
                strip,
            } => {
                let text = if *strip { text.trim() } else { text };
                let len = text.chars().count();
                let mut errors = Vec::new();
                if let Some(min) = min_length.filter(|min| len < *min) {
                    errors.push(format!("Ensure this value has at least {min} characters (it has {len})."));
                }
                if let Some(max) = max_length.filter(|max| len > *max) {
                    errors.push(format!("Ensure this value has at most {max} characters (it has {len})."));
                }
                finish(Value::from(text), errors)
            }
            FormFieldType::Integer {
                min_value,
                max_value,
            } => {
                let n: i64 = text.trim().parse().map_err(|_| self.invalid("Enter a whole number."))?;
                finish(Value::Int(n), out_of_range(n, *min_value, *max_value))
            }
            FormFieldType::Float {
                min_value,
                max_value,
            } => {
                let x: f64 = text.trim().parse().map_err(|_| self.invalid("Enter a number."))?;
                finish(Value::Float(x), out_of_range(x, *min_value, *max_value))
            }
            FormFieldType::Boolean => Ok(Value::Bool(!["false", "0", "no", "off"]
                .contains(&text.to_ascii_lowercase().as_str()))),
            FormFieldType::Date => chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| self.invalid("Enter a valid date.")),
            FormFieldType::DateTime => DATETIME_FORMATS
                .iter()
                .find_map(|format| chrono::NaiveDateTime::parse_from_str(text, format).ok())
                .map(Value::DateTime)
                .ok_or_else(|| self.invalid("Enter a valid date/time.")),
            FormFieldType::Email => self.matching(&EMAIL, text, "Enter a valid email address."),
            FormFieldType::Url => self.matching(&URL, text, "Enter a valid URL."),
            FormFieldType::Slug => self.matching(
                &SLUG,
                text,
                "Enter a valid \"slug\" consisting of letters, numbers, underscores or hyphens.",
            ),
            FormFieldType::Regex { regex } => {
                let pattern = Regex::new(regex).map_err(|e| vec![format!("Invalid regex: {e}")])?;
                self.matching(&pattern, text, "Enter a valid value.")
            }
            FormFieldType::Uuid => uuid::Uuid::parse_str(text)
                .map(Value::Uuid)
                .map_err(|_| self.invalid("Enter a valid UUID.")),
            FormFieldType::Json => serde_json::from_str(text)
                .map(Value::Json)
                .map_err(|_| self.invalid("Enter a valid JSON.")),
            FormFieldType::Choice { choices } => {
                finish(Value::from(text), unknown_choices(choices, [text]))
            }
            FormFieldType::MultipleChoice { choices } => {
                let picked: Vec<&str> =
                    raw.iter().map(String::as_str).filter(|s| !s.is_empty()).collect();
                let errors = unknown_choices(choices, picked.iter().copied());
                finish(picked.into_iter().map(Value::from).collect::<Vec<_>>().into(), errors)
            }
            FormFieldType::File {
                max_size,
                allowed_extensions,
            } => {
                let Some(file) = files.last() else {
                    return Err(vec![self.message_for("required", "This field is required.")]);
                };
                let mut errors = Vec::new();
                if let Some(max) = max_size.filter(|max| file.size() > *max) {
                    errors.push(format!("File size exceeds maximum of {max} bytes."));
                }
                let extension = file.extension().unwrap_or_default();
                if !allowed_extensions.is_empty()
                    && !allowed_extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&extension))
                {
                    errors.push(format!(
                        "File extension not allowed. Allowed extensions: {}.",
                        allowed_extensions.join(", ")
                    ));
                }
                finish(Value::from(file.name.as_str()), errors)
            }
        }
    }

    fn matching(&self, pattern: &Regex, text: &str, fallback: &str) -> Result<Value, Vec<String>> {
        if pattern.is_match(text) {
            Ok(Value::from(text))
        } else {
            Err(self.invalid(fallback))
        }
    }
}

fn finish(value: Value, errors: Vec<String>) -> Result<Value, Vec<String>> {
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(errors)
    }
}

fn out_of_range<T: PartialOrd + Display + Copy>(n: T, min: Option<T>, max: Option<T>) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(min) = min.filter(|min| n < *min) {
        errors.push(format!("Ensure this value is greater than or equal to {min}."));
    }
    if let Some(max) = max.filter(|max| n > *max) {
        errors.push(format!("Ensure this value is less than or equal to {max}."));
    }
    errors
}

fn unknown_choices<'a>(
    choices: &[(String, String)],
    picked: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    picked
        .into_iter()
        .filter(|pick| !choices.iter().any(|(value, _)| value == pick))
        .map(|pick| format!("Select a valid choice. {pick} is not one of the available choices."))
        .collect()
}

/// Cleans what was submitted for `field`.
///
/// `raw` is every value submitted under the field's name; single-valued
/// types use the last one. `files` is every upload under that name.
pub fn clean_field_value(
    field: &FormFieldDef,
    raw: &[String],
    files: &[UploadedFile],
) -> Result<Value, Vec<String>> {
    if field.field_type.is_blank(raw, files) {
        if field.required {
            return Err(vec![field.message_for("required", "This field is required.")]);
        }
        return Ok(field
            .initial
            .clone()
            .unwrap_or_else(|| field.field_type.blank_value()));
    }

    let text = raw.last().map_or("", String::as_str);
    let value = field.coerce(text, raw, files)?;
    let errors: Vec<String> = field
        .validators
        .iter()
        .filter_map(|validator| validator.validate(&value).err())
        .flat_map(|error| error.messages())
        .collect();
    finish(value, errors)
}
