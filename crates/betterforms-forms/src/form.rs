//! Form trait and `BaseForm` implementation.
//!
//! The [`Form`] trait is the contract every sub-form of a
//! [`MultiForm`](crate::multiform::MultiForm) satisfies: binding,
//! async validation, errors, and cleaned data, all namespaced by an
//! optional prefix.
//!
//! [`BaseForm`] provides a concrete, general-purpose implementation built
//! from a list of field definitions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use betterforms_core::{FileDict, FormsResult, QueryDict, Value, SETTINGS};

use crate::factory::FormKwargs;
use crate::fields::FormFieldDef;
use crate::validation::{self, CleanedFields, Submission};

/// Validation errors keyed by field name (or the non-field key).
pub type ErrorDict = HashMap<String, Vec<String>>;

/// A form-level validation hook for [`BaseForm`], run on the cleaned data.
pub type CleanHook = Arc<dyn Fn(&HashMap<String, Value>) -> Result<(), ErrorDict> + Send + Sync>;

/// The core form trait. All form types implement this.
///
/// Validation is async because form-level checks commonly need a data store
/// (uniqueness, foreign key existence). Implementations must be
/// `Send + Sync` so forms can cross await points in request handlers.
#[async_trait]
pub trait Form: Send + Sync {
    /// Returns the form's field definitions.
    fn fields(&self) -> &[FormFieldDef];

    /// Returns the initial (default) values for fields.
    fn initial(&self) -> &HashMap<String, Value>;

    /// Returns the form prefix (for namespacing multiple forms in one submission).
    fn prefix(&self) -> Option<&str>;

    /// Returns the submitted name of a field: `"{prefix}-{field}"` when
    /// the form has a prefix, the bare field name otherwise.
    fn add_prefix(&self, field_name: &str) -> String {
        match self.prefix() {
            Some(prefix) => format!(
                "{prefix}{}{field_name}",
                SETTINGS.get_or_default().prefix_separator
            ),
            None => field_name.to_string(),
        }
    }

    /// Binds submitted field data to this form.
    fn bind(&mut self, data: &QueryDict);

    /// Binds uploaded files to this form. Forms without file fields may
    /// ignore them.
    fn bind_files(&mut self, _files: &FileDict) {}

    /// Returns `true` if this form has been bound to data.
    fn is_bound(&self) -> bool;

    /// Validates the form. Returns `true` if valid.
    ///
    /// After calling this, `errors()` and `cleaned_data()` are populated.
    async fn is_valid(&mut self) -> bool;

    /// Returns validation errors keyed by field name.
    fn errors(&self) -> &ErrorDict;

    /// Returns the cleaned (validated and coerced) data.
    fn cleaned_data(&self) -> &HashMap<String, Value>;

    /// Replaces the cleaned data, e.g. after a caller normalized it.
    fn set_cleaned_data(&mut self, data: HashMap<String, Value>);

    /// Returns the non-field (form-level) errors.
    fn non_field_errors(&self) -> &[String] {
        self.errors()
            .get(&SETTINGS.get_or_default().non_field_errors_key)
            .map_or(&[][..], Vec::as_slice)
    }

    /// Returns `true` if the form needs a multipart submission.
    fn is_multipart(&self) -> bool {
        self.fields().iter().any(|f| f.field_type.is_file())
    }

    /// Cross-field validation hook. The default implementation does nothing.
    async fn clean(&self) -> Result<(), ErrorDict> {
        Ok(())
    }
}

/// A form built from a list of field definitions.
///
/// Binding copies the form's own prefixed keys out of the shared
/// submission; validation cleans every field, then runs the optional
/// [`with_clean`](Self::with_clean) hook on the cleaned data.
pub struct BaseForm {
    fields: Vec<FormFieldDef>,
    initial: HashMap<String, Value>,
    prefix: Option<String>,
    submission: Option<Submission>,
    errors: ErrorDict,
    cleaned: HashMap<String, Value>,
    clean_hook: Option<CleanHook>,
}

impl BaseForm {
    pub fn new(fields: Vec<FormFieldDef>) -> Self {
        Self {
            fields,
            initial: HashMap::new(),
            prefix: None,
            submission: None,
            errors: ErrorDict::new(),
            cleaned: HashMap::new(),
            clean_hook: None,
        }
    }

    /// Builds a form from the arguments a multi-form hands its sub-forms.
    ///
    /// The prefix is set before binding, so the data is read under it.
    pub fn from_kwargs(fields: Vec<FormFieldDef>, kwargs: FormKwargs) -> Self {
        let FormKwargs {
            data,
            files,
            prefix,
            initial,
            ..
        } = kwargs;
        let mut form = Self::new(fields);
        form.prefix = prefix;
        form.initial = initial.unwrap_or_default();
        if let Some(data) = data {
            form.bind(&data);
        }
        if let Some(files) = files {
            form.bind_files(&files);
        }
        form
    }

    /// A factory producing a fresh `BaseForm` over `make_fields()` per call.
    pub fn factory(
        make_fields: fn() -> Vec<FormFieldDef>,
    ) -> impl Fn(FormKwargs) -> FormsResult<Box<dyn Form>> + Send + Sync + 'static {
        move |kwargs: FormKwargs| -> FormsResult<Box<dyn Form>> {
            Ok(Box::new(Self::from_kwargs(make_fields(), kwargs)))
        }
    }

    #[must_use]
    pub fn with_initial(mut self, initial: HashMap<String, Value>) -> Self {
        self.initial = initial;
        self
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Adds a form-level check that runs after the fields are cleaned.
    #[must_use]
    pub fn with_clean<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HashMap<String, Value>) -> Result<(), ErrorDict> + Send + Sync + 'static,
    {
        self.clean_hook = Some(Arc::new(hook));
        self
    }

    /// The last value submitted for `field_name`, read under the prefix.
    pub fn raw_value(&self, field_name: &str) -> Option<&str> {
        self.submission
            .as_ref()?
            .values
            .get(field_name)?
            .last()
            .map(String::as_str)
    }

    fn submission_mut(&mut self) -> &mut Submission {
        self.submission.get_or_insert_with(Submission::default)
    }
}

#[async_trait]
impl Form for BaseForm {
    fn fields(&self) -> &[FormFieldDef] {
        &self.fields
    }

    fn initial(&self) -> &HashMap<String, Value> {
        &self.initial
    }

    fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn bind(&mut self, data: &QueryDict) {
        let values = self
            .fields
            .iter()
            .filter_map(|field| {
                let submitted = data.get_list(&self.add_prefix(&field.name))?;
                Some((field.name.clone(), submitted.clone()))
            })
            .collect();
        self.submission_mut().values = values;
        self.errors.clear();
        self.cleaned.clear();
    }

    fn bind_files(&mut self, files: &FileDict) {
        let uploaded = self
            .fields
            .iter()
            .filter(|field| field.field_type.is_file())
            .filter_map(|field| {
                let submitted = files.get_list(&self.add_prefix(&field.name))?;
                Some((field.name.clone(), submitted.clone()))
            })
            .collect();
        self.submission_mut().files = uploaded;
    }

    fn is_bound(&self) -> bool {
        self.submission.is_some()
    }

    async fn is_valid(&mut self) -> bool {
        let Some(submission) = &self.submission else {
            return false;
        };
        let CleanedFields { data, errors } = validation::clean_fields(&self.fields, submission);
        self.cleaned = data;
        self.errors = errors;

        if let Err(form_errors) = self.clean().await {
            for (key, messages) in form_errors {
                self.errors.entry(key).or_default().extend(messages);
            }
        }
        self.errors.is_empty()
    }

    fn errors(&self) -> &ErrorDict {
        &self.errors
    }

    fn cleaned_data(&self) -> &HashMap<String, Value> {
        &self.cleaned
    }

    fn set_cleaned_data(&mut self, data: HashMap<String, Value>) {
        self.cleaned = data;
    }

    async fn clean(&self) -> Result<(), ErrorDict> {
        self.clean_hook
            .as_ref()
            .map_or(Ok(()), |hook| hook(&self.cleaned))
    }
}
