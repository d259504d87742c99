//! Multi-form aggregation.
//!
//! A [`MultiForm`] treats several independently defined forms as one form
//! sharing a single submission. Each sub-form is declared by name on a
//! [`MultiFormDefinition`] together with the factory that builds it; the
//! name doubles as the sub-form's field prefix, so `"user"` reads
//! `user-name` and `"profile"` reads `profile-name` from the same data.
//!
//! Validation runs every sub-form, then, only if all of them are valid, the
//! definition's [`CrossformValidator`]. The outcome is memoized.
//!
//! # Examples
//!
//! ```
//! use betterforms_core::{QueryDict, ValidationError};
//! use betterforms_forms::fields::{FormFieldDef, FormFieldType};
//! use betterforms_forms::{BaseForm, MultiFormDefinition, MultiFormKwargs};
//!
//! fn password_fields() -> Vec<FormFieldDef> {
//!     vec![FormFieldDef::new("password", FormFieldType::char())]
//! }
//!
//! let definition = MultiFormDefinition::new("ChangePasswordForm")
//!     .form("new", BaseForm::factory(password_fields))
//!     .form("confirm", BaseForm::factory(password_fields))
//!     .clean_with(|forms| {
//!         if forms.cleaned_value("new", "password") == forms.cleaned_value("confirm", "password") {
//!             Ok(())
//!         } else {
//!             Err(ValidationError::new("Passwords do not match.", "password_mismatch"))
//!         }
//!     });
//!
//! let data = QueryDict::parse("new-password=a&confirm-password=b");
//! let mut form = definition.instantiate(MultiFormKwargs::bound(data)).unwrap();
//!
//! let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! assert!(!runtime.block_on(form.is_valid()));
//! assert_eq!(form.non_field_errors(), vec!["Passwords do not match.".to_string()]);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{debug, warn, Instrument};

use betterforms_core::logging::multiform_span;
use betterforms_core::{
    FileDict, FormsError, FormsResult, QueryDict, ValidationError, Value, SETTINGS,
};

use crate::factory::{FormFactory, FormKwargs};
use crate::fields::FormFieldDef;
use crate::form::{ErrorDict, Form};
use crate::model_form::ModelInstance;

/// Where a multi-form is in its validation lifecycle.
///
/// `Unvalidated` moves to `Valid` or `Invalid` on the first `is_valid()`
/// call and stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationState {
    /// `is_valid()` has not been called yet.
    Unvalidated,
    /// Every sub-form and the crossform check passed.
    Valid,
    /// A sub-form or the crossform check failed.
    Invalid,
}

/// Validation across sub-forms, run once every sub-form is individually valid.
///
/// The validator only sees the sub-forms read-only. A returned error is
/// recorded as an aggregate-level (non-field) error.
#[async_trait]
pub trait CrossformValidator<S: ?Sized + Form + 'static>: Send + Sync {
    /// Checks the combined state of the sub-forms.
    async fn clean(&self, forms: &SubForms<S>) -> Result<(), ValidationError>;
}

/// Adapts a synchronous closure into a [`CrossformValidator`].
pub struct FnCrossform<F>(F);

#[async_trait]
impl<S, F> CrossformValidator<S> for FnCrossform<F>
where
    S: ?Sized + Form + 'static,
    F: Fn(&SubForms<S>) -> Result<(), ValidationError> + Send + Sync,
{
    async fn clean(&self, forms: &SubForms<S>) -> Result<(), ValidationError> {
        (self.0)(forms)
    }
}

/// The declaration of a multi-form: named sub-form factories in declaration
/// order plus an optional crossform validator.
///
/// Definitions are immutable once built and cheap to clone, so they are
/// typically built once and instantiated per request.
pub struct MultiFormDefinition<S: ?Sized + Form + 'static = dyn Form> {
    name: String,
    forms: Vec<(String, FormFactory<S>)>,
    duplicates: Vec<String>,
    crossform: Option<Arc<dyn CrossformValidator<S>>>,
}

impl<S: ?Sized + Form + 'static> Clone for MultiFormDefinition<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            forms: self.forms.clone(),
            duplicates: self.duplicates.clone(),
            crossform: self.crossform.clone(),
        }
    }
}

impl<S: ?Sized + Form + 'static> fmt::Debug for MultiFormDefinition<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiFormDefinition")
            .field("name", &self.name)
            .field("forms", &self.form_names())
            .field("crossform", &self.crossform.is_some())
            .finish()
    }
}

impl<S: ?Sized + Form + 'static> MultiFormDefinition<S> {
    /// Creates an empty definition. `name` identifies the multi-form in
    /// errors and logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            forms: Vec::new(),
            duplicates: Vec::new(),
            crossform: None,
        }
    }

    /// Declares a sub-form.
    ///
    /// Declaring a name twice is reported as [`FormsError::DuplicateForm`]
    /// when the definition is instantiated; use [`replace`](Self::replace)
    /// to override a declaration on purpose.
    #[must_use]
    pub fn form<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(FormKwargs) -> FormsResult<Box<S>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.forms.iter().any(|(existing, _)| *existing == name) {
            self.duplicates.push(name);
        } else {
            let factory: FormFactory<S> = Arc::new(factory);
            self.forms.push((name, factory));
        }
        self
    }

    /// Overrides the factory of a declared sub-form, keeping its position.
    /// An undeclared name is appended.
    #[must_use]
    pub fn replace<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(FormKwargs) -> FormsResult<Box<S>> + Send + Sync + 'static,
    {
        self.set_factory(name.into(), Arc::new(factory));
        self
    }

    /// Redefines this definition with every entry of `other`: shared names
    /// are replaced in place, new names are appended, and `other`'s crossform
    /// validator wins if it has one.
    #[must_use]
    pub fn extend(mut self, other: &Self) -> Self {
        for (name, factory) in &other.forms {
            self.set_factory(name.clone(), Arc::clone(factory));
        }
        if let Some(crossform) = &other.crossform {
            self.crossform = Some(Arc::clone(crossform));
        }
        self
    }

    /// Renames the definition.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the crossform validator.
    #[must_use]
    pub fn crossform(mut self, validator: impl CrossformValidator<S> + 'static) -> Self {
        self.crossform = Some(Arc::new(validator));
        self
    }

    /// Sets a synchronous closure as the crossform validator.
    #[must_use]
    pub fn clean_with<F>(self, clean: F) -> Self
    where
        F: Fn(&SubForms<S>) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        self.crossform(FnCrossform(clean))
    }

    fn set_factory(&mut self, name: String, factory: FormFactory<S>) {
        match self.forms.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = factory,
            None => self.forms.push((name, factory)),
        }
    }

    /// Returns the definition name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared sub-form names in declaration order.
    pub fn form_names(&self) -> Vec<&str> {
        self.forms.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Returns the number of declared sub-forms.
    pub fn len(&self) -> usize {
        self.forms.len()
    }

    /// Returns `true` if no sub-form is declared.
    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    /// Returns `true` if a crossform validator is set.
    pub fn has_crossform(&self) -> bool {
        self.crossform.is_some()
    }

    /// Builds a multi-form from this definition. See [`MultiForm::new`].
    pub fn instantiate(&self, kwargs: MultiFormKwargs) -> FormsResult<MultiForm<S>> {
        MultiForm::new(self, kwargs)
    }

    /// Returns a factory that builds this multi-form as a sub-form of
    /// another one.
    ///
    /// The prefix handed to the factory becomes the base prefix, and initial
    /// values keyed `"{sub-form}-{field}"` reach the matching sub-form.
    pub fn factory(
        &self,
    ) -> impl Fn(FormKwargs) -> FormsResult<Box<dyn Form>> + Send + Sync + 'static {
        let definition = self.clone();
        move |kwargs: FormKwargs| {
            let names = definition.form_names();
            let kwargs = MultiFormKwargs {
                data: kwargs.data,
                files: kwargs.files,
                prefix: kwargs.prefix,
                initial: route_by_form(&names, kwargs.initial.unwrap_or_default()),
                extra: kwargs.extra,
                ..MultiFormKwargs::default()
            };
            definition
                .instantiate(kwargs)
                .map(|form| Box::new(form) as Box<dyn Form>)
        }
    }
}

/// Splits `"{sub-form}-{field}"` keys into per sub-form maps. Keys that
/// name no sub-form are dropped.
pub(crate) fn route_by_form<V>(
    names: &[&str],
    entries: HashMap<String, V>,
) -> HashMap<String, HashMap<String, V>> {
    let separator = &SETTINGS.get_or_default().prefix_separator;
    let mut routed: HashMap<String, HashMap<String, V>> = HashMap::new();
    for (key, value) in entries {
        let target = names.iter().find_map(|name| {
            let field = key.strip_prefix(*name)?.strip_prefix(separator.as_str())?;
            Some(((*name).to_string(), field.to_string()))
        });
        if let Some((name, field)) = target {
            routed.entry(name).or_default().insert(field, value);
        }
    }
    routed
}

/// Construction arguments for a [`MultiForm`].
///
/// Data, files and `extra` are shared by every sub-form. `initial` and
/// `instances` are keyed by sub-form name and only reach that sub-form.
#[derive(Debug, Clone, Default)]
pub struct MultiFormKwargs {
    /// Submitted data; `None` builds an unbound multi-form.
    pub data: Option<Arc<QueryDict>>,
    /// Uploaded files.
    pub files: Option<Arc<FileDict>>,
    /// A base prefix nested under each sub-form name.
    pub prefix: Option<String>,
    /// Initial values per sub-form.
    pub initial: HashMap<String, HashMap<String, Value>>,
    /// Model instances per sub-form.
    pub instances: HashMap<String, ModelInstance>,
    /// Extra configuration forwarded to every factory.
    pub extra: HashMap<String, Value>,
    /// Per sub-form overrides of `extra`, applied key by key.
    pub extra_for: HashMap<String, HashMap<String, Value>>,
}

impl MultiFormKwargs {
    /// Creates empty kwargs (an unbound multi-form).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates kwargs bound to `data`.
    pub fn bound(data: QueryDict) -> Self {
        Self::new().with_data(data)
    }

    /// Sets the submitted data.
    #[must_use]
    pub fn with_data(mut self, data: QueryDict) -> Self {
        self.data = Some(Arc::new(data));
        self
    }

    /// Sets the uploaded files.
    #[must_use]
    pub fn with_files(mut self, files: FileDict) -> Self {
        self.files = Some(Arc::new(files));
        self
    }

    /// Sets the base prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Sets the initial values of one sub-form.
    #[must_use]
    pub fn with_initial(mut self, form: impl Into<String>, initial: HashMap<String, Value>) -> Self {
        self.initial.insert(form.into(), initial);
        self
    }

    /// Sets the model instance of one sub-form.
    #[must_use]
    pub fn with_instance(mut self, form: impl Into<String>, instance: ModelInstance) -> Self {
        self.instances.insert(form.into(), instance);
        self
    }

    /// Adds an extra configuration entry for every sub-form.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Adds an extra configuration entry for one sub-form, overriding the
    /// shared entry of the same key.
    #[must_use]
    pub fn with_extra_for(
        mut self,
        form: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.extra_for
            .entry(form.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Returns the prefix of sub-form `name`: the name itself, or
    /// `"{name}__{prefix}"` under a base prefix.
    pub fn prefix_for(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!(
                "{name}{}{prefix}",
                SETTINGS.get_or_default().nested_prefix_separator
            ),
            None => name.to_string(),
        }
    }

    /// Returns the factory kwargs of sub-form `name`.
    pub fn kwargs_for(&self, name: &str) -> FormKwargs {
        let mut extra = self.extra.clone();
        if let Some(overrides) = self.extra_for.get(name) {
            extra.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        FormKwargs {
            data: self.data.clone(),
            files: self.files.clone(),
            prefix: Some(self.prefix_for(name)),
            initial: self.initial.get(name).cloned(),
            instance: self.instances.get(name).cloned(),
            extra,
        }
    }
}

struct SubForm<S: ?Sized> {
    name: String,
    form: Box<S>,
    valid: bool,
}

/// The instantiated sub-forms of a multi-form, in declaration order.
pub struct SubForms<S: ?Sized + Form + 'static = dyn Form> {
    container: String,
    entries: Vec<SubForm<S>>,
}

impl<S: ?Sized + Form + 'static> SubForms<S> {
    fn not_found(&self, name: &str) -> FormsError {
        let mut choices: Vec<String> = self.entries.iter().map(|e| e.name.clone()).collect();
        choices.sort();
        FormsError::FormNotFound {
            name: name.to_string(),
            container: self.container.clone(),
            choices,
        }
    }

    /// Returns the sub-form named `name`.
    pub fn get(&self, name: &str) -> FormsResult<&S> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &*e.form)
            .ok_or_else(|| self.not_found(name))
    }

    fn get_mut(&mut self, name: &str) -> FormsResult<&mut S> {
        match self.entries.iter().position(|e| e.name == name) {
            Some(index) => Ok(&mut *self.entries[index].form),
            None => Err(self.not_found(name)),
        }
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut S)> + '_ {
        self.entries
            .iter_mut()
            .map(|e| (e.name.as_str(), &mut *e.form))
    }

    /// Returns `true` if a sub-form named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Iterates over `(name, form)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &S)> + '_ {
        self.entries.iter().map(|e| (e.name.as_str(), &*e.form))
    }

    /// Returns the sub-form names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Returns the number of sub-forms.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no sub-forms.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a cleaned value of one sub-form, if that sub-form has it.
    pub fn cleaned_value(&self, form: &str, field: &str) -> Option<&Value> {
        self.get(form).ok()?.cleaned_data().get(field)
    }
}

impl<S: ?Sized + Form + 'static> fmt::Debug for SubForms<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubForms")
            .field("container", &self.container)
            .field("names", &self.names())
            .finish()
    }
}

/// Errors of a multi-form: each sub-form's own errors plus the crossform
/// errors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiFormErrors {
    forms: Vec<(String, ErrorDict)>,
    crossform: Vec<ValidationError>,
}

impl MultiFormErrors {
    /// Returns the error dict of sub-form `name`. Valid sub-forms have an
    /// empty one.
    pub fn get(&self, name: &str) -> Option<&ErrorDict> {
        self.forms
            .iter()
            .find(|(form, _)| form == name)
            .map(|(_, errors)| errors)
    }

    /// Iterates over `(sub-form name, errors)` in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ErrorDict)> + '_ {
        self.forms.iter().map(|(name, errors)| (name.as_str(), errors))
    }

    /// Returns the crossform errors.
    pub fn crossform(&self) -> &[ValidationError] {
        &self.crossform
    }

    /// Returns every crossform message, flattened.
    pub fn crossform_messages(&self) -> Vec<String> {
        self.crossform
            .iter()
            .flat_map(ValidationError::messages)
            .collect()
    }

    /// Returns `true` if neither a sub-form nor the crossform check has errors.
    pub fn is_empty(&self) -> bool {
        self.crossform.is_empty() && self.forms.iter().all(|(_, errors)| errors.is_empty())
    }

    /// Renders the errors as a JSON object: one entry per sub-form, plus the
    /// non-field errors key when there are crossform errors.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, errors) in &self.forms {
            let dict: serde_json::Map<String, serde_json::Value> = errors
                .iter()
                .map(|(field, msgs)| (field.clone(), serde_json::json!(msgs)))
                .collect();
            map.insert(name.clone(), serde_json::Value::Object(dict));
        }
        if !self.crossform.is_empty() {
            map.insert(
                SETTINGS.get_or_default().non_field_errors_key.clone(),
                serde_json::json!(self.crossform_messages()),
            );
        }
        serde_json::Value::Object(map)
    }
}

/// Flattened views handed out through the [`Form`] impl, rebuilt after any
/// mutable access.
#[derive(Debug, Default)]
struct FormCache {
    fields: OnceLock<Vec<FormFieldDef>>,
    initial: OnceLock<HashMap<String, Value>>,
    errors: OnceLock<ErrorDict>,
    cleaned: OnceLock<HashMap<String, Value>>,
    non_field_errors: OnceLock<Vec<String>>,
}

/// Several forms treated as one.
///
/// Built from a [`MultiFormDefinition`]; see the module documentation.
/// A multi-form is itself a [`Form`], so it can be declared as a sub-form
/// of another multi-form through [`MultiFormDefinition::factory`].
pub struct MultiForm<S: ?Sized + Form + 'static = dyn Form> {
    name: String,
    forms: SubForms<S>,
    crossform: Option<Arc<dyn CrossformValidator<S>>>,
    crossform_errors: Vec<ValidationError>,
    state: ValidationState,
    data: Option<Arc<QueryDict>>,
    files: Option<Arc<FileDict>>,
    cache: FormCache,
}

impl<S: ?Sized + Form + 'static> fmt::Debug for MultiForm<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiForm")
            .field("name", &self.name)
            .field("forms", &self.forms)
            .field("state", &self.state)
            .field("crossform_errors", &self.crossform_errors)
            .finish_non_exhaustive()
    }
}

impl<S: ?Sized + Form + 'static> MultiForm<S> {
    /// Instantiates every sub-form of `definition`, in declaration order.
    ///
    /// Each factory receives the shared data and files, a prefix derived
    /// from the sub-form name, and that sub-form's initial values and
    /// instance.
    ///
    /// # Errors
    ///
    /// Returns [`FormsError::DuplicateForm`] if the definition declares a
    /// name twice, [`FormsError::Configuration`] if a sub-form is named after
    /// the non-field errors key, or the first factory error. No multi-form
    /// is produced in any of these cases.
    pub fn new(definition: &MultiFormDefinition<S>, kwargs: MultiFormKwargs) -> FormsResult<Self> {
        if let Some(duplicate) = definition.duplicates.first() {
            return Err(FormsError::DuplicateForm(duplicate.clone()));
        }
        let reserved = &SETTINGS.get_or_default().non_field_errors_key;
        if definition.forms.iter().any(|(name, _)| name == reserved) {
            return Err(FormsError::Configuration(format!(
                "'{reserved}' is reserved for non-field errors and cannot name a sub-form of '{}'",
                definition.name
            )));
        }

        let span = multiform_span(&definition.name);
        let _guard = span.enter();

        let mut entries = Vec::with_capacity(definition.forms.len());
        for (name, factory) in &definition.forms {
            let form_kwargs = kwargs.kwargs_for(name);
            let form = factory(form_kwargs).map_err(|err| {
                warn!(form = %name, error = %err, "Sub-form construction failed");
                if matches!(err, FormsError::Factory { .. }) {
                    err
                } else {
                    FormsError::Factory {
                        name: name.clone(),
                        reason: err.to_string(),
                    }
                }
            })?;
            debug!(form = %name, prefix = ?form.prefix(), bound = form.is_bound(), "Sub-form constructed");
            entries.push(SubForm {
                name: name.clone(),
                form,
                valid: false,
            });
        }

        Ok(Self {
            name: definition.name.clone(),
            forms: SubForms {
                container: definition.name.clone(),
                entries,
            },
            crossform: definition.crossform.clone(),
            crossform_errors: Vec::new(),
            state: ValidationState::Unvalidated,
            data: kwargs.data,
            files: kwargs.files,
            cache: FormCache::default(),
        })
    }

    /// Returns the multi-form name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the validation state.
    pub const fn state(&self) -> ValidationState {
        self.state
    }

    /// Returns the shared submitted data.
    pub fn data(&self) -> Option<&QueryDict> {
        self.data.as_deref()
    }

    /// Returns the shared uploaded files.
    pub fn files(&self) -> Option<&FileDict> {
        self.files.as_deref()
    }

    /// Returns the sub-form collection.
    pub const fn forms(&self) -> &SubForms<S> {
        &self.forms
    }

    /// Returns the sub-form named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`FormsError::FormNotFound`] listing the declared names.
    pub fn get(&self, name: &str) -> FormsResult<&S> {
        self.forms.get(name)
    }

    /// Returns the sub-form named `name` mutably.
    ///
    /// Changing a sub-form after validation does not reset the memoized
    /// outcome.
    pub fn get_mut(&mut self, name: &str) -> FormsResult<&mut S> {
        self.cache = FormCache::default();
        self.forms.get_mut(name)
    }

    /// Iterates over `(name, form)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &S)> + '_ {
        self.forms.iter()
    }

    /// Iterates mutably over `(name, form)` pairs in declaration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut S)> + '_ {
        self.cache = FormCache::default();
        self.forms.iter_mut()
    }

    /// Returns the sub-form names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.forms.names()
    }

    /// Returns the number of sub-forms.
    pub fn len(&self) -> usize {
        self.forms.len()
    }

    /// Returns `true` if there are no sub-forms.
    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    /// Returns `true` if any sub-form is bound.
    pub fn is_bound(&self) -> bool {
        self.forms.iter().any(|(_, form)| form.is_bound())
    }

    /// Returns `true` if any sub-form needs a multipart submission.
    pub fn is_multipart(&self) -> bool {
        self.forms.iter().any(|(_, form)| form.is_multipart())
    }

    /// Returns every sub-form field keyed by its submitted (prefixed) name.
    pub fn fields(&self) -> Vec<(String, &FormFieldDef)> {
        self.forms
            .iter()
            .flat_map(|(_, form)| {
                form.fields()
                    .iter()
                    .map(move |field| (form.add_prefix(&field.name), field))
            })
            .collect()
    }

    /// Validates the multi-form. The first call validates every sub-form
    /// and runs the crossform check if all of them passed; later calls
    /// return the memoized result.
    pub async fn is_valid(&mut self) -> bool {
        self.validate().await
    }

    async fn validate(&mut self) -> bool {
        match self.state {
            ValidationState::Valid => true,
            ValidationState::Invalid => false,
            ValidationState::Unvalidated => {
                let span = multiform_span(&self.name);
                self.full_clean().instrument(span).await
            }
        }
    }

    async fn full_clean(&mut self) -> bool {
        self.cache = FormCache::default();
        let bound = self.data.is_some() || self.files.is_some() || self.is_bound();
        let mut forms_valid = true;
        for entry in &mut self.forms.entries {
            entry.valid = entry.form.is_valid().await;
            debug!(form = %entry.name, valid = entry.valid, "Sub-form validated");
            forms_valid &= entry.valid;
        }

        if forms_valid && bound {
            if let Some(crossform) = &self.crossform {
                if let Err(err) = crossform.clean(&self.forms).await {
                    warn!(error = %err, "Crossform validation failed");
                    self.crossform_errors.push(err);
                }
            }
        }

        let valid = forms_valid && bound && self.crossform_errors.is_empty();
        self.state = if valid {
            ValidationState::Valid
        } else {
            ValidationState::Invalid
        };
        debug!(valid, "Multi-form validated");
        valid
    }

    /// Records an aggregate-level error. A valid multi-form becomes invalid;
    /// one recorded before validation makes validation fail.
    pub fn add_crossform_error(&mut self, error: ValidationError) {
        self.cache = FormCache::default();
        self.crossform_errors.push(error);
        if self.state == ValidationState::Valid {
            self.state = ValidationState::Invalid;
        }
    }

    /// Returns the cleaned data of every valid sub-form, flattened under
    /// `"{sub-form name}-{field}"` keys. Invalid or unvalidated sub-forms
    /// contribute nothing.
    pub fn cleaned_data(&self) -> HashMap<String, Value> {
        let separator = &SETTINGS.get_or_default().prefix_separator;
        self.forms
            .entries
            .iter()
            .filter(|e| e.valid)
            .flat_map(|e| {
                e.form
                    .cleaned_data()
                    .iter()
                    .map(move |(field, value)| (format!("{}{separator}{field}", e.name), value.clone()))
            })
            .collect()
    }

    /// Returns the cleaned data of every valid sub-form, per sub-form, in
    /// declaration order.
    pub fn cleaned_data_by_form(&self) -> Vec<(&str, &HashMap<String, Value>)> {
        self.forms
            .entries
            .iter()
            .filter(|e| e.valid)
            .map(|e| (e.name.as_str(), e.form.cleaned_data()))
            .collect()
    }

    /// Replaces the cleaned data of sub-form `name`. A formset sub-form
    /// takes keys of the form `"{index}-{field}"`.
    ///
    /// # Errors
    ///
    /// Returns [`FormsError::FormNotFound`] for an undeclared name.
    pub fn set_cleaned_data(&mut self, name: &str, data: HashMap<String, Value>) -> FormsResult<()> {
        self.get_mut(name)?.set_cleaned_data(data);
        Ok(())
    }

    /// Returns every sub-form's errors and the crossform errors.
    pub fn errors(&self) -> MultiFormErrors {
        MultiFormErrors {
            forms: self
                .forms
                .iter()
                .map(|(name, form)| (name.to_string(), form.errors().clone()))
                .collect(),
            crossform: self.crossform_errors.clone(),
        }
    }

    /// Returns the errors keyed by submitted field name (`"{prefix}-{field}"`),
    /// with crossform messages under the non-field errors key.
    pub fn flat_errors(&self) -> ErrorDict {
        let mut flat = ErrorDict::new();
        for (_, form) in self.forms.iter() {
            for (field, messages) in form.errors() {
                flat.insert(form.add_prefix(field), messages.clone());
            }
        }
        if !self.crossform_errors.is_empty() {
            flat.insert(
                SETTINGS.get_or_default().non_field_errors_key.clone(),
                self.crossform_messages(),
            );
        }
        flat
    }

    /// Returns the crossform messages followed by every sub-form's own
    /// non-field errors.
    pub fn non_field_errors(&self) -> Vec<String> {
        let mut errors = self.crossform_messages();
        for (_, form) in self.forms.iter() {
            errors.extend(form.non_field_errors().iter().cloned());
        }
        errors
    }

    fn crossform_messages(&self) -> Vec<String> {
        self.crossform_errors
            .iter()
            .flat_map(ValidationError::messages)
            .collect()
    }

    fn reset(&mut self) {
        self.state = ValidationState::Unvalidated;
        self.crossform_errors.clear();
        self.cache = FormCache::default();
        for entry in &mut self.forms.entries {
            entry.valid = false;
        }
    }
}

/// A multi-form seen as a single form, for nesting.
///
/// Its fields are listed under their full submitted names and it has no
/// prefix of its own. Errors, cleaned data and initial values are
/// flattened the way [`MultiForm::flat_errors`] and
/// [`MultiForm::cleaned_data`] flatten them.
#[async_trait]
impl<S: ?Sized + Form + 'static> Form for MultiForm<S> {
    fn fields(&self) -> &[FormFieldDef] {
        self.cache.fields.get_or_init(|| {
            Self::fields(self)
                .into_iter()
                .map(|(name, field)| field.renamed(name))
                .collect()
        })
    }

    fn initial(&self) -> &HashMap<String, Value> {
        self.cache.initial.get_or_init(|| {
            let separator = &SETTINGS.get_or_default().prefix_separator;
            self.forms
                .iter()
                .flat_map(|(name, form)| {
                    form.initial()
                        .iter()
                        .map(move |(field, value)| {
                            (format!("{name}{separator}{field}"), value.clone())
                        })
                })
                .collect()
        })
    }

    fn prefix(&self) -> Option<&str> {
        None
    }

    fn bind(&mut self, data: &QueryDict) {
        self.reset();
        self.data = Some(Arc::new(data.clone()));
        for entry in &mut self.forms.entries {
            entry.form.bind(data);
        }
    }

    fn bind_files(&mut self, files: &FileDict) {
        self.reset();
        self.files = Some(Arc::new(files.clone()));
        for entry in &mut self.forms.entries {
            entry.form.bind_files(files);
        }
    }

    fn is_bound(&self) -> bool {
        self.forms.iter().any(|(_, form)| form.is_bound())
    }

    async fn is_valid(&mut self) -> bool {
        self.validate().await
    }

    fn errors(&self) -> &ErrorDict {
        self.cache.errors.get_or_init(|| self.flat_errors())
    }

    fn cleaned_data(&self) -> &HashMap<String, Value> {
        self.cache.cleaned.get_or_init(|| Self::cleaned_data(self))
    }

    fn set_cleaned_data(&mut self, data: HashMap<String, Value>) {
        self.cache = FormCache::default();
        let names = self.forms.names();
        let mut routed = route_by_form(&names, data);
        for entry in &mut self.forms.entries {
            if let Some(data) = routed.remove(&entry.name) {
                entry.form.set_cleaned_data(data);
            }
        }
    }

    fn non_field_errors(&self) -> &[String] {
        self.cache
            .non_field_errors
            .get_or_init(|| Self::non_field_errors(self))
    }

    fn is_multipart(&self) -> bool {
        self.forms.iter().any(|(_, form)| form.is_multipart())
    }
}
