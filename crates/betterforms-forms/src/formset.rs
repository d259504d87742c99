//! Formsets: several copies of one form in a single submission.
//!
//! A [`FormSet`] builds its forms from one factory, prefixed
//! `"{prefix}-{index}"`, and learns how many to build from the management
//! data of a bound submission (`"{prefix}-TOTAL_FORMS"` and
//! `"{prefix}-INITIAL_FORMS"`). Extra forms left blank are skipped.
//!
//! A formset is a [`Form`]: its fields, errors and cleaned data are
//! flattened under `"{index}-{field}"` keys, so it can be declared as a
//! sub-form of a [`MultiForm`](crate::multiform::MultiForm). The list-shaped
//! views are [`FormSet::form_errors`] and [`FormSet::cleaned_data_list`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use betterforms_core::{FileDict, FormsResult, QueryDict, ValidationError, Value, SETTINGS};

use crate::factory::{FormFactory, FormKwargs};
use crate::fields::FormFieldDef;
use crate::form::{ErrorDict, Form};
use crate::multiform::route_by_form;

/// The prefix of a formset built without one.
const DEFAULT_PREFIX: &str = "form";

/// Management form field names.
pub const TOTAL_FORMS: &str = "TOTAL_FORMS";
pub const INITIAL_FORMS: &str = "INITIAL_FORMS";
pub const MIN_NUM_FORMS: &str = "MIN_NUM_FORMS";
pub const MAX_NUM_FORMS: &str = "MAX_NUM_FORMS";

/// Default `max_num`, and the slack above it a submission may claim before
/// `TOTAL_FORMS` is cut off.
const DEFAULT_MAX_NUM: usize = 1000;

/// A formset-level check over the cleaned data of every filled form.
pub type FormSetClean =
    Arc<dyn Fn(&[&HashMap<String, Value>]) -> Result<(), ValidationError> + Send + Sync>;

/// Declares a formset: the form to repeat and how many copies to allow.
#[derive(Clone)]
pub struct FormSetFactory {
    formlet: FormFactory<dyn Form>,
    extra: usize,
    min_num: usize,
    max_num: usize,
    clean: Option<FormSetClean>,
}

impl fmt::Debug for FormSetFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormSetFactory")
            .field("extra", &self.extra)
            .field("min_num", &self.min_num)
            .field("max_num", &self.max_num)
            .finish_non_exhaustive()
    }
}

impl FormSetFactory {
    /// Repeats the forms `formlet` builds. One extra form by default.
    pub fn new<F>(formlet: F) -> Self
    where
        F: Fn(FormKwargs) -> FormsResult<Box<dyn Form>> + Send + Sync + 'static,
    {
        Self {
            formlet: Arc::new(formlet),
            extra: 1,
            min_num: 0,
            max_num: DEFAULT_MAX_NUM,
            clean: None,
        }
    }

    /// Sets the number of blank forms an unbound formset shows.
    #[must_use]
    pub fn with_extra(mut self, extra: usize) -> Self {
        self.extra = extra;
        self
    }

    #[must_use]
    pub fn with_min_num(mut self, min_num: usize) -> Self {
        self.min_num = min_num;
        self
    }

    #[must_use]
    pub fn with_max_num(mut self, max_num: usize) -> Self {
        self.max_num = max_num;
        self
    }

    /// Adds a check that runs once every filled form is valid.
    #[must_use]
    pub fn with_clean<F>(mut self, clean: F) -> Self
    where
        F: Fn(&[&HashMap<String, Value>]) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        self.clean = Some(Arc::new(clean));
        self
    }

    /// Builds a formset. The kwargs prefix names the formset; data, files
    /// and `extra` reach every form.
    ///
    /// # Errors
    ///
    /// Returns the first error of the form factory.
    pub fn build(&self, kwargs: FormKwargs) -> FormsResult<FormSet> {
        let FormKwargs {
            data,
            files,
            prefix,
            extra,
            ..
        } = kwargs;

        let mut formset = FormSet {
            config: self.clone(),
            prefix: prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            data: None,
            files,
            extra,
            forms: Vec::new(),
            fields: Vec::new(),
            initial: HashMap::new(),
            initial_forms: 0,
            submitted_total: 0,
            management_error: None,
            non_form_errors: Vec::new(),
            errors: ErrorDict::new(),
            cleaned: HashMap::new(),
        };
        match data {
            Some(data) => {
                let total = formset.read_management(&data);
                formset.data = Some(data);
                formset.rebuild(total)?;
            }
            None => {
                let total = (self.min_num + self.extra).min(self.max_num);
                formset.rebuild(total)?;
            }
        }
        debug!(
            prefix = %formset.prefix,
            forms = formset.forms.len(),
            bound = formset.is_bound(),
            "Formset constructed"
        );
        Ok(formset)
    }

    /// Returns this declaration as a sub-form factory.
    pub fn into_factory(
        self,
    ) -> impl Fn(FormKwargs) -> FormsResult<Box<dyn Form>> + Send + Sync + 'static {
        move |kwargs: FormKwargs| {
            self.build(kwargs)
                .map(|formset| Box::new(formset) as Box<dyn Form>)
        }
    }

    const fn absolute_max(&self) -> usize {
        self.max_num.saturating_add(DEFAULT_MAX_NUM)
    }
}

struct Formlet {
    form: Box<dyn Form>,
    /// A blank extra form: neither validated nor reported.
    skipped: bool,
}

/// A bound or unbound set of forms built by a [`FormSetFactory`].
pub struct FormSet {
    config: FormSetFactory,
    prefix: String,
    data: Option<Arc<QueryDict>>,
    files: Option<Arc<FileDict>>,
    extra: HashMap<String, Value>,
    forms: Vec<Formlet>,
    fields: Vec<FormFieldDef>,
    initial: HashMap<String, Value>,
    initial_forms: usize,
    submitted_total: usize,
    management_error: Option<String>,
    non_form_errors: Vec<String>,
    errors: ErrorDict,
    cleaned: HashMap<String, Value>,
}

impl fmt::Debug for FormSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormSet")
            .field("prefix", &self.prefix)
            .field("forms", &self.forms.len())
            .field("bound", &self.is_bound())
            .field("non_form_errors", &self.non_form_errors)
            .finish_non_exhaustive()
    }
}

impl FormSet {
    /// Returns the number of forms.
    pub fn total_form_count(&self) -> usize {
        self.forms.len()
    }

    /// Returns the number of forms the submission declared as pre-existing.
    pub const fn initial_form_count(&self) -> usize {
        self.initial_forms
    }

    /// Returns the form at `index`.
    pub fn form(&self, index: usize) -> Option<&dyn Form> {
        self.forms.get(index).map(|formlet| &*formlet.form)
    }

    /// Iterates over the forms in index order.
    pub fn forms(&self) -> impl Iterator<Item = &dyn Form> + '_ {
        self.forms.iter().map(|formlet| &*formlet.form)
    }

    /// Returns the management values to render as hidden inputs, keyed by
    /// submitted name.
    pub fn management_form_data(&self) -> HashMap<String, String> {
        [
            (TOTAL_FORMS, self.total_form_count()),
            (INITIAL_FORMS, self.initial_forms),
            (MIN_NUM_FORMS, self.config.min_num),
            (MAX_NUM_FORMS, self.config.max_num),
        ]
        .into_iter()
        .map(|(key, value)| (self.add_prefix(key), value.to_string()))
        .collect()
    }

    /// Returns the errors that belong to the formset rather than one form.
    pub fn non_form_errors(&self) -> &[String] {
        &self.non_form_errors
    }

    /// Returns each form's errors, in index order. Skipped forms have none.
    pub fn form_errors(&self) -> Vec<&ErrorDict> {
        self.forms.iter().map(|formlet| formlet.form.errors()).collect()
    }

    /// Returns each form's cleaned data, in index order. Skipped forms have
    /// none.
    pub fn cleaned_data_list(&self) -> Vec<&HashMap<String, Value>> {
        self.forms
            .iter()
            .map(|formlet| formlet.form.cleaned_data())
            .collect()
    }

    /// Replaces the cleaned data of the forms, pairing `data` with the forms
    /// in index order.
    pub fn set_cleaned_data_list(&mut self, data: Vec<HashMap<String, Value>>) {
        for (formlet, cleaned) in self.forms.iter_mut().zip(data) {
            formlet.form.set_cleaned_data(cleaned);
        }
        self.refresh_cleaned();
    }

    fn index_key(&self, index: usize, field: &str) -> String {
        format!("{index}{}{field}", SETTINGS.get_or_default().prefix_separator)
    }

    fn read_management(&mut self, data: &QueryDict) -> usize {
        let read = |key: &str| {
            let name = self.add_prefix(key);
            let value = data.get(&name).and_then(|v| v.trim().parse::<usize>().ok());
            (name, value)
        };
        match (read(TOTAL_FORMS), read(INITIAL_FORMS)) {
            ((_, Some(total)), (_, Some(initial))) => {
                self.management_error = None;
                self.submitted_total = total;
                self.initial_forms = initial;
                total.min(self.config.absolute_max())
            }
            ((total_name, total), (initial_name, initial)) => {
                let missing: Vec<String> = [(total_name, total), (initial_name, initial)]
                    .into_iter()
                    .filter(|(_, value)| value.is_none())
                    .map(|(name, _)| name)
                    .collect();
                let message = format!(
                    "ManagementForm data is missing or has been tampered with. Missing fields: {}.",
                    missing.join(", ")
                );
                warn!(prefix = %self.prefix, "{message}");
                self.management_error = Some(message);
                self.submitted_total = 0;
                self.initial_forms = 0;
                0
            }
        }
    }

    fn rebuild(&mut self, total: usize) -> FormsResult<()> {
        let separator = SETTINGS.get_or_default().prefix_separator.as_str();
        let mut forms = Vec::with_capacity(total);
        for index in 0..total {
            let form = (self.config.formlet)(FormKwargs {
                data: self.data.clone(),
                files: self.files.clone(),
                prefix: Some(format!("{}{separator}{index}", self.prefix)),
                initial: None,
                instance: None,
                extra: self.extra.clone(),
            })?;
            let optional = index >= self.initial_forms.max(self.config.min_num);
            let skipped = optional
                && self.data.is_some()
                && !has_input(&*form, self.data.as_deref(), self.files.as_deref());
            forms.push(Formlet { form, skipped });
        }

        self.fields = forms
            .iter()
            .enumerate()
            .flat_map(|(index, formlet)| {
                formlet
                    .form
                    .fields()
                    .iter()
                    .map(move |field| field.renamed(format!("{index}{separator}{}", field.name)))
            })
            .collect();
        self.initial = forms
            .iter()
            .enumerate()
            .flat_map(|(index, formlet)| {
                formlet.form.initial().iter().map(move |(field, value)| {
                    (format!("{index}{separator}{field}"), value.clone())
                })
            })
            .collect();
        self.forms = forms;
        Ok(())
    }

    fn clear(&mut self) {
        self.non_form_errors.clear();
        self.errors.clear();
        self.cleaned.clear();
    }

    fn refresh_cleaned(&mut self) {
        if self.non_form_errors.is_empty() && self.errors.is_empty() && self.is_bound() {
            let cleaned: HashMap<String, Value> = self
                .forms
                .iter()
                .enumerate()
                .filter(|(_, formlet)| !formlet.skipped)
                .flat_map(|(index, formlet)| {
                    formlet
                        .form
                        .cleaned_data()
                        .iter()
                        .map(move |(field, value)| (index, field, value))
                })
                .map(|(index, field, value)| (self.index_key(index, field), value.clone()))
                .collect();
            self.cleaned = cleaned;
        }
    }
}

/// Whether anything non-blank was submitted for one of `form`'s fields.
fn has_input(form: &dyn Form, data: Option<&QueryDict>, files: Option<&FileDict>) -> bool {
    form.fields().iter().any(|field| {
        let name = form.add_prefix(&field.name);
        let text = data
            .and_then(|data| data.get_list(&name))
            .is_some_and(|values| values.iter().any(|v| !v.trim().is_empty()));
        let uploaded = files
            .and_then(|files| files.get_list(&name))
            .is_some_and(|uploads| !uploads.is_empty());
        text || uploaded
    })
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        "form"
    } else {
        "forms"
    }
}

#[async_trait]
impl Form for FormSet {
    fn fields(&self) -> &[FormFieldDef] {
        &self.fields
    }

    fn initial(&self) -> &HashMap<String, Value> {
        &self.initial
    }

    fn prefix(&self) -> Option<&str> {
        Some(&self.prefix)
    }

    fn bind(&mut self, data: &QueryDict) {
        self.clear();
        let total = self.read_management(data);
        self.data = Some(Arc::new(data.clone()));
        if let Err(err) = self.rebuild(total) {
            warn!(prefix = %self.prefix, error = %err, "Formset forms could not be built");
            self.management_error = Some(err.to_string());
            self.forms.clear();
            self.fields.clear();
            self.initial.clear();
        }
    }

    fn bind_files(&mut self, files: &FileDict) {
        self.files = Some(Arc::new(files.clone()));
        for formlet in &mut self.forms {
            formlet.form.bind_files(files);
        }
    }

    fn is_bound(&self) -> bool {
        self.data.is_some()
    }

    async fn is_valid(&mut self) -> bool {
        self.clear();
        if !self.is_bound() {
            return false;
        }

        let mut forms_valid = true;
        let mut filled = 0;
        for formlet in self.forms.iter_mut().filter(|formlet| !formlet.skipped) {
            filled += 1;
            forms_valid &= formlet.form.is_valid().await;
        }

        if let Some(message) = &self.management_error {
            self.non_form_errors.push(message.clone());
        }
        if filled < self.config.min_num {
            let min = self.config.min_num;
            self.non_form_errors
                .push(format!("Please submit at least {min} {}.", plural(min)));
        }
        if filled > self.config.max_num || self.submitted_total > self.config.absolute_max() {
            let max = self.config.max_num;
            self.non_form_errors
                .push(format!("Please submit at most {max} {}.", plural(max)));
        }

        if forms_valid && self.non_form_errors.is_empty() {
            if let Some(clean) = &self.config.clean {
                let cleaned: Vec<&HashMap<String, Value>> = self
                    .forms
                    .iter()
                    .filter(|formlet| !formlet.skipped)
                    .map(|formlet| formlet.form.cleaned_data())
                    .collect();
                if let Err(err) = clean(cleaned.as_slice()) {
                    self.non_form_errors.extend(err.messages());
                }
            }
        }

        for index in 0..self.forms.len() {
            let keyed: Vec<(String, Vec<String>)> = self.forms[index]
                .form
                .errors()
                .iter()
                .map(|(field, messages)| (self.index_key(index, field), messages.clone()))
                .collect();
            self.errors.extend(keyed);
        }
        if !self.non_form_errors.is_empty() {
            self.errors.insert(
                SETTINGS.get_or_default().non_field_errors_key.clone(),
                self.non_form_errors.clone(),
            );
        }
        self.refresh_cleaned();

        let valid = self.errors.is_empty();
        debug!(prefix = %self.prefix, valid, filled, "Formset validated");
        valid
    }

    fn errors(&self) -> &ErrorDict {
        &self.errors
    }

    /// Empty unless the whole formset is valid.
    fn cleaned_data(&self) -> &HashMap<String, Value> {
        &self.cleaned
    }

    fn set_cleaned_data(&mut self, data: HashMap<String, Value>) {
        let indices: Vec<String> = (0..self.forms.len()).map(|i| i.to_string()).collect();
        let names: Vec<&str> = indices.iter().map(String::as_str).collect();
        let mut routed = route_by_form(&names, data);
        for (index, formlet) in self.forms.iter_mut().enumerate() {
            if let Some(cleaned) = routed.remove(&index.to_string()) {
                formlet.form.set_cleaned_data(cleaned);
            }
        }
        self.refresh_cleaned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FormFieldType;
    use crate::form::BaseForm;

    fn image_fields() -> Vec<FormFieldDef> {
        vec![
            FormFieldDef::new("name", FormFieldType::char()),
            FormFieldDef::new("date", FormFieldType::Date).required(false),
        ]
    }

    fn images() -> FormSetFactory {
        FormSetFactory::new(BaseForm::factory(image_fields))
    }

    fn bound(factory: &FormSetFactory, query: &str) -> FormSet {
        factory
            .build(
                FormKwargs::new()
                    .with_prefix("images")
                    .with_data(QueryDict::parse(query)),
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_unbound_builds_extra_forms() {
        let mut formset = images()
            .with_extra(2)
            .build(FormKwargs::new().with_prefix("images"))
            .unwrap();
        assert_eq!(formset.total_form_count(), 2);
        assert_eq!(formset.form(1).and_then(|form| form.prefix()), Some("images-1"));
        let names: Vec<&str> = formset.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["0-name", "0-date", "1-name", "1-date"]);
        assert_eq!(formset.add_prefix("1-name"), "images-1-name");
        assert!(!formset.is_valid().await);
    }

    #[test]
    fn test_default_prefix_and_management_form_data() {
        let formset = images()
            .with_extra(2)
            .with_min_num(1)
            .with_max_num(5)
            .build(FormKwargs::new())
            .unwrap();
        let data = formset.management_form_data();
        assert_eq!(data.get("form-TOTAL_FORMS"), Some(&"3".to_string()));
        assert_eq!(data.get("form-INITIAL_FORMS"), Some(&"0".to_string()));
        assert_eq!(data.get("form-MIN_NUM_FORMS"), Some(&"1".to_string()));
        assert_eq!(data.get("form-MAX_NUM_FORMS"), Some(&"5".to_string()));
    }

    #[tokio::test]
    async fn test_blank_extra_forms_are_skipped() {
        let mut formset = bound(
            &images(),
            "images-TOTAL_FORMS=3&images-INITIAL_FORMS=0\
             &images-0-name=One&images-0-date=1904-06-16&images-1-name=Two",
        );
        assert_eq!(formset.total_form_count(), 3);
        assert!(formset.is_valid().await);

        let cleaned = formset.cleaned_data();
        assert_eq!(cleaned.get("0-name"), Some(&Value::from("One")));
        assert_eq!(cleaned.get("1-name"), Some(&Value::from("Two")));
        assert!(cleaned.keys().all(|key| !key.starts_with("2-")));
        assert!(formset.cleaned_data_list()[2].is_empty());
    }

    #[tokio::test]
    async fn test_errors_are_listed_per_form() {
        let mut formset = bound(
            &images(),
            "images-TOTAL_FORMS=3&images-INITIAL_FORMS=0\
             &images-0-name=One&images-1-date=1904-06-16",
        );
        assert!(!formset.is_valid().await);
        assert!(formset.cleaned_data().is_empty());

        let listed = formset.form_errors();
        assert_eq!(listed.len(), 3);
        assert!(listed[0].is_empty());
        assert_eq!(
            listed[1].get("name"),
            Some(&vec!["This field is required.".to_string()])
        );
        assert!(listed[2].is_empty());
        assert!(formset.errors().contains_key("1-name"));
    }

    #[tokio::test]
    async fn test_missing_management_data() {
        let mut formset = bound(&images(), "images-0-name=One");
        assert_eq!(formset.total_form_count(), 0);
        assert!(!formset.is_valid().await);
        assert_eq!(formset.non_field_errors().len(), 1);
        assert!(formset.non_form_errors()[0].starts_with("ManagementForm data is missing"));
        assert!(formset.non_form_errors()[0].contains("images-TOTAL_FORMS, images-INITIAL_FORMS"));
    }

    #[tokio::test]
    async fn test_form_count_limits() {
        let mut too_few = bound(
            &images().with_min_num(2),
            "images-TOTAL_FORMS=1&images-INITIAL_FORMS=0&images-0-name=One",
        );
        assert!(!too_few.is_valid().await);
        assert_eq!(too_few.non_form_errors(), ["Please submit at least 2 forms."]);

        let mut too_many = bound(
            &images().with_max_num(1),
            "images-TOTAL_FORMS=2&images-INITIAL_FORMS=0&images-0-name=One&images-1-name=Two",
        );
        assert!(!too_many.is_valid().await);
        assert_eq!(too_many.non_form_errors(), ["Please submit at most 1 form."]);
    }

    #[tokio::test]
    async fn test_clean_hook_sees_filled_forms() {
        let unique = images().with_clean(|forms| {
            if forms.len() == 2 && forms[0].get("name") == forms[1].get("name") {
                Err(ValidationError::message("Images must have distinct names."))
            } else {
                Ok(())
            }
        });
        let mut formset = bound(
            &unique,
            "images-TOTAL_FORMS=3&images-INITIAL_FORMS=0&images-0-name=A&images-1-name=A",
        );
        assert!(!formset.is_valid().await);
        assert_eq!(formset.non_field_errors(), ["Images must have distinct names."]);
    }

    #[tokio::test]
    async fn test_set_cleaned_data_routes_by_index() {
        let mut formset = bound(
            &images(),
            "images-TOTAL_FORMS=2&images-INITIAL_FORMS=0&images-0-name=One&images-1-name=Two",
        );
        assert!(formset.is_valid().await);

        let mut data = HashMap::new();
        data.insert("1-name".to_string(), Value::from("Three"));
        Form::set_cleaned_data(&mut formset, data);
        assert_eq!(formset.cleaned_data().get("1-name"), Some(&Value::from("Three")));
        assert_eq!(formset.cleaned_data().get("0-name"), Some(&Value::from("One")));

        let mut first = HashMap::new();
        first.insert("name".to_string(), Value::from("Zero"));
        formset.set_cleaned_data_list(vec![first]);
        assert_eq!(
            formset.cleaned_data_list()[0].get("name"),
            Some(&Value::from("Zero"))
        );
    }

    #[tokio::test]
    async fn test_rebinding_rebuilds_forms() {
        let mut formset = bound(&images(), "images-TOTAL_FORMS=1&images-INITIAL_FORMS=0");
        assert_eq!(formset.total_form_count(), 1);

        formset.bind(&QueryDict::parse(
            "images-TOTAL_FORMS=2&images-INITIAL_FORMS=2&images-0-name=A&images-1-name=B",
        ));
        assert_eq!(formset.total_form_count(), 2);
        assert_eq!(formset.initial_form_count(), 2);
        assert!(formset.is_valid().await);
    }
}
