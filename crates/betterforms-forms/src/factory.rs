//! Form construction arguments and factories.
//!
//! A [`FormFactory`] is the constructor a [`MultiFormDefinition`] declares
//! for each named sub-form. The aggregate calls it once per sub-form with a
//! [`FormKwargs`] carrying the shared submission, the sub-form's own prefix,
//! its slice of initial data, and any forwarded configuration.
//!
//! [`MultiFormDefinition`]: crate::multiform::MultiFormDefinition

use std::collections::HashMap;
use std::sync::Arc;

use betterforms_core::{FileDict, FormsResult, QueryDict, Value};

use crate::model_form::ModelInstance;

/// Keyword arguments passed to a form factory.
///
/// `data` and `files` are reference-counted so every sub-form of an
/// aggregate reads the same submission.
#[derive(Debug, Clone, Default)]
pub struct FormKwargs {
    /// Submitted field data; `None` builds an unbound form.
    pub data: Option<Arc<QueryDict>>,
    /// Uploaded files.
    pub files: Option<Arc<FileDict>>,
    /// Prefix applied to every field name (`"{prefix}-{field}"`).
    pub prefix: Option<String>,
    /// Initial values keyed by unprefixed field name.
    pub initial: Option<HashMap<String, Value>>,
    /// The model instance a model form edits.
    pub instance: Option<ModelInstance>,
    /// Arbitrary extra configuration.
    pub extra: HashMap<String, Value>,
}

impl FormKwargs {
    /// Creates empty kwargs (an unbound, unprefixed form).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bound data.
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

    /// Sets the prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Sets the initial values.
    #[must_use]
    pub fn with_initial(mut self, initial: HashMap<String, Value>) -> Self {
        self.initial = Some(initial);
        self
    }

    /// Sets the model instance.
    #[must_use]
    pub fn with_instance(mut self, instance: ModelInstance) -> Self {
        self.instance = Some(instance);
        self
    }

    /// Adds one extra configuration entry.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Constructs a form of type `S` from [`FormKwargs`].
///
/// Construction is fallible; a failing factory aborts the construction of
/// the whole aggregate.
pub type FormFactory<S> = Arc<dyn Fn(FormKwargs) -> FormsResult<Box<S>> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kwargs_builder() {
        let kwargs = FormKwargs::new()
            .with_data(QueryDict::parse("a-name=x"))
            .with_prefix("a")
            .with_extra("max_items", 3_i64);

        assert_eq!(kwargs.prefix.as_deref(), Some("a"));
        assert_eq!(kwargs.data.as_ref().and_then(|d| d.get("a-name")), Some("x"));
        assert_eq!(kwargs.extra.get("max_items"), Some(&Value::Int(3)));
        assert!(kwargs.files.is_none());
        assert!(kwargs.initial.is_none());
    }

    #[test]
    fn test_kwargs_clone_shares_submission() {
        let kwargs = FormKwargs::new().with_data(QueryDict::parse("k=v"));
        let copy = kwargs.clone();
        let (Some(a), Some(b)) = (&kwargs.data, &copy.data) else {
            panic!("data should be set");
        };
        assert!(Arc::ptr_eq(a, b));
    }
}
