//! Model-backed forms.
//!
//! A [`ModelForm`] edits a [`ModelInstance`]: its initial data comes from the
//! instance, and [`ModelForm::save`] writes the cleaned data back and
//! persists it through a [`ModelStore`]. Many-to-many fields are written
//! separately by [`ModelForm::save_m2m`], because relations need the saved
//! instance's primary key.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use betterforms_core::{FileDict, FormsError, FormsResult, QueryDict, Value};

use crate::factory::FormKwargs;
use crate::fields::FormFieldDef;
use crate::form::{BaseForm, ErrorDict, Form};

/// A model instance: the model name, an optional primary key, and field values.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInstance {
    /// The model this instance belongs to.
    pub model: String,
    /// The primary key; `None` until the instance is first saved.
    pub pk: Option<Value>,
    /// Field values keyed by field name.
    pub fields: HashMap<String, Value>,
}

impl ModelInstance {
    /// Creates an unsaved instance with no field values.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            pk: None,
            fields: HashMap::new(),
        }
    }

    /// Sets a field value, builder style.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Returns a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a field value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Returns `true` if the instance has been persisted.
    pub const fn is_saved(&self) -> bool {
        self.pk.is_some()
    }
}

/// Persistence for model instances.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Inserts or updates `instance`. An insert assigns the primary key.
    async fn save(&self, instance: &mut ModelInstance) -> FormsResult<()>;

    /// Replaces the related values of a many-to-many `field` on a saved instance.
    async fn set_related(
        &self,
        instance: &ModelInstance,
        field: &str,
        values: Vec<Value>,
    ) -> FormsResult<()>;
}

#[derive(Debug, Default)]
struct StoreState {
    rows: HashMap<String, Vec<ModelInstance>>,
    next_pk: HashMap<String, i64>,
    related: HashMap<(String, String, String), Vec<Value>>,
}

/// An in-memory model store, suitable for testing.
///
/// Primary keys are integers assigned per model, starting at 1.
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    state: RwLock<StoreState>,
}

impl InMemoryModelStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every saved instance of `model`, in insertion order.
    pub async fn all(&self, model: &str) -> Vec<ModelInstance> {
        self.state
            .read()
            .await
            .rows
            .get(model)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the saved instance of `model` with primary key `pk`.
    pub async fn get(&self, model: &str, pk: &Value) -> Option<ModelInstance> {
        self.state
            .read()
            .await
            .rows
            .get(model)
            .and_then(|rows| rows.iter().find(|row| row.pk.as_ref() == Some(pk)))
            .cloned()
    }

    /// Returns the number of saved instances of `model`.
    pub async fn count(&self, model: &str) -> usize {
        self.state.read().await.rows.get(model).map_or(0, Vec::len)
    }

    /// Returns the related values stored for a many-to-many field.
    pub async fn related(&self, instance: &ModelInstance, field: &str) -> Vec<Value> {
        let Some(pk) = &instance.pk else {
            return Vec::new();
        };
        self.state
            .read()
            .await
            .related
            .get(&(instance.model.clone(), pk.to_string(), field.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn save(&self, instance: &mut ModelInstance) -> FormsResult<()> {
        let mut state = self.state.write().await;

        if instance.pk.is_none() {
            let next = state.next_pk.entry(instance.model.clone()).or_insert(0);
            *next += 1;
            instance.pk = Some(Value::Int(*next));
        }

        let rows = state.rows.entry(instance.model.clone()).or_default();
        match rows.iter_mut().find(|row| row.pk == instance.pk) {
            Some(row) => *row = instance.clone(),
            None => rows.push(instance.clone()),
        }
        Ok(())
    }

    async fn set_related(
        &self,
        instance: &ModelInstance,
        field: &str,
        values: Vec<Value>,
    ) -> FormsResult<()> {
        let Some(pk) = &instance.pk else {
            return Err(FormsError::Database(format!(
                "Cannot set '{field}' on an unsaved '{}' instance",
                instance.model
            )));
        };
        self.state
            .write()
            .await
            .related
            .insert((instance.model.clone(), pk.to_string(), field.to_string()), values);
        Ok(())
    }
}

pub(crate) fn unsaveable(model: &str) -> FormsError {
    FormsError::InvalidForm(format!(
        "The {model} could not be saved because the data didn't validate."
    ))
}

/// A form bound to a model instance.
#[async_trait]
pub trait ModelForm: Form {
    /// The name of the model this form edits.
    fn model_name(&self) -> &str;

    /// The instance being edited, if one was supplied.
    fn instance(&self) -> Option<&ModelInstance>;

    /// Returns `true` if [`save`](Self::save) would accept the current state.
    fn can_save(&self) -> bool {
        self.is_bound() && self.errors().is_empty()
    }

    /// Applies the cleaned data to the instance and returns it.
    ///
    /// With `commit`, the instance is persisted and its many-to-many data
    /// written. Without it, nothing is persisted and the caller is expected
    /// to save the instance and then call [`save_m2m`](Self::save_m2m).
    async fn save(&mut self, commit: bool) -> FormsResult<ModelInstance>;

    /// Writes many-to-many data for a saved `instance`.
    async fn save_m2m(&mut self, _instance: &ModelInstance) -> FormsResult<()> {
        Ok(())
    }
}

/// A general-purpose [`ModelForm`] backed by a [`BaseForm`] and a [`ModelStore`].
pub struct BaseModelForm {
    form: BaseForm,
    model: String,
    instance: Option<ModelInstance>,
    store: Arc<dyn ModelStore>,
    many_to_many: Vec<String>,
    validated: bool,
}

impl BaseModelForm {
    /// Creates a model form from factory kwargs.
    ///
    /// The instance's field values become initial data; explicit initial
    /// values take precedence. An instance of a different model is rejected.
    pub fn from_kwargs(
        model: impl Into<String>,
        fields: Vec<FormFieldDef>,
        store: Arc<dyn ModelStore>,
        mut kwargs: FormKwargs,
    ) -> FormsResult<Self> {
        let model = model.into();
        let instance = kwargs.instance.take();

        if let Some(instance) = instance.as_ref().filter(|i| i.model != model) {
            let reason = format!("expected a '{model}' instance, got '{}'", instance.model);
            return Err(FormsError::Factory {
                name: model,
                reason,
            });
        }

        let mut initial = instance
            .as_ref()
            .map(|i| i.fields.clone())
            .unwrap_or_default();
        if let Some(explicit) = kwargs.initial.take() {
            initial.extend(explicit);
        }
        kwargs.initial = Some(initial);

        Ok(Self {
            form: BaseForm::from_kwargs(fields, kwargs),
            model,
            instance,
            store,
            many_to_many: Vec::new(),
            validated: false,
        })
    }

    /// Returns a factory building a `BaseModelForm` of `model` for each call.
    pub fn factory(
        model: &'static str,
        make_fields: fn() -> Vec<FormFieldDef>,
        store: Arc<dyn ModelStore>,
    ) -> impl Fn(FormKwargs) -> FormsResult<Box<dyn ModelForm>> + Send + Sync + 'static {
        move |kwargs: FormKwargs| {
            Self::from_kwargs(model, make_fields(), Arc::clone(&store), kwargs)
                .map(|form| Box::new(form) as Box<dyn ModelForm>)
        }
    }

    /// Marks fields as many-to-many: they are not copied onto the instance
    /// but written through [`ModelStore::set_related`] by `save_m2m`.
    #[must_use]
    pub fn with_many_to_many<I, T>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.many_to_many = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Installs a form-level validation hook on the underlying form.
    #[must_use]
    pub fn with_clean<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HashMap<String, Value>) -> Result<(), ErrorDict> + Send + Sync + 'static,
    {
        self.form = self.form.with_clean(hook);
        self
    }

    fn construct_instance(&self) -> ModelInstance {
        let mut instance = self
            .instance
            .clone()
            .unwrap_or_else(|| ModelInstance::new(self.model.clone()));
        for (name, value) in self.form.cleaned_data() {
            if !self.many_to_many.contains(name) {
                instance.fields.insert(name.clone(), value.clone());
            }
        }
        instance
    }
}

#[async_trait]
impl Form for BaseModelForm {
    fn fields(&self) -> &[FormFieldDef] {
        self.form.fields()
    }

    fn initial(&self) -> &HashMap<String, Value> {
        self.form.initial()
    }

    fn prefix(&self) -> Option<&str> {
        self.form.prefix()
    }

    fn bind(&mut self, data: &QueryDict) {
        self.validated = false;
        self.form.bind(data);
    }

    fn bind_files(&mut self, files: &FileDict) {
        self.validated = false;
        self.form.bind_files(files);
    }

    fn is_bound(&self) -> bool {
        self.form.is_bound()
    }

    async fn is_valid(&mut self) -> bool {
        self.validated = true;
        self.form.is_valid().await
    }

    fn errors(&self) -> &ErrorDict {
        self.form.errors()
    }

    fn cleaned_data(&self) -> &HashMap<String, Value> {
        self.form.cleaned_data()
    }

    fn set_cleaned_data(&mut self, data: HashMap<String, Value>) {
        self.form.set_cleaned_data(data);
    }

    async fn clean(&self) -> Result<(), ErrorDict> {
        self.form.clean().await
    }
}

#[async_trait]
impl ModelForm for BaseModelForm {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn instance(&self) -> Option<&ModelInstance> {
        self.instance.as_ref()
    }

    fn can_save(&self) -> bool {
        self.validated && self.form.is_bound() && self.form.errors().is_empty()
    }

    async fn save(&mut self, commit: bool) -> FormsResult<ModelInstance> {
        if !self.can_save() {
            return Err(unsaveable(&self.model));
        }

        let mut instance = self.construct_instance();
        if commit {
            self.store.save(&mut instance).await?;
            self.save_m2m(&instance).await?;
            self.instance = Some(instance.clone());
        }
        Ok(instance)
    }

    async fn save_m2m(&mut self, instance: &ModelInstance) -> FormsResult<()> {
        for field in &self.many_to_many {
            let values = match self.form.cleaned_data().get(field) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::List(values)) => values.clone(),
                Some(other) => vec![other.clone()],
            };
            self.store.set_related(instance, field, values).await?;
        }
        Ok(())
    }
}

/// A plain [`Form`] that can sit among model forms.
///
/// It edits no model: [`save`](ModelForm::save) persists nothing and returns
/// an unsaved instance of an unnamed model holding the cleaned data.
pub struct NonModelForm {
    form: Box<dyn Form>,
}

impl NonModelForm {
    pub fn new(form: Box<dyn Form>) -> Self {
        Self { form }
    }

    /// Wraps a plain form factory so its forms can be declared on a
    /// [`MultiModelFormDefinition`](crate::multi_model_form::MultiModelFormDefinition).
    /// Instances passed to such a form are ignored.
    pub fn factory<F>(
        factory: F,
    ) -> impl Fn(FormKwargs) -> FormsResult<Box<dyn ModelForm>> + Send + Sync + 'static
    where
        F: Fn(FormKwargs) -> FormsResult<Box<dyn Form>> + Send + Sync + 'static,
    {
        move |mut kwargs: FormKwargs| {
            kwargs.instance = None;
            factory(kwargs).map(|form| Box::new(Self::new(form)) as Box<dyn ModelForm>)
        }
    }

    pub fn into_inner(self) -> Box<dyn Form> {
        self.form
    }
}

#[async_trait]
impl Form for NonModelForm {
    fn fields(&self) -> &[FormFieldDef] {
        self.form.fields()
    }

    fn initial(&self) -> &HashMap<String, Value> {
        self.form.initial()
    }

    fn prefix(&self) -> Option<&str> {
        self.form.prefix()
    }

    fn bind(&mut self, data: &QueryDict) {
        self.form.bind(data);
    }

    fn bind_files(&mut self, files: &FileDict) {
        self.form.bind_files(files);
    }

    fn is_bound(&self) -> bool {
        self.form.is_bound()
    }

    async fn is_valid(&mut self) -> bool {
        self.form.is_valid().await
    }

    fn errors(&self) -> &ErrorDict {
        self.form.errors()
    }

    fn cleaned_data(&self) -> &HashMap<String, Value> {
        self.form.cleaned_data()
    }

    fn set_cleaned_data(&mut self, data: HashMap<String, Value>) {
        self.form.set_cleaned_data(data);
    }

    fn non_field_errors(&self) -> &[String] {
        self.form.non_field_errors()
    }

    fn is_multipart(&self) -> bool {
        self.form.is_multipart()
    }

    async fn clean(&self) -> Result<(), ErrorDict> {
        self.form.clean().await
    }
}

#[async_trait]
impl ModelForm for NonModelForm {
    fn model_name(&self) -> &str {
        ""
    }

    fn instance(&self) -> Option<&ModelInstance> {
        None
    }

    async fn save(&mut self, _commit: bool) -> FormsResult<ModelInstance> {
        if !self.can_save() {
            return Err(unsaveable("form"));
        }
        Ok(ModelInstance {
            model: String::new(),
            pk: None,
            fields: self.form.cleaned_data().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FormFieldType;

    fn article_fields() -> Vec<FormFieldDef> {
        vec![
            FormFieldDef::new("title", FormFieldType::char()),
            FormFieldDef::new(
                "tags",
                FormFieldType::MultipleChoice {
                    choices: vec![
                        ("a".into(), "A".into()),
                        ("b".into(), "B".into()),
                        ("c".into(), "C".into()),
                    ],
                },
            )
            .required(false),
        ]
    }

    fn bound(store: &Arc<InMemoryModelStore>, query: &str) -> BaseModelForm {
        BaseModelForm::from_kwargs(
            "Article",
            article_fields(),
            Arc::clone(store) as Arc<dyn ModelStore>,
            FormKwargs::new().with_data(QueryDict::parse(query)),
        )
        .unwrap()
        .with_many_to_many(["tags"])
    }

    #[tokio::test]
    async fn test_store_assigns_pks_per_model() {
        let store = InMemoryModelStore::new();
        let mut a = ModelInstance::new("User");
        let mut b = ModelInstance::new("User");
        let mut c = ModelInstance::new("Profile");
        store.save(&mut a).await.unwrap();
        store.save(&mut b).await.unwrap();
        store.save(&mut c).await.unwrap();

        assert_eq!(a.pk, Some(Value::Int(1)));
        assert_eq!(b.pk, Some(Value::Int(2)));
        assert_eq!(c.pk, Some(Value::Int(1)));
        assert_eq!(store.count("User").await, 2);
    }

    #[tokio::test]
    async fn test_store_updates_existing_row() {
        let store = InMemoryModelStore::new();
        let mut user = ModelInstance::new("User").with("name", "old");
        store.save(&mut user).await.unwrap();
        user.set("name", "new");
        store.save(&mut user).await.unwrap();

        assert_eq!(store.count("User").await, 1);
        let saved = store.get("User", &Value::Int(1)).await.unwrap();
        assert_eq!(saved.get("name"), Some(&Value::from("new")));
    }

    #[tokio::test]
    async fn test_set_related_requires_pk() {
        let store = InMemoryModelStore::new();
        let err = store
            .set_related(&ModelInstance::new("User"), "groups", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, FormsError::Database(_)));
    }

    #[tokio::test]
    async fn test_save_commit_persists_instance_and_relations() {
        let store = Arc::new(InMemoryModelStore::new());
        let mut form = bound(&store, "title=Hello&tags=a&tags=c");
        assert!(form.is_valid().await);

        let saved = form.save(true).await.unwrap();
        assert!(saved.is_saved());
        assert_eq!(saved.get("title"), Some(&Value::from("Hello")));
        assert_eq!(saved.get("tags"), None);
        assert_eq!(store.count("Article").await, 1);
        assert_eq!(
            store.related(&saved, "tags").await,
            vec![Value::from("a"), Value::from("c")]
        );
        assert_eq!(form.instance(), Some(&saved));
    }

    #[tokio::test]
    async fn test_save_without_commit_defers_persistence() {
        let store = Arc::new(InMemoryModelStore::new());
        let mut form = bound(&store, "title=Draft&tags=b");
        assert!(form.is_valid().await);

        let mut article = form.save(false).await.unwrap();
        assert!(!article.is_saved());
        assert_eq!(store.count("Article").await, 0);

        store.save(&mut article).await.unwrap();
        form.save_m2m(&article).await.unwrap();
        assert_eq!(store.related(&article, "tags").await, vec![Value::from("b")]);
    }

    #[tokio::test]
    async fn test_save_requires_validation() {
        let store = Arc::new(InMemoryModelStore::new());
        let mut form = bound(&store, "title=Hello");
        assert!(matches!(
            form.save(true).await,
            Err(FormsError::InvalidForm(_))
        ));

        let mut invalid = bound(&store, "tags=a");
        assert!(!invalid.is_valid().await);
        assert!(invalid.save(true).await.is_err());
        assert_eq!(store.count("Article").await, 0);
    }

    #[tokio::test]
    async fn test_instance_supplies_initial_and_is_updated() {
        let store = Arc::new(InMemoryModelStore::new());
        let mut existing = ModelInstance::new("Article").with("title", "Original");
        store.save(&mut existing).await.unwrap();

        let mut form = BaseModelForm::from_kwargs(
            "Article",
            article_fields(),
            Arc::clone(&store) as Arc<dyn ModelStore>,
            FormKwargs::new()
                .with_instance(existing.clone())
                .with_data(QueryDict::parse("title=Edited")),
        )
        .unwrap();
        assert_eq!(form.initial().get("title"), Some(&Value::from("Original")));
        assert!(form.is_valid().await);

        let saved = form.save(true).await.unwrap();
        assert_eq!(saved.pk, existing.pk);
        assert_eq!(store.count("Article").await, 1);
        assert_eq!(saved.get("title"), Some(&Value::from("Edited")));
    }

    #[test]
    fn test_explicit_initial_overrides_instance() {
        let mut initial = HashMap::new();
        initial.insert("title".to_string(), Value::from("Explicit"));
        let form = BaseModelForm::from_kwargs(
            "Article",
            article_fields(),
            Arc::new(InMemoryModelStore::new()),
            FormKwargs::new()
                .with_instance(ModelInstance::new("Article").with("title", "FromInstance"))
                .with_initial(initial),
        )
        .unwrap();
        assert_eq!(form.initial().get("title"), Some(&Value::from("Explicit")));
    }

    #[test]
    fn test_instance_of_other_model_rejected() {
        let result = BaseModelForm::from_kwargs(
            "Article",
            article_fields(),
            Arc::new(InMemoryModelStore::new()),
            FormKwargs::new().with_instance(ModelInstance::new("User")),
        );
        assert!(matches!(result, Err(FormsError::Factory { .. })));
    }

    #[tokio::test]
    async fn test_rebinding_withdraws_saveability() {
        let store = Arc::new(InMemoryModelStore::new());
        let mut form = bound(&store, "title=Hello");
        assert!(!form.can_save());
        assert!(form.is_valid().await);
        assert!(form.can_save());

        form.bind(&QueryDict::parse("title=Changed"));
        assert!(!form.can_save());
        assert!(form.save(true).await.is_err());
        assert_eq!(store.count("Article").await, 0);
    }

    #[tokio::test]
    async fn test_non_model_form_saves_nothing() {
        let factory = NonModelForm::factory(BaseForm::factory(|| {
            vec![FormFieldDef::new("query", FormFieldType::char())]
        }));
        let mut form = factory(
            FormKwargs::new()
                .with_data(QueryDict::parse("query=rust"))
                .with_instance(ModelInstance::new("Article")),
        )
        .unwrap();
        assert!(form.instance().is_none());
        assert_eq!(form.model_name(), "");

        assert!(form.is_valid().await);
        let instance = form.save(true).await.unwrap();
        assert!(!instance.is_saved());
        assert_eq!(instance.get("query"), Some(&Value::from("rust")));
    }
}
