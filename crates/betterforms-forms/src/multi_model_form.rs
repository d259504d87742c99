//! Multi-forms whose sub-forms are model forms.
//!
//! A [`MultiModelForm`] is a [`MultiForm`] over [`ModelForm`]s. Model
//! instances are passed per sub-form through
//! [`MultiFormKwargs::with_instance`](crate::multiform::MultiFormKwargs::with_instance)
//! and only reach the sub-form they are keyed by. Once the whole multi-form
//! is valid, [`save`](MultiForm::save) saves every sub-form in declaration
//! order.

use tracing::{debug, warn};

use betterforms_core::{FormsError, FormsResult};

use crate::model_form::{unsaveable, ModelForm, ModelInstance};
use crate::multiform::{MultiForm, MultiFormDefinition, ValidationState};

/// A multi-form over model forms.
pub type MultiModelForm = MultiForm<dyn ModelForm>;

/// The definition of a [`MultiModelForm`].
pub type MultiModelFormDefinition = MultiFormDefinition<dyn ModelForm>;

impl MultiForm<dyn ModelForm> {
    /// Saves every sub-form and returns the instances by sub-form name, in
    /// declaration order.
    ///
    /// With `commit = false` the instances are built but not persisted;
    /// persist them, then call [`save_m2m`](Self::save_m2m).
    ///
    /// # Errors
    ///
    /// Returns [`FormsError::NotValidated`] before `is_valid()` was called and
    /// [`FormsError::InvalidForm`] if validation failed or a sub-form was
    /// rebound since. Nothing is saved in any of these cases. Store errors
    /// are propagated as they occur.
    pub async fn save(&mut self, commit: bool) -> FormsResult<Vec<(String, ModelInstance)>> {
        self.ensure_valid("save")?;
        if let Some((name, form)) = self.iter().find(|(_, form)| !form.can_save()) {
            warn!(form = self.name(), subform = name, "Refused: sub-form changed since validation");
            return Err(unsaveable(form.model_name()));
        }

        let mut saved = Vec::with_capacity(self.len());
        for (name, form) in self.iter_mut() {
            let instance = form.save(commit).await?;
            debug!(form = %name, model = form.model_name(), commit, "Sub-form saved");
            saved.push((name.to_string(), instance));
        }
        Ok(saved)
    }

    /// Writes the deferred many-to-many data of each sub-form for the
    /// instances returned by `save(false)`, once they are persisted.
    ///
    /// # Errors
    ///
    /// Fails like [`save`](Self::save) on an unvalidated or invalid
    /// multi-form, with [`FormsError::FormNotFound`] for an unknown name, and
    /// with any store error.
    pub async fn save_m2m(&mut self, saved: &[(String, ModelInstance)]) -> FormsResult<()> {
        self.ensure_valid("save_m2m")?;

        for (name, instance) in saved {
            self.get_mut(name)?.save_m2m(instance).await?;
        }
        Ok(())
    }

    fn ensure_valid(&self, operation: &str) -> FormsResult<()> {
        match self.state() {
            ValidationState::Valid => Ok(()),
            ValidationState::Unvalidated => {
                warn!(form = self.name(), operation, "Refused: multi-form not validated");
                Err(FormsError::NotValidated(self.name().to_string()))
            }
            ValidationState::Invalid => {
                warn!(form = self.name(), operation, "Refused: multi-form is invalid");
                Err(unsaveable(self.name()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use betterforms_core::{QueryDict, Value};

    use super::*;
    use crate::fields::{FormFieldDef, FormFieldType};
    use crate::form::{BaseForm, Form};
    use crate::model_form::{BaseModelForm, InMemoryModelStore, ModelStore, NonModelForm};
    use crate::multiform::MultiFormKwargs;
    use crate::FormKwargs;

    fn user_fields() -> Vec<FormFieldDef> {
        vec![FormFieldDef::new("username", FormFieldType::char())]
    }

    fn profile_fields() -> Vec<FormFieldDef> {
        vec![
            FormFieldDef::new("bio", FormFieldType::char()).required(false),
            FormFieldDef::new(
                "interests",
                FormFieldType::MultipleChoice {
                    choices: vec![("rust".into(), "Rust".into()), ("go".into(), "Go".into())],
                },
            )
            .required(false),
        ]
    }

    fn definition(store: &Arc<InMemoryModelStore>) -> MultiModelFormDefinition {
        let profile_store: Arc<dyn ModelStore> = store.clone();
        MultiModelFormDefinition::new("UserProfileMultiForm")
            .form(
                "user",
                BaseModelForm::factory("User", user_fields, Arc::clone(store) as Arc<dyn ModelStore>),
            )
            .form("profile", move |kwargs: FormKwargs| {
                BaseModelForm::from_kwargs("Profile", profile_fields(), Arc::clone(&profile_store), kwargs)
                    .map(|form| Box::new(form.with_many_to_many(["interests"])) as Box<dyn ModelForm>)
            })
    }

    fn bound(store: &Arc<InMemoryModelStore>, query: &str) -> MultiModelForm {
        definition(store)
            .instantiate(MultiFormKwargs::bound(QueryDict::parse(query)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_save_before_validation_persists_nothing() {
        let store = Arc::new(InMemoryModelStore::new());
        let mut form = bound(&store, "user-username=alice&profile-bio=hi");

        let err = form.save(true).await.unwrap_err();
        assert!(matches!(err, FormsError::NotValidated(_)));
        assert_eq!(store.count("User").await, 0);
        assert_eq!(store.count("Profile").await, 0);
    }

    #[tokio::test]
    async fn test_save_invalid_persists_nothing() {
        let store = Arc::new(InMemoryModelStore::new());
        let mut form = bound(&store, "profile-bio=hi");
        assert!(!form.is_valid().await);

        assert!(matches!(form.save(true).await, Err(FormsError::InvalidForm(_))));
        assert_eq!(store.count("Profile").await, 0);
    }

    #[tokio::test]
    async fn test_save_commit_returns_instances_in_order() {
        let store = Arc::new(InMemoryModelStore::new());
        let mut form = bound(&store, "user-username=alice&profile-bio=hi&profile-interests=rust");
        assert!(form.is_valid().await);

        let saved = form.save(true).await.unwrap();
        let names: Vec<&str> = saved.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["user", "profile"]);
        assert_eq!(saved[0].1.get("username"), Some(&Value::from("alice")));
        assert!(saved[1].1.is_saved());
        assert_eq!(store.count("User").await, 1);
        assert_eq!(store.related(&saved[1].1, "interests").await, vec![Value::from("rust")]);
    }

    #[tokio::test]
    async fn test_save_without_commit_then_save_m2m() {
        let store = Arc::new(InMemoryModelStore::new());
        let mut form = bound(&store, "user-username=bob&profile-interests=go");
        assert!(form.is_valid().await);

        let mut saved = form.save(false).await.unwrap();
        assert_eq!(store.count("User").await, 0);
        assert!(saved.iter().all(|(_, instance)| !instance.is_saved()));

        for (_, instance) in &mut saved {
            store.save(instance).await.unwrap();
        }
        form.save_m2m(&saved).await.unwrap();
        assert_eq!(store.related(&saved[1].1, "interests").await, vec![Value::from("go")]);
    }

    #[tokio::test]
    async fn test_instances_reach_only_their_subform() {
        let store = Arc::new(InMemoryModelStore::new());
        let mut user = ModelInstance::new("User").with("username", "carol");
        store.save(&mut user).await.unwrap();

        let mut form = definition(&store)
            .instantiate(
                MultiFormKwargs::bound(QueryDict::parse("user-username=carol2"))
                    .with_instance("user", user.clone()),
            )
            .unwrap();
        assert_eq!(form.get("user").unwrap().instance(), Some(&user));
        assert!(form.get("profile").unwrap().instance().is_none());

        assert!(form.is_valid().await);
        let saved = form.save(true).await.unwrap();
        assert_eq!(saved[0].1.pk, user.pk);
        assert_eq!(store.count("User").await, 1);
        let stored = store.get("User", &Value::Int(1)).await.unwrap();
        assert_eq!(stored.get("username"), Some(&Value::from("carol2")));
    }

    #[tokio::test]
    async fn test_mismatched_instance_aborts_construction() {
        let store = Arc::new(InMemoryModelStore::new());
        let result = definition(&store).instantiate(
            MultiFormKwargs::new().with_instance("profile", ModelInstance::new("User")),
        );
        assert!(matches!(result, Err(FormsError::Factory { .. })));
    }

    #[tokio::test]
    async fn test_rebound_subform_blocks_every_save() {
        let store = Arc::new(InMemoryModelStore::new());
        let mut form = bound(&store, "user-username=alice&profile-bio=hi");
        assert!(form.is_valid().await);

        form.get_mut("profile").unwrap().bind(&QueryDict::parse(""));
        let err = form.save(true).await.unwrap_err();
        assert!(matches!(err, FormsError::InvalidForm(ref message) if message.contains("Profile")));
        assert_eq!(store.count("User").await, 0);
        assert_eq!(store.count("Profile").await, 0);
    }

    #[tokio::test]
    async fn test_model_and_plain_forms_mix() {
        fn search_fields() -> Vec<FormFieldDef> {
            vec![FormFieldDef::new("query", FormFieldType::char()).required(false)]
        }

        let store = Arc::new(InMemoryModelStore::new());
        let definition = definition(&store)
            .form("search", NonModelForm::factory(BaseForm::factory(search_fields)));
        assert!(definition.instantiate(MultiFormKwargs::new()).is_ok());

        let mut form = definition
            .instantiate(
                MultiFormKwargs::bound(QueryDict::parse("user-username=dave&search-query=rust"))
                    .with_instance("search", ModelInstance::new("User")),
            )
            .unwrap();
        assert!(form.get("search").unwrap().instance().is_none());
        assert!(form.is_valid().await);

        let saved = form.save(true).await.unwrap();
        assert_eq!(saved.len(), 3);
        assert_eq!(saved[2].0, "search");
        assert!(!saved[2].1.is_saved());
        assert_eq!(store.count("User").await, 1);
        assert_eq!(
            form.get("search").unwrap().cleaned_data().get("query"),
            Some(&Value::from("rust"))
        );
    }
}
