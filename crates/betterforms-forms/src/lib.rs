//! # betterforms-forms
//!
//! Forms for the betterforms crates. Provides the [`Form`](form::Form) and
//! [`ModelForm`](model_form::ModelForm) traits, typed fields with validation,
//! and [`MultiForm`](multiform::MultiForm), which treats several
//! independently defined forms as one: shared submission data, per-form
//! prefixes, combined validity and cleaned data, and crossform validation.
//! A [`FormSet`](formset::FormSet) or another multi-form can be one of its
//! sub-forms.
//!
//! ```
//! use betterforms_core::QueryDict;
//! use betterforms_forms::fields::{FormFieldDef, FormFieldType};
//! use betterforms_forms::form::BaseForm;
//! use betterforms_forms::multiform::{MultiFormDefinition, MultiFormKwargs};
//!
//! fn name_fields() -> Vec<FormFieldDef> {
//!     vec![FormFieldDef::new("name", FormFieldType::char())]
//! }
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let definition = MultiFormDefinition::new("UserProfileForm")
//!     .form("user", BaseForm::factory(name_fields))
//!     .form("profile", BaseForm::factory(name_fields));
//!
//! let data = QueryDict::parse("user-name=foo&profile-name=bar");
//! let mut form = definition.instantiate(MultiFormKwargs::bound(data)).unwrap();
//! assert!(form.is_valid().await);
//! assert_eq!(form.cleaned_data()["user-name"].as_str(), Some("foo"));
//! # });
//! ```

pub mod factory;
pub mod fields;
pub mod form;
pub mod formset;
pub mod model_form;
pub mod multi_model_form;
pub mod multiform;
pub mod validation;
pub mod validators;

pub use factory::{FormFactory, FormKwargs};
pub use form::{BaseForm, ErrorDict, Form};
pub use formset::{FormSet, FormSetFactory};
pub use model_form::{
    BaseModelForm, InMemoryModelStore, ModelForm, ModelInstance, ModelStore, NonModelForm,
};
pub use multi_model_form::{MultiModelForm, MultiModelFormDefinition};
pub use multiform::{
    CrossformValidator, FnCrossform, MultiForm, MultiFormDefinition, MultiFormErrors,
    MultiFormKwargs, SubForms, ValidationState,
};
