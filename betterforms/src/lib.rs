//! # betterforms
//!
//! Several forms, one submission.
//!
//! This is the meta-crate that re-exports the betterforms sub-crates. Depend
//! on `betterforms` for everything, or on the individual crates for
//! finer-grained control.

/// Errors, settings, logging, and request data types.
pub use betterforms_core as core;

/// Forms, `ModelForms`, and the multi-form aggregators.
#[cfg(feature = "forms")]
pub use betterforms_forms as forms;

/// Implementing [`forms::Form`] or [`forms::CrossformValidator`] requires this attribute.
pub use async_trait::async_trait;
pub use serde_json;
pub use tracing;

/// The types most applications need, in one import.
#[cfg(feature = "forms")]
pub mod prelude {
    pub use betterforms_core::{
        FileDict, FormsError, FormsResult, QueryDict, UploadedFile, ValidationError, Value,
    };
    pub use betterforms_forms::fields::{FormFieldDef, FormFieldType};
    pub use betterforms_forms::{
        BaseForm, BaseModelForm, CrossformValidator, Form, FormKwargs, FormSet, FormSetFactory,
        ModelForm, ModelInstance, ModelStore, MultiForm, MultiFormDefinition, MultiFormKwargs,
        MultiModelForm, MultiModelFormDefinition, NonModelForm, SubForms,
    };
}
