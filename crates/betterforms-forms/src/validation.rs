//! Field-level cleaning for a whole form.
//!
//! Every field is cleaned even after another one failed, so a submission
//! reports all of its problems at once.

use std::collections::HashMap;

use betterforms_core::{UploadedFile, Value};

use crate::fields::{clean_field_value, FormFieldDef};
use crate::form::ErrorDict;

/// Raw values of one form, keyed by unprefixed field name.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub values: HashMap<String, Vec<String>>,
    pub files: HashMap<String, Vec<UploadedFile>>,
}

/// What cleaning the fields produced.
#[derive(Debug, Default)]
pub struct CleanedFields {
    pub data: HashMap<String, Value>,
    pub errors: ErrorDict,
}

/// Cleans each field of `submission`.
///
/// Disabled fields ignore the submission and keep their initial value.
pub fn clean_fields(fields: &[FormFieldDef], submission: &Submission) -> CleanedFields {
    let mut outcome = CleanedFields::default();
    for field in fields {
        if field.disabled {
            if let Some(initial) = &field.initial {
                outcome.data.insert(field.name.clone(), initial.clone());
            }
            continue;
        }

        let values = submission.values.get(&field.name).map_or(&[][..], Vec::as_slice);
        let files = submission.files.get(&field.name).map_or(&[][..], Vec::as_slice);
        match clean_field_value(field, values, files) {
            Ok(value) => {
                outcome.data.insert(field.name.clone(), value);
            }
            Err(messages) => {
                outcome.errors.insert(field.name.clone(), messages);
            }
        }
    }
    outcome
}
