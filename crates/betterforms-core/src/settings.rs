//! Library-wide settings.
//!
//! Forms read [`SETTINGS`] through [`LazySettings::get_or_default`], so the
//! crates work unconfigured. An application that wants other separators or
//! another error key calls [`LazySettings::configure`] once at startup,
//! typically with the output of [`settings_loader`](crate::settings_loader).

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{FormsError, FormsResult};

/// Default key for errors that belong to a whole form rather than a field.
pub const NON_FIELD_ERRORS: &str = "__all__";

/// ```
/// use betterforms_core::settings::FormsSettings;
///
/// let settings = FormsSettings::default();
/// assert_eq!(format!("user{}email", settings.prefix_separator), "user-email");
/// assert_eq!(settings.non_field_errors_key, "__all__");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormsSettings {
    pub debug: bool,
    /// A `tracing-subscriber` filter directive such as `info` or
    /// `betterforms_forms=debug`.
    pub log_level: String,
    /// Key for form-level and crossform errors.
    pub non_field_errors_key: String,
    /// Joins a form prefix and a field name: `user-email`.
    pub prefix_separator: String,
    /// Joins a sub-form name and the multi-form prefix: `user__signup`.
    pub nested_prefix_separator: String,
    /// Application values the library passes through untouched.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for FormsSettings {
    fn default() -> Self {
        Self {
            debug: true,
            log_level: "info".into(),
            non_field_errors_key: NON_FIELD_ERRORS.into(),
            prefix_separator: "-".into(),
            nested_prefix_separator: "__".into(),
            extra: HashMap::new(),
        }
    }
}

/// Settings installed once per process.
#[derive(Debug, Default)]
pub struct LazySettings {
    cell: OnceLock<FormsSettings>,
}

impl LazySettings {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Installs `settings`.
    ///
    /// Fails with [`FormsError::Configuration`] once settings are in place,
    /// including defaults installed by an earlier `get_or_default`.
    pub fn configure(&self, settings: FormsSettings) -> FormsResult<()> {
        self.cell
            .set(settings)
            .map_err(|_| FormsError::Configuration("settings are already configured".into()))
    }

    /// The installed settings, if any.
    pub fn get(&self) -> Option<&FormsSettings> {
        self.cell.get()
    }

    /// The installed settings, installing the defaults on first use.
    pub fn get_or_default(&self) -> &FormsSettings {
        self.cell.get_or_init(FormsSettings::default)
    }

    pub fn is_configured(&self) -> bool {
        self.cell.get().is_some()
    }
}

pub static SETTINGS: LazySettings = LazySettings::new();
