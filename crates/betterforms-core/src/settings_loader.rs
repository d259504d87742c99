//! Loads [`FormsSettings`] from a TOML or JSON document.
//!
//! Keys missing from the document keep their defaults. `BETTERFORMS_*`
//! environment variables are applied last and win over the file:
//!
//! | Variable | Setting |
//! |---|---|
//! | `BETTERFORMS_DEBUG` | `debug` (`true`, `1`, or `yes`) |
//! | `BETTERFORMS_LOG_LEVEL` | `log_level` |
//! | `BETTERFORMS_NON_FIELD_ERRORS_KEY` | `non_field_errors_key` |
//! | `BETTERFORMS_PREFIX_SEPARATOR` | `prefix_separator` |
//! | `BETTERFORMS_NESTED_PREFIX_SEPARATOR` | `nested_prefix_separator` |
//!
//! An empty value is ignored for the key and separator variables.
//!
//! ```rust,no_run
//! use betterforms_core::settings_loader;
//!
//! let settings = settings_loader::load_file("config/forms.toml").unwrap();
//! assert_eq!(settings.prefix_separator, "-");
//! ```

use std::path::Path;

use serde_json::Value as Json;

use crate::error::{FormsError, FormsResult};
use crate::settings::FormsSettings;

/// The document formats a settings file may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsFormat {
    Toml,
    Json,
}

impl SettingsFormat {
    /// Picks the format from a file extension; anything but `.json` is TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }

    fn parse(self, source: &str) -> FormsResult<Json> {
        match self {
            Self::Toml => {
                let doc: toml::Table = toml::from_str(source)
                    .map_err(|e| FormsError::Configuration(format!("invalid TOML settings: {e}")))?;
                serde_json::to_value(doc)
                    .map_err(|e| FormsError::Configuration(format!("unsupported TOML value: {e}")))
            }
            Self::Json => serde_json::from_str(source)
                .map_err(|e| FormsError::Configuration(format!("invalid JSON settings: {e}"))),
        }
    }
}

/// Parses `source` and merges it over the default settings.
pub fn load_str(source: &str, format: SettingsFormat) -> FormsResult<FormsSettings> {
    let overrides = format.parse(source)?;
    let defaults = serde_json::to_value(FormsSettings::default())
        .map_err(|e| FormsError::Configuration(e.to_string()))?;
    serde_json::from_value(merge(defaults, overrides))
        .map_err(|e| FormsError::Configuration(format!("invalid settings ({format:?}): {e}")))
}

/// Reads a settings file, then applies the environment overrides.
pub fn load_file(path: impl AsRef<Path>) -> FormsResult<FormsSettings> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path).map_err(|e| {
        FormsError::Configuration(format!("cannot read settings file {}: {e}", path.display()))
    })?;
    let mut settings = load_str(&source, SettingsFormat::from_path(path))?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Default settings with the environment overrides applied.
pub fn from_env() -> FormsSettings {
    let mut settings = FormsSettings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies the `BETTERFORMS_*` variables of the process environment.
pub fn apply_env_overrides(settings: &mut FormsSettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

fn apply_overrides(settings: &mut FormsSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(flag) = lookup("BETTERFORMS_DEBUG") {
        settings.debug = ["true", "1", "yes"].contains(&flag.to_ascii_lowercase().as_str());
    }
    if let Some(level) = lookup("BETTERFORMS_LOG_LEVEL") {
        settings.log_level = level;
    }
    let text_settings = [
        ("BETTERFORMS_NON_FIELD_ERRORS_KEY", &mut settings.non_field_errors_key),
        ("BETTERFORMS_PREFIX_SEPARATOR", &mut settings.prefix_separator),
        ("BETTERFORMS_NESTED_PREFIX_SEPARATOR", &mut settings.nested_prefix_separator),
    ];
    for (var, slot) in text_settings {
        if let Some(text) = lookup(var).filter(|text| !text.is_empty()) {
            *slot = text;
        }
    }
}

/// Objects merge key by key; any other value replaces the base.
fn merge(base: Json, overlay: Json) -> Json {
    match (base, overlay) {
        (Json::Object(mut into), Json::Object(from)) => {
            for (key, value) in from {
                let merged = match into.remove(&key) {
                    Some(existing) => merge(existing, value),
                    None => value,
                };
                into.insert(key, merged);
            }
            Json::Object(into)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_toml_overrides_only_given_keys() {
        let doc = r#"
            debug = false
            non_field_errors_key = "__crossform__"

            [extra]
            theme = "compact"
        "#;
        let settings = load_str(doc, SettingsFormat::Toml).unwrap();
        assert!(!settings.debug);
        assert_eq!(settings.non_field_errors_key, "__crossform__");
        assert_eq!(settings.prefix_separator, "-");
        assert_eq!(settings.extra.get("theme"), Some(&serde_json::json!("compact")));
    }

    #[test]
    fn test_empty_toml_is_defaults() {
        let settings = load_str("", SettingsFormat::Toml).unwrap();
        assert!(settings.debug);
        assert_eq!(settings.non_field_errors_key, "__all__");
    }

    #[test]
    fn test_json_document() {
        let settings =
            load_str(r#"{"log_level": "debug", "prefix_separator": "_"}"#, SettingsFormat::Json)
                .unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.prefix_separator, "_");
        assert_eq!(settings.nested_prefix_separator, "__");
    }

    #[test]
    fn test_bad_documents_are_configuration_errors() {
        for (doc, format) in [
            ("debug = [", SettingsFormat::Toml),
            ("debug = \"maybe\"", SettingsFormat::Toml),
            ("{not json", SettingsFormat::Json),
        ] {
            assert!(matches!(load_str(doc, format), Err(FormsError::Configuration(_))), "{doc}");
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_file("/nonexistent/forms.toml"),
            Err(FormsError::Configuration(_))
        ));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(SettingsFormat::from_path(&PathBuf::from("a/forms.JSON")), SettingsFormat::Json);
        assert_eq!(SettingsFormat::from_path(&PathBuf::from("forms.toml")), SettingsFormat::Toml);
        assert_eq!(SettingsFormat::from_path(&PathBuf::from("forms")), SettingsFormat::Toml);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BETTERFORMS_DEBUG", "0"),
            ("BETTERFORMS_LOG_LEVEL", "warn"),
            ("BETTERFORMS_NON_FIELD_ERRORS_KEY", "__form__"),
            ("BETTERFORMS_PREFIX_SEPARATOR", ""),
        ]
        .into_iter()
        .collect();

        let mut settings = FormsSettings::default();
        apply_overrides(&mut settings, |k| env.get(k).map(ToString::to_string));

        assert!(!settings.debug);
        assert_eq!(settings.log_level, "warn");
        assert_eq!(settings.non_field_errors_key, "__form__");
        assert_eq!(settings.prefix_separator, "-");
    }

    #[test]
    fn test_merge_is_deep() {
        let merged = merge(
            serde_json::json!({"a": {"x": 1, "y": 2}, "b": 3}),
            serde_json::json!({"a": {"y": 20}}),
        );
        assert_eq!(merged, serde_json::json!({"a": {"x": 1, "y": 20}, "b": 3}));
    }
}
