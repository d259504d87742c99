//! # betterforms-core
//!
//! Core types, settings, and error types for the betterforms crates.
//! This crate has no form logic of its own; it provides the foundation the
//! forms crate builds on.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Library settings and global configuration
//! - [`settings_loader`] - Loading settings from TOML, JSON, and the environment
//! - [`logging`] - Tracing-based logging integration
//! - [`value`] - The typed [`Value`] carried by cleaned data and model instances
//! - [`querydict`] - Submitted form data
//! - [`upload`] - Uploaded files
//! - [`utils`] - Utility types (`MultiValueDict`)

pub mod error;
pub mod logging;
pub mod querydict;
pub mod settings;
pub mod settings_loader;
pub mod upload;
pub mod utils;
pub mod value;

// Re-export the most commonly used types at the crate root.
pub use error::{FormsError, FormsResult, ValidationError};
pub use querydict::QueryDict;
pub use settings::{FormsSettings, SETTINGS};
pub use upload::{FileDict, UploadedFile};
pub use value::Value;
