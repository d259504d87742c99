//! Logging integration for the betterforms crates.
//!
//! Provides helpers for configuring [`tracing`]-based logging from
//! [`FormsSettings`](crate::settings::FormsSettings) and for creating spans
//! that group the events of one multi-form.

use crate::settings::FormsSettings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The log level is read from `settings.log_level`. In debug mode a pretty,
/// human-readable format is used; otherwise a structured JSON format is used.
/// Installing a subscriber when one already exists is a no-op.
pub fn setup_logging(settings: &FormsSettings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for one multi-form instance.
///
/// # Examples
///
/// ```
/// use betterforms_core::logging::multiform_span;
///
/// let span = multiform_span("UserProfileForm");
/// let _guard = span.enter();
/// tracing::debug!("validating");
/// ```
pub fn multiform_span(name: &str) -> tracing::Span {
    tracing::debug_span!("multiform", form = name)
}
