//! The export settings and their validation rules.

use crate::error::ValidationError;
use crate::trigger::WebhookParams;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Trait for settings validation.
///
/// Validation runs before new settings replace the current ones; a failing
/// validation keeps the previous settings in place.
pub trait Validate {
    /// Validate the settings.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` describing every rule that failed.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Settings consumed by the capture pipeline and the trigger.
///
/// Every field has a default, so partial sources deserialize cleanly.
///
/// # Examples
///
/// ```rust
/// use config_auto_export::settings::{ExportSettings, Validate};
///
/// let settings = ExportSettings {
///     enabled: true,
///     directory: "/var/exports/config".into(),
///     webhook: "https://ci.example.com/hooks/export".into(),
///     webhook_params: "path: '[export directory]'".into(),
///     delay: 300,
///     ..Default::default()
/// };
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Master switch for capture.
    pub enabled: bool,
    /// Root of the export directory tree.
    pub directory: PathBuf,
    /// Endpoint notified after export; empty disables notification.
    pub webhook: String,
    /// YAML template of the form parameters sent to the webhook.
    pub webhook_params: String,
    /// Debounce window in seconds; zero notifies at the end of each unit of work.
    pub delay: u64,
    /// Anchor the due time to the first change instead of the latest one.
    pub delay_from_first: bool,
    /// Canonical configuration sync directory, substituted into the template.
    pub config_directory: PathBuf,
}

impl ExportSettings {
    /// Whether a webhook endpoint is configured.
    pub fn has_webhook(&self) -> bool {
        !self.webhook.trim().is_empty()
    }
}

impl Validate for ExportSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        if self.enabled && self.directory.as_os_str().is_empty() {
            errors.push(ValidationError::invalid_field(
                "directory",
                "is required when export is enabled",
            ));
        }

        if self.has_webhook() {
            match reqwest::Url::parse(self.webhook.trim()) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => errors.push(ValidationError::invalid_field(
                    "webhook",
                    format!("unsupported scheme '{}'", url.scheme()),
                )),
                Err(e) => errors.push(ValidationError::invalid_field("webhook", e.to_string())),
            }
        }

        if let Err(e) = WebhookParams::render(&self.webhook_params, "/export", "/config") {
            errors.push(ValidationError::invalid_field("webhook_params", e.to_string()));
        }

        ValidationError::from_list(errors)
    }
}
