//! Webhook notification fired once an export has settled.
//!
//! The request body is built from the `webhook_params` YAML template after
//! substituting two path tokens:
//!
//! - `[export directory]`: resolved absolute path of the export directory
//! - `[config directory]`: resolved absolute path of the config sync directory
//!
//! The resulting mapping is sent form-encoded; nested keys become `a[b]` and
//! sequence items `a[0]`.

use crate::error::{ExportError, Result};
use crate::settings::ExportSettings;
use reqwest::Client;
use serde_yaml::Value;
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Token replaced by the resolved export directory.
pub const EXPORT_DIRECTORY_TOKEN: &str = "[export directory]";

/// Token replaced by the resolved config sync directory.
pub const CONFIG_DIRECTORY_TOKEN: &str = "[config directory]";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Reasons a parameter template cannot be rendered.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The substituted template is not valid YAML.
    #[error("Parameter template is not valid YAML: {0}")]
    Yaml(String),

    /// The template's top level is not a mapping.
    #[error("Parameter template must be a mapping of parameter names to values")]
    NotAMapping,
}

/// Form parameters rendered from a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookParams {
    pairs: Vec<(String, String)>,
}

impl WebhookParams {
    /// Substitute the path tokens into `template` and flatten the result.
    ///
    /// An empty template renders no parameters.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] if the substituted template is not a YAML
    /// mapping.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use config_auto_export::trigger::WebhookParams;
    ///
    /// let params = WebhookParams::render(
    ///     "job: export\nargs:\n  source: '[export directory]'\n",
    ///     "/srv/export",
    ///     "/srv/config",
    /// )?;
    /// assert_eq!(
    ///     params.pairs(),
    ///     &[
    ///         ("job".to_string(), "export".to_string()),
    ///         ("args[source]".to_string(), "/srv/export".to_string()),
    ///     ]
    /// );
    /// # Ok::<(), config_auto_export::trigger::TemplateError>(())
    /// ```
    pub fn render(
        template: &str,
        export_path: &str,
        config_path: &str,
    ) -> std::result::Result<Self, TemplateError> {
        let substituted = template
            .replace(EXPORT_DIRECTORY_TOKEN, export_path)
            .replace(CONFIG_DIRECTORY_TOKEN, config_path);

        let value: Value =
            serde_yaml::from_str(&substituted).map_err(|e| TemplateError::Yaml(e.to_string()))?;

        let mut pairs = Vec::new();
        match value {
            Value::Null => {}
            Value::Mapping(map) => {
                for (key, value) in &map {
                    if let Some(key) = scalar_to_string(key) {
                        flatten(key, value, &mut pairs);
                    }
                }
            }
            _ => return Err(TemplateError::NotAMapping),
        }

        Ok(Self { pairs })
    }

    /// Flattened `(name, value)` pairs in template order.
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Whether no parameters were rendered.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

fn flatten(name: String, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                if let Some(key) = scalar_to_string(key) {
                    flatten(format!("{name}[{key}]"), child, out);
                }
            }
        }
        Value::Sequence(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten(format!("{name}[{index}]"), child, out);
            }
        }
        Value::Tagged(tagged) => flatten(name, &tagged.value, out),
        scalar => {
            if let Some(text) = scalar_to_string(scalar) {
                out.push((name, text));
            }
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some("0".to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

/// Resolve `path` to an absolute path, or an empty string if it does not exist.
fn resolve_path(path: &Path) -> String {
    if path.as_os_str().is_empty() {
        return String::new();
    }
    match path.canonicalize() {
        Ok(resolved) => resolved.display().to_string(),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Unable to resolve path for webhook parameters");
            String::new()
        }
    }
}

/// What happened when the trigger ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// No webhook is configured.
    Skipped,
    /// The webhook accepted the notification with this status code.
    Delivered(u16),
    /// The request failed or the webhook answered with an error status.
    Failed,
    /// The parameter template could not be rendered; nothing was sent.
    InvalidTemplate,
}

/// Sends the export notification.
///
/// Delivery failures are logged at critical severity and never returned to
/// the caller; there is no retry.
///
/// The request runs on a short-lived thread with its own current-thread
/// runtime, so [`trigger_export`](Self::trigger_export) blocks the caller
/// but may be called, and the trigger dropped, from any context including
/// tokio worker threads.
pub struct ExportTrigger {
    client: Client,
}

impl ExportTrigger {
    /// Create a trigger with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a trigger with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        // Every delivery runs on a fresh runtime; pooled connections would
        // outlive the runtime that drives them.
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| ExportError::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Notify the configured webhook and wait for the outcome.
    pub fn trigger_export(&self, settings: &ExportSettings) -> TriggerOutcome {
        if !settings.has_webhook() {
            return TriggerOutcome::Skipped;
        }
        let webhook = settings.webhook.trim();

        let params = match WebhookParams::render(
            &settings.webhook_params,
            &resolve_path(&settings.directory),
            &resolve_path(&settings.config_directory),
        ) {
            Ok(params) => params,
            Err(e) => {
                tracing::error!(webhook = %webhook, error = %e, "Trigger for config auto export skipped");
                return TriggerOutcome::InvalidTemplate;
            }
        };

        let delivery = thread::scope(|scope| {
            scope
                .spawn(|| self.deliver_on_own_runtime(webhook, &params))
                .join()
        });
        delivery.unwrap_or_else(|_| {
            tracing::error!(severity = "critical", webhook = %webhook, "Webhook delivery thread panicked");
            TriggerOutcome::Failed
        })
    }

    fn deliver_on_own_runtime(&self, webhook: &str, params: &WebhookParams) -> TriggerOutcome {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(
                    severity = "critical",
                    webhook = %webhook,
                    error = %e,
                    "Unable to start runtime for config auto export trigger"
                );
                return TriggerOutcome::Failed;
            }
        };
        runtime.block_on(self.deliver(webhook, params))
    }

    async fn deliver(&self, webhook: &str, params: &WebhookParams) -> TriggerOutcome {
        let response = self
            .client
            .post(webhook)
            .form(params.pairs())
            .send()
            .await
            .and_then(|response| response.error_for_status());

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::info!(webhook = %webhook, status, "Triggered config auto export");
                TriggerOutcome::Delivered(status)
            }
            Err(e) => {
                tracing::error!(
                    severity = "critical",
                    webhook = %webhook,
                    error = %e,
                    "Trigger for config auto export failed"
                );
                TriggerOutcome::Failed
            }
        }
    }
}
