//! Template rendering.
//!
//! Rendering never sees the value of a deploy-time variable: every deploy-time
//! name (and every key carrying the deploy-time prefix) is removed from the
//! binding and re-bound to the empty string before the engine runs.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tera::{Context, Tera};
use tracing::{debug, warn};

use crate::classifier::{is_deploy_time, VariableClassifier};
use crate::error::{TemplateError, TemplateResult};
use crate::template::Template;

/// Template-time values, by variable name.
pub type Bindings = BTreeMap<String, Value>;

/// A template whose original text was kept because rendering failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderFallback {
    pub path: String,
    pub message: String,
}

/// Rendered files plus the templates that fell back to their raw text.
#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    /// Destination path -> rendered content
    pub files: BTreeMap<String, String>,
    pub fallbacks: Vec<RenderFallback>,
}

impl RenderOutput {
    /// Merge another output into this one.
    pub fn extend(&mut self, other: RenderOutput) {
        self.files.extend(other.files);
        self.fallbacks.extend(other.fallbacks);
    }
}

/// Renders templates against a partial binding.
pub struct TemplateRenderer {
    classifier: VariableClassifier,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            classifier: VariableClassifier::new(),
        }
    }

    /// Build the engine context for one body.
    fn leak_free_context(
        &self,
        body: &str,
        binding: &Bindings,
        deploy_time: &BTreeSet<String>,
    ) -> Context {
        let mut context = Context::new();
        for (name, value) in binding {
            if deploy_time.contains(name) || is_deploy_time(name) {
                continue;
            }
            context.insert(name.as_str(), value);
        }

        let referenced = self.classifier.deploy_time_in(body);
        for name in deploy_time.iter().chain(referenced.iter()) {
            context.insert(name.as_str(), "");
        }
        context
    }

    /// Render a single body, reporting engine errors.
    pub fn render_str(
        &self,
        path: &str,
        body: &str,
        binding: &Bindings,
        deploy_time: &BTreeSet<String>,
    ) -> TemplateResult<String> {
        let context = self.leak_free_context(body, binding, deploy_time);
        Tera::one_off(body, &context, false).map_err(|e| TemplateError::RenderingFailed {
            path: path.to_string(),
            message: error_chain(&e),
        })
    }

    /// Render one body, keeping the original text when rendering fails.
    pub fn render_or_original(
        &self,
        path: &str,
        body: &str,
        binding: &Bindings,
        deploy_time: &BTreeSet<String>,
    ) -> (String, Option<RenderFallback>) {
        match self.render_str(path, body, binding, deploy_time) {
            Ok(rendered) => {
                debug!("Rendered: {}", path);
                (rendered, None)
            }
            Err(e) => {
                warn!("{}; keeping the original template text", e);
                let fallback = RenderFallback {
                    path: path.to_string(),
                    message: e.to_string(),
                };
                (body.to_string(), Some(fallback))
            }
        }
    }

    /// Render templates at their destination paths. A failing template keeps
    /// its original text and the others are still rendered.
    pub fn render<'t>(
        &self,
        templates: impl IntoIterator<Item = &'t Template>,
        binding: &Bindings,
        deploy_time: &BTreeSet<String>,
    ) -> RenderOutput {
        let mut output = RenderOutput::default();
        for template in templates {
            let (content, fallback) =
                self.render_or_original(&template.dest_path, &template.body, binding, deploy_time);
            output.files.insert(template.dest_path.clone(), content);
            output.fallbacks.extend(fallback);
        }
        output
    }
}

/// Flatten an error and its sources into one line.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
