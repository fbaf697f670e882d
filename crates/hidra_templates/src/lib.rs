//! # hidra_templates
//!
//! Template handling for Hidraulik.
//!
//! This crate loads CI/CD templates from a template source and turns them into
//! the files committed to a target project:
//!
//! - Placeholder classification into template-time and deploy-time variables
//! - Rendering that never writes a deploy-time value into a generated file
//! - Per-component selection and relocation of Kubernetes manifests
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::collections::BTreeSet;
//! use hidra_templates::{
//!     Bindings, DirectorySource, ManifestKind, ManifestRouter, ManifestSelection,
//!     TemplateLoader, TemplateRenderer, VariableClassifier,
//! };
//!
//! # async fn example() -> hidra_templates::TemplateResult<()> {
//! let source = DirectorySource::new("templates");
//! let set = TemplateLoader::new(&source).load_all().await?;
//!
//! let classification = VariableClassifier::new().classify(set.bodies());
//! let deploy_time: BTreeSet<String> = classification.deploy_time.into_iter().collect();
//!
//! let mut selection = ManifestSelection::new();
//! selection.select("api", [ManifestKind::Deployment, ManifestKind::Service]);
//!
//! let renderer = TemplateRenderer::new();
//! let output = ManifestRouter::new(&renderer, &selection)
//!     .render_set(&set, &Bindings::new(), &deploy_time);
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod renderer;
pub mod template;

pub use classifier::{
    is_deploy_time, Classification, VariableClassifier, DEPLOY_TIME_PREFIX, LOOP_INTERNAL_NAMES,
};
pub use error::{TemplateError, TemplateResult};
pub use loader::{DirectorySource, TemplateLoader, TemplateSource};
pub use manifest::{component_path, ManifestKind, ManifestRouter, ManifestSelection};
pub use renderer::{Bindings, RenderFallback, RenderOutput, TemplateRenderer};
pub use template::{Template, TemplateCategory, TemplateSet, INCLUDES_DIR, TEMPLATE_EXTENSION};
