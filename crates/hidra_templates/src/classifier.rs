//! Placeholder extraction and classification.
//!
//! Template text is scanned for interpolations (`{{ name }}`, `{{ name.attr }}`)
//! and block-tag introductions (`{% if name %}`, `{% for name in ... %}`). The
//! first identifier of each match is collected, engine-internal loop names are
//! dropped, and the rest is split by the deploy-time prefix.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Names carrying this prefix are supplied by the CI system at run time.
pub const DEPLOY_TIME_PREFIX: &str = "CICD_";

/// Loop-scope names structural to the template engine, never user-supplied.
pub const LOOP_INTERNAL_NAMES: &[&str] = &[
    "env", "component", "tag", "idx", "item", "key", "value", "index", "loop",
];

/// Whether a name belongs to the deploy-time class.
pub fn is_deploy_time(name: &str) -> bool {
    name.starts_with(DEPLOY_TIME_PREFIX)
}

/// Result of classifying a set of templates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Resolved to literal values before files are written (sorted)
    pub template_time: Vec<String>,
    /// Supplied by the CI system at execution time (sorted)
    pub deploy_time: Vec<String>,
}

impl Classification {
    pub fn is_empty(&self) -> bool {
        self.template_time.is_empty() && self.deploy_time.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.template_time.iter().any(|n| n == name) || self.deploy_time.iter().any(|n| n == name)
    }
}

/// Scans template bodies for placeholders.
pub struct VariableClassifier {
    interpolation: Regex,
    block_tag: Regex,
    remote_include: Regex,
    requires: Regex,
}

impl Default for VariableClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableClassifier {
    pub fn new() -> Self {
        Self {
            interpolation: Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)")
                .expect("interpolation pattern is valid"),
            block_tag: Regex::new(r"\{%\s+(?:if|elif|for|set)\s+([a-zA-Z_][a-zA-Z0-9_]*)")
                .expect("block tag pattern is valid"),
            remote_include: Regex::new(r#"file:\s*['"](/includes/[^'"]+)['"]"#)
                .expect("include pattern is valid"),
            requires: Regex::new(r"(?im)#\s*@requires?:\s*([A-Za-z0-9_, \t]*)$")
                .expect("requires pattern is valid"),
        }
    }

    /// Every identifier recognized by either pattern, before filtering.
    pub fn scan<'t>(&self, bodies: impl IntoIterator<Item = &'t str>) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for body in bodies {
            for pattern in [&self.interpolation, &self.block_tag] {
                for caps in pattern.captures_iter(body) {
                    names.insert(caps[1].to_string());
                }
            }
        }
        names
    }

    /// Partition the placeholders of the given bodies.
    pub fn classify<'t>(&self, bodies: impl IntoIterator<Item = &'t str>) -> Classification {
        let mut classification = Classification::default();

        // BTreeSet iteration keeps both lists sorted.
        for name in self.scan(bodies) {
            if LOOP_INTERNAL_NAMES.contains(&name.as_str()) {
                continue;
            }
            if is_deploy_time(&name) {
                classification.deploy_time.push(name);
            } else {
                classification.template_time.push(name);
            }
        }

        classification
    }

    /// Deploy-time names referenced by a single body.
    pub fn deploy_time_in(&self, body: &str) -> Vec<String> {
        self.classify([body]).deploy_time
    }

    /// Remote include paths (`file: '/includes/...'`) referenced by the bodies,
    /// returned without the leading `/`.
    pub fn remote_includes<'t>(&self, bodies: impl IntoIterator<Item = &'t str>) -> Vec<String> {
        let mut paths = BTreeSet::new();
        for body in bodies {
            for caps in self.remote_include.captures_iter(body) {
                paths.insert(caps[1].trim_start_matches('/').to_string());
            }
        }
        paths.into_iter().collect()
    }

    /// Variables declared by `# @requires: A, B` comments of an include file.
    pub fn required_by_include(&self, content: &str) -> Vec<String> {
        let mut names = BTreeSet::new();
        for caps in self.requires.captures_iter(content) {
            for name in caps[1].split(',') {
                let name = name.trim();
                if !name.is_empty() {
                    names.insert(name.to_string());
                }
            }
        }
        names.into_iter().collect()
    }
}
