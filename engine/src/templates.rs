//! Named snapshots of the override set.
//!
//! Templates are persisted as one JSON array under
//! [`TEMPLATES_KEY`]. Every snapshot is an owned copy: mutating live
//! overrides never touches a saved template and vice versa.

use crate::overrides::OverrideRecord;
use crate::storage::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

pub const TEMPLATES_KEY: &str = "importmap-manager-templates";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub items: Vec<OverrideRecord>,
}

pub struct TemplateManager {
    medium: Arc<dyn KeyValueStore>,
}

impl TemplateManager {
    pub fn new(medium: Arc<dyn KeyValueStore>) -> Self {
        Self { medium }
    }

    /// Saved templates in save order. Unreadable storage yields none.
    pub fn templates(&self) -> Vec<Template> {
        let raw = match self.medium.get(TEMPLATES_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::warn!(error = %err, "template storage unavailable");
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "ignoring malformed template list");
            Vec::new()
        })
    }

    pub fn get(&self, name: &str) -> Option<Template> {
        self.templates()
            .into_iter()
            .find(|template| template.name == name)
    }

    /// Save `items` as a new template. Names are trimmed; empty names and
    /// names already taken are rejected.
    pub fn save(&self, name: &str, items: &[OverrideRecord]) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let mut templates = self.templates();
        if templates.iter().any(|template| template.name == name) {
            tracing::debug!(name, "template name already taken");
            return false;
        }
        templates.push(Template {
            name: name.to_string(),
            items: items.to_vec(),
        });
        self.persist(&templates)
    }

    /// Remove `name` if present.
    pub fn delete(&self, name: &str) {
        let mut templates = self.templates();
        let before = templates.len();
        templates.retain(|template| template.name != name);
        if templates.len() != before {
            self.persist(&templates);
        }
    }

    /// First template whose items equal `live` as a set.
    pub fn active_name(&self, live: &[OverrideRecord]) -> Option<String> {
        self.templates()
            .into_iter()
            .find(|template| lists_equal(&template.items, live))
            .map(|template| template.name)
    }

    fn persist(&self, templates: &[Template]) -> bool {
        let json = match serde_json::to_string(templates) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode templates");
                return false;
            }
        };
        match self.medium.set(TEMPLATES_KEY, &json) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "failed to persist templates");
                false
            }
        }
    }
}

fn by_identity(a: &OverrideRecord, b: &OverrideRecord) -> Ordering {
    a.module_name
        .cmp(&b.module_name)
        .then_with(|| a.scope.cmp(&b.scope))
}

/// Order-independent equality: same length, and pairwise field equality
/// once both sides are sorted by module name then scope.
pub fn lists_equal(a: &[OverrideRecord], b: &[OverrideRecord]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by(by_identity);
    b.sort_by(by_identity);
    a.iter().zip(&b).all(|(x, y)| {
        x.module_name == y.module_name
            && x.url == y.url
            && x.enabled == y.enabled
            && x.scope == y.scope
    })
}
