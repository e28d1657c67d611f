//! Import map value type and the pure operations over it
//!
//! Every function here returns a fresh map and never mutates its inputs, so
//! callers can layer maps freely (default map, external maps, overrides).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Module specifier -> URL
pub type ModuleMap = BTreeMap<String, String>;

/// Scope prefix -> module map
pub type ScopeMap = BTreeMap<String, ModuleMap>;

/// An import map: top-level `imports` plus per-scope `scopes`.
///
/// Both fields are always present once parsed; a missing key in the JSON
/// source is normalized to an empty mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMap {
    #[serde(default)]
    pub imports: ModuleMap,
    #[serde(default)]
    pub scopes: ScopeMap,
}

impl ImportMap {
    /// `{ "imports": {}, "scopes": {} }`
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse an import map from JSON text.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// True when there are no imports and every scope is empty.
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.scopes.values().all(BTreeMap::is_empty)
    }

    /// Pretty JSON, as injected into a script element.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Resolve `url` against `base_url`.
///
/// Best effort: if either side is malformed the input is returned unchanged.
pub fn expand_url(url: &str, base_url: &str) -> String {
    match Url::parse(base_url).and_then(|base| base.join(url)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => url.to_string(),
    }
}

fn expand_modules(modules: &ModuleMap, base_url: &str) -> ModuleMap {
    modules
        .iter()
        .map(|(name, url)| (name.clone(), expand_url(url, base_url)))
        .collect()
}

/// Apply [`expand_url`] to every import and every scoped entry.
pub fn expand_map(map: &ImportMap, base_url: &str) -> ImportMap {
    ImportMap {
        imports: expand_modules(&map.imports, base_url),
        scopes: map
            .scopes
            .iter()
            .map(|(scope, modules)| (scope.clone(), expand_modules(modules, base_url)))
            .collect(),
    }
}

/// Layer `overlay` on top of `base`.
///
/// Imports: overlay wins per key. Scopes: a scope present in the overlay
/// replaces the base scope wholesale.
pub fn merge(base: &ImportMap, overlay: &ImportMap) -> ImportMap {
    let mut out = base.clone();
    for (name, url) in &overlay.imports {
        out.imports.insert(name.clone(), url.clone());
    }
    for (scope, modules) in &overlay.scopes {
        out.scopes.insert(scope.clone(), modules.clone());
    }
    out
}

/// Like [`merge`], but scopes present in both maps are merged key by key.
pub fn merge_deep(base: &ImportMap, overlay: &ImportMap) -> ImportMap {
    let mut out = base.clone();
    for (name, url) in &overlay.imports {
        out.imports.insert(name.clone(), url.clone());
    }
    for (scope, modules) in &overlay.scopes {
        let target = out.scopes.entry(scope.clone()).or_default();
        for (name, url) in modules {
            target.insert(name.clone(), url.clone());
        }
    }
    out
}

/// Find the scope that applies to `module_name`'s resolved URL.
///
/// Returns the first scope (in key order) whose prefix is contained anywhere
/// in the URL. This is substring containment, not a URL-prefix check:
/// `http://x.com/` also matches `http://evilx.com/...`. Callers rely on it.
pub fn match_scope(module_name: &str, imports: &ModuleMap, scopes: &ScopeMap) -> Option<String> {
    let url = imports.get(module_name)?;
    scopes
        .keys()
        .find(|scope| url.contains(scope.as_str()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn map(imports: &[(&str, &str)], scopes: &[(&str, &[(&str, &str)])]) -> ImportMap {
        ImportMap {
            imports: imports
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            scopes: scopes
                .iter()
                .map(|(scope, modules)| {
                    (
                        scope.to_string(),
                        modules
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn test_parse_normalizes_missing_scopes() {
        let parsed = ImportMap::parse(r#"{"imports":{"a":"/a.js"}}"#).expect("parse");
        assert_eq!(parsed, map(&[("a", "/a.js")], &[]));
        assert!(ImportMap::parse("{}").expect("parse").is_empty());
    }

    #[test]
    fn test_parse_rejects_non_string_urls() {
        assert!(ImportMap::parse(r#"{"imports":{"a":1}}"#).is_err());
    }

    #[test]
    fn test_is_empty_ignores_empty_scopes() {
        let m = map(&[], &[("/app/", &[])]);
        assert!(m.is_empty());
        let m = map(&[], &[("/app/", &[("a", "/a.js")])]);
        assert!(!m.is_empty());
    }

    #[test]
    fn test_expand_url_relative() {
        assert_eq!(
            expand_url("./a.js", "https://cdn.example.com/maps/importmap.json"),
            "https://cdn.example.com/maps/a.js"
        );
        assert_eq!(
            expand_url("//localhost:3000/a.js", "https://cdn.example.com/x.json"),
            "https://localhost:3000/a.js"
        );
    }

    #[test]
    fn test_expand_url_malformed_returns_input() {
        assert_eq!(expand_url("./a.js", "not a url"), "./a.js");
        assert_eq!(expand_url("http://[bad", "https://cdn/x.json"), "http://[bad");
    }

    #[test]
    fn test_expand_map_touches_scopes() {
        let m = map(&[("a", "a.js")], &[("/s/", &[("b", "../b.js")])]);
        let expanded = expand_map(&m, "https://cdn/maps/map.json");
        assert_eq!(
            expanded,
            map(
                &[("a", "https://cdn/maps/a.js")],
                &[("/s/", &[("b", "https://cdn/b.js")])]
            )
        );
    }

    #[test]
    fn test_merge_overlay_wins_on_collision() {
        let base = map(&[("a", "1"), ("b", "2")], &[]);
        let overlay = map(&[("b", "3"), ("c", "4")], &[]);
        let merged = merge(&base, &overlay);
        for (k, v) in &overlay.imports {
            assert_eq!(merged.imports.get(k), Some(v));
        }
        assert_eq!(merged.imports.get("a"), Some(&"1".to_string()));
        // Inputs untouched
        assert_eq!(base.imports.len(), 2);
    }

    #[test]
    fn test_merge_replaces_whole_scope() {
        let base = map(&[], &[("/s/", &[("a", "1"), ("b", "2")])]);
        let overlay = map(&[], &[("/s/", &[("b", "3")])]);
        assert_eq!(merge(&base, &overlay), map(&[], &[("/s/", &[("b", "3")])]));
    }

    #[test]
    fn test_merge_deep_merges_scope_keys() {
        let base = map(&[], &[("/s/", &[("a", "1"), ("b", "2")])]);
        let overlay = map(&[], &[("/s/", &[("b", "3")])]);
        assert_eq!(
            merge_deep(&base, &overlay),
            map(&[], &[("/s/", &[("a", "1"), ("b", "3")])])
        );
    }

    #[test]
    fn test_match_scope_is_substring_containment() {
        let imports = map(&[("a", "http://evilx.com/a.js"), ("b", "/b.js")], &[]).imports;
        let scopes = map(&[], &[("x.com/", &[]), ("/other/", &[])]).scopes;
        assert_eq!(match_scope("a", &imports, &scopes), Some("x.com/".to_string()));
        assert_eq!(match_scope("b", &imports, &scopes), None);
        assert_eq!(match_scope("missing", &imports, &scopes), None);
    }

    #[test]
    fn test_match_scope_first_in_key_order() {
        let imports = map(&[("a", "https://cdn/app/v1/a.js")], &[]).imports;
        let scopes = map(&[], &[("/v1/", &[]), ("/app/", &[])]).scopes;
        assert_eq!(match_scope("a", &imports, &scopes), Some("/app/".to_string()));
    }
}
