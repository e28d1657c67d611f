//! Override Store
//!
//! The authoritative set of user overrides, laid out in the key/value medium
//! as:
//!
//! | key | value |
//! |---|---|
//! | `import-map-override:<module>` | URL |
//! | `import-map-override-scope:<scope>\|<module>` | URL |
//! | `import-map-overrides-disabled` | JSON array of composite keys |
//! | `import-map-overrides-external-maps` | JSON array of `{url, enabled}` |
//!
//! A composite key is `<module>` for a top-level override and
//! `<scope>|<module>` for a scoped one.
//!
//! Medium failures never reach callers: reads degrade to "nothing stored" and
//! writes are dropped, both with a warning.

use crate::config::ImoConfig;
use crate::errors::ImoError;
use crate::host::CookieJar;
use crate::storage::{KeyValueStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub const OVERRIDE_PREFIX: &str = "import-map-override:";
pub const SCOPE_OVERRIDE_PREFIX: &str = "import-map-override-scope:";
pub const DISABLED_KEY: &str = "import-map-overrides-disabled";
pub const EXTERNAL_MAPS_KEY: &str = "import-map-overrides-external-maps";

const SCOPE_SEPARATOR: char = '|';

/// One user-authored redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRecord {
    pub module_name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl OverrideRecord {
    /// Enabled top-level override
    pub fn new(module_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            url: url.into(),
            scope: None,
            enabled: true,
        }
    }

    /// Enabled override under `scope`
    pub fn scoped(
        scope: impl Into<String>,
        module_name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            scope: Some(scope.into()),
            ..Self::new(module_name, url)
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Composite key used by the disabled list
    pub fn disabled_key(&self) -> String {
        disabled_key(&self.module_name, self.scope.as_deref())
    }

    fn storage_key(&self) -> String {
        storage_key(&self.module_name, self.scope.as_deref())
    }
}

/// A URL pointing at an externally hosted import map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalMapReference {
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Stored form of an external reference. Older stores hold plain URL strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredExternalRef {
    Full(ExternalMapReference),
    Url(String),
}

impl From<StoredExternalRef> for ExternalMapReference {
    fn from(stored: StoredExternalRef) -> Self {
        match stored {
            StoredExternalRef::Full(reference) => reference,
            StoredExternalRef::Url(url) => Self { url, enabled: true },
        }
    }
}

/// `<module>` or `<scope>|<module>`
pub fn disabled_key(module_name: &str, scope: Option<&str>) -> String {
    match scope {
        Some(scope) => format!("{scope}{SCOPE_SEPARATOR}{module_name}"),
        None => module_name.to_string(),
    }
}

fn storage_key(module_name: &str, scope: Option<&str>) -> String {
    match scope {
        Some(scope) => format!("{SCOPE_OVERRIDE_PREFIX}{scope}{SCOPE_SEPARATOR}{module_name}"),
        None => format!("{OVERRIDE_PREFIX}{module_name}"),
    }
}

/// True when `url` is a bare port number.
pub fn is_port(url: &str) -> bool {
    !url.is_empty() && url.bytes().all(|b| b.is_ascii_digit())
}

/// Expand a bare port into a local development URL.
///
/// A per-port template wins, then the default template, then the
/// `//localhost:<port>/<name>.js` convention with `@` stripped and `/`
/// replaced by `-`.
pub fn url_from_port(config: &ImoConfig, module_name: &str, port: &str) -> String {
    if let Some(template) = config.port_templates.get(port) {
        return template.replace("{moduleName}", module_name);
    }
    if let Some(template) = &config.default_port_template {
        return template
            .replace("{port}", port)
            .replace("{moduleName}", module_name);
    }
    let file_name = module_name.replace('@', "").replace('/', "-");
    format!("//localhost:{port}/{file_name}.js")
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

pub struct OverrideStore {
    medium: Arc<dyn KeyValueStore>,
    cookies: Option<Arc<dyn CookieJar>>,
}

impl OverrideStore {
    pub fn new(medium: Arc<dyn KeyValueStore>) -> Self {
        Self {
            medium,
            cookies: None,
        }
    }

    /// Mirror every override write and removal into `cookies`.
    pub fn with_cookies(mut self, cookies: Arc<dyn CookieJar>) -> Self {
        self.cookies = Some(cookies);
        self
    }

    /// Every stored override. Disabled records are omitted unless
    /// `include_disabled`.
    pub fn get_all(&self, include_disabled: bool) -> Vec<OverrideRecord> {
        let disabled = self.disabled_keys();
        let mut records = Vec::new();

        for (key, url) in self.list(OVERRIDE_PREFIX) {
            let Some(module_name) = key.strip_prefix(OVERRIDE_PREFIX) else {
                continue;
            };
            records.push(OverrideRecord::new(module_name, url));
        }

        for (key, url) in self.list(SCOPE_OVERRIDE_PREFIX) {
            let Some(remainder) = key.strip_prefix(SCOPE_OVERRIDE_PREFIX) else {
                continue;
            };
            let Some((scope, module_name)) = remainder.rsplit_once(SCOPE_SEPARATOR) else {
                tracing::warn!(key = %key, "ignoring scoped override without a module name");
                continue;
            };
            records.push(OverrideRecord::scoped(scope, module_name, url));
        }

        records
            .into_iter()
            .map(|record| {
                let enabled = !disabled.contains(&record.disabled_key());
                record.with_enabled(enabled)
            })
            .filter(|record| include_disabled || record.enabled)
            .collect()
    }

    pub fn get(&self, module_name: &str, scope: Option<&str>) -> Option<OverrideRecord> {
        let key = storage_key(module_name, scope);
        let url = self.read(&key)?;
        let record = match scope {
            Some(scope) => OverrideRecord::scoped(scope, module_name, url),
            None => OverrideRecord::new(module_name, url),
        };
        let enabled = !self.is_disabled(module_name, scope);
        Some(record.with_enabled(enabled))
    }

    pub fn contains(&self, module_name: &str, scope: Option<&str>) -> bool {
        self.read(&storage_key(module_name, scope)).is_some()
    }

    /// Write `record`, overwriting any record with the same identity.
    pub fn upsert(&self, record: &OverrideRecord) {
        let key = record.storage_key();
        self.write(&key, &record.url);
        if let Some(cookies) = &self.cookies {
            cookies.set(&key, &record.url);
        }
        self.set_enabled(&record.module_name, record.scope.as_deref(), record.enabled);
    }

    /// Remove an override and its disabled flag. Returns whether it existed.
    pub fn remove(&self, module_name: &str, scope: Option<&str>) -> bool {
        let key = storage_key(module_name, scope);
        let existed = self.read(&key).is_some();
        self.delete(&key);
        if let Some(cookies) = &self.cookies {
            cookies.expire(&key);
        }
        self.set_enabled(module_name, scope, true);
        existed
    }

    /// Flip the disabled flag. Returns `false` when nothing changed.
    ///
    /// Works whether or not a record is stored, so overrides that only exist
    /// in the query parameter can be disabled too.
    pub fn set_enabled(&self, module_name: &str, scope: Option<&str>, enabled: bool) -> bool {
        let key = disabled_key(module_name, scope);
        let mut disabled = self.disabled_list();
        let position = disabled.iter().position(|existing| *existing == key);

        match (enabled, position) {
            (true, Some(index)) => {
                disabled.remove(index);
            }
            (false, None) => disabled.push(key),
            _ => return false,
        }

        if disabled.is_empty() {
            self.delete(DISABLED_KEY);
        } else {
            self.write_json(DISABLED_KEY, &disabled);
        }
        true
    }

    /// Composite keys of every disabled override.
    pub fn disabled_keys(&self) -> BTreeSet<String> {
        self.disabled_list().into_iter().collect()
    }

    pub fn is_disabled(&self, module_name: &str, scope: Option<&str>) -> bool {
        self.disabled_list()
            .contains(&disabled_key(module_name, scope))
    }

    /// Names of modules with an enabled top-level override.
    pub fn overridden_modules(&self) -> Vec<String> {
        self.get_all(false)
            .into_iter()
            .filter(|record| record.scope.is_none())
            .map(|record| record.module_name)
            .collect()
    }

    /// Scope -> names of modules with an enabled override in that scope.
    pub fn overridden_scopes(&self) -> BTreeMap<String, Vec<String>> {
        let mut scopes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for record in self.get_all(false) {
            if let Some(scope) = record.scope {
                scopes.entry(scope).or_default().push(record.module_name);
            }
        }
        scopes
    }

    /// Replace every override (and disabled flag) with `records`.
    /// External references are left alone.
    pub fn replace_all(&self, records: &[OverrideRecord]) {
        self.clear_overrides();
        for record in records {
            self.upsert(record);
        }
    }

    /// Remove every override, every external reference and every disabled
    /// flag.
    pub fn reset_all(&self) {
        self.clear_overrides();
        self.delete(EXTERNAL_MAPS_KEY);
    }

    fn clear_overrides(&self) {
        for record in self.get_all(true) {
            let key = record.storage_key();
            self.delete(&key);
            if let Some(cookies) = &self.cookies {
                cookies.expire(&key);
            }
        }
        self.delete(DISABLED_KEY);
    }

    // ── External references ─────────────────────────────────────────────────

    /// Stored external references, sorted by URL.
    pub fn external_refs(&self) -> Vec<ExternalMapReference> {
        let mut refs: Vec<ExternalMapReference> = self
            .read_json::<Vec<StoredExternalRef>>(EXTERNAL_MAPS_KEY)
            .unwrap_or_default()
            .into_iter()
            .map(ExternalMapReference::from)
            .collect();
        refs.sort_by(|a, b| a.url.cmp(&b.url));
        refs
    }

    /// Returns `false` if `url` is already referenced.
    pub fn add_external(&self, url: &str, enabled: bool) -> bool {
        let mut refs = self.external_refs();
        if refs.iter().any(|reference| reference.url == url) {
            return false;
        }
        refs.push(ExternalMapReference {
            url: url.to_string(),
            enabled,
        });
        self.write_json(EXTERNAL_MAPS_KEY, &refs);
        true
    }

    pub fn remove_external(&self, url: &str) -> bool {
        let mut refs = self.external_refs();
        let before = refs.len();
        refs.retain(|reference| reference.url != url);
        if refs.len() == before {
            return false;
        }
        self.write_json(EXTERNAL_MAPS_KEY, &refs);
        true
    }

    /// Returns `false` for unknown URLs and for no-op flips.
    pub fn set_external_enabled(&self, url: &str, enabled: bool) -> bool {
        let mut refs = self.external_refs();
        let Some(reference) = refs.iter_mut().find(|reference| reference.url == url) else {
            return false;
        };
        if reference.enabled == enabled {
            return false;
        }
        reference.enabled = enabled;
        self.write_json(EXTERNAL_MAPS_KEY, &refs);
        true
    }

    // ── Medium access ───────────────────────────────────────────────────────

    fn disabled_list(&self) -> Vec<String> {
        self.read_json(DISABLED_KEY).unwrap_or_default()
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.medium.get(key) {
            Ok(value) => value,
            Err(err) => {
                log_medium_error("read", key, err);
                None
            }
        }
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.read(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "ignoring malformed stored value");
                None
            }
        }
    }

    fn list(&self, prefix: &str) -> Vec<(String, String)> {
        self.medium.list_with_prefix(prefix).unwrap_or_else(|err| {
            log_medium_error("list", prefix, err);
            Vec::new()
        })
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(err) = self.medium.set(key, value) {
            log_medium_error("write", key, err);
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(json) => self.write(key, &json),
            Err(err) => tracing::warn!(key = %key, error = %err, "failed to encode stored value"),
        }
    }

    fn delete(&self, key: &str) {
        if let Err(err) = self.medium.remove(key) {
            log_medium_error("remove", key, err);
        }
    }
}

fn log_medium_error(operation: &str, key: &str, err: StorageError) {
    let cause = err.to_string();
    let err = ImoError::storage_with_source(format!("{operation} {key}"), err);
    tracing::warn!(
        category = err.category().as_str(),
        error = %err,
        cause = %cause,
        "override storage unavailable; continuing without it"
    );
}
