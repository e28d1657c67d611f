//! Resolution Engine
//!
//! [`OverrideEngine`] ties the Override Store, the External Map Source and
//! the Template Manager together. It answers "what is the effective import
//! map", applies mutations, injects maps into the host page and broadcasts
//! change events.

use crate::config::ImoConfig;
use crate::domain_guard::{self, DisabledReason};
use crate::errors::{ImoError, Result};
use crate::events::{ChangeBus, EngineEvent};
use crate::external::{ExternalMapSource, parse_inline};
use crate::host::{Host, MapSourceBody, PageContext, ScriptContent, ScriptSink};
use crate::import_map::{ImportMap, expand_url, match_scope, merge, merge_deep};
use crate::overrides::{
    ExternalMapReference, OverrideRecord, OverrideStore, disabled_key, is_port, url_from_port,
};
use crate::templates::{Template, TemplateManager};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use url::Url;

/// Id of the injected override map script
pub const OVERRIDE_SCRIPT_ID: &str = "import-map-overrides";

/// Prefix of injected external map script ids
pub const EXTERNAL_SCRIPT_ID_PREFIX: &str = "import-map-overrides-external-";

/// Outcome of [`OverrideEngine::create`]. Decided once; never re-evaluated.
pub enum Startup {
    Active(OverrideEngine),
    Disabled(DisabledReason),
}

impl Startup {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    pub fn into_active(self) -> Option<OverrideEngine> {
        match self {
            Self::Active(engine) => Some(engine),
            Self::Disabled(_) => None,
        }
    }
}

/// One row of the derived module view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleEntry {
    pub module_name: String,
    /// Effective URL: the override when one is enabled, else the default
    pub url: String,
    pub is_overridden: bool,
    pub scope: Option<String>,
}

pub struct OverrideEngine {
    config: ImoConfig,
    page: PageContext,
    store: OverrideStore,
    templates: TemplateManager,
    external: ExternalMapSource,
    sink: Arc<dyn ScriptSink>,
    bus: ChangeBus,
    /// Override map at startup; what `mount` injects
    initial_override_map: ImportMap,
    /// Override map as last handed to callers by this engine
    applied_override_map: Mutex<ImportMap>,
    initial_external_urls: Vec<String>,
    injected_ids: Mutex<Vec<String>>,
}

impl OverrideEngine {
    /// Run the startup gate and, when it passes, capture the initial
    /// override map and external references.
    ///
    /// Fails only when the query-parameter override map is malformed.
    pub fn create(config: ImoConfig, host: Host) -> Result<Startup> {
        let Host {
            page,
            store: medium,
            fetcher,
            sink,
            cookies,
        } = host;

        if let Some(reason) = domain_guard::evaluate(
            config.domain_restriction.as_deref(),
            &page.hostname,
            medium.as_ref(),
        ) {
            tracing::warn!(
                hostname = %page.hostname,
                reason = %reason,
                "import map overrides disabled"
            );
            return Ok(Startup::Disabled(reason));
        }

        let mut store = OverrideStore::new(medium.clone());
        if config.server_cookie {
            match cookies {
                Some(cookies) => store = store.with_cookies(cookies),
                None => tracing::warn!("server_cookie is set but the host has no cookie jar"),
            }
        }

        let mut engine = Self {
            store,
            templates: TemplateManager::new(medium),
            external: ExternalMapSource::new(fetcher),
            sink,
            bus: ChangeBus::new(),
            initial_override_map: ImportMap::empty(),
            applied_override_map: Mutex::new(ImportMap::empty()),
            initial_external_urls: Vec::new(),
            injected_ids: Mutex::new(Vec::new()),
            config,
            page,
        };
        engine.initial_override_map = engine.refresh_applied()?;
        engine.initial_external_urls = engine.enabled_external_urls();

        tracing::info!(
            hostname = %engine.page.hostname,
            overrides = engine.initial_override_map.imports.len(),
            external_maps = engine.initial_external_urls.len(),
            "import map overrides active"
        );
        Ok(Startup::Active(engine))
    }

    /// Remove everything this engine injected and close the change bus.
    pub fn dispose(self) {
        let removed = self.unmount();
        tracing::debug!(removed, "engine disposed");
    }

    pub fn config(&self) -> &ImoConfig {
        &self.config
    }

    /// Script type the host should use for injected maps.
    pub fn import_map_type(&self) -> &str {
        &self.config.import_map_type
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Maps
    // ─────────────────────────────────────────────────────────────────────────────

    /// Override-only map: stored records, then the query-parameter map
    /// layered on top. Disabled overrides are left out unless
    /// `include_disabled`.
    pub fn override_map(&self, include_disabled: bool) -> Result<ImportMap> {
        let mut map = ImportMap::empty();
        for record in self.store.get_all(include_disabled) {
            match record.scope {
                Some(scope) => {
                    map.scopes
                        .entry(scope)
                        .or_default()
                        .insert(record.module_name, record.url);
                }
                None => {
                    map.imports.insert(record.module_name, record.url);
                }
            }
        }

        let Some(query_map) = self.query_param_map()? else {
            return Ok(map);
        };
        let disabled = if include_disabled {
            BTreeSet::new()
        } else {
            self.store.disabled_keys()
        };
        Ok(merge_deep(&map, &without_disabled(query_map, &disabled)))
    }

    /// Map in effect on the current page: default map, the external maps
    /// referenced at startup, then the override map this engine last
    /// applied. Writes to the medium made elsewhere are not seen here.
    pub async fn current_page_map(&self) -> Result<ImportMap> {
        let default_map = self.default_map().await?;
        let external = self.external.external_map(&self.initial_external_urls).await;
        let applied = self
            .applied_override_map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(merge(&merge(&default_map, &external), &applied))
    }

    /// Map the next page load will see, recomputed from the medium and the
    /// current external references.
    pub async fn next_page_map(&self) -> Result<ImportMap> {
        let default_map = self.default_map().await?;
        let external = self.external.external_map(&self.enabled_external_urls()).await;
        let overrides = self.override_map(false)?;
        Ok(merge(&merge(&default_map, &external), &overrides))
    }

    pub async fn default_map(&self) -> Result<ImportMap> {
        self.external
            .default_map(&self.page, &self.config.import_map_type)
            .await
    }

    /// True iff the enabled override map has an import or a non-empty scope.
    pub fn has_overrides(&self) -> Result<bool> {
        Ok(!self.override_map(false)?.is_empty())
    }

    fn query_param_map(&self) -> Result<Option<ImportMap>> {
        let name = self.config.query_param.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let Some(source) = self.page.query_source() else {
            return Ok(None);
        };
        let Ok(url) = Url::parse(source) else {
            tracing::debug!(url = %source, "page URL is not absolute; skipping query overrides");
            return Ok(None);
        };
        let Some(value) = url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
        else {
            return Ok(None);
        };
        if value.is_empty() {
            return Ok(None);
        }
        ImportMap::parse(&value)
            .map(Some)
            .map_err(|source| ImoError::InvalidQueryParam { source })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Override mutations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Bare port numbers are expanded with [`Self::url_from_port`].
    pub fn add_override(&self, module_name: &str, url: &str) -> Result<ImportMap> {
        let url = self.expand_port(module_name, url);
        self.store.upsert(&OverrideRecord::new(module_name, url.as_str()));
        tracing::debug!(module = %module_name, url = %url, "override added");
        self.changed()
    }

    pub fn add_scope_override(&self, scope: &str, module_name: &str, url: &str) -> Result<ImportMap> {
        let url = self.expand_port(module_name, url);
        self.store
            .upsert(&OverrideRecord::scoped(scope, module_name, url.as_str()));
        tracing::debug!(scope = %scope, module = %module_name, url = %url, "scope override added");
        self.changed()
    }

    pub fn remove_override(&self, module_name: &str) -> Result<ImportMap> {
        self.remove(module_name, None)
    }

    pub fn remove_scope_override(&self, scope: &str, module_name: &str) -> Result<ImportMap> {
        self.remove(module_name, Some(scope))
    }

    pub fn enable_override(&self, module_name: &str) -> Result<ImportMap> {
        self.set_enabled(module_name, None, true)
    }

    pub fn disable_override(&self, module_name: &str) -> Result<ImportMap> {
        self.set_enabled(module_name, None, false)
    }

    pub fn enable_scope_override(&self, scope: &str, module_name: &str) -> Result<ImportMap> {
        self.set_enabled(module_name, Some(scope), true)
    }

    pub fn disable_scope_override(&self, scope: &str, module_name: &str) -> Result<ImportMap> {
        self.set_enabled(module_name, Some(scope), false)
    }

    /// Drop every override, external reference and disabled flag, with a
    /// single change event.
    pub fn reset_overrides(&self) {
        self.store.reset_all();
        tracing::debug!("overrides reset");
        self.refresh_applied_quietly();
        self.bus.notify_change();
    }

    fn remove(&self, module_name: &str, scope: Option<&str>) -> Result<ImportMap> {
        if self.store.remove(module_name, scope) {
            tracing::debug!(module = %module_name, scope = ?scope, "override removed");
        }
        self.changed()
    }

    fn set_enabled(&self, module_name: &str, scope: Option<&str>, enabled: bool) -> Result<ImportMap> {
        if self.store.set_enabled(module_name, scope, enabled) {
            tracing::debug!(module = %module_name, scope = ?scope, enabled, "override toggled");
            self.changed()
        } else {
            self.refresh_applied()
        }
    }

    fn changed(&self) -> Result<ImportMap> {
        let map = self.refresh_applied();
        self.bus.notify_change();
        map
    }

    /// Recompute the override map and record it as applied.
    fn refresh_applied(&self) -> Result<ImportMap> {
        let map = self.override_map(false)?;
        *self
            .applied_override_map
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = map.clone();
        Ok(map)
    }

    fn refresh_applied_quietly(&self) {
        if let Err(err) = self.refresh_applied() {
            tracing::warn!(error = %err, "override map not refreshed");
        }
    }

    fn expand_port(&self, module_name: &str, url: &str) -> String {
        if is_port(url) {
            self.url_from_port(module_name, url)
        } else {
            url.to_string()
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // External map references
    // ─────────────────────────────────────────────────────────────────────────────

    /// Reference an external map. Relative URLs resolve against the page
    /// base URL.
    pub fn add_external_override(&self, url: &str) -> Result<ImportMap> {
        let url = self.resolve_external_url(url);
        if self.store.add_external(&url, true) {
            tracing::debug!(url = %url, "external override added");
        }
        self.changed()
    }

    pub fn remove_external_override(&self, url: &str) -> Result<ImportMap> {
        let url = self.resolve_external_url(url);
        if self.store.remove_external(&url) {
            tracing::debug!(url = %url, "external override removed");
        }
        self.changed()
    }

    pub fn enable_external_override(&self, url: &str) -> Result<ImportMap> {
        self.set_external_enabled(url, true)
    }

    pub fn disable_external_override(&self, url: &str) -> Result<ImportMap> {
        self.set_external_enabled(url, false)
    }

    fn set_external_enabled(&self, url: &str, enabled: bool) -> Result<ImportMap> {
        let url = self.resolve_external_url(url);
        if self.store.set_external_enabled(&url, enabled) {
            tracing::debug!(url = %url, enabled, "external override toggled");
            self.bus.notify_change();
        }
        self.refresh_applied()
    }

    fn resolve_external_url(&self, url: &str) -> String {
        match &self.page.base_url {
            Some(base) => expand_url(url, base),
            None => url.to_string(),
        }
    }

    fn enabled_external_urls(&self) -> Vec<String> {
        self.store
            .external_refs()
            .into_iter()
            .filter(|reference| reference.enabled)
            .map(|reference| reference.url)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn has_override(&self, module_name: &str) -> bool {
        self.store.contains(module_name, None)
    }

    pub fn has_scope_override(&self, scope: &str, module_name: &str) -> bool {
        self.store.contains(module_name, Some(scope))
    }

    pub fn is_disabled(&self, module_name: &str) -> bool {
        self.store.is_disabled(module_name, None)
    }

    pub fn is_scope_disabled(&self, scope: &str, module_name: &str) -> bool {
        self.store.is_disabled(module_name, Some(scope))
    }

    /// Composite keys (`module` or `scope|module`) of disabled overrides.
    pub fn disabled_overrides(&self) -> Vec<String> {
        self.store.disabled_keys().into_iter().collect()
    }

    /// Every stored override, disabled ones included.
    pub fn overrides(&self) -> Vec<OverrideRecord> {
        self.store.get_all(true)
    }

    pub fn overridden_modules(&self) -> Vec<String> {
        self.store.overridden_modules()
    }

    pub fn overridden_scopes(&self) -> BTreeMap<String, Vec<String>> {
        self.store.overridden_scopes()
    }

    pub fn external_overrides(&self) -> Vec<ExternalMapReference> {
        self.store.external_refs()
    }

    pub fn invalid_external_maps(&self) -> Vec<String> {
        self.external.invalid_maps()
    }

    pub async fn is_external_map_valid(&self, url: &str) -> bool {
        let url = self.resolve_external_url(url);
        self.external.is_map_valid(&url).await
    }

    pub fn url_from_port(&self, module_name: &str, port: &str) -> String {
        url_from_port(&self.config, module_name, port)
    }

    /// Default-map modules joined with top-level overrides, overridden rows
    /// first.
    pub async fn module_view(&self) -> Result<Vec<ModuleEntry>> {
        let default_map = self.default_map().await?;
        let external = self.external.external_map(&self.enabled_external_urls()).await;
        let base = merge(&default_map, &external);

        let overrides: BTreeMap<String, OverrideRecord> = self
            .store
            .get_all(true)
            .into_iter()
            .filter(|record| record.scope.is_none())
            .map(|record| (record.module_name.clone(), record))
            .collect();

        let mut entries: Vec<ModuleEntry> = base
            .imports
            .iter()
            .map(|(name, default_url)| {
                let active = overrides.get(name).filter(|record| record.enabled);
                ModuleEntry {
                    module_name: name.clone(),
                    url: active.map_or_else(|| default_url.clone(), |record| record.url.clone()),
                    is_overridden: active.is_some(),
                    scope: match_scope(name, &base.imports, &base.scopes),
                }
            })
            .collect();

        entries.extend(
            overrides
                .into_values()
                .filter(|record| !base.imports.contains_key(&record.module_name))
                .map(|record| ModuleEntry {
                    module_name: record.module_name,
                    url: record.url,
                    is_overridden: record.enabled,
                    scope: None,
                }),
        );

        entries.sort_by_key(|entry| !entry.is_overridden);
        Ok(entries)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Templates
    // ─────────────────────────────────────────────────────────────────────────────

    /// Snapshot every stored override, disabled ones included.
    pub fn save_template(&self, name: &str) -> bool {
        self.templates.save(name, &self.store.get_all(true))
    }

    /// Replace the live override set with a copy of `name`'s items.
    pub fn apply_template(&self, name: &str) -> bool {
        let Some(template) = self.templates.get(name) else {
            return false;
        };
        self.store.replace_all(&template.items);
        tracing::debug!(name, items = template.items.len(), "template applied");
        self.refresh_applied_quietly();
        self.bus.notify_change();
        true
    }

    pub fn delete_template(&self, name: &str) {
        self.templates.delete(name);
    }

    pub fn active_template_name(&self) -> Option<String> {
        self.templates.active_name(&self.store.get_all(true))
    }

    pub fn templates(&self) -> Vec<Template> {
        self.templates.templates()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Injection
    // ─────────────────────────────────────────────────────────────────────────────

    /// Inject the startup override map and external references into the
    /// host sink, then announce `init`. Calling again replaces the previous
    /// injection.
    pub fn mount(&self) -> Result<()> {
        self.unmount();

        if self.config.server_only {
            tracing::debug!("server-only mode; nothing injected");
            self.bus.emit_init();
            return Ok(());
        }

        match self.page.overridable_source() {
            Some(source) => {
                let MapSourceBody::Inline(text) = &source.body else {
                    return Err(ImoError::unsupported_source(
                        "external import maps marked overridable are not supported",
                    ));
                };
                let merged = merge(&parse_inline(text)?, &self.initial_override_map);
                self.inject(ScriptContent::Map(merged), OVERRIDE_SCRIPT_ID);
                self.inject_externals();
            }
            None => {
                self.inject_externals();
                if !self.initial_override_map.is_empty() {
                    self.inject(
                        ScriptContent::Map(self.initial_override_map.clone()),
                        OVERRIDE_SCRIPT_ID,
                    );
                }
            }
        }

        self.bus.emit_init();
        Ok(())
    }

    fn inject_externals(&self) {
        for (index, url) in self.initial_external_urls.iter().enumerate() {
            self.inject(
                ScriptContent::Url(url.clone()),
                &format!("{EXTERNAL_SCRIPT_ID_PREFIX}{index}"),
            );
        }
    }

    fn inject(&self, content: ScriptContent, id: &str) {
        self.sink.insert(content, id);
        self.injected_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id.to_string());
    }

    /// Remove injected scripts; returns how many were removed.
    fn unmount(&self) -> usize {
        let ids = std::mem::take(
            &mut *self
                .injected_ids
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for id in &ids {
            self.sink.remove_by_id(id);
        }
        ids.len()
    }
}

/// Drop entries of `map` whose composite key is in `disabled`.
fn without_disabled(mut map: ImportMap, disabled: &BTreeSet<String>) -> ImportMap {
    if disabled.is_empty() {
        return map;
    }
    map.imports
        .retain(|name, _| !disabled.contains(&disabled_key(name, None)));
    for (scope, modules) in &mut map.scopes {
        modules.retain(|name, _| !disabled.contains(&disabled_key(name, Some(scope))));
    }
    map
}
