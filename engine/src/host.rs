//! Host page collaborators
//!
//! Everything the engine needs from the page it runs in: where the page
//! lives, which default maps it declares, where injected maps go, and where
//! server cookies are mirrored. Embedders implement the traits; the engine
//! only calls them.

use crate::external::MapFetcher;
use crate::import_map::ImportMap;
use crate::storage::KeyValueStore;
use std::sync::Arc;

/// What a script element carries: an inline map or a `src` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptContent {
    Map(ImportMap),
    Url(String),
}

/// Sink for injected import-map scripts.
pub trait ScriptSink: Send + Sync {
    /// Insert a script with the given id, after any previously inserted one.
    fn insert(&self, content: ScriptContent, id: &str);

    /// Remove a previously inserted script. Unknown ids are ignored.
    fn remove_by_id(&self, id: &str);
}

/// Sink that drops everything, for headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ScriptSink for NullSink {
    fn insert(&self, _content: ScriptContent, _id: &str) {}

    fn remove_by_id(&self, _id: &str) {}
}

/// Cookie mirror for server-side override support.
pub trait CookieJar: Send + Sync {
    fn set(&self, key: &str, value: &str);

    fn expire(&self, key: &str);
}

/// Body of a default map declared by the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapSourceBody {
    /// JSON text embedded in the page
    Inline(String),
    /// `src` attribute pointing at a remote map
    Remote(String),
}

/// One import map declared by the host page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSource {
    pub body: MapSourceBody,
    /// Declared as the overridable map: overrides are merged into it at mount
    pub overridable: bool,
    /// Injected by this engine; never part of the default map
    pub injected: bool,
    /// Declared script type; `None` means the configured import map type
    pub script_type: Option<String>,
}

impl MapSource {
    pub fn inline(json: impl Into<String>) -> Self {
        Self {
            body: MapSourceBody::Inline(json.into()),
            overridable: false,
            injected: false,
            script_type: None,
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            body: MapSourceBody::Remote(url.into()),
            overridable: false,
            injected: false,
            script_type: None,
        }
    }

    /// Mark this source as the overridable map
    pub fn overridable(mut self) -> Self {
        self.overridable = true;
        self
    }

    pub fn with_script_type(mut self, script_type: impl Into<String>) -> Self {
        self.script_type = Some(script_type.into());
        self
    }

    /// Whether this source contributes to the default map of a page whose
    /// import maps use `import_map_type`.
    pub fn counts_as_default(&self, import_map_type: &str) -> bool {
        !self.injected
            && (self.overridable
                || self
                    .script_type
                    .as_deref()
                    .is_none_or(|script_type| script_type == import_map_type))
    }
}

/// Static facts about the page, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    /// `location.hostname`
    pub hostname: String,
    /// Full page URL, source of the query-parameter channel
    pub url: Option<String>,
    /// Referrer, used instead of `url` when the page is framed
    pub referrer: Option<String>,
    /// Whether the page runs inside a frame
    pub framed: bool,
    /// Base URL for resolving relative external-map URLs
    pub base_url: Option<String>,
    /// Declared default import maps, in document order
    pub default_maps: Vec<MapSource>,
}

impl PageContext {
    /// The URL the query-parameter channel is read from.
    pub fn query_source(&self) -> Option<&str> {
        if self.framed {
            self.referrer.as_deref()
        } else {
            self.url.as_deref()
        }
    }

    /// The overridable default map, if the page declares one.
    pub fn overridable_source(&self) -> Option<&MapSource> {
        self.default_maps
            .iter()
            .find(|source| source.overridable && !source.injected)
    }
}

/// Everything an engine is wired to.
#[derive(Clone)]
pub struct Host {
    pub page: PageContext,
    pub store: Arc<dyn KeyValueStore>,
    pub fetcher: Arc<dyn MapFetcher>,
    pub sink: Arc<dyn ScriptSink>,
    pub cookies: Option<Arc<dyn CookieJar>>,
}

impl Host {
    pub fn new(
        page: PageContext,
        store: Arc<dyn KeyValueStore>,
        fetcher: Arc<dyn MapFetcher>,
    ) -> Self {
        Self {
            page,
            store,
            fetcher,
            sink: Arc::new(NullSink),
            cookies: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ScriptSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cookies(mut self, cookies: Arc<dyn CookieJar>) -> Self {
        self.cookies = Some(cookies);
        self
    }
}
