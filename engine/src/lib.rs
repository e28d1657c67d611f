//! Import map override engine
//!
//! Lets a host page or tool redirect module resolution to alternate URLs at
//! runtime. The engine:
//! - Tracks module and scope overrides in an abstract key/value medium
//! - Merges them with the page's default map and external override maps
//! - Honors enable/disable flags and a fixed precedence order
//! - Saves and restores named templates of the override set
//! - Gates itself on a hostname allow/deny directive
//!
//! Entry point: [`OverrideEngine::create`].

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod domain_guard;
pub mod errors;
pub mod events;
pub mod external;
pub mod host;
pub mod import_map;
pub mod overrides;
pub mod resolver;
pub mod storage;
pub mod templates;

pub use config::ImoConfig;
pub use domain_guard::{DisabledReason, DomainRestriction};
pub use errors::{ErrorCategory, ImoError, Result};
pub use events::EngineEvent;
pub use external::{FetchError, FetchResponse, MapFetcher, ReqwestFetcher};
pub use host::{CookieJar, Host, MapSource, MapSourceBody, NullSink, PageContext, ScriptContent, ScriptSink};
pub use import_map::{ImportMap, ModuleMap, ScopeMap};
pub use overrides::{ExternalMapReference, OverrideRecord};
pub use resolver::{ModuleEntry, OverrideEngine, Startup};
pub use storage::{JsonFileStore, KeyValueStore, MemoryStore, StorageError};
pub use templates::Template;
