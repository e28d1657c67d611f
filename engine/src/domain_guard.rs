//! Startup activation gate
//!
//! Decides once, before anything is injected, whether the engine runs on
//! this host. The decision is never revisited.

use crate::errors::{ImoError, Result};
use crate::storage::KeyValueStore;
use regex_lite::Regex;
use std::fmt;

pub const ALLOWLIST_PREFIX: &str = "allowlist:";
pub const DENYLIST_PREFIX: &str = "denylist:";

/// Key read to check that the medium is reachable at all.
const PROBE_KEY: &str = "test";

/// Why the engine refused to activate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisabledReason {
    /// Hostname matched none of the allowlist patterns
    NotAllowlisted { hostname: String },
    /// Hostname matched a denylist pattern
    Denylisted { hostname: String },
    /// Probe read of the key/value medium failed
    StorageUnavailable { message: String },
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAllowlisted { hostname } => {
                write!(f, "hostname '{hostname}' is not in the allowlist")
            }
            Self::Denylisted { hostname } => write!(f, "hostname '{hostname}' is in the denylist"),
            Self::StorageUnavailable { message } => {
                write!(f, "override storage is not accessible: {message}")
            }
        }
    }
}

/// Parsed `allowlist:`/`denylist:` directive.
#[derive(Debug)]
pub enum DomainRestriction {
    Allowlist(Vec<Regex>),
    Denylist(Vec<Regex>),
}

impl DomainRestriction {
    pub fn parse(directive: &str) -> Result<Self> {
        let directive = directive.trim();
        if directive.is_empty() {
            return Err(ImoError::config("domain restriction is empty"));
        }
        if let Some(patterns) = directive.strip_prefix(ALLOWLIST_PREFIX) {
            Ok(Self::Allowlist(compile_patterns(patterns)))
        } else if let Some(patterns) = directive.strip_prefix(DENYLIST_PREFIX) {
            Ok(Self::Denylist(compile_patterns(patterns)))
        } else {
            Err(ImoError::config(format!(
                "domain restriction must start with {ALLOWLIST_PREFIX} or {DENYLIST_PREFIX}"
            )))
        }
    }

    /// `Some(reason)` when `hostname` must not run the engine.
    pub fn check(&self, hostname: &str) -> Option<DisabledReason> {
        match self {
            Self::Allowlist(patterns) if !any_match(patterns, hostname) => {
                Some(DisabledReason::NotAllowlisted {
                    hostname: hostname.to_string(),
                })
            }
            Self::Denylist(patterns) if any_match(patterns, hostname) => {
                Some(DisabledReason::Denylisted {
                    hostname: hostname.to_string(),
                })
            }
            _ => None,
        }
    }
}

/// `*` matches one or more characters; everything else is literal. Patterns
/// match anywhere in the hostname.
fn compile_patterns(patterns: &str) -> Vec<Regex> {
    patterns
        .split(',')
        .map(str::trim)
        .filter(|pattern| !pattern.is_empty())
        .filter_map(|pattern| {
            let source = regex_lite::escape(pattern).replace(r"\*", ".+");
            match Regex::new(&source) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    tracing::warn!(pattern, error = %err, "skipping unusable hostname pattern");
                    None
                }
            }
        })
        .collect()
}

fn any_match(patterns: &[Regex], hostname: &str) -> bool {
    patterns.iter().any(|pattern| pattern.is_match(hostname))
}

/// Apply the domain directive to `hostname`.
///
/// A missing directive allows everything. A malformed one is logged and
/// also allows everything.
pub fn check_hostname(directive: Option<&str>, hostname: &str) -> Option<DisabledReason> {
    let directive = directive?;
    match DomainRestriction::parse(directive) {
        Ok(restriction) => restriction.check(hostname),
        Err(err) => {
            tracing::error!(
                category = err.category().as_str(),
                error = %err,
                "ignoring invalid domain restriction"
            );
            None
        }
    }
}

/// `Some(reason)` when the medium cannot be read at all.
pub fn probe_storage(store: &dyn KeyValueStore) -> Option<DisabledReason> {
    match store.get(PROBE_KEY) {
        Ok(_) => None,
        Err(err) => Some(DisabledReason::StorageUnavailable {
            message: err.to_string(),
        }),
    }
}

/// Full startup gate: domain directive first, then the storage probe, which
/// overrides any "active" outcome.
pub fn evaluate(
    directive: Option<&str>,
    hostname: &str,
    store: &dyn KeyValueStore,
) -> Option<DisabledReason> {
    let domain = check_hostname(directive, hostname);
    match probe_storage(store) {
        Some(reason) => Some(reason),
        None => domain,
    }
}
