//! Engine error types
//!
//! Default policy: data errors (storage, fetch, malformed external JSON) are
//! logged and degrade to an empty result. Only caller-input mistakes are
//! returned to the caller.

use thiserror::Error;

/// Error category for structured logging and behavior mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// `config.toml` or directive misconfigured
    ConfigError,
    /// Key/value medium unreadable or unwritable
    StorageError,
    /// External import map could not be downloaded or parsed
    FetchError,
    /// Malformed JSON in the query-parameter override channel
    QueryParamError,
    /// Malformed inline import map declared by the host page
    InlineMapError,
    /// A map source the engine cannot handle
    UnsupportedSourceError,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConfigError => "CONFIG_ERROR",
            Self::StorageError => "STORAGE_ERROR",
            Self::FetchError => "FETCH_ERROR",
            Self::QueryParamError => "QUERY_PARAM_ERROR",
            Self::InlineMapError => "INLINE_MAP_ERROR",
            Self::UnsupportedSourceError => "UNSUPPORTED_SOURCE_ERROR",
        }
    }
}

/// Engine error with category and context
#[derive(Debug, Error)]
pub enum ImoError {
    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("fetch error: {message}")]
    Fetch {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid importMap query param - text content must be json: {source}")]
    InvalidQueryParam {
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid inline import map - text content must be json: {source}")]
    InvalidInlineMap {
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported map source: {message}")]
    UnsupportedSource { message: String },
}

impl ImoError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config { .. } => ErrorCategory::ConfigError,
            Self::Storage { .. } => ErrorCategory::StorageError,
            Self::Fetch { .. } => ErrorCategory::FetchError,
            Self::InvalidQueryParam { .. } => ErrorCategory::QueryParamError,
            Self::InvalidInlineMap { .. } => ErrorCategory::InlineMapError,
            Self::UnsupportedSource { .. } => ErrorCategory::UnsupportedSourceError,
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a storage error with source
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a fetch error
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch {
            message: message.into(),
            source: None,
        }
    }

    /// Create a fetch error with source
    pub fn fetch_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Fetch {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an unsupported source error
    pub fn unsupported_source(message: impl Into<String>) -> Self {
        Self::UnsupportedSource {
            message: message.into(),
        }
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, ImoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_codes() {
        assert_eq!(ImoError::config("x").category().as_str(), "CONFIG_ERROR");
        assert_eq!(ImoError::fetch("x").category().as_str(), "FETCH_ERROR");
        assert_eq!(
            ImoError::unsupported_source("x").category(),
            ErrorCategory::UnsupportedSourceError
        );
    }

    #[test]
    fn test_storage_error_keeps_source() {
        let err = ImoError::storage_with_source(
            "remove import-map-override:a",
            std::io::Error::other("disk full"),
        );
        assert_eq!(err.category().as_str(), "STORAGE_ERROR");
        assert_eq!(err.to_string(), "storage error: remove import-map-override:a");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_query_param_message() {
        let source = serde_json::from_str::<serde_json::Value>("{nope").expect_err("invalid json");
        let err = ImoError::InvalidQueryParam { source };
        assert!(err.to_string().starts_with("Invalid importMap query param"));
        assert_eq!(err.category(), ErrorCategory::QueryParamError);
    }
}
