//! Error types for the ArangoDB gateway
//!
//! Uses `thiserror` for ergonomic error handling with full context preservation.
//! Query-path failures have their own taxonomy in [`crate::driver_error`].

use std::fmt;
use thiserror::Error;

/// Result type alias for Gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Primary error type for all Gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// ArangoDB connection or request errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Change feed transport errors
    #[error("Change feed error: {message}")]
    Feed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Message serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Collection collaborator failures
    #[error("Collection {collection} failed: {message}")]
    Collection { collection: String, message: String },

    /// Resource exhaustion
    #[error("Resource exhausted: {resource}")]
    ResourceExhausted { resource: String },
}

impl GatewayError {
    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Create a database error with source
    pub fn database_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Database {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a change feed error
    pub fn feed(message: impl Into<String>) -> Self {
        Self::Feed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a change feed error with source
    pub fn feed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Feed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a collection error
    pub fn collection(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collection {
            collection: collection.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
            source: Some(Box::new(e)),
        }
    }
}

impl From<config::ConfigError> for GatewayError {
    fn from(e: config::ConfigError) -> Self {
        Self::config(e.to_string())
    }
}

/// Error context for enhanced debugging
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub component: &'static str,
    pub operation: String,
    pub collection: Option<String>,
}

impl ErrorContext {
    pub fn new(component: &'static str, operation: impl Into<String>) -> Self {
        Self {
            component,
            operation: operation.into(),
            collection: None,
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}::{}]", self.component, self.operation)?;
        if let Some(ref name) = self.collection {
            write!(f, " collection={}", name)?;
        }
        Ok(())
    }
}

/// Extension trait for adding context to errors
pub trait ErrorContextExt<T> {
    fn with_context(self, ctx: ErrorContext) -> Result<T>;
}

impl<T> ErrorContextExt<T> for Result<T> {
    fn with_context(self, ctx: ErrorContext) -> Result<T> {
        self.map_err(|e| {
            tracing::error!(
                error = %e,
                component = ctx.component,
                operation = %ctx.operation,
                collection = ?ctx.collection,
                "Operation failed"
            );
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(GatewayError::database("down").to_string(), "Database error: down");
        assert_eq!(
            GatewayError::config("bad url").to_string(),
            "Configuration error: bad url"
        );
        let err = GatewayError::feed_with_source("client", std::fmt::Error);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_context_display() {
        let ctx = ErrorContext::new("gateway", "finish_operations").with_collection("blocks");
        assert_eq!(ctx.to_string(), "[gateway::finish_operations] collection=blocks");
    }

    #[test]
    fn test_with_context_passes_error_through() {
        let result: Result<()> = Err(GatewayError::collection("accounts", "boom"));
        let err = result
            .with_context(ErrorContext::new("gateway", "drop_cached_db_info"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Collection accounts failed: boom");
    }
}
