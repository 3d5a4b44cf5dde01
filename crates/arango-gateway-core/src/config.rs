//! Configuration types for the ArangoDB gateway
//!
//! Uses the `config` crate for layered configuration from files and environment.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Root configuration for the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Primary ("fast") database; also the change feed source
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Secondary ("slow") database
    #[serde(default)]
    pub slow_database: DatabaseConfig,

    /// Change feed listener configuration
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Collections registered at construction, in registration order
    #[serde(default = "default_collections")]
    pub collections: Vec<CollectionConfig>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            slow_database: DatabaseConfig::default(),
            listener: ListenerConfig::default(),
            collections: default_collections(),
            observability: ObservabilityConfig::default(),
        }
    }
}

// ============================================================================
// Database Configuration
// ============================================================================

/// ArangoDB connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Server address; scheme is optional and defaults to `http`
    #[serde(default = "default_server")]
    pub server: String,

    /// Database name
    #[serde(default = "default_database_name")]
    pub name: String,

    /// Optional `user:password` credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,

    /// Maximum pooled connections per host
    #[serde(default = "default_max_sockets")]
    pub max_sockets: usize,

    /// Request timeout
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_server() -> String {
    "arangodb".to_string()
}

fn default_database_name() -> String {
    "blockchain".to_string()
}

fn default_max_sockets() -> usize {
    100
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            name: default_database_name(),
            auth: None,
            max_sockets: default_max_sockets(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Server URL with the default scheme applied
    pub fn server_url(&self) -> Result<Url> {
        let address = ensure_protocol(&self.server, "http");
        Url::parse(&address).map_err(|e| {
            GatewayError::config(format!("Invalid database server '{}': {}", self.server, e))
        })
    }

    /// Parsed basic-auth credentials, if configured
    pub fn credentials(&self) -> Option<Credentials> {
        self.auth.as_deref().and_then(Credentials::parse)
    }

    /// Validate connection parameters
    pub fn validate(&self) -> Result<()> {
        self.server_url()?;
        if self.name.trim().is_empty() {
            return Err(GatewayError::config("Database name must not be empty"));
        }
        if self.max_sockets == 0 {
            return Err(GatewayError::config("max_sockets must be at least 1"));
        }
        Ok(())
    }
}

/// Prefix `address` with `<default_protocol>://` unless it already has a scheme
pub fn ensure_protocol(address: &str, default_protocol: &str) -> String {
    let has_scheme = address
        .split_once("://")
        .map(|(scheme, _)| {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
        .unwrap_or(false);

    if has_scheme {
        address.to_string()
    } else {
        format!("{}://{}", default_protocol, address)
    }
}

/// Basic-auth credentials split from a `user:password` string
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Split on the first `:`; the password may contain further colons.
    /// Returns `None` for an empty credential string.
    pub fn parse(auth: &str) -> Option<Self> {
        if auth.is_empty() {
            return None;
        }
        let (user, password) = auth.split_once(':').unwrap_or((auth, ""));
        Some(Self {
            user: user.to_string(),
            password: password.to_string(),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

// ============================================================================
// Component Configurations
// ============================================================================

/// Change feed listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Delay before resubscribing after a feed error
    #[serde(with = "humantime_serde", default = "default_restart_timeout")]
    pub restart_timeout: Duration,

    /// Wait between polls when the feed has nothing new
    #[serde(with = "humantime_serde", default = "default_idle_poll_interval")]
    pub idle_poll_interval: Duration,
}

fn default_restart_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_idle_poll_interval() -> Duration {
    Duration::from_millis(500)
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            restart_timeout: default_restart_timeout(),
            idle_poll_interval: default_idle_poll_interval(),
        }
    }
}

/// A collection registered with the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    /// Document type tag handed to the collection
    pub doc_type: String,
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            doc_type: doc_type.into(),
        }
    }
}

fn default_collections() -> Vec<CollectionConfig> {
    vec![
        CollectionConfig::new("transactions", "Transaction"),
        CollectionConfig::new("messages", "Message"),
        CollectionConfig::new("accounts", "Account"),
        CollectionConfig::new("blocks", "Block"),
        CollectionConfig::new("blocks_signatures", "BlockSignatures"),
    ]
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl GatewayConfig {
    /// Load configuration from file and environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Add default values
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        // Add config file if specified
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Add environment variables with prefix ARANGO_GATEWAY_
        builder = builder.add_source(
            config::Environment::with_prefix("ARANGO_GATEWAY")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate both connections and the collection registry
    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.slow_database.validate()?;

        let mut seen = std::collections::HashSet::new();
        for collection in &self.collections {
            if collection.name.is_empty() {
                return Err(GatewayError::config("Collection name must not be empty"));
            }
            if !seen.insert(collection.name.as_str()) {
                return Err(GatewayError::config(format!(
                    "Duplicate collection name '{}'",
                    collection.name
                )));
            }
        }
        Ok(())
    }
}
