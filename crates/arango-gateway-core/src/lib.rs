//! # ArangoDB Gateway Core
//!
//! Core types, strategy traits and utilities shared by the gateway:
//! - Configuration (layered file + environment loading)
//! - Error taxonomy: gateway errors, domain errors, query-path driver errors
//! - Change events and the change feed transport strategy
//! - Operation registry for opaque pending-operation handles
//! - Cycle-safe log redaction
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │ ChangeFeed  │────►│   Listener   │────►│ Collections │
//! │  Strategy   │     │ (auto-retry) │     │  (by name)  │
//! └─────────────┘     └──────────────┘     └─────────────┘
//!                                                ▲
//!        query ──► wrap (clean/classify/log) ────┘ fan-out
//! ```

pub mod config;
pub mod domain_error;
pub mod driver_error;
pub mod error;
pub mod message;
pub mod metrics;
pub mod redact;
pub mod registry;
pub mod strategy;

pub use self::config::*;
pub use self::domain_error::*;
pub use self::driver_error::*;
pub use self::error::*;
pub use self::message::*;
pub use self::metrics::*;
pub use self::redact::*;
pub use self::registry::*;
pub use self::strategy::*;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{CollectionConfig, Credentials, DatabaseConfig, GatewayConfig};
    pub use crate::domain_error::DomainError;
    pub use crate::driver_error::{CleanedError, QueryError, RawError};
    pub use crate::error::{GatewayError, Result};
    pub use crate::message::{ChangeEvent, ChangeKind};
    pub use crate::registry::{OperationId, OperationRegistry};
    pub use crate::strategy::{
        ChangeFeed, Collection, DocumentRouter, FeedError, FeedRequest, FeedStream, HealthCheck,
        Lifecycle,
    };
}
