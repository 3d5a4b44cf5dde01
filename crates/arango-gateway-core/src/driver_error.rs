//! Query-path failure taxonomy
//!
//! A fetch reports a [`RawError`]: everything the driver knew about the
//! failure, including the outgoing request and the raw response. Before the
//! failure is logged or propagated it is cleaned into a [`CleanedError`] and
//! classified exactly once:
//!
//! ```text
//! RawError ──clean──► CleanedError ──classify──► System       ──► QueryError::Domain(500)
//!                        │                      Unclassified ──► QueryError::Database / Driver
//!                        └─ request/response dropped here
//! ```

use crate::domain_error::DomainError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body reported by ArangoDB itself
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{error_message} (errorNum {error_num})")]
pub struct DatabaseError {
    #[serde(default)]
    pub error: bool,
    /// HTTP status code echoed by the server
    pub code: u16,
    #[serde(rename = "errorNum")]
    pub error_num: i64,
    #[serde(rename = "errorMessage", default)]
    pub error_message: String,
}

/// Outgoing request attached to a driver failure
#[derive(Debug, Clone, Default)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Raw response attached to a driver failure
#[derive(Debug, Clone, Default)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// A failure as the driver reported it, before cleaning.
///
/// `request` and `response` may carry credentials and full payloads; they never
/// survive [`RawError::clean`].
#[derive(Error, Debug, Clone, Default)]
#[error("{message}")]
pub struct RawError {
    pub message: String,
    /// Driver error category, `"system"` for OS-level faults
    pub error_type: Option<String>,
    pub errno: Option<i32>,
    pub syscall: Option<String>,
    /// Symbolic OS error code such as `ECONNREFUSED`
    pub code: Option<String>,
    /// Nested database-specific payload
    pub database: Option<DatabaseError>,
    pub request: Option<RequestSnapshot>,
    pub response: Option<ResponseSnapshot>,
}

impl RawError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// Builder: mark as an OS-level fault
    pub fn system(mut self) -> Self {
        self.error_type = Some("system".to_string());
        self
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_errno(mut self, errno: i32, syscall: impl Into<String>) -> Self {
        self.errno = Some(errno);
        self.syscall = Some(syscall.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_database(mut self, database: DatabaseError) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_request(mut self, request: RequestSnapshot) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_response(mut self, response: ResponseSnapshot) -> Self {
        self.response = Some(response);
        self
    }

    /// Unwrap to the nested database payload if there is one, otherwise
    /// strip the transport-internal fields.
    pub fn clean(self) -> CleanedError {
        if let Some(database) = self.database {
            return CleanedError::Database(database);
        }
        CleanedError::Driver(DriverError {
            message: self.message,
            error_type: self.error_type,
            errno: self.errno,
            syscall: self.syscall,
            code: self.code,
        })
    }
}

/// Driver failure with request and response removed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message}{}", code_suffix(.code))]
pub struct DriverError {
    pub message: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syscall: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_ref().map(|c| format!(" ({})", c)).unwrap_or_default()
}

/// Classification of a cleaned failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Low-level system or transport fault, never surfaced verbatim
    System,
    /// Anything else, propagated as cleaned
    Unclassified,
}

/// A failure safe to log
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CleanedError {
    #[error(transparent)]
    Database(DatabaseError),
    #[error(transparent)]
    Driver(DriverError),
}

impl CleanedError {
    /// `type == "system"`, or both `errno` and `syscall` present
    pub fn classify(&self) -> FaultClass {
        match self {
            Self::Driver(DriverError {
                error_type: Some(t),
                ..
            }) if t == "system" => FaultClass::System,
            Self::Driver(DriverError {
                errno: Some(_),
                syscall: Some(_),
                ..
            }) => FaultClass::System,
            _ => FaultClass::Unclassified,
        }
    }

    /// Map to what the caller receives
    pub fn into_query_error(self) -> QueryError {
        match self.classify() {
            FaultClass::System => QueryError::Domain(DomainError::service_unavailable()),
            FaultClass::Unclassified => match self {
                Self::Database(e) => QueryError::Database(e),
                Self::Driver(e) => QueryError::Driver(e),
            },
        }
    }
}

/// Error propagated to callers of a wrapped query
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error(transparent)]
    Domain(DomainError),
    #[error(transparent)]
    Database(DatabaseError),
    #[error(transparent)]
    Driver(DriverError),
}

impl QueryError {
    /// Numeric code when one is known
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Domain(e) => Some(e.code),
            Self::Database(e) => Some(e.error_num),
            Self::Driver(_) => None,
        }
    }

    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DomainError> for QueryError {
    fn from(e: DomainError) -> Self {
        Self::Domain(e)
    }
}
