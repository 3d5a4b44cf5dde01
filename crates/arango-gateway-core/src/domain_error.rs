//! Stable, classified errors that are safe to surface verbatim to API callers

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Source tag attached to every error raised by the API layer
pub const API_SOURCE: &str = "graphql";

/// Numeric codes of the domain error catalogue
pub mod codes {
    pub const MESSAGE_EXPIRED: i64 = 10001;
    pub const MULTIPLE_ACCESS_KEYS: i64 = 10002;
    pub const UNAUTHORIZED: i64 = 10003;
    pub const AUTH_SERVICE_UNAVAILABLE: i64 = 10004;
    pub const AUTH_FAILED: i64 = 10005;
    pub const SERVICE_UNAVAILABLE: i64 = 500;
}

/// Immutable error value created at the point of failure
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct DomainError {
    pub code: i64,
    pub message: String,
    /// Layer that raised the error, serialized as `source`
    #[serde(rename = "source")]
    pub source_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl DomainError {
    /// Create an error with an arbitrary code
    pub fn create(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            source_tag: API_SOURCE.to_string(),
            data,
        }
    }

    /// Generic transient failure that hides internal fault details
    pub fn service_unavailable() -> Self {
        Self::create(codes::SERVICE_UNAVAILABLE, "Service temporary unavailable", None)
    }

    pub fn message_expired(id: impl Into<String>, expired_at: i64) -> Self {
        Self::create(
            codes::MESSAGE_EXPIRED,
            "Message expired",
            Some(json!({
                "id": id.into(),
                "expiredAt": expired_at,
                "now": chrono::Utc::now().timestamp_millis(),
            })),
        )
    }

    pub fn multiple_access_keys() -> Self {
        Self::create(
            codes::MULTIPLE_ACCESS_KEYS,
            "Request must use the same access key for all queries and mutations",
            None,
        )
    }

    pub fn unauthorized() -> Self {
        Self::create(codes::UNAUTHORIZED, "Unauthorized", None)
    }

    pub fn auth_service_unavailable() -> Self {
        Self::create(codes::AUTH_SERVICE_UNAVAILABLE, "Auth service unavailable", None)
    }

    /// Wrap a failure reported by the auth service.
    ///
    /// The message falls back to the description when the service sent none;
    /// the service's own code is kept in the payload as `authErrorCode`.
    pub fn auth(failure: &AuthFailure) -> Self {
        let message = failure
            .message
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| failure.description.clone())
            .unwrap_or_default();
        Self::create(
            codes::AUTH_FAILED,
            message,
            Some(json!({ "authErrorCode": failure.code })),
        )
    }

    /// Check whether this is the generic transient-unavailability error
    pub fn is_service_unavailable(&self) -> bool {
        self.code == codes::SERVICE_UNAVAILABLE
    }
}


/// Error body returned by the auth service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthFailure {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_codes_and_source() {
        let all = [
            DomainError::message_expired("m1", 1),
            DomainError::multiple_access_keys(),
            DomainError::unauthorized(),
            DomainError::auth_service_unavailable(),
            DomainError::auth(&AuthFailure::default()),
            DomainError::service_unavailable(),
        ];
        let codes: Vec<i64> = all.iter().map(|e| e.code).collect();
        assert_eq!(codes, vec![10001, 10002, 10003, 10004, 10005, 500]);
        assert!(all.iter().all(|e| e.source_tag == API_SOURCE));
    }

    #[test]
    fn test_message_expired_payload() {
        let err = DomainError::message_expired("abc", 42);
        let data = err.data.unwrap();
        assert_eq!(data["id"], "abc");
        assert_eq!(data["expiredAt"], 42);
        assert!(data["now"].as_i64().unwrap() > 42);
    }

    #[test]
    fn test_auth_falls_back_to_description() {
        let failure = AuthFailure {
            code: Some(json!(7)),
            message: None,
            description: Some("token revoked".into()),
        };
        let err = DomainError::auth(&failure);
        assert_eq!(err.message, "token revoked");
        assert_eq!(err.data, Some(json!({ "authErrorCode": 7 })));
    }

    #[test]
    fn test_service_unavailable() {
        let err = DomainError::service_unavailable();
        assert!(err.is_service_unavailable());
        assert_eq!(err.to_string(), "Service temporary unavailable (code 500)");
        assert!(err.data.is_none());
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({ "code": 500, "message": "Service temporary unavailable", "source": "graphql" })
        );
    }
}
