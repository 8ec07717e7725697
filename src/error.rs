//! Error classification for operation results.
//!
//! Every terminal failure an operation can hit is expressed as an
//! [`ExchangeError`] carried inside an [`OperationResult`](crate::operation::OperationResult).
//! Errors never escape the pipeline as panics or `Err` values; stages inspect
//! the classification to decide whether to cache, replay, or record.
//!
//! | Variant          | Cached | Replayed by auth | Origin                      |
//! |------------------|--------|------------------|-----------------------------|
//! | `Network`        | No     | No               | transport unreachable, bad HTTP |
//! | `Authentication` | No     | Once             | HTTP 401 / `UNAUTHENTICATED` |
//! | `GraphQl`        | No     | No               | server-reported errors      |
//! | `CacheMiss`      | No     | No               | `cache-only` with no entry  |
//! | `Unroutable`     | No     | No               | chain has no terminal stage |
//!
//! The type is serializable because the server-render snapshot embeds error
//! descriptors next to successful payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// GraphQL error code the API uses for missing or rejected credentials.
pub const UNAUTHENTICATED_CODE: &str = "UNAUTHENTICATED";

/// A single entry of a GraphQL response's `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphQlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    /// Attach an `extensions.code` value.
    pub fn with_code(mut self, code: &str) -> Self {
        self.extensions = Some(serde_json::json!({ "code": code }));
        self
    }

    /// The `extensions.code` value, if the server supplied one.
    pub fn code(&self) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(Value::as_str)
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.code() == Some(UNAUTHENTICATED_CODE)
    }
}

/// Terminal error classification attached to an operation result.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExchangeError {
    /// Transport could not deliver the request or the response was unusable.
    #[error("network error: {message}")]
    Network { message: String },

    /// The API rejected the credential (or the session is invalid).
    #[error("authentication error: {message}")]
    Authentication { message: String },

    /// The API answered with GraphQL errors.
    #[error("graphql error: {}", join_messages(.errors))]
    GraphQl { errors: Vec<GraphQlError> },

    /// A `cache-only` read found nothing in the cache.
    #[error("no cached result for cache-only operation")]
    CacheMiss,

    /// The operation ran past the last stage without being answered.
    #[error("operation reached the end of the exchange chain without a result")]
    Unroutable,
}

impl ExchangeError {
    pub fn network(message: impl std::fmt::Display) -> Self {
        Self::Network {
            message: message.to_string(),
        }
    }

    pub fn authentication(message: impl std::fmt::Display) -> Self {
        Self::Authentication {
            message: message.to_string(),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

fn join_messages(errors: &[GraphQlError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
