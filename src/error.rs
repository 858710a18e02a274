// ⚠️ Errors - One enum for every client-visible failure class

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Result type used across the crate.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Crate-level error.
///
/// Each variant corresponds to one client-visible failure class. Provider
/// failures during a batch never become a `CatalogError`: they are captured as
/// data on the per-item result (see [`crate::providers::LookupResult`]).
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Malformed or missing required input.
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<ApiMessage>,
    },

    /// No market or entry matched the query.
    #[error("{message}")]
    NotFound { message: String, query: Option<Value> },

    /// The query resolved to more than one record where exactly one was expected.
    #[error("{message}")]
    AmbiguousMatch {
        message: String,
        query: Option<Value>,
        candidates: Vec<Value>,
    },

    /// A provider adapter call failed outside of a batch.
    #[error("provider {provider} failed: {message}")]
    UpstreamProvider { provider: String, message: String },

    /// robots.txt / sitemap discovery failed.
    #[error("sitemap discovery failed: {0}")]
    Discovery(String),

    /// The uploaded feed could not be read.
    #[error("feed could not be read: {0}")]
    Feed(String),

    /// A store operation failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// No API key, or an unknown one.
    #[error("{0}")]
    Unauthorized(String),

    /// The key is valid but lacks the privilege the operation needs.
    #[error("{0}")]
    Forbidden(String),
}

impl CatalogError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            query: None,
        }
    }

    pub fn not_found_for(message: impl Into<String>, query: Value) -> Self {
        Self::NotFound {
            message: message.into(),
            query: Some(query),
        }
    }

    pub fn ambiguous(message: impl Into<String>, query: Value, candidates: Vec<Value>) -> Self {
        Self::AmbiguousMatch {
            message: message.into(),
            query: Some(query),
            candidates,
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// HTTP status code the API surfaces for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            CatalogError::Validation { .. } => 422,
            CatalogError::NotFound { .. } => 404,
            CatalogError::AmbiguousMatch { .. } => 422,
            CatalogError::UpstreamProvider { .. } => 502,
            CatalogError::Discovery(_) => 502,
            CatalogError::Feed(_) => 422,
            CatalogError::Persistence(_) => 500,
            CatalogError::Unauthorized(_) => 401,
            CatalogError::Forbidden(_) => 403,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::Validation { .. } => "invalid_input",
            CatalogError::NotFound { .. } => "not_found",
            CatalogError::AmbiguousMatch { .. } => "ambiguous_match",
            CatalogError::UpstreamProvider { .. } => "upstream_provider",
            CatalogError::Discovery(_) => "discovery_failed",
            CatalogError::Feed(_) => "invalid_feed",
            CatalogError::Persistence(_) => "internal_issue",
            CatalogError::Unauthorized(_) => "unauthorized",
            CatalogError::Forbidden(_) => "forbidden",
        }
    }

    /// Render the error as the `{ message, code, ... }` objects of the envelope.
    pub fn to_messages(&self) -> Vec<Value> {
        let mut head = serde_json::json!({
            "message": self.to_string(),
            "code": self.code(),
            "statusCode": self.status_code(),
        });

        match self {
            CatalogError::NotFound { query: Some(q), .. } => {
                head["query"] = q.clone();
            }
            CatalogError::AmbiguousMatch {
                query, candidates, ..
            } => {
                if let Some(q) = query {
                    head["query"] = q.clone();
                }
                head["candidates"] = Value::Array(candidates.clone());
            }
            CatalogError::UpstreamProvider { provider, .. } => {
                head["provider"] = Value::String(provider.clone());
            }
            _ => {}
        }

        let mut out = vec![head];
        if let CatalogError::Validation { details, .. } = self {
            out.extend(details.iter().map(|d| serde_json::json!(d)));
        }
        out
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(err: rusqlite::Error) -> Self {
        CatalogError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::Persistence(format!("document encoding: {err}"))
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        let host = err
            .url()
            .and_then(|u| u.host_str())
            .unwrap_or("unknown host")
            .to_string();
        CatalogError::UpstreamProvider {
            provider: host,
            message: err.to_string(),
        }
    }
}

impl From<csv::Error> for CatalogError {
    fn from(err: csv::Error) -> Self {
        CatalogError::Feed(err.to_string())
    }
}

// ============================================================================
// PER-CALL ERROR COLLECTION
// ============================================================================

/// One offending input attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiMessage {
    pub attribute: String,
    pub value: String,
    pub message: String,
}

/// Accumulates validation messages for the duration of a single call.
///
/// Owned by the function that validates; handed back to the caller through
/// [`ErrorCollector::finish`].
#[derive(Debug, Default)]
pub struct ErrorCollector {
    messages: Vec<ApiMessage>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        attribute: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> &mut Self {
        self.messages.push(ApiMessage {
            attribute: attribute.into(),
            value: value.into(),
            message: message.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn into_messages(self) -> Vec<ApiMessage> {
        self.messages
    }

    /// `Ok(())` when nothing was collected, otherwise a `Validation` error
    /// carrying every message.
    pub fn finish(self, summary: impl Into<String>) -> CatalogResult<()> {
        if self.messages.is_empty() {
            Ok(())
        } else {
            Err(CatalogError::Validation {
                message: summary.into(),
                details: self.messages,
            })
        }
    }
}
