//! Error Taxonomy
//! Mission: classify every failure as retryable/non-retryable with category & severity

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;

/// Broad failure category. Drives retry and routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Authentication,
    Validation,
    RateLimit,
    InsufficientFunds,
    Processing,
    Configuration,
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A single classified failure. Carries enough for the retry policy and router to
/// reason on variants rather than string-matching, per the taxonomy's design intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreError {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    pub message: String,
    pub metadata: HashMap<String, String>,
}

impl CoreError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        let retryable = Self::default_retryable(category);
        let severity = Self::default_severity(category);
        Self {
            category,
            severity,
            retryable,
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    fn default_retryable(category: ErrorCategory) -> bool {
        match category {
            ErrorCategory::Network
            | ErrorCategory::Timeout
            | ErrorCategory::RateLimit
            | ErrorCategory::Processing
            | ErrorCategory::Gateway => true,
            ErrorCategory::Authentication
            | ErrorCategory::Validation
            | ErrorCategory::InsufficientFunds
            | ErrorCategory::Configuration => false,
        }
    }

    fn default_severity(category: ErrorCategory) -> Severity {
        match category {
            ErrorCategory::Validation | ErrorCategory::RateLimit => Severity::Low,
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Gateway => {
                Severity::Medium
            }
            ErrorCategory::InsufficientFunds | ErrorCategory::Processing => Severity::High,
            ErrorCategory::Authentication | ErrorCategory::Configuration => Severity::Critical,
        }
    }

    /// Gateway failures are retryable unless explicitly flagged permanent by the adapter.
    pub fn gateway(message: impl Into<String>, permanent: bool) -> Self {
        let mut err = Self::new(ErrorCategory::Gateway, message);
        if permanent {
            err.retryable = false;
            err.metadata.insert("permanent".to_string(), "true".to_string());
        }
        err
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Classification is idempotent: re-classifying an already-typed error is identity.
    pub fn classify(self) -> Self {
        self
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}/{:?}] {}", self.category, self.severity, self.message)
    }
}

impl std::error::Error for CoreError {}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match self.category {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::Authentication => StatusCode::UNAUTHORIZED,
            ErrorCategory::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorCategory::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCategory::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Gateway => {
                StatusCode::BAD_GATEWAY
            }
            ErrorCategory::Processing => StatusCode::UNPROCESSABLE_ENTITY,
        };
        let body = Json(json!({
            "category": self.category,
            "message": self.message,
            "retryable": self.retryable,
        }));
        (status, body).into_response()
    }
}
