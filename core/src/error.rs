//! # Errors
//!
//! Everything that can go wrong while a flow is evaluated ends up in [`FlowError`].
//!
//! ## Error classes
//!
//! * **Client errors** ([`ApiError`]): business failures reported by collaborators
//!   (wrong password, user not found, duplicated identity). They never advance the tree;
//!   the same step is offered again on the next submission.
//! * **Validation** ([`ValidationError`]): the raw input does not satisfy the pending schema.
//! * **Incompatible input**: the input does not fit the current decision point.
//! * **Internal**: configuration or engine consistency bugs. These must map to fatal
//!   responses and are never downgraded to retryable client errors.
//!
//! Control directives (EOF, pause, switch, rewrite) are not errors at all; they travel as
//! [`Reaction`](crate::outcome::Reaction) and [`Outcome`](crate::outcome::Outcome) values.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Broad classification of a client-facing error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Invalid,
    Unauthorized,
    Forbidden,
    NotFound,
    AlreadyExists,
    TooManyRequest,
    ServiceUnavailable,
}

/// A user-facing failure with a stable machine-readable reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub reason: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn invalid(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, reason, message)
    }

    pub fn not_found(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, reason, message)
    }

    pub fn forbidden(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, reason, message)
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

impl std::error::Error for ApiError {}

/// One failing location inside a validated input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub location: String,
    pub keyword: String,
    pub message: String,
}

/// Aggregated schema validation failures.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationError {
    pub failures: Vec<ValidationFailure>,
}

impl ValidationError {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn push(
        &mut self,
        location: &str,
        keyword: &str,
        message: impl Into<String>,
    ) {
        self.failures.push(ValidationFailure {
            location: if location.is_empty() {
                "/".to_string()
            } else {
                location.to_string()
            },
            keyword: keyword.to_string(),
            message: message.into(),
        });
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .failures
            .iter()
            .map(|failure| format!("{} ({}): {}", failure.location, failure.keyword, failure.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("incompatible input")]
    IncompatibleInput,

    #[error("no user id found in flow")]
    NoUserId,

    #[error("flow contains different user ids")]
    DifferentUserId,

    #[error("missing dependency: {0}")]
    MissingDependency(&'static str),

    #[error("unknown kind: {0}")]
    UnknownKind(String),

    #[error("duplicate kind: {0}")]
    DuplicateKind(&'static str),

    #[error("invalid flow document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowError {
    pub fn internal(message: impl Into<String>) -> Self {
        FlowError::Internal(message.into())
    }

    /// True for errors that indicate an engine or configuration bug.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            FlowError::Internal(_)
                | FlowError::NoUserId
                | FlowError::DifferentUserId
                | FlowError::MissingDependency(_)
                | FlowError::UnknownKind(_)
                | FlowError::DuplicateKind(_)
                | FlowError::Document(_)
        )
    }

    /// True for errors the client can fix by resubmitting.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FlowError::Api(_) | FlowError::Validation(_) | FlowError::IncompatibleInput
        )
    }

    pub fn api(&self) -> Option<&ApiError> {
        match self {
            FlowError::Api(err) => Some(err),
            _ => None,
        }
    }

    /// Reason of the wrapped [`ApiError`], if any.
    pub fn reason(&self) -> Option<&str> {
        self.api().map(|err| err.reason.as_str())
    }
}
