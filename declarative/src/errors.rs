//! User-facing failures raised by the flows and their collaborators.
//!
//! Each is an [`ApiError`] with a stable `reason`; clients match on the reason, never on
//! the message.

use authflow_core::error::{ApiError, ErrorKind, FlowError};
use serde_json::json;
use std::collections::BTreeSet;

pub fn user_not_found() -> FlowError {
    ApiError::not_found("UserNotFound", "user not found").into()
}

pub fn invalid_credentials() -> FlowError {
    ApiError::new(ErrorKind::Unauthorized, "InvalidCredentials", "invalid credentials").into()
}

pub fn duplicated_identity() -> FlowError {
    ApiError::new(ErrorKind::AlreadyExists, "DuplicatedIdentity", "identity already exists").into()
}

pub fn account_linking_conflict(conflicts: usize) -> FlowError {
    ApiError::invalid(
        "AccountLinkingConflict",
        "identity conflicts with an existing account",
    )
    .with_detail("conflicts", conflicts)
    .into()
}

pub fn amr_constraints_unsatisfiable(remaining: &BTreeSet<String>) -> FlowError {
    ApiError::invalid(
        "AMRConstraintsUnsatisfiable",
        "no authenticator can satisfy the required authentication methods",
    )
    .with_detail("remaining", json!(remaining))
    .into()
}

pub fn disabled_user() -> FlowError {
    ApiError::forbidden("DisabledUser", "user is disabled").into()
}

pub fn webhook_disallowed() -> FlowError {
    ApiError::forbidden("WebHookDisallowed", "disallowed by web-hook event handler").into()
}

pub fn too_many_request(limit: &str) -> FlowError {
    ApiError::new(ErrorKind::TooManyRequest, "RateLimited", "request rate limited")
        .with_detail("bucket", limit)
        .into()
}

pub fn oauth_provider_not_found(alias: &str) -> FlowError {
    ApiError::invalid("OAuthProviderNotFound", "oauth provider is not configured")
        .with_detail("alias", alias)
        .into()
}

pub fn no_authenticator() -> FlowError {
    ApiError::invalid("NoAuthenticator", "user has no authenticator for this step").into()
}

pub fn invalid_account_recovery_code() -> FlowError {
    ApiError::invalid("InvalidAccountRecoveryCode", "invalid or expired account recovery code").into()
}

pub fn reauth_user_required() -> FlowError {
    ApiError::new(
        ErrorKind::Unauthorized,
        "ReauthUserRequired",
        "reauthentication needs a signed-in user",
    )
    .into()
}
