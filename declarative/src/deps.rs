//! # Collaborators
//!
//! Flows never touch storage or the network themselves. Everything they read or write goes
//! through the narrow services below, stored in the [`Bus`](authflow_core::bus::Bus) as
//! `Arc<dyn Trait>` and reached through [`DepsExt`] on the [`Context`].
//!
//! Business failures (wrong password, duplicated identity) are returned as
//! [`ApiError`](authflow_core::error::ApiError)s inside [`FlowError`], see [`crate::errors`].

use crate::config::AppConfig;
use crate::model::{
    Authentication, AuthenticatorInfo, BlockingEventResponse, Event, IdentityInfo, IdentitySpec,
    OAuthAssertion, RecoveryCode, User, Verification,
};
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::error::FlowError;
use std::sync::Arc;

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// The identity with the same unique key as `spec`, if any.
    async fn search_by_spec(&self, spec: &IdentitySpec) -> Result<Option<IdentityInfo>, FlowError>;

    /// Identities whose standard claim `claim` equals `value`.
    async fn list_by_claim(&self, claim: &str, value: &str) -> Result<Vec<IdentityInfo>, FlowError>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<IdentityInfo>, FlowError>;

    /// Build (but do not store) an identity for `user_id`.
    async fn new_identity(&self, user_id: &str, spec: IdentitySpec) -> Result<IdentityInfo, FlowError>;

    /// Fails with `DuplicatedIdentity` when another identity holds the same unique key.
    async fn check_duplicated_by_unique_key(&self, identity: &IdentityInfo) -> Result<(), FlowError>;

    async fn create(&self, identity: &IdentityInfo) -> Result<(), FlowError>;
}

#[async_trait]
pub trait AuthenticatorService: Send + Sync {
    async fn list(&self, user_id: &str) -> Result<Vec<AuthenticatorInfo>, FlowError>;

    /// Verify `secret` against the user's authenticator serving `authentication`.
    async fn verify_one_with_spec(
        &self,
        user_id: &str,
        authentication: Authentication,
        secret: &str,
    ) -> Result<Verification, FlowError>;

    /// Build a primary or secondary password authenticator; the secret is kept by the
    /// service until `create`.
    async fn new_password(
        &self,
        user_id: &str,
        authentication: Authentication,
        password: &str,
    ) -> Result<AuthenticatorInfo, FlowError>;

    async fn create(&self, authenticator: &AuthenticatorInfo) -> Result<(), FlowError>;

    async fn update(&self, authenticator: &AuthenticatorInfo) -> Result<(), FlowError>;
}

#[async_trait]
pub trait MfaService: Send + Sync {
    async fn verify_recovery_code(&self, user_id: &str, code: &str) -> Result<RecoveryCode, FlowError>;

    async fn consume_recovery_code(&self, code: &RecoveryCode) -> Result<(), FlowError>;

    /// True when `token` is a live device token of the user.
    async fn verify_device_token(&self, user_id: &str, token: &str) -> Result<bool, FlowError>;

    fn generate_device_token(&self) -> String;

    async fn create_device_token(&self, user_id: &str, token: &str) -> Result<(), FlowError>;
}

/// One-time codes proving control over a login id, and the password reset they unlock.
#[async_trait]
pub trait AccountRecoveryService: Send + Sync {
    /// Deliver a fresh code to the identity's email or phone.
    async fn send_code(&self, identity: &IdentityInfo) -> Result<(), FlowError>;

    /// Fails with `InvalidAccountRecoveryCode` unless `code` was sent to `identity` and is
    /// still unused. Does not consume the code.
    async fn verify_code(&self, identity: &IdentityInfo, code: &str) -> Result<(), FlowError>;

    /// Consume `code` and make `password` the owner's only primary password.
    async fn reset_password(&self, code: &str, password: &AuthenticatorInfo) -> Result<(), FlowError>;
}

#[async_trait]
pub trait UserService: Send + Sync {
    async fn get_raw(&self, user_id: &str) -> Result<User, FlowError>;

    async fn create(&self, user_id: &str) -> Result<User, FlowError>;

    /// Rejects users that may not sign in.
    async fn check_account_status(&self, user: &User) -> Result<(), FlowError> {
        if user.disabled {
            return Err(crate::errors::disabled_user());
        }
        Ok(())
    }
}

#[async_trait]
pub trait EventService: Send + Sync {
    /// Run a blocking hook inside the current transaction and return its response.
    async fn prepare_blocking_event_with_tx(&self, event: &Event) -> Result<BlockingEventResponse, FlowError>;

    async fn dispatch_event_without_tx(&self, event: &Event) -> Result<(), FlowError>;

    /// Queue a non-blocking event delivered once the transaction commits.
    async fn dispatch_event_on_commit(&self, event: &Event) -> Result<(), FlowError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    pub name: &'static str,
    pub key: String,
}

impl RateLimit {
    pub const ACCOUNT_ENUMERATION_PER_IP: &'static str = "account_enumeration_per_ip";

    pub fn account_enumeration(remote_ip: Option<&str>) -> Self {
        Self {
            name: Self::ACCOUNT_ENUMERATION_PER_IP,
            key: remote_ip.unwrap_or_default().to_string(),
        }
    }
}

/// A token taken from a bucket. Cancelling gives it back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub limit: RateLimit,
    pub id: String,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Take a token, or fail with `TooManyRequest`.
    async fn allow(&self, limit: RateLimit) -> Result<Reservation, FlowError>;

    async fn cancel(&self, reservation: Reservation);
}

pub trait CookieStore: Send + Sync {
    fn device_token(&self) -> Option<String>;

    fn set_device_token(&self, token: &str);

    fn clear_device_token(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotVerification {
    Verified,
    Failed,
    ServiceUnavailable,
}

#[async_trait]
pub trait BotProtectionVerifier: Send + Sync {
    async fn verify(
        &self,
        provider_type: &str,
        response: &str,
        remote_ip: Option<&str>,
    ) -> Result<BotVerification, FlowError>;
}

#[async_trait]
pub trait OAuthProviderService: Send + Sync {
    /// Exchange an authorization code for the provider's assertion about the user.
    async fn exchange(&self, alias: &str, code: &str) -> Result<OAuthAssertion, FlowError>;
}

/// Typed access to the collaborators held by the context's bus.
pub trait DepsExt {
    fn app_config(&self) -> Result<&AppConfig, FlowError>;
    fn identities(&self) -> Result<&dyn IdentityService, FlowError>;
    fn authenticators(&self) -> Result<&dyn AuthenticatorService, FlowError>;
    fn mfa(&self) -> Result<&dyn MfaService, FlowError>;
    fn users(&self) -> Result<&dyn UserService, FlowError>;
    fn events(&self) -> Result<&dyn EventService, FlowError>;
    fn rate_limiter(&self) -> Result<&dyn RateLimiter, FlowError>;
    fn cookies(&self) -> Result<&dyn CookieStore, FlowError>;
    fn bot_protection(&self) -> Result<&dyn BotProtectionVerifier, FlowError>;
    fn oauth(&self) -> Result<&dyn OAuthProviderService, FlowError>;
    fn account_recovery(&self) -> Result<&dyn AccountRecoveryService, FlowError>;
}

impl DepsExt for Context {
    fn app_config(&self) -> Result<&AppConfig, FlowError> {
        Ok(self.require::<Arc<AppConfig>>()?.as_ref())
    }

    fn identities(&self) -> Result<&dyn IdentityService, FlowError> {
        Ok(self.require::<Arc<dyn IdentityService>>()?.as_ref())
    }

    fn authenticators(&self) -> Result<&dyn AuthenticatorService, FlowError> {
        Ok(self.require::<Arc<dyn AuthenticatorService>>()?.as_ref())
    }

    fn mfa(&self) -> Result<&dyn MfaService, FlowError> {
        Ok(self.require::<Arc<dyn MfaService>>()?.as_ref())
    }

    fn users(&self) -> Result<&dyn UserService, FlowError> {
        Ok(self.require::<Arc<dyn UserService>>()?.as_ref())
    }

    fn events(&self) -> Result<&dyn EventService, FlowError> {
        Ok(self.require::<Arc<dyn EventService>>()?.as_ref())
    }

    fn rate_limiter(&self) -> Result<&dyn RateLimiter, FlowError> {
        Ok(self.require::<Arc<dyn RateLimiter>>()?.as_ref())
    }

    fn cookies(&self) -> Result<&dyn CookieStore, FlowError> {
        Ok(self.require::<Arc<dyn CookieStore>>()?.as_ref())
    }

    fn bot_protection(&self) -> Result<&dyn BotProtectionVerifier, FlowError> {
        Ok(self.require::<Arc<dyn BotProtectionVerifier>>()?.as_ref())
    }

    fn oauth(&self) -> Result<&dyn OAuthProviderService, FlowError> {
        Ok(self.require::<Arc<dyn OAuthProviderService>>()?.as_ref())
    }

    fn account_recovery(&self) -> Result<&dyn AccountRecoveryService, FlowError> {
        Ok(self.require::<Arc<dyn AccountRecoveryService>>()?.as_ref())
    }
}
