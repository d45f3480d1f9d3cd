//! Capabilities exposed by the flow payloads.
//!
//! Intents decide what to do next by asking the tree which of these exist, never by
//! matching on concrete node types.

use crate::model::{Authentication, AuthenticatorInfo, Identification, IdentityInfo};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::milestone::Milestone;
use authflow_core::outcome::BotProtectionStatus;

/// An existing identity was used to identify the user.
#[derive(Debug, Clone, PartialEq)]
pub struct DoUseIdentity(pub IdentityInfo);

impl Milestone for DoUseIdentity {}

/// A new identity is created by this flow.
#[derive(Debug, Clone, PartialEq)]
pub struct DoCreateIdentity(pub IdentityInfo);

impl Milestone for DoCreateIdentity {}

/// The identification branch that was chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentificationMethod {
    pub identification: Identification,
    pub json_pointer: JsonPointer,
}

impl Milestone for IdentificationMethod {}

/// The authentication branch that was chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticationMethod {
    pub authentication: Authentication,
    pub json_pointer: JsonPointer,
}

impl Milestone for AuthenticationMethod {}

/// One completed authentication event.
#[derive(Debug, Clone, PartialEq)]
pub struct DidAuthenticate {
    pub authentication: Authentication,
    /// `None` for factors without an authenticator record (recovery code, device token).
    pub authenticator_id: Option<String>,
    pub amr: Vec<String>,
    pub request_device_token: bool,
}

impl Milestone for DidAuthenticate {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTokenInspected;

impl Milestone for DeviceTokenInspected {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoCreateDeviceTokenIfRequested;

impl Milestone for DoCreateDeviceTokenIfRequested {}

/// A sub-flow walking the `steps` nested under a branch (or the flow root).
#[derive(Debug, Clone, PartialEq)]
pub struct NestedSteps(pub JsonPointer);

impl Milestone for NestedSteps {}

/// AMR tokens the flow requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintsProvider(pub Vec<String>);

impl Milestone for ConstraintsProvider {}

/// The pre-authenticated hook ran and its constraints are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DidDispatchPreAuthenticated;

impl Milestone for DidDispatchPreAuthenticated {}

/// The sub-flow enforcing AMR constraints was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmrConstraints;

impl Milestone for AmrConstraints {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DidVerifyBotProtection(pub BotProtectionStatus);

impl Milestone for DidVerifyBotProtection {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoCreateUser(pub String);

impl Milestone for DoCreateUser {}

#[derive(Debug, Clone, PartialEq)]
pub struct DoCreateAuthenticator {
    pub authenticator: AuthenticatorInfo,
    pub json_pointer: JsonPointer,
}

impl Milestone for DoCreateAuthenticator {}

/// The final event of a flow; EOF waits for `invoked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoFinish {
    pub invoked: bool,
}

impl Milestone for DoFinish {}

/// The login id an account recovery flow works on. `identity` is `None` when the login id
/// is unknown and the branch ignores that.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecoveryIdentity {
    pub identification: Identification,
    pub json_pointer: JsonPointer,
    pub identity: Option<IdentityInfo>,
}

impl Milestone for AccountRecoveryIdentity {}

/// A valid account recovery code, kept for the password reset that consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidVerifyAccountRecoveryCode(pub String);

impl Milestone for DidVerifyAccountRecoveryCode {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoResetPassword;

impl Milestone for DoResetPassword {}
