use crate::account_linking::IntentAccountLinking;
use crate::account_recovery::{
    IntentAccountRecoveryFlow, IntentAccountRecoveryFlowStepIdentify,
    IntentAccountRecoveryFlowStepResetPassword, IntentAccountRecoveryFlowStepVerifyCode,
    NodeDidVerifyAccountRecoveryCode, NodeDoResetPassword, NodeDoUseAccountRecoveryIdentity,
};
use crate::authenticator::{
    IntentUseAuthenticator, NodeDidAuthenticate, NodeDidInspectDeviceToken,
    NodeDoCreateDeviceTokenIfRequested,
};
use crate::bot_protection::{IntentBotProtection, NodeDidVerifyBotProtection};
use crate::finish::NodeDoDispatchEvent;
use crate::identity::{NodeDoCreateIdentity, NodeDoUseIdentity};
use crate::login::{
    IntentAmrConstraints, IntentLoginFlow, IntentLoginFlowStepAuthenticate,
    IntentLoginFlowStepCreateAuthenticator, IntentLoginFlowStepIdentify,
    NodeDidDispatchPreAuthenticated,
};
use crate::reauth::{IntentReauthFlow, IntentReauthFlowStepAuthenticate};
use crate::signup::{
    IntentSignupFlow, IntentSignupFlowStepCreateAuthenticator, IntentSignupFlowStepIdentify,
    NodeDoCreateAuthenticator, NodeDoCreateUser,
};
use crate::steps::IntentFlowSteps;
use authflow_core::error::FlowError;
use authflow_core::registry::Registry;

/// Every intent and node the declarative flows persist.
pub fn registry() -> Result<Registry, FlowError> {
    Registry::builder()
        .intent::<IntentLoginFlow>()
        .intent::<IntentSignupFlow>()
        .intent::<IntentFlowSteps>()
        .intent::<IntentLoginFlowStepIdentify>()
        .intent::<IntentSignupFlowStepIdentify>()
        .intent::<IntentLoginFlowStepAuthenticate>()
        .intent::<IntentUseAuthenticator>()
        .intent::<IntentAmrConstraints>()
        .intent::<IntentSignupFlowStepCreateAuthenticator>()
        .intent::<IntentBotProtection>()
        .intent::<IntentAccountLinking>()
        .intent::<IntentLoginFlowStepCreateAuthenticator>()
        .intent::<IntentReauthFlow>()
        .intent::<IntentReauthFlowStepAuthenticate>()
        .intent::<IntentAccountRecoveryFlow>()
        .intent::<IntentAccountRecoveryFlowStepIdentify>()
        .intent::<IntentAccountRecoveryFlowStepVerifyCode>()
        .intent::<IntentAccountRecoveryFlowStepResetPassword>()
        .node::<NodeDoUseIdentity>()
        .node::<NodeDoCreateIdentity>()
        .node::<NodeDidAuthenticate>()
        .node::<NodeDidInspectDeviceToken>()
        .node::<NodeDoCreateDeviceTokenIfRequested>()
        .node::<NodeDidDispatchPreAuthenticated>()
        .node::<NodeDoDispatchEvent>()
        .node::<NodeDoCreateUser>()
        .node::<NodeDoCreateAuthenticator>()
        .node::<NodeDidVerifyBotProtection>()
        .node::<NodeDoUseAccountRecoveryIdentity>()
        .node::<NodeDidVerifyAccountRecoveryCode>()
        .node::<NodeDoResetPassword>()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_unique() {
        let registry = registry().unwrap();
        let kinds = registry.kinds();
        assert_eq!(kinds.len(), 31);
        assert!(registry.is_intent("IntentAccountLinking"));
        assert!(!registry.is_intent("NodeDoDispatchEvent"));
        assert!(registry.is_intent("IntentReauthFlow"));
        assert!(!registry.is_intent("NodeDoResetPassword"));
    }
}
