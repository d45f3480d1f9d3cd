use crate::account_recovery::IntentAccountRecoveryFlow;
use crate::deps::DepsExt;
use crate::errors;
use crate::login::IntentLoginFlow;
use crate::reauth::IntentReauthFlow;
use crate::signup::IntentSignupFlow;
use authflow_core::context::Context;
use authflow_core::error::{ApiError, FlowError};
use authflow_core::flow::{FlowFactory, FlowReference, FlowType};
use authflow_core::intent::Intent;

/// Creates root intents for configured flows.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclarativeFlowFactory;

impl FlowFactory for DeclarativeFlowFactory {
    fn create(&self, ctx: &Context, reference: &FlowReference) -> Result<Box<dyn Intent>, FlowError> {
        let config = ctx.app_config()?;
        match reference.flow_type {
            FlowType::Login => {
                let flow = config
                    .login_flow(&reference.name)
                    .ok_or_else(|| flow_not_found(reference))?;
                Ok(Box::new(IntentLoginFlow {
                    required_amr: flow.required_amr.clone(),
                }))
            }
            FlowType::Signup => {
                config
                    .signup_flow(&reference.name)
                    .ok_or_else(|| flow_not_found(reference))?;
                Ok(Box::new(IntentSignupFlow::new()))
            }
            FlowType::Reauth => {
                config
                    .reauth_flow(&reference.name)
                    .ok_or_else(|| flow_not_found(reference))?;
                let user_id = ctx.user_id_hint().ok_or_else(errors::reauth_user_required)?;
                Ok(Box::new(IntentReauthFlow::new(user_id)))
            }
            FlowType::AccountRecovery => {
                config
                    .account_recovery_flow(&reference.name)
                    .ok_or_else(|| flow_not_found(reference))?;
                Ok(Box::new(IntentAccountRecoveryFlow::default()))
            }
        }
    }
}

fn flow_not_found(reference: &FlowReference) -> FlowError {
    ApiError::not_found("FlowNotFound", "flow is not configured")
        .with_detail("flow", reference.to_string())
        .into()
}
