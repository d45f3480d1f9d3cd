use crate::bot_protection::{IntentBotProtection, is_verified, required_provider};
use crate::config::FlowStep;
use crate::deps::{DepsExt, RateLimit};
use crate::errors;
use crate::identity::{IdentifyInput, NodeDoUseIdentity, resolve_spec};
use crate::milestones::{IdentificationMethod, NestedSteps};
use crate::schemas;
use crate::steps::IntentFlowSteps;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::error::FlowError;
use authflow_core::flow::{FlowReference, FlowType, Flows};
use authflow_core::input::{Input, InputSchema};
use authflow_core::intent::{InputReactor, Intent, Kind};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::milestone::find_milestone_in_current_flow;
use authflow_core::outcome::{Outcome, Reaction, SwitchFlow};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Identifies an existing user by login id or OAuth.
///
/// An unknown user switches to the login flow's `signup_flow`, replaying the
/// identification, or fails with `UserNotFound` when none is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentLoginFlowStepIdentify {
    pub json_pointer: JsonPointer,
}

impl IntentLoginFlowStepIdentify {
    pub fn new(json_pointer: JsonPointer) -> Self {
        Self { json_pointer }
    }
}

impl Kind for IntentLoginFlowStepIdentify {
    const KIND: &'static str = "IntentLoginFlowStepIdentify";
}

#[async_trait]
impl InputReactor for IntentLoginFlowStepIdentify {
    async fn can_react_to(&self, ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        match find_milestone_in_current_flow::<IdentificationMethod>(flows) {
            None => {
                let config = ctx.app_config()?;
                let step: FlowStep = config.flow_object(ctx.flow_reference(), &self.json_pointer)?;
                Ok(Reaction::Input(InputSchema::new(
                    self.json_pointer.clone(),
                    schemas::identify(config, &step),
                )))
            }
            Some(_) if find_milestone_in_current_flow::<NestedSteps>(flows).is_none() => {
                Ok(Reaction::Automatic)
            }
            Some(_) => Ok(Reaction::Eof),
        }
    }

    async fn react_to(
        &self,
        ctx: &Context,
        flows: Flows<'_>,
        input: Option<&Input>,
    ) -> Result<Outcome, FlowError> {
        if let Some((method, _)) = find_milestone_in_current_flow::<IdentificationMethod>(flows) {
            if find_milestone_in_current_flow::<NestedSteps>(flows).is_none() {
                return Ok(Outcome::sub_flow(IntentFlowSteps::new(method.json_pointer)));
            }
            return Ok(Outcome::Incompatible);
        }

        let Some(data) = input.and_then(Input::decode::<IdentifyInput>) else {
            return Ok(Outcome::Incompatible);
        };
        let config = ctx.app_config()?;
        let step: FlowStep = config.flow_object(ctx.flow_reference(), &self.json_pointer)?;
        let Some((idx, branch)) = step.identification_branch(data.identification) else {
            return Ok(Outcome::Incompatible);
        };
        let branch_pointer = self.json_pointer.one_of(idx);

        if required_provider(config, branch).is_some() && !is_verified(flows.nearest) {
            return Ok(Outcome::sub_flow(IntentBotProtection {
                json_pointer: branch_pointer,
            }));
        }

        let Some(spec) = resolve_spec(ctx, config, &data).await? else {
            return Ok(Outcome::Incompatible);
        };

        let limiter = ctx.rate_limiter()?;
        let reservation = limiter
            .allow(RateLimit::account_enumeration(ctx.remote_ip()))
            .await?;
        if let Some(identity) = ctx.identities()?.search_by_spec(&spec).await? {
            limiter.cancel(reservation).await;
            return Ok(Outcome::simple(NodeDoUseIdentity {
                identification: data.identification,
                json_pointer: branch_pointer,
                identity,
            }));
        }

        let login = config.login_flow(&ctx.flow_reference().name).ok_or_else(|| {
            FlowError::internal(format!("{} is not a configured login flow", ctx.flow_reference()))
        })?;
        match &login.signup_flow {
            Some(signup) => {
                info!(identification = %data.identification, signup_flow = %signup, "unknown user, switching to signup");
                Ok(Outcome::SwitchFlow(SwitchFlow {
                    reference: FlowReference::new(FlowType::Signup, signup.clone()),
                    synthetic_input: Input::synthetic(spec.replay_input(data.identification)),
                }))
            }
            None => Err(errors::user_not_found()),
        }
    }
}

impl Intent for IntentLoginFlowStepIdentify {}
