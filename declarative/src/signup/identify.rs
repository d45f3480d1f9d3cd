use crate::account_linking::{IntentAccountLinking, detect_conflicts};
use crate::bot_protection::{IntentBotProtection, is_verified, required_provider};
use crate::config::FlowStep;
use crate::deps::DepsExt;
use crate::identity::{IdentifyInput, NodeDoCreateIdentity, resolve_spec};
use crate::milestones::{IdentificationMethod, NestedSteps};
use crate::schemas;
use crate::steps::IntentFlowSteps;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::error::FlowError;
use authflow_core::flow::Flows;
use authflow_core::input::{Input, InputSchema};
use authflow_core::intent::{InputReactor, Intent, Kind};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::milestone::{find_milestone_in_current_flow, get_user_id};
use authflow_core::outcome::{Outcome, Reaction};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Attaches a new identity to the signup user, or hands over to account linking when
/// the identity's claim already belongs to someone else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSignupFlowStepIdentify {
    pub json_pointer: JsonPointer,
}

impl IntentSignupFlowStepIdentify {
    pub fn new(json_pointer: JsonPointer) -> Self {
        Self { json_pointer }
    }
}

impl Kind for IntentSignupFlowStepIdentify {
    const KIND: &'static str = "IntentSignupFlowStepIdentify";
}

#[async_trait]
impl InputReactor for IntentSignupFlowStepIdentify {
    async fn can_react_to(&self, ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        if find_milestone_in_current_flow::<IdentificationMethod>(flows).is_none() {
            let config = ctx.app_config()?;
            let step: FlowStep = config.flow_object(ctx.flow_reference(), &self.json_pointer)?;
            return Ok(Reaction::Input(InputSchema::new(
                self.json_pointer.clone(),
                schemas::identify(config, &step),
            )));
        }
        if find_milestone_in_current_flow::<NestedSteps>(flows).is_none() {
            return Ok(Reaction::Automatic);
        }
        Ok(Reaction::Eof)
    }

    async fn react_to(
        &self,
        ctx: &Context,
        flows: Flows<'_>,
        input: Option<&Input>,
    ) -> Result<Outcome, FlowError> {
        if let Some((method, _)) = find_milestone_in_current_flow::<IdentificationMethod>(flows) {
            return Ok(match find_milestone_in_current_flow::<NestedSteps>(flows) {
                None => Outcome::sub_flow(IntentFlowSteps::new(method.json_pointer)),
                Some(_) => Outcome::Incompatible,
            });
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
        let user_id = get_user_id(flows)?;
        let identity = ctx.identities()?.new_identity(&user_id, spec).await?;

        let conflicts = detect_conflicts(ctx, &identity, branch.account_linking.as_ref()).await?;
        if conflicts.is_empty() {
            return Ok(Outcome::simple(NodeDoCreateIdentity {
                identification: data.identification,
                json_pointer: branch_pointer,
                identity,
            }));
        }

        info!(user_id = %user_id, conflicts = conflicts.len(), "identity conflicts with existing accounts");
        Ok(Outcome::sub_flow(IntentAccountLinking {
            json_pointer: branch_pointer,
            conflicts,
            synthetic_input: identity.spec.replay_input(data.identification),
        }))
    }
}

impl Intent for IntentSignupFlowStepIdentify {}
