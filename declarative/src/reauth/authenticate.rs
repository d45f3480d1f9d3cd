use crate::authenticator::IntentUseAuthenticator;
use crate::config::FlowStep;
use crate::deps::DepsExt;
use crate::errors;
use crate::login::{AuthenticationCandidate, step_branches, usable};
use crate::milestones::{AuthenticationMethod, DidAuthenticate, NestedSteps};
use crate::model::Authentication;
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
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
struct SelectInput {
    authentication: Authentication,
}

/// Authenticates the signed-in user with a branch they hold an authenticator for.
///
/// Unlike login, the step is never optional and device tokens are not honoured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentReauthFlowStepAuthenticate {
    pub json_pointer: JsonPointer,
}

impl IntentReauthFlowStepAuthenticate {
    pub fn new(json_pointer: JsonPointer) -> Self {
        Self { json_pointer }
    }

    async fn candidates(&self, ctx: &Context, flows: Flows<'_>) -> Result<Vec<AuthenticationCandidate>, FlowError> {
        let step: FlowStep = ctx
            .app_config()?
            .flow_object(ctx.flow_reference(), &self.json_pointer)?;
        let user_id = get_user_id(flows)?;
        let owned = ctx.authenticators()?.list(&user_id).await?;
        Ok(usable(step_branches(&step, &self.json_pointer), &owned))
    }
}

impl Kind for IntentReauthFlowStepAuthenticate {
    const KIND: &'static str = "IntentReauthFlowStepAuthenticate";
}

#[async_trait]
impl InputReactor for IntentReauthFlowStepAuthenticate {
    async fn can_react_to(&self, ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        let Some((method, method_flows)) = find_milestone_in_current_flow::<AuthenticationMethod>(flows) else {
            let candidates = self.candidates(ctx, flows).await?;
            if candidates.is_empty() {
                return Err(errors::no_authenticator());
            }
            let options: Vec<Authentication> = candidates.iter().map(|c| c.authentication).collect();
            return Ok(Reaction::Input(InputSchema::new(
                self.json_pointer.clone(),
                schemas::select_authentication(&options),
            )));
        };
        if find_milestone_in_current_flow::<DidAuthenticate>(method_flows).is_none() {
            return Err(FlowError::internal(format!(
                "{} finished without authenticating",
                method.authentication
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
        if let Some((method, _)) = find_milestone_in_current_flow::<AuthenticationMethod>(flows) {
            return Ok(match find_milestone_in_current_flow::<NestedSteps>(flows) {
                None => Outcome::sub_flow(IntentFlowSteps::new(method.json_pointer)),
                Some(_) => Outcome::Incompatible,
            });
        }
        let Some(selected) = input.and_then(Input::decode::<SelectInput>) else {
            return Ok(Outcome::Incompatible);
        };
        let Some(candidate) = self
            .candidates(ctx, flows)
            .await?
            .into_iter()
            .find(|candidate| candidate.authentication == selected.authentication)
        else {
            return Ok(Outcome::Incompatible);
        };
        Ok(Outcome::sub_flow(IntentUseAuthenticator {
            authentication: candidate.authentication,
            json_pointer: candidate.json_pointer,
        }))
    }

    async fn output_data(&self, ctx: &Context, flows: Flows<'_>) -> Result<Value, FlowError> {
        if find_milestone_in_current_flow::<AuthenticationMethod>(flows).is_some() {
            return Ok(json!({}));
        }
        let candidates = self.candidates(ctx, flows).await?;
        Ok(json!({"candidates": candidates}))
    }
}

impl Intent for IntentReauthFlowStepAuthenticate {}
