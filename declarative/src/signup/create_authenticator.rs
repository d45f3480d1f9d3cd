use crate::config::FlowStep;
use crate::deps::DepsExt;
use crate::milestones::{DoCreateAuthenticator, NestedSteps};
use crate::model::{Authentication, AuthenticatorInfo};
use crate::schemas;
use crate::steps::IntentFlowSteps;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::effect::Effect;
use authflow_core::error::FlowError;
use authflow_core::flow::Flows;
use authflow_core::input::{Input, InputSchema};
use authflow_core::intent::{InputReactor, Intent, Kind, NodeSimple};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::milestone::{MilestoneRequest, find_milestone_in_current_flow, get_user_id};
use authflow_core::outcome::{Outcome, Reaction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
struct CreateAuthenticatorInput {
    authentication: Authentication,
    new_password: String,
}

/// Sets up the user's primary password. Skipped when the user already has one, which
/// happens after account linking adopted an existing account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSignupFlowStepCreateAuthenticator {
    pub json_pointer: JsonPointer,
}

impl IntentSignupFlowStepCreateAuthenticator {
    pub fn new(json_pointer: JsonPointer) -> Self {
        Self { json_pointer }
    }
}

impl Kind for IntentSignupFlowStepCreateAuthenticator {
    const KIND: &'static str = "IntentSignupFlowStepCreateAuthenticator";
}

#[async_trait]
impl InputReactor for IntentSignupFlowStepCreateAuthenticator {
    async fn can_react_to(&self, ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        if find_milestone_in_current_flow::<DoCreateAuthenticator>(flows).is_none() {
            let user_id = get_user_id(flows)?;
            let owned = ctx.authenticators()?.list(&user_id).await?;
            if owned
                .iter()
                .any(|info| info.authentication == Authentication::PrimaryPassword)
            {
                return Ok(Reaction::Eof);
            }
            let step: FlowStep = ctx
                .app_config()?
                .flow_object(ctx.flow_reference(), &self.json_pointer)?;
            return Ok(Reaction::Input(InputSchema::new(
                self.json_pointer.clone(),
                schemas::create_authenticator(&step),
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
        if let Some((created, _)) = find_milestone_in_current_flow::<DoCreateAuthenticator>(flows) {
            return Ok(match find_milestone_in_current_flow::<NestedSteps>(flows) {
                None => Outcome::sub_flow(IntentFlowSteps::new(created.json_pointer)),
                Some(_) => Outcome::Incompatible,
            });
        }

        let Some(data) = input.and_then(Input::decode::<CreateAuthenticatorInput>) else {
            return Ok(Outcome::Incompatible);
        };
        let step: FlowStep = ctx
            .app_config()?
            .flow_object(ctx.flow_reference(), &self.json_pointer)?;
        let Some((idx, _)) = step.authentication_branch(data.authentication) else {
            return Ok(Outcome::Incompatible);
        };
        if data.authentication != Authentication::PrimaryPassword {
            return Err(FlowError::internal(format!(
                "cannot create a {} authenticator",
                data.authentication
            )));
        }

        let user_id = get_user_id(flows)?;
        let authenticator = ctx
            .authenticators()?
            .new_password(&user_id, data.authentication, &data.new_password)
            .await?;
        Ok(Outcome::simple(NodeDoCreateAuthenticator {
            authenticator,
            json_pointer: self.json_pointer.one_of(idx),
        }))
    }
}

impl Intent for IntentSignupFlowStepCreateAuthenticator {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDoCreateAuthenticator {
    pub authenticator: AuthenticatorInfo,
    pub json_pointer: JsonPointer,
}

impl Kind for NodeDoCreateAuthenticator {
    const KIND: &'static str = "NodeDoCreateAuthenticator";
}

impl NodeSimple for NodeDoCreateAuthenticator {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| DoCreateAuthenticator {
            authenticator: self.authenticator.clone(),
            json_pointer: self.json_pointer.clone(),
        });
    }

    fn effects(&self, _ctx: &Context, _flows: Flows<'_>) -> Result<Vec<Effect>, FlowError> {
        let authenticator = self.authenticator.clone();
        Ok(vec![Effect::run(move |ctx| async move {
            ctx.authenticators()?.create(&authenticator).await
        })])
    }
}
