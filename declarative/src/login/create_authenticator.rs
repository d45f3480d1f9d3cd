use crate::config::FlowStep;
use crate::deps::DepsExt;
use crate::errors;
use crate::milestones::{DoCreateAuthenticator, NestedSteps};
use crate::model::{Authentication, AuthenticatorInfo};
use crate::schemas;
use crate::signup::NodeDoCreateAuthenticator;
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
struct CreateAuthenticatorInput {
    authentication: Authentication,
    new_password: String,
}

/// Enrolls a secondary authenticator for a user who signed in without one.
///
/// Only secondary branches are offered. A user who already owns one of the step's
/// authenticators skips the step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentLoginFlowStepCreateAuthenticator {
    pub json_pointer: JsonPointer,
}

impl IntentLoginFlowStepCreateAuthenticator {
    pub fn new(json_pointer: JsonPointer) -> Self {
        Self { json_pointer }
    }

    fn step(&self, ctx: &Context) -> Result<FlowStep, FlowError> {
        ctx.app_config()?
            .flow_object(ctx.flow_reference(), &self.json_pointer)
    }

    /// Secondary options of `step`, or `None` when the user already owns one of them.
    fn options(step: &FlowStep, owned: &[AuthenticatorInfo]) -> Option<Vec<Authentication>> {
        let offered: Vec<Authentication> = step
            .one_of
            .iter()
            .filter_map(|branch| branch.authentication)
            .filter(|authentication| authentication.is_secondary())
            .collect();
        let enrolled = offered
            .iter()
            .any(|offered| owned.iter().any(|info| info.authentication == *offered));
        (!enrolled).then_some(offered)
    }
}

impl Kind for IntentLoginFlowStepCreateAuthenticator {
    const KIND: &'static str = "IntentLoginFlowStepCreateAuthenticator";
}

#[async_trait]
impl InputReactor for IntentLoginFlowStepCreateAuthenticator {
    async fn can_react_to(&self, ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        if find_milestone_in_current_flow::<DoCreateAuthenticator>(flows).is_none() {
            let step = self.step(ctx)?;
            let user_id = get_user_id(flows)?;
            let owned = ctx.authenticators()?.list(&user_id).await?;
            return match Self::options(&step, &owned) {
                None => Ok(Reaction::Eof),
                Some(options) if options.is_empty() => Err(errors::no_authenticator()),
                Some(_) => Ok(Reaction::Input(InputSchema::new(
                    self.json_pointer.clone(),
                    schemas::create_authenticator(&step),
                ))),
            };
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
        let step = self.step(ctx)?;
        let Some((idx, _)) = step.authentication_branch(data.authentication) else {
            return Ok(Outcome::Incompatible);
        };
        match data.authentication {
            Authentication::SecondaryPassword => {}
            authentication if !authentication.is_secondary() => return Ok(Outcome::Incompatible),
            authentication => {
                return Err(FlowError::internal(format!(
                    "cannot create a {authentication} authenticator"
                )));
            }
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

    async fn output_data(&self, ctx: &Context, flows: Flows<'_>) -> Result<Value, FlowError> {
        if find_milestone_in_current_flow::<DoCreateAuthenticator>(flows).is_some() {
            return Ok(json!({}));
        }
        let step = self.step(ctx)?;
        let user_id = get_user_id(flows)?;
        let owned = ctx.authenticators()?.list(&user_id).await?;
        Ok(json!({"options": Self::options(&step, &owned).unwrap_or_default()}))
    }
}

impl Intent for IntentLoginFlowStepCreateAuthenticator {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FlowBranch, StepType};

    fn step(options: &[Authentication]) -> FlowStep {
        FlowStep {
            name: None,
            step_type: StepType::CreateAuthenticator,
            optional: false,
            one_of: options
                .iter()
                .map(|authentication| FlowBranch {
                    authentication: Some(*authentication),
                    ..FlowBranch::default()
                })
                .collect(),
        }
    }

    fn owned(authentication: Authentication) -> AuthenticatorInfo {
        AuthenticatorInfo {
            id: "a-1".into(),
            user_id: "u1".into(),
            authentication,
        }
    }

    #[test]
    fn test_options_keep_secondary_branches() {
        let step = step(&[Authentication::PrimaryPassword, Authentication::SecondaryPassword]);
        let options = IntentLoginFlowStepCreateAuthenticator::options(
            &step,
            &[owned(Authentication::PrimaryPassword)],
        );
        assert_eq!(options, Some(vec![Authentication::SecondaryPassword]));
    }

    #[test]
    fn test_enrolled_user_skips() {
        let step = step(&[Authentication::SecondaryPassword]);
        let options = IntentLoginFlowStepCreateAuthenticator::options(
            &step,
            &[owned(Authentication::SecondaryPassword)],
        );
        assert_eq!(options, None);
    }
}
