use crate::account_recovery::{
    IntentAccountRecoveryFlowStepIdentify, IntentAccountRecoveryFlowStepResetPassword,
    IntentAccountRecoveryFlowStepVerifyCode,
};
use crate::config::{FlowStep, StepType};
use crate::deps::DepsExt;
use crate::login::{
    IntentLoginFlowStepAuthenticate, IntentLoginFlowStepCreateAuthenticator, IntentLoginFlowStepIdentify,
};
use crate::milestones::NestedSteps;
use crate::reauth::IntentReauthFlowStepAuthenticate;
use crate::signup::{IntentSignupFlowStepCreateAuthenticator, IntentSignupFlowStepIdentify};
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::error::FlowError;
use authflow_core::flow::{FlowType, Flows, Node};
use authflow_core::input::Input;
use authflow_core::intent::{InputReactor, Intent, Kind};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::milestone::MilestoneRequest;
use authflow_core::outcome::{Outcome, Reaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct StepList {
    #[serde(default)]
    steps: Vec<FlowStep>,
}

/// Walks the `steps` under `json_pointer` in order, one sub-flow per step.
///
/// Used for the root of a flow and for the steps nested under a chosen branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentFlowSteps {
    pub json_pointer: JsonPointer,
}

impl IntentFlowSteps {
    pub fn new(json_pointer: JsonPointer) -> Self {
        Self { json_pointer }
    }

    fn steps(&self, ctx: &Context) -> Result<Vec<FlowStep>, FlowError> {
        let list: StepList = ctx
            .app_config()?
            .flow_object(ctx.flow_reference(), &self.json_pointer)?;
        Ok(list.steps)
    }
}

impl Kind for IntentFlowSteps {
    const KIND: &'static str = "IntentFlowSteps";
}

#[async_trait]
impl InputReactor for IntentFlowSteps {
    async fn can_react_to(&self, ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        if flows.nearest.nodes.len() < self.steps(ctx)?.len() {
            Ok(Reaction::Automatic)
        } else {
            Ok(Reaction::Eof)
        }
    }

    async fn react_to(
        &self,
        ctx: &Context,
        flows: Flows<'_>,
        _input: Option<&Input>,
    ) -> Result<Outcome, FlowError> {
        let idx = flows.nearest.nodes.len();
        let steps = self.steps(ctx)?;
        let Some(step) = steps.get(idx) else {
            return Ok(Outcome::Incompatible);
        };
        let pointer = self.json_pointer.steps(idx);
        debug!(step = %pointer, step_type = ?step.step_type, "entering step");

        let flow_type = ctx.flow_reference().flow_type;
        let node = match (flow_type, step.step_type) {
            (FlowType::Login, StepType::Identify) => Node::sub_flow(IntentLoginFlowStepIdentify::new(pointer)),
            (FlowType::Login, StepType::Authenticate) => {
                Node::sub_flow(IntentLoginFlowStepAuthenticate::step(pointer))
            }
            (FlowType::Login, StepType::CreateAuthenticator) => {
                Node::sub_flow(IntentLoginFlowStepCreateAuthenticator::new(pointer))
            }
            (FlowType::Signup, StepType::Identify) => Node::sub_flow(IntentSignupFlowStepIdentify::new(pointer)),
            (FlowType::Signup, StepType::CreateAuthenticator) => {
                Node::sub_flow(IntentSignupFlowStepCreateAuthenticator::new(pointer))
            }
            (FlowType::Reauth, StepType::Authenticate) => {
                Node::sub_flow(IntentReauthFlowStepAuthenticate::new(pointer))
            }
            (FlowType::AccountRecovery, StepType::Identify) => {
                Node::sub_flow(IntentAccountRecoveryFlowStepIdentify::new(pointer))
            }
            (FlowType::AccountRecovery, StepType::VerifyAccountRecoveryCode) => {
                Node::sub_flow(IntentAccountRecoveryFlowStepVerifyCode::new(pointer))
            }
            (FlowType::AccountRecovery, StepType::ResetPassword) => {
                Node::sub_flow(IntentAccountRecoveryFlowStepResetPassword::new(pointer))
            }
            (flow_type, step_type) => {
                return Err(FlowError::internal(format!(
                    "step {step_type:?} is not supported in {flow_type} flows"
                )));
            }
        };
        Ok(Outcome::Next(node))
    }
}

impl Intent for IntentFlowSteps {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| NestedSteps(self.json_pointer.clone()));
    }
}
