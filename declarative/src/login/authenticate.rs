use crate::amr;
use crate::authenticator::{
    IntentUseAuthenticator, NodeDidInspectDeviceToken, NodeDoCreateDeviceTokenIfRequested,
    inspect_device_token,
};
use crate::config::{FlowStep, StepType};
use crate::deps::DepsExt;
use crate::errors;
use crate::milestones::{
    AuthenticationMethod, DeviceTokenInspected, DidAuthenticate, DoCreateDeviceTokenIfRequested,
    NestedSteps,
};
use crate::model::{Authentication, AuthenticatorInfo};
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

/// An option the user may authenticate with, and the branch it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticationCandidate {
    pub authentication: Authentication,
    pub json_pointer: JsonPointer,
}

#[derive(Debug, Deserialize)]
struct SelectInput {
    authentication: Authentication,
}

/// Authenticates the identified user with one of several options.
///
/// Two modes share the state machine:
///
/// * **step**: the options are the branches of the configured step at `json_pointer`.
///   Branch `steps` run after success and a `device_token` branch is honoured.
/// * **amr**: entered by [`IntentAmrConstraints`](super::IntentAmrConstraints). The options
///   are every authenticate branch of the login flow that still shrinks the remaining AMR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentLoginFlowStepAuthenticate {
    pub json_pointer: JsonPointer,
    #[serde(default)]
    pub amr: bool,
}

impl IntentLoginFlowStepAuthenticate {
    pub fn step(json_pointer: JsonPointer) -> Self {
        Self {
            json_pointer,
            amr: false,
        }
    }

    pub fn amr() -> Self {
        Self {
            json_pointer: JsonPointer::root(),
            amr: true,
        }
    }

    fn configured_step(&self, ctx: &Context) -> Result<Option<FlowStep>, FlowError> {
        if self.amr {
            return Ok(None);
        }
        ctx.app_config()?
            .flow_object(ctx.flow_reference(), &self.json_pointer)
            .map(Some)
    }

    /// Pointer of the `device_token` branch, when this step offers one.
    fn device_token_branch(&self, step: Option<&FlowStep>) -> Option<JsonPointer> {
        let (idx, _) = step?.authentication_branch(Authentication::DeviceToken)?;
        Some(self.json_pointer.one_of(idx))
    }

    fn optional(&self, step: Option<&FlowStep>) -> bool {
        step.is_some_and(|step| step.optional)
    }

    pub async fn candidates(
        &self,
        ctx: &Context,
        flows: Flows<'_>,
    ) -> Result<Vec<AuthenticationCandidate>, FlowError> {
        let configured = match self.configured_step(ctx)? {
            Some(step) => step_branches(&step, &self.json_pointer),
            None => {
                let config = ctx.app_config()?;
                let login = config.login_flow(&ctx.flow_reference().name).ok_or_else(|| {
                    FlowError::internal(format!("{} is not a configured login flow", ctx.flow_reference()))
                })?;
                let mut out = Vec::new();
                collect_branches(&login.steps, &JsonPointer::root(), &mut out);
                out
            }
        };
        let user_id = get_user_id(flows)?;
        let owned = ctx.authenticators()?.list(&user_id).await?;
        let mut candidates = usable(configured, &owned);

        if self.amr {
            let (_, _, remaining) = amr::evaluate(flows.root);
            let events = amr::authentication_events(flows.root);
            candidates.retain(|candidate| amr::contributes(candidate.authentication, &remaining, &events));
        }
        Ok(candidates)
    }
}

/// Authentication branches of one step, in configuration order.
pub(crate) fn step_branches(step: &FlowStep, step_pointer: &JsonPointer) -> Vec<AuthenticationCandidate> {
    step.one_of
        .iter()
        .enumerate()
        .filter_map(|(idx, branch)| {
            Some(AuthenticationCandidate {
                authentication: branch.authentication?,
                json_pointer: step_pointer.one_of(idx),
            })
        })
        .collect()
}

/// Every authenticate branch reachable from `steps`, first occurrence of each option wins.
fn collect_branches(steps: &[FlowStep], base: &JsonPointer, out: &mut Vec<AuthenticationCandidate>) {
    for (idx, step) in steps.iter().enumerate() {
        let step_pointer = base.steps(idx);
        if step.step_type == StepType::Authenticate {
            for candidate in step_branches(step, &step_pointer) {
                if !out.iter().any(|seen| seen.authentication == candidate.authentication) {
                    out.push(candidate);
                }
            }
        }
        for (branch_idx, branch) in step.one_of.iter().enumerate() {
            collect_branches(&branch.steps, &step_pointer.one_of(branch_idx), out);
        }
    }
}

/// Keep the options the user can complete. A recovery code needs some secondary
/// authenticator; a device token is never selected explicitly.
pub(crate) fn usable(configured: Vec<AuthenticationCandidate>, owned: &[AuthenticatorInfo]) -> Vec<AuthenticationCandidate> {
    let has_secondary = owned.iter().any(|info| info.authentication.is_secondary());
    configured
        .into_iter()
        .filter(|candidate| match candidate.authentication {
            Authentication::DeviceToken => false,
            Authentication::RecoveryCode => has_secondary,
            authentication => owned.iter().any(|info| info.authentication == authentication),
        })
        .collect()
}

impl Kind for IntentLoginFlowStepAuthenticate {
    const KIND: &'static str = "IntentLoginFlowStepAuthenticate";
}

#[async_trait]
impl InputReactor for IntentLoginFlowStepAuthenticate {
    async fn can_react_to(&self, ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        let step = self.configured_step(ctx)?;
        let device_token = self.device_token_branch(step.as_ref());

        if device_token.is_some() && find_milestone_in_current_flow::<DeviceTokenInspected>(flows).is_none() {
            return Ok(Reaction::Automatic);
        }

        let Some((method, method_flows)) = find_milestone_in_current_flow::<AuthenticationMethod>(flows) else {
            let candidates = self.candidates(ctx, flows).await?;
            if candidates.is_empty() {
                if self.optional(step.as_ref()) {
                    return Ok(Reaction::Eof);
                }
                if self.amr {
                    let (_, _, remaining) = amr::evaluate(flows.root);
                    return Err(errors::amr_constraints_unsatisfiable(&remaining));
                }
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
        if device_token.is_some()
            && find_milestone_in_current_flow::<DoCreateDeviceTokenIfRequested>(flows).is_none()
        {
            return Ok(Reaction::Automatic);
        }
        if !self.amr && find_milestone_in_current_flow::<NestedSteps>(flows).is_none() {
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
        let step = self.configured_step(ctx)?;
        let device_token = self.device_token_branch(step.as_ref());

        if let Some(json_pointer) = &device_token {
            if find_milestone_in_current_flow::<DeviceTokenInspected>(flows).is_none() {
                let user_id = get_user_id(flows)?;
                let valid = inspect_device_token(ctx, &user_id).await?;
                return Ok(Outcome::simple(NodeDidInspectDeviceToken {
                    valid,
                    json_pointer: json_pointer.clone(),
                }));
            }
        }

        let Some((method, method_flows)) = find_milestone_in_current_flow::<AuthenticationMethod>(flows) else {
            let Some(selected) = input.and_then(Input::decode::<SelectInput>) else {
                return Ok(Outcome::Incompatible);
            };
            let candidates = self.candidates(ctx, flows).await?;
            let Some(candidate) = candidates
                .into_iter()
                .find(|candidate| candidate.authentication == selected.authentication)
            else {
                return Ok(Outcome::Incompatible);
            };
            return Ok(Outcome::sub_flow(IntentUseAuthenticator {
                authentication: candidate.authentication,
                json_pointer: candidate.json_pointer,
            }));
        };

        if device_token.is_some()
            && find_milestone_in_current_flow::<DoCreateDeviceTokenIfRequested>(flows).is_none()
        {
            let requested = find_milestone_in_current_flow::<DidAuthenticate>(method_flows)
                .is_some_and(|(did, _)| {
                    did.request_device_token && did.authentication != Authentication::DeviceToken
                });
            return Ok(Outcome::simple(NodeDoCreateDeviceTokenIfRequested { requested }));
        }
        if !self.amr && find_milestone_in_current_flow::<NestedSteps>(flows).is_none() {
            return Ok(Outcome::sub_flow(IntentFlowSteps::new(method.json_pointer)));
        }
        Ok(Outcome::Incompatible)
    }

    async fn output_data(&self, ctx: &Context, flows: Flows<'_>) -> Result<Value, FlowError> {
        if find_milestone_in_current_flow::<AuthenticationMethod>(flows).is_some() {
            return Ok(json!({}));
        }
        let candidates = self.candidates(ctx, flows).await?;
        Ok(json!({"candidates": candidates}))
    }
}

impl Intent for IntentLoginFlowStepAuthenticate {}
