use crate::bot_protection::{IntentBotProtection, is_verified, required_provider};
use crate::config::{FlowStep, OnFailure};
use crate::deps::{DepsExt, RateLimit};
use crate::errors;
use crate::identity::{IdentifyInput, resolve_spec};
use crate::milestones::{AccountRecoveryIdentity, IdentificationMethod, NestedSteps};
use crate::model::{Identification, IdentityInfo};
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
use authflow_core::milestone::{DoUseUser, MilestoneRequest, find_milestone_in_current_flow};
use authflow_core::outcome::{Outcome, Reaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Finds the account to recover by email or phone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAccountRecoveryFlowStepIdentify {
    pub json_pointer: JsonPointer,
}

impl IntentAccountRecoveryFlowStepIdentify {
    pub fn new(json_pointer: JsonPointer) -> Self {
        Self { json_pointer }
    }
}

impl Kind for IntentAccountRecoveryFlowStepIdentify {
    const KIND: &'static str = "IntentAccountRecoveryFlowStepIdentify";
}

#[async_trait]
impl InputReactor for IntentAccountRecoveryFlowStepIdentify {
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
        let identity = ctx.identities()?.search_by_spec(&spec).await?;
        match (&identity, branch.on_failure.unwrap_or_default()) {
            (Some(_), _) => limiter.cancel(reservation).await,
            (None, OnFailure::Ignore) => {
                debug!(identification = %data.identification, "unknown login id ignored");
            }
            (None, OnFailure::Error) => return Err(errors::user_not_found()),
        }
        Ok(Outcome::simple(NodeDoUseAccountRecoveryIdentity {
            identification: data.identification,
            json_pointer: branch_pointer,
            identity,
        }))
    }
}

impl Intent for IntentAccountRecoveryFlowStepIdentify {}

/// The login id to recover, and the identity behind it when there is one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDoUseAccountRecoveryIdentity {
    pub identification: Identification,
    pub json_pointer: JsonPointer,
    #[serde(default)]
    pub identity: Option<IdentityInfo>,
}

impl Kind for NodeDoUseAccountRecoveryIdentity {
    const KIND: &'static str = "NodeDoUseAccountRecoveryIdentity";
}

impl NodeSimple for NodeDoUseAccountRecoveryIdentity {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request
            .provide(|| AccountRecoveryIdentity {
                identification: self.identification,
                json_pointer: self.json_pointer.clone(),
                identity: self.identity.clone(),
            })
            .provide(|| IdentificationMethod {
                identification: self.identification,
                json_pointer: self.json_pointer.clone(),
            });
        if let Some(identity) = &self.identity {
            request.provide(|| DoUseUser(identity.user_id.clone()));
        }
    }

    fn effects(&self, _ctx: &Context, _flows: Flows<'_>) -> Result<Vec<Effect>, FlowError> {
        let Some(identity) = self.identity.clone() else {
            return Ok(Vec::new());
        };
        Ok(vec![Effect::on_commit(move |ctx| async move {
            ctx.account_recovery()?.send_code(&identity).await
        })])
    }
}
