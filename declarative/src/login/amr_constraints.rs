use super::IntentLoginFlowStepAuthenticate;
use crate::amr;
use crate::deps::DepsExt;
use crate::errors;
use crate::milestones::{AmrConstraints, ConstraintsProvider, DidDispatchPreAuthenticated};
use crate::model::Event;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::error::FlowError;
use authflow_core::flow::Flows;
use authflow_core::input::Input;
use authflow_core::intent::{InputReactor, Intent, Kind, NodeSimple};
use authflow_core::milestone::{MilestoneRequest, find_milestone_in_current_flow, get_user_id};
use authflow_core::outcome::{Outcome, Reaction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Runs after the configured steps: asks the pre-authenticated hook for extra
/// requirements, then adds authentication sub-flows until nothing remains.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentAmrConstraints;

impl Kind for IntentAmrConstraints {
    const KIND: &'static str = "IntentAmrConstraints";
}

#[async_trait]
impl InputReactor for IntentAmrConstraints {
    async fn can_react_to(&self, _ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        if find_milestone_in_current_flow::<DidDispatchPreAuthenticated>(flows).is_none() {
            return Ok(Reaction::Automatic);
        }
        let (_, _, remaining) = amr::evaluate(flows.root);
        if remaining.is_empty() {
            Ok(Reaction::Eof)
        } else {
            Ok(Reaction::Automatic)
        }
    }

    async fn react_to(
        &self,
        ctx: &Context,
        flows: Flows<'_>,
        _input: Option<&Input>,
    ) -> Result<Outcome, FlowError> {
        if find_milestone_in_current_flow::<DidDispatchPreAuthenticated>(flows).is_none() {
            let user_id = get_user_id(flows)?;
            let (_, achieved, _) = amr::evaluate(flows.root);
            let event = Event::new(
                Event::PRE_AUTHENTICATED,
                json!({"user_id": user_id, "amr": achieved}),
            );
            let response = ctx.events()?.prepare_blocking_event_with_tx(&event).await?;
            return Ok(Outcome::simple(NodeDidDispatchPreAuthenticated {
                required_amr: response.required_amr,
            }));
        }

        let (required, achieved, remaining) = amr::evaluate(flows.root);
        if remaining.is_empty() {
            return Ok(Outcome::Incompatible);
        }
        debug!(?required, ?achieved, ?remaining, "authentication methods still required");
        let intent = IntentLoginFlowStepAuthenticate::amr();
        if intent.candidates(ctx, flows).await?.is_empty() {
            return Err(errors::amr_constraints_unsatisfiable(&remaining));
        }
        Ok(Outcome::sub_flow(intent))
    }
}

impl Intent for IntentAmrConstraints {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| AmrConstraints);
    }
}

/// Requirements returned by the pre-authenticated hook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeDidDispatchPreAuthenticated {
    #[serde(default)]
    pub required_amr: Vec<String>,
}

impl Kind for NodeDidDispatchPreAuthenticated {
    const KIND: &'static str = "NodeDidDispatchPreAuthenticated";
}

impl NodeSimple for NodeDidDispatchPreAuthenticated {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request
            .provide(|| DidDispatchPreAuthenticated)
            .provide(|| ConstraintsProvider(self.required_amr.clone()));
    }
}
