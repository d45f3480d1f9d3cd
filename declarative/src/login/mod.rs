//! # Login flow
//!
//! ```text
//! IntentLoginFlow
//! ├── IntentFlowSteps            configured steps: identify, authenticate, create_authenticator
//! ├── IntentAmrConstraints       extra authentication until required AMR is met
//! └── NodeDoDispatchEvent        user.authenticated, dispatched once
//! ```
//!
//! The root pauses until the final event was dispatched, then reports EOF.

mod amr_constraints;
mod authenticate;
mod create_authenticator;
mod identify;

pub use amr_constraints::{IntentAmrConstraints, NodeDidDispatchPreAuthenticated};
pub use authenticate::{AuthenticationCandidate, IntentLoginFlowStepAuthenticate};
pub(crate) use authenticate::{step_branches, usable};
pub use create_authenticator::IntentLoginFlowStepCreateAuthenticator;
pub use identify::IntentLoginFlowStepIdentify;

use crate::deps::DepsExt;
use crate::finish::NodeDoDispatchEvent;
use crate::milestones::{AmrConstraints, ConstraintsProvider, DoFinish, NestedSteps};
use crate::model::Event;
use crate::steps::IntentFlowSteps;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::error::FlowError;
use authflow_core::flow::Flows;
use authflow_core::input::Input;
use authflow_core::intent::{InputReactor, Intent, Kind};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::milestone::{MilestoneRequest, find_milestone_in_current_flow, get_user_id};
use authflow_core::outcome::{Outcome, Reaction};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentLoginFlow {
    /// Snapshot of the configured `required_amr`.
    #[serde(default)]
    pub required_amr: Vec<String>,
}

impl Kind for IntentLoginFlow {
    const KIND: &'static str = "IntentLoginFlow";
}

#[async_trait]
impl InputReactor for IntentLoginFlow {
    async fn can_react_to(&self, _ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        if find_milestone_in_current_flow::<NestedSteps>(flows).is_none() {
            return Ok(Reaction::Automatic);
        }
        if find_milestone_in_current_flow::<AmrConstraints>(flows).is_none() {
            return Ok(Reaction::Automatic);
        }
        match find_milestone_in_current_flow::<DoFinish>(flows) {
            None => Ok(Reaction::Automatic),
            Some((DoFinish { invoked: false }, _)) => Ok(Reaction::PauseAndRetry),
            Some(_) => Ok(Reaction::Eof),
        }
    }

    async fn react_to(
        &self,
        ctx: &Context,
        flows: Flows<'_>,
        _input: Option<&Input>,
    ) -> Result<Outcome, FlowError> {
        if find_milestone_in_current_flow::<NestedSteps>(flows).is_none() {
            return Ok(Outcome::sub_flow(IntentFlowSteps::new(JsonPointer::root())));
        }
        if find_milestone_in_current_flow::<AmrConstraints>(flows).is_none() {
            return Ok(Outcome::sub_flow(IntentAmrConstraints));
        }
        if find_milestone_in_current_flow::<DoFinish>(flows).is_none() {
            let user_id = get_user_id(flows)?;
            let users = ctx.users()?;
            let user = users.get_raw(&user_id).await?;
            users.check_account_status(&user).await?;
            let event = Event::new(Event::USER_AUTHENTICATED, json!({"user_id": user_id}));
            return Ok(Outcome::simple(NodeDoDispatchEvent::new(event)));
        }
        Ok(Outcome::Incompatible)
    }
}

impl Intent for IntentLoginFlow {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| ConstraintsProvider(self.required_amr.clone()));
    }
}
