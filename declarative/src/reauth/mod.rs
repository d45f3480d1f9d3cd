//! # Reauth flow
//!
//! ```text
//! IntentReauthFlow                   user taken from the session's user hint
//! ├── IntentFlowSteps                authenticate, ...
//! └── NodeDoDispatchEvent            user.reauthenticated
//! ```
//!
//! Nothing is identified: the flow proves again that the signed-in user holds one of
//! their authenticators.

mod authenticate;

pub use authenticate::IntentReauthFlowStepAuthenticate;

use crate::deps::DepsExt;
use crate::finish::NodeDoDispatchEvent;
use crate::milestones::{DoFinish, NestedSteps};
use crate::model::Event;
use crate::steps::IntentFlowSteps;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::error::FlowError;
use authflow_core::flow::Flows;
use authflow_core::input::Input;
use authflow_core::intent::{InputReactor, Intent, Kind};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::milestone::{DoUseUser, MilestoneRequest, find_milestone_in_current_flow};
use authflow_core::outcome::{Outcome, Reaction};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentReauthFlow {
    pub user_id: String,
}

impl IntentReauthFlow {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

impl Kind for IntentReauthFlow {
    const KIND: &'static str = "IntentReauthFlow";
}

#[async_trait]
impl InputReactor for IntentReauthFlow {
    async fn can_react_to(&self, _ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        if find_milestone_in_current_flow::<NestedSteps>(flows).is_none() {
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
        if find_milestone_in_current_flow::<DoFinish>(flows).is_none() {
            let users = ctx.users()?;
            let user = users.get_raw(&self.user_id).await?;
            users.check_account_status(&user).await?;
            let event = Event::new(Event::USER_REAUTHENTICATED, json!({"user_id": self.user_id}));
            return Ok(Outcome::simple(NodeDoDispatchEvent::new(event)));
        }
        Ok(Outcome::Incompatible)
    }
}

impl Intent for IntentReauthFlow {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| DoUseUser(self.user_id.clone()));
    }
}
