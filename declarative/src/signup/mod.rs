//! # Signup flow
//!
//! ```text
//! IntentSignupFlow                 user id chosen up front
//! ├── NodeDoCreateUser             skipped when linking into an existing user
//! ├── IntentFlowSteps              identify, create_authenticator, ...
//! └── NodeDoDispatchEvent          user.created or user.linked
//! ```
//!
//! Account linking rewrites the whole tree to [`IntentSignupFlow::existing`], so the
//! replayed identification is attached to the owner of the conflicting identity.

mod create_authenticator;
mod identify;

pub use create_authenticator::{IntentSignupFlowStepCreateAuthenticator, NodeDoCreateAuthenticator};
pub use identify::IntentSignupFlowStepIdentify;

use crate::deps::DepsExt;
use crate::finish::NodeDoDispatchEvent;
use crate::milestones::{DoCreateUser, DoFinish, NestedSteps};
use crate::model::Event;
use crate::steps::IntentFlowSteps;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::effect::Effect;
use authflow_core::error::FlowError;
use authflow_core::flow::Flows;
use authflow_core::input::Input;
use authflow_core::intent::{InputReactor, Intent, Kind, NodeSimple};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::milestone::{DoUseUser, MilestoneRequest, find_milestone_in_current_flow};
use authflow_core::outcome::{Outcome, Reaction};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSignupFlow {
    pub user_id: String,
    /// Set when the flow links identities to an account that already exists.
    #[serde(default)]
    pub existing_user: bool,
}

impl IntentSignupFlow {
    pub fn new() -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            existing_user: false,
        }
    }

    pub fn existing(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            existing_user: true,
        }
    }
}

impl Default for IntentSignupFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl Kind for IntentSignupFlow {
    const KIND: &'static str = "IntentSignupFlow";
}

#[async_trait]
impl InputReactor for IntentSignupFlow {
    async fn can_react_to(&self, _ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        if !self.existing_user && find_milestone_in_current_flow::<DoCreateUser>(flows).is_none() {
            return Ok(Reaction::Automatic);
        }
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
        _ctx: &Context,
        flows: Flows<'_>,
        _input: Option<&Input>,
    ) -> Result<Outcome, FlowError> {
        if !self.existing_user && find_milestone_in_current_flow::<DoCreateUser>(flows).is_none() {
            return Ok(Outcome::simple(NodeDoCreateUser {
                user_id: self.user_id.clone(),
            }));
        }
        if find_milestone_in_current_flow::<NestedSteps>(flows).is_none() {
            return Ok(Outcome::sub_flow(IntentFlowSteps::new(JsonPointer::root())));
        }
        if find_milestone_in_current_flow::<DoFinish>(flows).is_none() {
            let kind = if self.existing_user {
                Event::USER_LINKED
            } else {
                Event::USER_CREATED
            };
            let event = Event::new(kind, json!({"user_id": self.user_id}));
            return Ok(Outcome::simple(NodeDoDispatchEvent::new(event)));
        }
        Ok(Outcome::Incompatible)
    }
}

impl Intent for IntentSignupFlow {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| DoUseUser(self.user_id.clone()));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDoCreateUser {
    pub user_id: String,
}

impl Kind for NodeDoCreateUser {
    const KIND: &'static str = "NodeDoCreateUser";
}

impl NodeSimple for NodeDoCreateUser {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request
            .provide(|| DoCreateUser(self.user_id.clone()))
            .provide(|| DoUseUser(self.user_id.clone()));
    }

    fn effects(&self, _ctx: &Context, _flows: Flows<'_>) -> Result<Vec<Effect>, FlowError> {
        let user_id = self.user_id.clone();
        Ok(vec![Effect::run(move |ctx| async move {
            ctx.users()?.create(&user_id).await.map(|_| ())
        })])
    }
}
