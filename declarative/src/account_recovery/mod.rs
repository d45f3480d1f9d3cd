//! # Account recovery flow
//!
//! ```text
//! IntentAccountRecoveryFlow
//! └── IntentFlowSteps
//!     ├── IntentAccountRecoveryFlowStepIdentify        email or phone, code sent on commit
//!     ├── IntentAccountRecoveryFlowStepVerifyCode
//!     └── IntentAccountRecoveryFlowStepResetPassword   replaces the primary password
//! ```
//!
//! A branch with `on_failure = "ignore"` accepts unknown login ids and carries on without
//! sending anything, so the code step fails exactly as it would for a wrong code.

mod identify;
mod reset;

pub use identify::{IntentAccountRecoveryFlowStepIdentify, NodeDoUseAccountRecoveryIdentity};
pub use reset::{
    IntentAccountRecoveryFlowStepResetPassword, IntentAccountRecoveryFlowStepVerifyCode,
    NodeDidVerifyAccountRecoveryCode, NodeDoResetPassword,
};

use crate::milestones::NestedSteps;
use crate::steps::IntentFlowSteps;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::error::FlowError;
use authflow_core::flow::Flows;
use authflow_core::input::Input;
use authflow_core::intent::{InputReactor, Intent, Kind};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::milestone::find_milestone_in_current_flow;
use authflow_core::outcome::{Outcome, Reaction};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentAccountRecoveryFlow {}

impl Kind for IntentAccountRecoveryFlow {
    const KIND: &'static str = "IntentAccountRecoveryFlow";
}

#[async_trait]
impl InputReactor for IntentAccountRecoveryFlow {
    async fn can_react_to(&self, _ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        if find_milestone_in_current_flow::<NestedSteps>(flows).is_none() {
            return Ok(Reaction::Automatic);
        }
        Ok(Reaction::Eof)
    }

    async fn react_to(
        &self,
        _ctx: &Context,
        flows: Flows<'_>,
        _input: Option<&Input>,
    ) -> Result<Outcome, FlowError> {
        if find_milestone_in_current_flow::<NestedSteps>(flows).is_none() {
            return Ok(Outcome::sub_flow(IntentFlowSteps::new(JsonPointer::root())));
        }
        Ok(Outcome::Incompatible)
    }
}

impl Intent for IntentAccountRecoveryFlow {}
