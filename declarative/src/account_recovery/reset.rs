use crate::deps::DepsExt;
use crate::errors;
use crate::milestones::{AccountRecoveryIdentity, DidVerifyAccountRecoveryCode, DoResetPassword};
use crate::model::{Authentication, AuthenticatorInfo, Event};
use crate::schemas;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::effect::Effect;
use authflow_core::error::FlowError;
use authflow_core::flow::Flows;
use authflow_core::input::{Input, InputSchema};
use authflow_core::intent::{InputReactor, Intent, Kind, NodeSimple};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::milestone::{MilestoneRequest, find_milestone};
use authflow_core::outcome::{Outcome, Reaction};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Deserialize)]
struct CodeInput {
    account_recovery_code: String,
}

#[derive(Debug, Deserialize)]
struct NewPasswordInput {
    new_password: String,
}

fn recovery_identity(flows: Flows<'_>) -> Result<AccountRecoveryIdentity, FlowError> {
    find_milestone::<AccountRecoveryIdentity>(flows.root)
        .ok_or_else(|| FlowError::internal("account recovery step before identify"))
}

/// Checks the code sent to the identified login id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAccountRecoveryFlowStepVerifyCode {
    pub json_pointer: JsonPointer,
}

impl IntentAccountRecoveryFlowStepVerifyCode {
    pub fn new(json_pointer: JsonPointer) -> Self {
        Self { json_pointer }
    }
}

impl Kind for IntentAccountRecoveryFlowStepVerifyCode {
    const KIND: &'static str = "IntentAccountRecoveryFlowStepVerifyCode";
}

#[async_trait]
impl InputReactor for IntentAccountRecoveryFlowStepVerifyCode {
    async fn can_react_to(&self, _ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        if !flows.nearest.nodes.is_empty() {
            return Ok(Reaction::Eof);
        }
        Ok(Reaction::Input(InputSchema::new(
            self.json_pointer.clone(),
            schemas::account_recovery_code(),
        )))
    }

    async fn react_to(
        &self,
        ctx: &Context,
        flows: Flows<'_>,
        input: Option<&Input>,
    ) -> Result<Outcome, FlowError> {
        if !flows.nearest.nodes.is_empty() {
            return Ok(Outcome::Incompatible);
        }
        let Some(data) = input.and_then(Input::decode::<CodeInput>) else {
            return Ok(Outcome::Incompatible);
        };
        // nothing was sent to an unknown login id
        let Some(identity) = recovery_identity(flows)?.identity else {
            return Err(errors::invalid_account_recovery_code());
        };
        ctx.account_recovery()?
            .verify_code(&identity, &data.account_recovery_code)
            .await?;
        Ok(Outcome::simple(NodeDidVerifyAccountRecoveryCode {
            code: data.account_recovery_code,
        }))
    }
}

impl Intent for IntentAccountRecoveryFlowStepVerifyCode {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDidVerifyAccountRecoveryCode {
    pub code: String,
}

impl Kind for NodeDidVerifyAccountRecoveryCode {
    const KIND: &'static str = "NodeDidVerifyAccountRecoveryCode";
}

impl NodeSimple for NodeDidVerifyAccountRecoveryCode {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| DidVerifyAccountRecoveryCode(self.code.clone()));
    }
}

/// Sets a new primary password with a verified code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAccountRecoveryFlowStepResetPassword {
    pub json_pointer: JsonPointer,
}

impl IntentAccountRecoveryFlowStepResetPassword {
    pub fn new(json_pointer: JsonPointer) -> Self {
        Self { json_pointer }
    }
}

impl Kind for IntentAccountRecoveryFlowStepResetPassword {
    const KIND: &'static str = "IntentAccountRecoveryFlowStepResetPassword";
}

#[async_trait]
impl InputReactor for IntentAccountRecoveryFlowStepResetPassword {
    async fn can_react_to(&self, _ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        if !flows.nearest.nodes.is_empty() {
            return Ok(Reaction::Eof);
        }
        Ok(Reaction::Input(InputSchema::new(
            self.json_pointer.clone(),
            schemas::new_password(),
        )))
    }

    async fn react_to(
        &self,
        ctx: &Context,
        flows: Flows<'_>,
        input: Option<&Input>,
    ) -> Result<Outcome, FlowError> {
        if !flows.nearest.nodes.is_empty() {
            return Ok(Outcome::Incompatible);
        }
        let Some(data) = input.and_then(Input::decode::<NewPasswordInput>) else {
            return Ok(Outcome::Incompatible);
        };
        let DidVerifyAccountRecoveryCode(code) = find_milestone::<DidVerifyAccountRecoveryCode>(flows.root)
            .ok_or_else(|| FlowError::internal("reset_password before the code was verified"))?;
        let identity = recovery_identity(flows)?
            .identity
            .ok_or_else(|| FlowError::internal("verified code without an identity"))?;
        let authenticator = ctx
            .authenticators()?
            .new_password(&identity.user_id, Authentication::PrimaryPassword, &data.new_password)
            .await?;
        Ok(Outcome::simple(NodeDoResetPassword { code, authenticator }))
    }
}

impl Intent for IntentAccountRecoveryFlowStepResetPassword {}

/// Consumes the code and swaps in the new password inside the step transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDoResetPassword {
    pub code: String,
    pub authenticator: AuthenticatorInfo,
}

impl Kind for NodeDoResetPassword {
    const KIND: &'static str = "NodeDoResetPassword";
}

impl NodeSimple for NodeDoResetPassword {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| DoResetPassword);
    }

    fn effects(&self, _ctx: &Context, _flows: Flows<'_>) -> Result<Vec<Effect>, FlowError> {
        let code = self.code.clone();
        let authenticator = self.authenticator.clone();
        let event = Event::new(
            Event::PASSWORD_RESET,
            json!({"user_id": self.authenticator.user_id}),
        );
        Ok(vec![
            Effect::run(move |ctx| async move {
                ctx.account_recovery()?
                    .reset_password(&code, &authenticator)
                    .await
            }),
            Effect::run(move |ctx| async move { ctx.events()?.dispatch_event_on_commit(&event).await }),
        ])
    }
}
