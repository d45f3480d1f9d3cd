//! Authentication with one selected option, and the device-token records around it.

use crate::deps::DepsExt;
use crate::milestones::{
    AuthenticationMethod, DeviceTokenInspected, DidAuthenticate, DoCreateDeviceTokenIfRequested,
};
use crate::model::{Authentication, AuthenticatorInfo, RecoveryCode};
use crate::schemas;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::effect::Effect;
use authflow_core::error::FlowError;
use authflow_core::flow::Flows;
use authflow_core::input::{Input, InputSchema};
use authflow_core::intent::{InputReactor, Intent, Kind, NodeSimple};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::milestone::{MilestoneRequest, get_user_id};
use authflow_core::outcome::{Outcome, Reaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct CredentialInput {
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    recovery_code: Option<String>,
    #[serde(default)]
    assertion_response: Option<String>,
    #[serde(default)]
    request_device_token: bool,
}

impl CredentialInput {
    fn secret(&self, field: &str) -> Option<&str> {
        match field {
            "password" => self.password.as_deref(),
            "code" => self.code.as_deref(),
            "recovery_code" => self.recovery_code.as_deref(),
            "assertion_response" => self.assertion_response.as_deref(),
            _ => None,
        }
    }
}

/// Asks for the credential of the selected option and verifies it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentUseAuthenticator {
    pub authentication: Authentication,
    pub json_pointer: JsonPointer,
}

impl Kind for IntentUseAuthenticator {
    const KIND: &'static str = "IntentUseAuthenticator";
}

#[async_trait]
impl InputReactor for IntentUseAuthenticator {
    async fn can_react_to(&self, _ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        if !flows.nearest.nodes.is_empty() {
            return Ok(Reaction::Eof);
        }
        Ok(Reaction::Input(InputSchema::new(
            self.json_pointer.clone(),
            schemas::credential(self.authentication),
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
        let field = self.authentication.credential_field().ok_or_else(|| {
            FlowError::internal(format!("{} takes no credential", self.authentication))
        })?;
        let Some(credential) = input.and_then(Input::decode::<CredentialInput>) else {
            return Ok(Outcome::Incompatible);
        };
        let Some(secret) = credential.secret(field) else {
            return Ok(Outcome::Incompatible);
        };

        let user_id = get_user_id(flows)?;
        let node = match self.authentication {
            Authentication::RecoveryCode => {
                let code = ctx.mfa()?.verify_recovery_code(&user_id, secret).await?;
                NodeDidAuthenticate {
                    authentication: self.authentication,
                    authenticator_id: None,
                    recovery_code: Some(code),
                    updated_authenticator: None,
                    request_device_token: credential.request_device_token,
                }
            }
            authentication => {
                let verification = ctx
                    .authenticators()?
                    .verify_one_with_spec(&user_id, authentication, secret)
                    .await?;
                NodeDidAuthenticate {
                    authentication,
                    authenticator_id: Some(verification.authenticator.id.clone()),
                    recovery_code: None,
                    updated_authenticator: verification
                        .requires_update
                        .then_some(verification.authenticator),
                    request_device_token: credential.request_device_token,
                }
            }
        };
        debug!(user_id = %user_id, authentication = %self.authentication, "authenticated");
        Ok(Outcome::simple(node))
    }
}

impl Intent for IntentUseAuthenticator {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| AuthenticationMethod {
            authentication: self.authentication,
            json_pointer: self.json_pointer.clone(),
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDidAuthenticate {
    pub authentication: Authentication,
    pub authenticator_id: Option<String>,
    #[serde(default)]
    pub recovery_code: Option<RecoveryCode>,
    /// Written back inside the step transaction.
    #[serde(default)]
    pub updated_authenticator: Option<AuthenticatorInfo>,
    #[serde(default)]
    pub request_device_token: bool,
}

impl Kind for NodeDidAuthenticate {
    const KIND: &'static str = "NodeDidAuthenticate";
}

impl NodeSimple for NodeDidAuthenticate {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| DidAuthenticate {
            authentication: self.authentication,
            authenticator_id: self.authenticator_id.clone(),
            amr: self.authentication.amr().iter().map(|token| token.to_string()).collect(),
            request_device_token: self.request_device_token,
        });
    }

    fn effects(&self, _ctx: &Context, _flows: Flows<'_>) -> Result<Vec<Effect>, FlowError> {
        let mut effects = Vec::new();
        if let Some(code) = self.recovery_code.clone() {
            effects.push(Effect::run(move |ctx| async move {
                ctx.mfa()?.consume_recovery_code(&code).await
            }));
        }
        if let Some(authenticator) = self.updated_authenticator.clone() {
            effects.push(Effect::run(move |ctx| async move {
                ctx.authenticators()?.update(&authenticator).await
            }));
        }
        Ok(effects)
    }
}

/// Outcome of checking the device-token cookie. A valid token counts as an authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDidInspectDeviceToken {
    pub valid: bool,
    pub json_pointer: JsonPointer,
}

impl Kind for NodeDidInspectDeviceToken {
    const KIND: &'static str = "NodeDidInspectDeviceToken";
}

impl NodeSimple for NodeDidInspectDeviceToken {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| DeviceTokenInspected);
        if self.valid {
            request
                .provide(|| AuthenticationMethod {
                    authentication: Authentication::DeviceToken,
                    json_pointer: self.json_pointer.clone(),
                })
                .provide(|| DidAuthenticate {
                    authentication: Authentication::DeviceToken,
                    authenticator_id: None,
                    amr: Vec::new(),
                    request_device_token: false,
                });
        }
    }

    fn effects(&self, _ctx: &Context, _flows: Flows<'_>) -> Result<Vec<Effect>, FlowError> {
        if self.valid {
            return Ok(Vec::new());
        }
        // a stale or foreign cookie must not be offered again
        Ok(vec![Effect::on_commit(|ctx| async move {
            ctx.cookies()?.clear_device_token();
            Ok(())
        })])
    }
}

pub async fn inspect_device_token(ctx: &Context, user_id: &str) -> Result<bool, FlowError> {
    match ctx.cookies()?.device_token() {
        Some(token) => ctx.mfa()?.verify_device_token(user_id, &token).await,
        None => Ok(false),
    }
}

/// Issues a device token after authentication when the client asked for one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDoCreateDeviceTokenIfRequested {
    pub requested: bool,
}

impl Kind for NodeDoCreateDeviceTokenIfRequested {
    const KIND: &'static str = "NodeDoCreateDeviceTokenIfRequested";
}

impl NodeSimple for NodeDoCreateDeviceTokenIfRequested {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| DoCreateDeviceTokenIfRequested);
    }

    fn effects(&self, ctx: &Context, flows: Flows<'_>) -> Result<Vec<Effect>, FlowError> {
        if !self.requested {
            return Ok(Vec::new());
        }
        let user_id = get_user_id(flows)?;
        let token = ctx.mfa()?.generate_device_token();
        let cookie = token.clone();
        Ok(vec![
            Effect::run(move |ctx| async move { ctx.mfa()?.create_device_token(&user_id, &token).await }),
            Effect::on_commit(move |ctx| async move {
                ctx.cookies()?.set_device_token(&cookie);
                Ok(())
            }),
        ])
    }
}
