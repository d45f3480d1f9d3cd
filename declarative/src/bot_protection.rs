//! # Bot protection sub-flow
//!
//! Inserted in front of a branch whose configuration says `bot_protection.mode = "always"`.
//! It asks for `{bot_protection: {type, response}}` and reports one of three outcomes:
//!
//! * verified: a [`NodeDidVerifyBotProtection`] is recorded and the branch proceeds
//! * failed: the node is recorded as failed and the submission is rejected
//! * service unavailable: nothing is recorded and the same step is offered again
//!
//! The sub-flow ends only when its latest record is a successful verification.

use crate::config::{AppConfig, BotProtectionMode, FlowBranch};
use crate::deps::{BotVerification, DepsExt};
use crate::milestones::DidVerifyBotProtection;
use crate::schemas;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::error::FlowError;
use authflow_core::flow::{Flow, Flows, Node};
use authflow_core::input::{Input, InputSchema};
use authflow_core::intent::{InputReactor, Intent, Kind, NodeSimple};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::milestone::{MilestoneRequest, find_all_milestones, node_milestone};
use authflow_core::outcome::{BotProtectionStatus, BotProtectionVerification, Outcome, Reaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Provider to verify with when `branch` demands bot protection.
pub fn required_provider<'a>(config: &'a AppConfig, branch: &FlowBranch) -> Option<&'a str> {
    let always = branch
        .bot_protection
        .as_ref()
        .is_some_and(|bot| bot.mode == BotProtectionMode::Always);
    if always {
        config.bot_protection_provider()
    } else {
        None
    }
}

/// Whether a successful verification is recorded anywhere below `flow`.
pub fn is_verified(flow: &Flow) -> bool {
    find_all_milestones::<DidVerifyBotProtection>(flow)
        .iter()
        .any(|DidVerifyBotProtection(status)| *status == BotProtectionStatus::Verified)
}

#[derive(Debug, Deserialize)]
struct BotProtectionInput {
    bot_protection: BotProtectionData,
}

#[derive(Debug, Deserialize)]
struct BotProtectionData {
    #[serde(rename = "type")]
    provider_type: String,
    response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentBotProtection {
    pub json_pointer: JsonPointer,
}

impl Kind for IntentBotProtection {
    const KIND: &'static str = "IntentBotProtection";
}

#[async_trait]
impl InputReactor for IntentBotProtection {
    async fn can_react_to(&self, ctx: &Context, flows: Flows<'_>) -> Result<Reaction, FlowError> {
        let verified = match flows.nearest.nodes.last() {
            Some(Node::Simple(last)) => node_milestone::<DidVerifyBotProtection>(last.as_ref())
                .is_some_and(|DidVerifyBotProtection(status)| status == BotProtectionStatus::Verified),
            _ => false,
        };
        if verified {
            return Ok(Reaction::Eof);
        }

        let provider = ctx
            .app_config()?
            .bot_protection_provider()
            .ok_or_else(|| FlowError::internal("bot protection is not enabled"))?;
        Ok(Reaction::Input(InputSchema::new(
            self.json_pointer.clone(),
            schemas::bot_protection(provider),
        )))
    }

    async fn react_to(
        &self,
        ctx: &Context,
        _flows: Flows<'_>,
        input: Option<&Input>,
    ) -> Result<Outcome, FlowError> {
        let Some(data) = input.and_then(Input::decode::<BotProtectionInput>) else {
            return Ok(Outcome::Incompatible);
        };
        let data = data.bot_protection;

        let verification = ctx
            .bot_protection()?
            .verify(&data.provider_type, &data.response, ctx.remote_ip())
            .await?;
        debug!(provider = %data.provider_type, ?verification, "bot protection verified");

        let record = |status| Node::simple(NodeDidVerifyBotProtection { status });
        Ok(Outcome::BotProtection(match verification {
            BotVerification::Verified => {
                BotProtectionVerification::Verified(record(BotProtectionStatus::Verified))
            }
            BotVerification::Failed => {
                BotProtectionVerification::Failed(record(BotProtectionStatus::Failed))
            }
            BotVerification::ServiceUnavailable => {
                warn!(provider = %data.provider_type, "bot protection service unavailable");
                BotProtectionVerification::ServiceUnavailable
            }
        }))
    }
}

impl Intent for IntentBotProtection {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDidVerifyBotProtection {
    pub status: BotProtectionStatus,
}

impl Kind for NodeDidVerifyBotProtection {
    const KIND: &'static str = "NodeDidVerifyBotProtection";
}

impl NodeSimple for NodeDidVerifyBotProtection {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request.provide(|| DidVerifyBotProtection(self.status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures::app_config;
    use crate::deps::BotProtectionVerifier;
    use authflow_core::bus::Bus;
    use authflow_core::flow::{FlowReference, FlowType};
    use serde_json::json;
    use std::sync::Arc;

    struct Fixed(BotVerification);

    #[async_trait]
    impl BotProtectionVerifier for Fixed {
        async fn verify(
            &self,
            provider_type: &str,
            _response: &str,
            _remote_ip: Option<&str>,
        ) -> Result<BotVerification, FlowError> {
            assert_eq!(provider_type, "cloudflare");
            Ok(self.0)
        }
    }

    fn context(result: BotVerification) -> Context {
        let bus = Bus::new()
            .with(Arc::new(app_config()))
            .with::<Arc<dyn BotProtectionVerifier>>(Arc::new(Fixed(result)));
        Context::new(Arc::new(bus), FlowReference::new(FlowType::Login, "default"))
    }

    fn input() -> Input {
        Input::new(json!({"bot_protection": {"type": "cloudflare", "response": "token"}}))
    }

    #[tokio::test]
    async fn test_outcomes() {
        let flow = Flow::new(IntentBotProtection {
            json_pointer: JsonPointer::root().steps(0).one_of(0),
        });
        let flows = Flows::new(&flow);

        let ctx = context(BotVerification::ServiceUnavailable);
        let outcome = flow.intent.react_to(&ctx, flows, Some(&input())).await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::BotProtection(BotProtectionVerification::ServiceUnavailable)
        ));

        let ctx = context(BotVerification::Failed);
        let outcome = flow.intent.react_to(&ctx, flows, Some(&input())).await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::BotProtection(BotProtectionVerification::Failed(_))
        ));

        let outcome = flow
            .intent
            .react_to(&ctx, flows, Some(&Input::new(json!({"login_id": "x"}))))
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Incompatible));
    }

    #[tokio::test]
    async fn test_eof_only_after_verified() {
        let ctx = context(BotVerification::Verified);
        let mut flow = Flow::new(IntentBotProtection {
            json_pointer: JsonPointer::root().steps(0).one_of(0),
        });
        let reaction = flow.intent.can_react_to(&ctx, Flows::new(&flow)).await.unwrap();
        assert_eq!(
            reaction.schema().map(|s| s.json_pointer().to_string()),
            Some("/steps/0/one_of/0".to_string())
        );

        flow.nodes.push(Node::simple(NodeDidVerifyBotProtection {
            status: BotProtectionStatus::Failed,
        }));
        let reaction = flow.intent.can_react_to(&ctx, Flows::new(&flow)).await.unwrap();
        assert!(reaction.schema().is_some());
        assert!(!is_verified(&flow));

        flow.nodes.push(Node::simple(NodeDidVerifyBotProtection {
            status: BotProtectionStatus::Verified,
        }));
        let reaction = flow.intent.can_react_to(&ctx, Flows::new(&flow)).await.unwrap();
        assert!(matches!(reaction, Reaction::Eof));
        assert!(is_verified(&flow));
    }
}
