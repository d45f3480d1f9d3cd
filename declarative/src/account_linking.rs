//! # Account linking
//!
//! Runs whenever a signup step is about to create an identity. The incoming identity's
//! linking value (an email claim, a phone number) is compared with the standard claims
//! of existing identities:
//!
//! * no identity of another user shares it: the identity is created directly
//! * an identity with the same unique key exists: `DuplicatedIdentity`
//! * conflicts and the rule's action is `error`: `AccountLinkingConflict`
//! * conflicts and the action is `login_and_link`: [`IntentAccountLinking`] selects the
//!   conflicting owner and rewrites the flow root to adopt that user, replaying the
//!   original identification
//!
//! Rules come from `account_linking.oauth` (matched by provider alias) and
//! `account_linking.login_id` (matched by login id key). Without a matching item the
//! default rule links by the natural claim with action `error`. A branch may override the
//! action of a named item.

use crate::config::{AccountLinkingAction, AccountLinkingOverride, AccountLinkingOverrideItem, AppConfig};
use crate::deps::DepsExt;
use crate::errors;
use crate::model::{IdentityInfo, IdentitySpec};
use crate::schemas;
use crate::signup::IntentSignupFlow;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::error::FlowError;
use authflow_core::flow::Flows;
use authflow_core::input::{Input, InputSchema};
use authflow_core::intent::{InputReactor, Intent, Kind};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::outcome::{Outcome, Reaction, RewriteFlow};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use tracing::{debug, info};

/// The linking rule that applies to one incoming identity.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkingRule {
    pub name: String,
    /// Standard claim compared against existing identities.
    pub claim: String,
    /// Value of the incoming identity; `None` or empty never conflicts.
    pub value: Option<String>,
    pub action: AccountLinkingAction,
}

fn apply_override(action: AccountLinkingAction, name: &str, items: &[AccountLinkingOverrideItem]) -> AccountLinkingAction {
    items
        .iter()
        .find(|item| item.name == name)
        .and_then(|item| item.action)
        .unwrap_or(action)
}

fn first_token(pointer: &JsonPointer, fallback: &str) -> String {
    pointer.first_token().unwrap_or(fallback).to_string()
}

pub fn linking_rule(
    config: &AppConfig,
    spec: &IdentitySpec,
    overrides: Option<&AccountLinkingOverride>,
) -> LinkingRule {
    match spec {
        IdentitySpec::Oauth { alias, claims, .. } => {
            let claims = Value::Object(claims.clone());
            let rule = match config.account_linking.oauth.iter().find(|item| item.alias == *alias) {
                Some(item) => LinkingRule {
                    name: item.name.clone(),
                    claim: first_token(&item.user_profile, "email"),
                    value: item.oauth_claim.traverse(&claims).and_then(Value::as_str).map(str::to_string),
                    action: item.action,
                },
                None => LinkingRule {
                    name: String::new(),
                    claim: "email".to_string(),
                    value: claims.get("email").and_then(Value::as_str).map(str::to_string),
                    action: AccountLinkingAction::Error,
                },
            };
            let action = match overrides {
                Some(overrides) => apply_override(rule.action, &rule.name, &overrides.oauth),
                None => rule.action,
            };
            LinkingRule { action, ..rule }
        }
        IdentitySpec::LoginId {
            key,
            login_id_type,
            value,
        } => {
            let rule = match config.account_linking.login_id.iter().find(|item| item.key == *key) {
                Some(item) => LinkingRule {
                    name: item.name.clone(),
                    claim: first_token(&item.user_profile, login_id_type.claim()),
                    value: Some(value.clone()),
                    action: item.action,
                },
                None => LinkingRule {
                    name: String::new(),
                    claim: login_id_type.claim().to_string(),
                    value: Some(value.clone()),
                    action: AccountLinkingAction::Error,
                },
            };
            let action = match overrides {
                Some(overrides) => apply_override(rule.action, &rule.name, &overrides.login_id),
                None => rule.action,
            };
            LinkingRule { action, ..rule }
        }
    }
}

/// Conflicts that must go through [`IntentAccountLinking`]; empty when the identity can
/// be created directly.
pub async fn detect_conflicts(
    ctx: &Context,
    incoming: &IdentityInfo,
    overrides: Option<&AccountLinkingOverride>,
) -> Result<Vec<IdentityInfo>, FlowError> {
    let rule = linking_rule(ctx.app_config()?, &incoming.spec, overrides);
    let Some(value) = rule.value.filter(|value| !value.is_empty()) else {
        return Ok(Vec::new());
    };

    let mut seen = HashSet::new();
    let mut conflicts = Vec::new();
    for existing in ctx.identities()?.list_by_claim(&rule.claim, &value).await? {
        if existing.spec.is_identical(&incoming.spec) {
            return Err(errors::duplicated_identity());
        }
        if existing.user_id == incoming.user_id || !seen.insert(existing.id.clone()) {
            continue;
        }
        conflicts.push(existing);
    }
    debug!(rule = %rule.name, claim = %rule.claim, conflicts = conflicts.len(), "account linking checked");

    if !conflicts.is_empty() && rule.action == AccountLinkingAction::Error {
        return Err(errors::account_linking_conflict(conflicts.len()));
    }
    Ok(conflicts)
}

#[derive(Debug, Deserialize)]
struct SelectConflict {
    index: usize,
}

/// Resolves a conflict by adopting the owner of the selected identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAccountLinking {
    pub json_pointer: JsonPointer,
    pub conflicts: Vec<IdentityInfo>,
    /// Identification replayed against the rewritten flow.
    pub synthetic_input: Value,
}

impl Kind for IntentAccountLinking {
    const KIND: &'static str = "IntentAccountLinking";
}

#[async_trait]
impl InputReactor for IntentAccountLinking {
    async fn can_react_to(&self, _ctx: &Context, _flows: Flows<'_>) -> Result<Reaction, FlowError> {
        match self.conflicts.len() {
            0 => Err(FlowError::internal("account linking without conflicts")),
            1 => Ok(Reaction::Automatic),
            n => Ok(Reaction::Input(InputSchema::new(
                self.json_pointer.clone(),
                schemas::select_conflict(n),
            ))),
        }
    }

    async fn react_to(
        &self,
        _ctx: &Context,
        _flows: Flows<'_>,
        input: Option<&Input>,
    ) -> Result<Outcome, FlowError> {
        let index = if self.conflicts.len() == 1 {
            0
        } else {
            match input.and_then(Input::decode::<SelectConflict>) {
                Some(SelectConflict { index }) => index,
                None => return Ok(Outcome::Incompatible),
            }
        };
        let Some(selected) = self.conflicts.get(index) else {
            return Ok(Outcome::Incompatible);
        };

        info!(owner = %selected.user_id, identity = %selected.id, "adopting existing user");
        Ok(Outcome::RewriteFlow(RewriteFlow {
            intent: Box::new(IntentSignupFlow::existing(selected.user_id.clone())),
            nodes: Vec::new(),
            synthetic_input: Input::synthetic(self.synthetic_input.clone()),
        }))
    }

    async fn output_data(&self, _ctx: &Context, _flows: Flows<'_>) -> Result<Value, FlowError> {
        let conflicts: Vec<Value> = self
            .conflicts
            .iter()
            .enumerate()
            .map(|(index, identity)| match &identity.spec {
                IdentitySpec::LoginId { login_id_type, .. } => {
                    json!({"index": index, "type": "login_id", "login_id_type": login_id_type})
                }
                IdentitySpec::Oauth { alias, .. } => {
                    json!({"index": index, "type": "oauth", "alias": alias})
                }
            })
            .collect();
        Ok(json!({"conflicts": conflicts}))
    }
}

impl Intent for IntentAccountLinking {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures::app_config;
    use crate::config::AccountLinkingLoginIdItem;
    use crate::model::{LoginIdKeyType, OAuthAssertion};
    use serde_json::Map;

    fn google(email: Option<&str>) -> IdentitySpec {
        let mut claims = Map::new();
        if let Some(email) = email {
            claims.insert("email".into(), json!(email));
        }
        IdentitySpec::oauth(
            "google",
            OAuthAssertion {
                subject_id: "g-1".into(),
                claims,
            },
        )
    }

    #[test]
    fn test_oauth_rule_from_config() {
        let config = app_config();
        let rule = linking_rule(&config, &google(Some("bob@example.com")), None);
        assert_eq!(rule.name, "google_email");
        assert_eq!(rule.claim, "email");
        assert_eq!(rule.value.as_deref(), Some("bob@example.com"));
        assert_eq!(rule.action, AccountLinkingAction::LoginAndLink);

        let overrides = AccountLinkingOverride {
            oauth: vec![AccountLinkingOverrideItem {
                name: "google_email".into(),
                action: Some(AccountLinkingAction::Error),
            }],
            login_id: Vec::new(),
        };
        let rule = linking_rule(&config, &google(None), Some(&overrides));
        assert_eq!(rule.action, AccountLinkingAction::Error);
        assert_eq!(rule.value, None);
    }

    #[test]
    fn test_login_id_defaults() {
        let config = app_config();
        let phone = IdentitySpec::login_id("phone", LoginIdKeyType::Phone, "+85298765432");
        let rule = linking_rule(&config, &phone, None);
        assert_eq!(rule.claim, "phone_number");
        assert_eq!(rule.action, AccountLinkingAction::Error);

        let mut config = config;
        config.account_linking.login_id.push(AccountLinkingLoginIdItem {
            name: "phone".into(),
            key: "phone".into(),
            user_profile: "/phone_number".parse().unwrap(),
            action: AccountLinkingAction::LoginAndLink,
        });
        let rule = linking_rule(&config, &phone, None);
        assert_eq!(rule.name, "phone");
        assert_eq!(rule.action, AccountLinkingAction::LoginAndLink);
    }

    #[tokio::test]
    async fn test_single_conflict_rewrites_to_owner() {
        let conflict = IdentityInfo {
            id: "i-1".into(),
            user_id: "owner".into(),
            spec: IdentitySpec::login_id("email", LoginIdKeyType::Email, "bob@example.com"),
        };
        let intent = IntentAccountLinking {
            json_pointer: JsonPointer::root().steps(0).one_of(1),
            conflicts: vec![conflict],
            synthetic_input: json!({"identification": "oauth", "alias": "google"}),
        };
        let flow = authflow_core::flow::Flow::new(intent.clone());
        let ctx = Context::new(
            std::sync::Arc::new(authflow_core::bus::Bus::new()),
            authflow_core::flow::FlowReference::new(authflow_core::flow::FlowType::Signup, "default"),
        );

        assert!(matches!(
            intent.can_react_to(&ctx, Flows::new(&flow)).await.unwrap(),
            Reaction::Automatic
        ));
        let Outcome::RewriteFlow(rewrite) = intent.react_to(&ctx, Flows::new(&flow), None).await.unwrap() else {
            panic!("expected a rewrite");
        };
        assert_eq!(rewrite.intent.kind(), "IntentSignupFlow");
        assert!(rewrite.nodes.is_empty());
        assert!(rewrite.synthetic_input.is_synthetic());
        assert_eq!(rewrite.synthetic_input.value()["alias"], "google");
    }
}
