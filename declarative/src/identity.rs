//! Identification input and the identity nodes shared by login and signup.

use crate::config::AppConfig;
use crate::deps::DepsExt;
use crate::errors;
use crate::milestones::{DoCreateIdentity, DoUseIdentity, IdentificationMethod};
use crate::model::{Event, Identification, IdentityInfo, IdentitySpec, OAuthAssertion};
use authflow_core::context::Context;
use authflow_core::effect::Effect;
use authflow_core::error::FlowError;
use authflow_core::flow::Flows;
use authflow_core::intent::{Kind, NodeSimple};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::milestone::{DoUseUser, MilestoneRequest};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Client or synthetic input of an `identify` step.
///
/// Replayed OAuth input carries the `assertion` instead of the single-use `code`.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentifyInput {
    pub identification: Identification,
    #[serde(default)]
    pub login_id: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub assertion: Option<OAuthAssertion>,
}

/// Build the identity spec the input describes. `None` when the input lacks the fields
/// its identification needs.
pub async fn resolve_spec(
    ctx: &Context,
    config: &AppConfig,
    input: &IdentifyInput,
) -> Result<Option<IdentitySpec>, FlowError> {
    match input.identification.login_id_type() {
        Some(key_type) => {
            let Some(login_id) = &input.login_id else {
                return Ok(None);
            };
            let key = config.login_id_key(key_type).ok_or_else(|| {
                FlowError::internal(format!("identification {} has no login id key", input.identification))
            })?;
            Ok(Some(IdentitySpec::login_id(&key.key, key_type, login_id)))
        }
        None => {
            let Some(alias) = &input.alias else {
                return Ok(None);
            };
            if config.oauth_provider(alias).is_none() {
                return Err(errors::oauth_provider_not_found(alias));
            }
            let assertion = match (&input.assertion, &input.code) {
                (Some(assertion), _) => assertion.clone(),
                (None, Some(code)) => ctx.oauth()?.exchange(alias, code).await?,
                (None, None) => return Ok(None),
            };
            Ok(Some(IdentitySpec::oauth(alias.clone(), assertion)))
        }
    }
}

/// An existing identity identified the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDoUseIdentity {
    pub identification: Identification,
    pub json_pointer: JsonPointer,
    pub identity: IdentityInfo,
}

impl Kind for NodeDoUseIdentity {
    const KIND: &'static str = "NodeDoUseIdentity";
}

impl NodeSimple for NodeDoUseIdentity {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request
            .provide(|| DoUseIdentity(self.identity.clone()))
            .provide(|| DoUseUser(self.identity.user_id.clone()))
            .provide(|| IdentificationMethod {
                identification: self.identification,
                json_pointer: self.json_pointer.clone(),
            });
    }
}

/// A new identity for the flow's user; stored inside the step transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDoCreateIdentity {
    pub identification: Identification,
    pub json_pointer: JsonPointer,
    pub identity: IdentityInfo,
}

impl Kind for NodeDoCreateIdentity {
    const KIND: &'static str = "NodeDoCreateIdentity";
}

impl NodeSimple for NodeDoCreateIdentity {
    fn milestones(&self, request: &mut MilestoneRequest) {
        request
            .provide(|| DoCreateIdentity(self.identity.clone()))
            .provide(|| DoUseUser(self.identity.user_id.clone()))
            .provide(|| IdentificationMethod {
                identification: self.identification,
                json_pointer: self.json_pointer.clone(),
            });
    }

    fn effects(&self, _ctx: &Context, _flows: Flows<'_>) -> Result<Vec<Effect>, FlowError> {
        let identity = self.identity.clone();
        let event = Event::new(
            Event::IDENTITY_CREATED,
            json!({"user_id": identity.user_id, "identity_id": identity.id}),
        );
        Ok(vec![
            Effect::run(move |ctx| async move {
                let identities = ctx.identities()?;
                identities.check_duplicated_by_unique_key(&identity).await?;
                identities.create(&identity).await
            }),
            Effect::run(move |ctx| async move { ctx.events()?.dispatch_event_on_commit(&event).await }),
        ])
    }
}
