//! # Flow configuration
//!
//! [`AppConfig`] describes identities, account linking, bot protection and the named
//! login, signup, reauth and account recovery flows. A flow is a list of steps; each step offers `one_of` branches,
//! and a branch may nest further `steps`.
//!
//! Intents never hold configuration objects. They hold a [`JsonPointer`] into the flow
//! definition selected by the context's [`FlowReference`] and resolve it when they react,
//! so a persisted tree stays small and always reflects the deployed configuration.
//!
//! ```toml
//! [[identity.login_id_keys]]
//! key = "email"
//! type = "email"
//!
//! [[authentication_flows.login_flows]]
//! name = "default"
//! signup_flow = "default"
//!
//! [[authentication_flows.login_flows.steps]]
//! type = "identify"
//! one_of = [{ identification = "email" }]
//! ```

use crate::model::{Authentication, Identification, LoginIdKeyType};
use authflow_core::error::FlowError;
use authflow_core::flow::{FlowReference, FlowType};
use authflow_core::jsonpointer::JsonPointer;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration at {location}: {message}")]
    Invalid { location: String, message: String },
}

impl ConfigError {
    fn invalid(location: impl ToString, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            location: location.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub identity: IdentityConfig,
    pub account_linking: AccountLinkingConfig,
    pub bot_protection: BotProtectionConfig,
    pub authentication_flows: AuthenticationFlowsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub login_id_keys: Vec<LoginIdKeyConfig>,
    pub oauth_providers: Vec<OAuthProviderConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginIdKeyConfig {
    pub key: String,
    #[serde(rename = "type")]
    pub key_type: LoginIdKeyType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    pub alias: String,
    #[serde(rename = "type")]
    pub provider_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountLinkingAction {
    #[default]
    Error,
    LoginAndLink,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountLinkingConfig {
    pub oauth: Vec<AccountLinkingOAuthItem>,
    pub login_id: Vec<AccountLinkingLoginIdItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountLinkingOAuthItem {
    pub name: String,
    pub alias: String,
    /// Where the linking value sits in the provider claims.
    pub oauth_claim: JsonPointer,
    /// Which standard claim of existing identities it is compared to.
    pub user_profile: JsonPointer,
    #[serde(default)]
    pub action: AccountLinkingAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountLinkingLoginIdItem {
    pub name: String,
    pub key: String,
    pub user_profile: JsonPointer,
    #[serde(default)]
    pub action: AccountLinkingAction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotProtectionConfig {
    pub enabled: bool,
    pub provider: Option<BotProtectionProviderConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotProtectionProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticationFlowsConfig {
    pub login_flows: Vec<LoginFlowConfig>,
    pub signup_flows: Vec<SignupFlowConfig>,
    pub reauth_flows: Vec<ReauthFlowConfig>,
    pub account_recovery_flows: Vec<AccountRecoveryFlowConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginFlowConfig {
    pub name: String,
    /// Signup flow entered when the identified user does not exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signup_flow: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_amr: Vec<String>,
    pub steps: Vec<FlowStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignupFlowConfig {
    pub name: String,
    pub steps: Vec<FlowStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReauthFlowConfig {
    pub name: String,
    pub steps: Vec<FlowStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecoveryFlowConfig {
    pub name: String,
    pub steps: Vec<FlowStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Identify,
    Authenticate,
    CreateAuthenticator,
    VerifyAccountRecoveryCode,
    ResetPassword,
}

impl StepType {
    /// Whether the step chooses between `one_of` branches.
    pub fn has_branches(self) -> bool {
        matches!(
            self,
            StepType::Identify | StepType::Authenticate | StepType::CreateAuthenticator
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<FlowBranch>,
}

impl FlowStep {
    /// First branch selecting `identification`, with its index.
    pub fn identification_branch(&self, identification: Identification) -> Option<(usize, &FlowBranch)> {
        self.one_of
            .iter()
            .enumerate()
            .find(|(_, branch)| branch.identification == Some(identification))
    }

    pub fn authentication_branch(&self, authentication: Authentication) -> Option<(usize, &FlowBranch)> {
        self.one_of
            .iter()
            .enumerate()
            .find(|(_, branch)| branch.authentication == Some(authentication))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowBranch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identification: Option<Identification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<Authentication>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot_protection: Option<BranchBotProtection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_linking: Option<AccountLinkingOverride>,
    /// Account recovery only: what an unknown login id does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<OnFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<FlowStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Fail with `UserNotFound`.
    #[default]
    Error,
    /// Carry on as if the login id existed, so the response reveals nothing.
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotProtectionMode {
    Always,
    #[default]
    Never,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchBotProtection {
    #[serde(default)]
    pub mode: BotProtectionMode,
}

/// Per-branch changes to the global account-linking items, matched by item name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountLinkingOverride {
    pub oauth: Vec<AccountLinkingOverrideItem>,
    pub login_id: Vec<AccountLinkingOverrideItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountLinkingOverrideItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<AccountLinkingAction>,
}

impl AppConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn login_flow(&self, name: &str) -> Option<&LoginFlowConfig> {
        self.authentication_flows
            .login_flows
            .iter()
            .find(|flow| flow.name == name)
    }

    pub fn signup_flow(&self, name: &str) -> Option<&SignupFlowConfig> {
        self.authentication_flows
            .signup_flows
            .iter()
            .find(|flow| flow.name == name)
    }

    pub fn reauth_flow(&self, name: &str) -> Option<&ReauthFlowConfig> {
        self.authentication_flows
            .reauth_flows
            .iter()
            .find(|flow| flow.name == name)
    }

    pub fn account_recovery_flow(&self, name: &str) -> Option<&AccountRecoveryFlowConfig> {
        self.authentication_flows
            .account_recovery_flows
            .iter()
            .find(|flow| flow.name == name)
    }

    pub fn login_id_key(&self, key_type: LoginIdKeyType) -> Option<&LoginIdKeyConfig> {
        self.identity
            .login_id_keys
            .iter()
            .find(|key| key.key_type == key_type)
    }

    pub fn oauth_provider(&self, alias: &str) -> Option<&OAuthProviderConfig> {
        self.identity
            .oauth_providers
            .iter()
            .find(|provider| provider.alias == alias)
    }

    /// Provider type to verify with, when bot protection is switched on.
    pub fn bot_protection_provider(&self) -> Option<&str> {
        if !self.bot_protection.enabled {
            return None;
        }
        self.bot_protection
            .provider
            .as_ref()
            .map(|provider| provider.provider_type.as_str())
    }

    /// The flow definition selected by `reference`, as a JSON document.
    pub fn flow_document(&self, reference: &FlowReference) -> Result<Value, FlowError> {
        let document = match reference.flow_type {
            FlowType::Login => self.login_flow(&reference.name).map(serde_json::to_value),
            FlowType::Signup => self.signup_flow(&reference.name).map(serde_json::to_value),
            FlowType::Reauth => self.reauth_flow(&reference.name).map(serde_json::to_value),
            FlowType::AccountRecovery => self
                .account_recovery_flow(&reference.name)
                .map(serde_json::to_value),
        };
        match document {
            Some(document) => Ok(document?),
            None => Err(FlowError::internal(format!("flow {reference} is not configured"))),
        }
    }

    /// Resolve `pointer` inside the flow definition and decode it as `T`.
    ///
    /// A pointer that does not lead to a `T` means the tree and the configuration disagree,
    /// which is an internal error.
    pub fn flow_object<T: DeserializeOwned>(
        &self,
        reference: &FlowReference,
        pointer: &JsonPointer,
    ) -> Result<T, FlowError> {
        let document = self.flow_document(reference)?;
        let object = pointer.traverse(&document).ok_or_else(|| {
            FlowError::internal(format!("{reference}: nothing at {pointer}"))
        })?;
        serde_json::from_value(object.clone()).map_err(|err| {
            FlowError::internal(format!("{reference}: unexpected flow object at {pointer}: {err}"))
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let flows = &self.authentication_flows;
        for flow in &flows.login_flows {
            if let Some(signup) = &flow.signup_flow {
                if self.signup_flow(signup).is_none() {
                    return Err(ConfigError::invalid(
                        format!("login/{}", flow.name),
                        format!("unknown signup_flow {signup:?}"),
                    ));
                }
            }
        }

        let definitions = flows
            .login_flows
            .iter()
            .map(|flow| (FlowType::Login, &flow.name, &flow.steps))
            .chain(flows.signup_flows.iter().map(|flow| (FlowType::Signup, &flow.name, &flow.steps)))
            .chain(flows.reauth_flows.iter().map(|flow| (FlowType::Reauth, &flow.name, &flow.steps)))
            .chain(
                flows
                    .account_recovery_flows
                    .iter()
                    .map(|flow| (FlowType::AccountRecovery, &flow.name, &flow.steps)),
            );
        let mut names = HashSet::new();
        for (flow_type, name, steps) in definitions {
            let reference = FlowReference::new(flow_type, name.clone());
            if !names.insert(reference.clone()) {
                return Err(ConfigError::invalid(
                    &reference,
                    format!("duplicate {flow_type} flow name"),
                ));
            }
            self.validate_steps(&reference, &JsonPointer::root(), steps)?;
        }

        for item in &self.account_linking.oauth {
            if self.oauth_provider(&item.alias).is_none() {
                return Err(ConfigError::invalid(
                    format!("account_linking.oauth.{}", item.name),
                    format!("unknown oauth provider {:?}", item.alias),
                ));
            }
        }
        Ok(())
    }

    fn validate_steps(
        &self,
        reference: &FlowReference,
        parent: &JsonPointer,
        steps: &[FlowStep],
    ) -> Result<(), ConfigError> {
        for (idx, step) in steps.iter().enumerate() {
            let pointer = parent.steps(idx);
            let location = format!("{reference}{pointer}");

            self.flow_object::<FlowStep>(reference, &pointer)
                .map_err(|err| ConfigError::invalid(&location, err.to_string()))?;

            let allowed = match reference.flow_type {
                FlowType::Login => matches!(
                    step.step_type,
                    StepType::Identify | StepType::Authenticate | StepType::CreateAuthenticator
                ),
                FlowType::Signup => {
                    matches!(step.step_type, StepType::Identify | StepType::CreateAuthenticator)
                }
                FlowType::Reauth => step.step_type == StepType::Authenticate,
                FlowType::AccountRecovery => matches!(
                    step.step_type,
                    StepType::Identify | StepType::VerifyAccountRecoveryCode | StepType::ResetPassword
                ),
            };
            if !allowed {
                return Err(ConfigError::invalid(
                    &location,
                    format!("step type {:?} is not allowed here", step.step_type),
                ));
            }
            match (step.step_type.has_branches(), step.one_of.is_empty()) {
                (true, true) => return Err(ConfigError::invalid(&location, "one_of must not be empty")),
                (false, false) => return Err(ConfigError::invalid(&location, "step takes no one_of")),
                _ => {}
            }

            let mut seen = HashSet::new();
            for (branch_idx, branch) in step.one_of.iter().enumerate() {
                let branch_location = format!("{reference}{}", pointer.one_of(branch_idx));
                self.validate_branch(reference.flow_type, step.step_type, branch, &branch_location)?;
                let selector = (branch.identification, branch.authentication);
                if !seen.insert(selector) {
                    return Err(ConfigError::invalid(&branch_location, "duplicate branch"));
                }
                self.validate_steps(reference, &pointer.one_of(branch_idx), &branch.steps)?;
            }
        }
        Ok(())
    }

    fn validate_branch(
        &self,
        flow_type: FlowType,
        step_type: StepType,
        branch: &FlowBranch,
        location: &str,
    ) -> Result<(), ConfigError> {
        let recovery = flow_type == FlowType::AccountRecovery;
        if branch.on_failure.is_some() && !recovery {
            return Err(ConfigError::invalid(location, "on_failure is only allowed in account recovery"));
        }
        match step_type {
            StepType::Identify => {
                let identification = branch
                    .identification
                    .ok_or_else(|| ConfigError::invalid(location, "identification is required"))?;
                if recovery && !matches!(identification, Identification::Email | Identification::Phone) {
                    return Err(ConfigError::invalid(
                        location,
                        "account recovery identifies by email or phone",
                    ));
                }
                match identification.login_id_type() {
                    Some(key_type) if self.login_id_key(key_type).is_none() => {
                        return Err(ConfigError::invalid(
                            location,
                            format!("no login id key of type {key_type:?}"),
                        ));
                    }
                    None if self.identity.oauth_providers.is_empty() => {
                        return Err(ConfigError::invalid(location, "no oauth provider configured"));
                    }
                    _ => {}
                }
            }
            StepType::Authenticate => match branch.authentication {
                None => return Err(ConfigError::invalid(location, "authentication is required")),
                Some(Authentication::DeviceToken) if flow_type == FlowType::Reauth => {
                    return Err(ConfigError::invalid(location, "device_token cannot reauthenticate"));
                }
                Some(_) => {}
            },
            StepType::CreateAuthenticator => {
                let creatable = match flow_type {
                    FlowType::Login => Authentication::SecondaryPassword,
                    _ => Authentication::PrimaryPassword,
                };
                if branch.authentication != Some(creatable) {
                    return Err(ConfigError::invalid(
                        location,
                        format!("only {creatable} can be created in {flow_type} flows"),
                    ));
                }
            }
            StepType::VerifyAccountRecoveryCode | StepType::ResetPassword => {}
        }

        let always = branch
            .bot_protection
            .as_ref()
            .is_some_and(|bot| bot.mode == BotProtectionMode::Always);
        if always && self.bot_protection_provider().is_none() {
            return Err(ConfigError::invalid(
                location,
                "bot_protection requires an enabled provider",
            ));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn login() -> FlowReference {
        FlowReference::new(FlowType::Login, "default")
    }

    #[test]
    fn test_fixture_is_valid() {
        let config = app_config();
        config.validate().unwrap();
        assert_eq!(config.bot_protection_provider(), Some("cloudflare"));
        assert_eq!(config.login_id_key(LoginIdKeyType::Phone).map(|k| k.key.as_str()), Some("phone"));
    }

    #[test]
    fn test_flow_object_resolves_pointer() {
        let config = app_config();
        let step: FlowStep = config
            .flow_object(&login(), &JsonPointer::root().steps(2))
            .unwrap();
        assert!(step.optional);
        assert_eq!(
            step.authentication_branch(Authentication::RecoveryCode).map(|(idx, _)| idx),
            Some(1)
        );

        let branch: FlowBranch = config
            .flow_object(&login(), &JsonPointer::root().steps(0).one_of(0))
            .unwrap();
        assert_eq!(branch.identification, Some(Identification::Email));
    }

    #[test]
    fn test_flow_object_mismatch_is_internal() {
        let config = app_config();
        let err = config
            .flow_object::<FlowStep>(&login(), &JsonPointer::root().steps(7))
            .unwrap_err();
        assert!(err.is_internal());

        let err = config
            .flow_object::<FlowStep>(&login(), &JsonPointer::root().push("required_amr"))
            .unwrap_err();
        assert!(err.is_internal());

        let missing = FlowReference::new(FlowType::Login, "missing");
        assert!(config.flow_document(&missing).unwrap_err().is_internal());
    }

    #[test]
    fn test_validate_rejects_misplaced_step() {
        let mut config = app_config();
        config.authentication_flows.signup_flows[0].steps.push(FlowStep {
            name: None,
            step_type: StepType::Authenticate,
            optional: false,
            one_of: vec![FlowBranch {
                authentication: Some(Authentication::PrimaryPassword),
                ..FlowBranch::default()
            }],
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("signup/default/steps/2"), "{err}");
    }

    #[test]
    fn test_validate_rejects_unknown_signup_flow() {
        let mut config = app_config();
        config.authentication_flows.login_flows[0].signup_flow = Some("other".into());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_requires_login_id_key() {
        let mut config = app_config();
        config.identity.login_id_keys.retain(|key| key.key_type != LoginIdKeyType::Email);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("no login id key"), "{err}");
    }

    #[test]
    fn test_bot_protection_requires_provider() {
        let mut config = app_config();
        config.bot_protection.enabled = false;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bot_protection"), "{err}");
    }

    #[test]
    fn test_recovery_and_reauth_flows_resolve() {
        let config = app_config();
        let recovery = FlowReference::new(FlowType::AccountRecovery, "default");
        let step: FlowStep = config
            .flow_object(&recovery, &JsonPointer::root().steps(1))
            .unwrap();
        assert_eq!(step.step_type, StepType::VerifyAccountRecoveryCode);
        assert!(step.one_of.is_empty());

        let branch: FlowBranch = config
            .flow_object(&recovery, &JsonPointer::root().steps(0).one_of(0))
            .unwrap();
        assert_eq!(branch.on_failure, Some(OnFailure::Ignore));

        let reauth = FlowReference::new(FlowType::Reauth, "default");
        assert!(config.flow_document(&reauth).is_ok());
    }

    #[test]
    fn test_validate_flow_type_rules() {
        let mut config = app_config();
        config.authentication_flows.reauth_flows[0].steps[0]
            .one_of
            .push(FlowBranch {
                authentication: Some(Authentication::DeviceToken),
                ..FlowBranch::default()
            });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reauth/default/steps/0/one_of/2"), "{err}");

        let mut config = app_config();
        config.authentication_flows.login_flows[0].steps[0].one_of[1].on_failure = Some(OnFailure::Ignore);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("on_failure"), "{err}");

        let mut config = app_config();
        config.authentication_flows.account_recovery_flows[0].steps[2]
            .one_of
            .push(FlowBranch::default());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("takes no one_of"), "{err}");

        let mut config = app_config();
        config.authentication_flows.login_flows[0].steps.push(FlowStep {
            name: None,
            step_type: StepType::CreateAuthenticator,
            optional: false,
            one_of: vec![FlowBranch {
                authentication: Some(Authentication::PrimaryPassword),
                ..FlowBranch::default()
            }],
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("only secondary_password"), "{err}");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authflow.toml");
        std::fs::write(&path, CONFIG).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), app_config());
        assert!(matches!(
            AppConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
