//! Input schemas of the declarative steps.
//!
//! Step schemas only require what their own step consumes and allow any other property,
//! so one submission may carry the data of several consecutive steps.

use crate::config::{AppConfig, FlowBranch, FlowStep};
use crate::model::{Authentication, Identification};
use serde_json::{Map, Value, json};

pub fn bot_protection_property(provider_type: &str) -> Value {
    json!({
        "type": "object",
        "required": ["type", "response"],
        "properties": {
            "type": {"type": "string", "const": provider_type},
            "response": {"type": "string", "minLength": 1},
        },
    })
}

pub fn bot_protection(provider_type: &str) -> Value {
    json!({
        "type": "object",
        "required": ["bot_protection"],
        "properties": {"bot_protection": bot_protection_property(provider_type)},
    })
}

fn object(required: Vec<&str>, properties: Map<String, Value>) -> Value {
    json!({
        "type": "object",
        "required": required,
        "properties": properties,
    })
}

fn identify_branch(config: &AppConfig, branch: &FlowBranch, identification: Identification) -> Value {
    let mut properties = Map::new();
    properties.insert(
        "identification".into(),
        json!({"type": "string", "const": identification}),
    );
    let mut required = vec!["identification"];

    match identification {
        Identification::Oauth => {
            let aliases: Vec<&str> = config
                .identity
                .oauth_providers
                .iter()
                .map(|provider| provider.alias.as_str())
                .collect();
            properties.insert("alias".into(), json!({"type": "string", "enum": aliases}));
            properties.insert("code".into(), json!({"type": "string", "minLength": 1}));
            required.extend(["alias", "code"]);
        }
        Identification::Email => {
            properties.insert(
                "login_id".into(),
                json!({"type": "string", "minLength": 1, "format": "email"}),
            );
            required.push("login_id");
        }
        Identification::Phone | Identification::Username => {
            properties.insert("login_id".into(), json!({"type": "string", "minLength": 1}));
            required.push("login_id");
        }
    }

    if let Some(provider) = crate::bot_protection::required_provider(config, branch) {
        properties.insert("bot_protection".into(), bot_protection_property(provider));
        required.push("bot_protection");
    }
    object(required, properties)
}

pub fn identify(config: &AppConfig, step: &FlowStep) -> Value {
    let branches: Vec<Value> = step
        .one_of
        .iter()
        .filter_map(|branch| {
            branch
                .identification
                .map(|identification| identify_branch(config, branch, identification))
        })
        .collect();
    json!({
        "type": "object",
        "required": ["identification"],
        "oneOf": branches,
    })
}

pub fn select_authentication(candidates: &[Authentication]) -> Value {
    let branches: Vec<Value> = candidates
        .iter()
        .map(|authentication| {
            json!({
                "type": "object",
                "required": ["authentication"],
                "properties": {"authentication": {"type": "string", "const": authentication}},
            })
        })
        .collect();
    json!({
        "type": "object",
        "required": ["authentication"],
        "oneOf": branches,
    })
}

pub fn credential(authentication: Authentication) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    if let Some(field) = authentication.credential_field() {
        properties.insert(field.into(), json!({"type": "string", "minLength": 1}));
        required.push(field);
    }
    properties.insert("request_device_token".into(), json!({"type": "boolean"}));
    object(required, properties)
}

pub fn create_authenticator(step: &FlowStep) -> Value {
    let branches: Vec<Value> = step
        .one_of
        .iter()
        .filter_map(|branch| branch.authentication)
        .map(|authentication| {
            json!({
                "type": "object",
                "required": ["authentication", "new_password"],
                "properties": {
                    "authentication": {"type": "string", "const": authentication},
                    "new_password": {"type": "string", "minLength": 1},
                },
            })
        })
        .collect();
    json!({
        "type": "object",
        "required": ["authentication"],
        "oneOf": branches,
    })
}

pub fn account_recovery_code() -> Value {
    json!({
        "type": "object",
        "required": ["account_recovery_code"],
        "properties": {"account_recovery_code": {"type": "string", "minLength": 1}},
    })
}

pub fn new_password() -> Value {
    json!({
        "type": "object",
        "required": ["new_password"],
        "properties": {"new_password": {"type": "string", "minLength": 1}},
    })
}

pub fn select_conflict(conflicts: usize) -> Value {
    json!({
        "type": "object",
        "required": ["index"],
        "properties": {
            "index": {"type": "integer", "minimum": 0, "maximum": conflicts.saturating_sub(1)},
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures::app_config;
    use authflow_core::schema::validate;

    #[test]
    fn test_identify_branches() {
        let config = app_config();
        let step = &config.authentication_flows.login_flows[0].steps[0];
        let schema = identify(&config, step);

        let with_bot = json!({
            "identification": "email",
            "login_id": "alice@example.com",
            "bot_protection": {"type": "cloudflare", "response": "token"},
        });
        validate(&schema, &with_bot).unwrap();

        let without_bot = json!({"identification": "email", "login_id": "alice@example.com"});
        assert!(validate(&schema, &without_bot).is_err());

        let phone = json!({"identification": "phone", "login_id": "+85298765432", "password": "x"});
        validate(&schema, &phone).unwrap();

        let unknown_alias = json!({"identification": "oauth", "alias": "github", "code": "c"});
        assert!(validate(&schema, &unknown_alias).is_err());
    }

    #[test]
    fn test_credential_and_selection() {
        let schema = select_authentication(&[Authentication::PrimaryPassword, Authentication::SecondaryTotp]);
        validate(&schema, &json!({"authentication": "secondary_totp"})).unwrap();
        assert!(validate(&schema, &json!({"authentication": "recovery_code"})).is_err());

        let schema = credential(Authentication::RecoveryCode);
        validate(&schema, &json!({"recovery_code": "ABCD-1234"})).unwrap();
        assert!(validate(&schema, &json!({"code": "123456"})).is_err());
    }

    #[test]
    fn test_select_conflict_bounds() {
        let schema = select_conflict(2);
        validate(&schema, &json!({"index": 1})).unwrap();
        assert!(validate(&schema, &json!({"index": 2})).is_err());
        assert!(validate(&schema, &json!({"index": -1})).is_err());
    }
}
