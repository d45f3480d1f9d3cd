//! Domain records exchanged with collaborators and stored inside flow nodes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoginIdKeyType {
    Email,
    Phone,
    Username,
}

impl LoginIdKeyType {
    /// Standard claim a login id of this type populates.
    pub fn claim(self) -> &'static str {
        match self {
            LoginIdKeyType::Email => "email",
            LoginIdKeyType::Phone => "phone_number",
            LoginIdKeyType::Username => "preferred_username",
        }
    }
}

/// How the user is identified in an `identify` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Identification {
    Email,
    Phone,
    Username,
    Oauth,
}

impl Identification {
    pub fn login_id_type(self) -> Option<LoginIdKeyType> {
        match self {
            Identification::Email => Some(LoginIdKeyType::Email),
            Identification::Phone => Some(LoginIdKeyType::Phone),
            Identification::Username => Some(LoginIdKeyType::Username),
            Identification::Oauth => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Identification::Email => "email",
            Identification::Phone => "phone",
            Identification::Username => "username",
            Identification::Oauth => "oauth",
        }
    }
}

impl fmt::Display for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authentication option offered by `authenticate` and `create_authenticator` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Authentication {
    PrimaryPassword,
    PrimaryPasskey,
    PrimaryOobOtpEmail,
    PrimaryOobOtpSms,
    SecondaryPassword,
    SecondaryTotp,
    SecondaryOobOtpEmail,
    SecondaryOobOtpSms,
    RecoveryCode,
    DeviceToken,
}

impl Authentication {
    pub fn as_str(self) -> &'static str {
        match self {
            Authentication::PrimaryPassword => "primary_password",
            Authentication::PrimaryPasskey => "primary_passkey",
            Authentication::PrimaryOobOtpEmail => "primary_oob_otp_email",
            Authentication::PrimaryOobOtpSms => "primary_oob_otp_sms",
            Authentication::SecondaryPassword => "secondary_password",
            Authentication::SecondaryTotp => "secondary_totp",
            Authentication::SecondaryOobOtpEmail => "secondary_oob_otp_email",
            Authentication::SecondaryOobOtpSms => "secondary_oob_otp_sms",
            Authentication::RecoveryCode => "recovery_code",
            Authentication::DeviceToken => "device_token",
        }
    }

    /// AMR tokens one successful use contributes.
    pub fn amr(self) -> &'static [&'static str] {
        match self {
            Authentication::PrimaryPassword | Authentication::SecondaryPassword => &["pwd"],
            Authentication::SecondaryTotp
            | Authentication::PrimaryOobOtpEmail
            | Authentication::SecondaryOobOtpEmail => &["otp"],
            Authentication::PrimaryOobOtpSms | Authentication::SecondaryOobOtpSms => &["otp", "sms"],
            Authentication::PrimaryPasskey => &["x_passkey"],
            Authentication::RecoveryCode | Authentication::DeviceToken => &[],
        }
    }

    pub fn is_secondary(self) -> bool {
        matches!(
            self,
            Authentication::SecondaryPassword
                | Authentication::SecondaryTotp
                | Authentication::SecondaryOobOtpEmail
                | Authentication::SecondaryOobOtpSms
        )
    }

    /// Name of the credential property in the step input, or `None` for options that never
    /// ask the client for a credential.
    pub fn credential_field(self) -> Option<&'static str> {
        match self {
            Authentication::PrimaryPassword | Authentication::SecondaryPassword => Some("password"),
            Authentication::PrimaryPasskey => Some("assertion_response"),
            Authentication::PrimaryOobOtpEmail
            | Authentication::PrimaryOobOtpSms
            | Authentication::SecondaryTotp
            | Authentication::SecondaryOobOtpEmail
            | Authentication::SecondaryOobOtpSms => Some("code"),
            Authentication::RecoveryCode => Some("recovery_code"),
            Authentication::DeviceToken => None,
        }
    }
}

impl fmt::Display for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of exchanging an OAuth authorization code with the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthAssertion {
    pub subject_id: String,
    #[serde(default)]
    pub claims: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentitySpec {
    LoginId {
        key: String,
        login_id_type: LoginIdKeyType,
        value: String,
    },
    Oauth {
        alias: String,
        subject_id: String,
        #[serde(default)]
        claims: Map<String, Value>,
    },
}

impl IdentitySpec {
    pub fn login_id(key: impl Into<String>, login_id_type: LoginIdKeyType, value: &str) -> Self {
        let value = value.trim();
        let value = match login_id_type {
            LoginIdKeyType::Email => value.to_lowercase(),
            _ => value.to_string(),
        };
        IdentitySpec::LoginId {
            key: key.into(),
            login_id_type,
            value,
        }
    }

    pub fn oauth(alias: impl Into<String>, assertion: OAuthAssertion) -> Self {
        IdentitySpec::Oauth {
            alias: alias.into(),
            subject_id: assertion.subject_id,
            claims: assertion.claims,
        }
    }

    /// Same unique key: login id key and value, or provider alias and subject.
    pub fn is_identical(&self, other: &IdentitySpec) -> bool {
        match (self, other) {
            (
                IdentitySpec::LoginId { key, value, .. },
                IdentitySpec::LoginId {
                    key: other_key,
                    value: other_value,
                    ..
                },
            ) => key == other_key && value == other_value,
            (
                IdentitySpec::Oauth {
                    alias, subject_id, ..
                },
                IdentitySpec::Oauth {
                    alias: other_alias,
                    subject_id: other_subject,
                    ..
                },
            ) => alias == other_alias && subject_id == other_subject,
            _ => false,
        }
    }

    /// Standard claims exposed by the identity.
    pub fn claims(&self) -> Map<String, Value> {
        match self {
            IdentitySpec::LoginId {
                login_id_type,
                value,
                ..
            } => {
                let mut claims = Map::new();
                claims.insert(login_id_type.claim().to_string(), Value::String(value.clone()));
                claims
            }
            IdentitySpec::Oauth { claims, .. } => claims.clone(),
        }
    }

    /// Input that replays this identification against another flow.
    pub fn replay_input(&self, identification: Identification) -> Value {
        match self {
            IdentitySpec::LoginId { value, .. } => json!({
                "identification": identification,
                "login_id": value,
            }),
            IdentitySpec::Oauth {
                alias,
                subject_id,
                claims,
            } => json!({
                "identification": identification,
                "alias": alias,
                "assertion": {"subject_id": subject_id, "claims": claims},
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub id: String,
    pub user_id: String,
    pub spec: IdentitySpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatorInfo {
    pub id: String,
    pub user_id: String,
    pub authentication: Authentication,
}

/// A successful credential check. `requires_update` asks the flow to write the
/// authenticator back (rehashed password, advanced OTP counter).
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub authenticator: AuthenticatorInfo,
    pub requires_update: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryCode {
    pub id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

impl Event {
    pub const USER_AUTHENTICATED: &'static str = "user.authenticated";
    pub const USER_CREATED: &'static str = "user.created";
    pub const USER_LINKED: &'static str = "user.linked";
    pub const IDENTITY_CREATED: &'static str = "identity.created";
    pub const PRE_AUTHENTICATED: &'static str = "authentication.pre_authenticated";
    pub const AUTHENTICATION_BLOCKED: &'static str = "authentication.blocked";
    pub const USER_REAUTHENTICATED: &'static str = "user.reauthenticated";
    pub const PASSWORD_RESET: &'static str = "user.password_reset";

    pub fn new(kind: &str, payload: Value) -> Self {
        Self {
            kind: kind.to_string(),
            payload,
        }
    }
}

/// Response of a blocking event hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockingEventResponse {
    /// AMR tokens the hook requires on top of the configured ones.
    #[serde(default)]
    pub required_amr: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_id_normalized_and_identical() {
        let a = IdentitySpec::login_id("email", LoginIdKeyType::Email, " Alice@Example.com ");
        let b = IdentitySpec::login_id("email", LoginIdKeyType::Email, "alice@example.com");
        assert!(a.is_identical(&b));
        assert_eq!(a.claims()["email"], "alice@example.com");

        let phone = IdentitySpec::login_id("phone", LoginIdKeyType::Phone, "+85298765432");
        assert!(!phone.is_identical(&a));
        assert_eq!(phone.claims()["phone_number"], "+85298765432");
    }

    #[test]
    fn test_oauth_replay_carries_assertion() {
        let mut claims = Map::new();
        claims.insert("email".into(), json!("bob@example.com"));
        let spec = IdentitySpec::oauth(
            "google",
            OAuthAssertion {
                subject_id: "g-1".into(),
                claims,
            },
        );
        assert_eq!(
            spec.replay_input(Identification::Oauth),
            json!({
                "identification": "oauth",
                "alias": "google",
                "assertion": {"subject_id": "g-1", "claims": {"email": "bob@example.com"}},
            })
        );
    }

    #[test]
    fn test_amr_tokens() {
        assert_eq!(Authentication::PrimaryOobOtpSms.amr(), &["otp", "sms"]);
        assert!(Authentication::RecoveryCode.amr().is_empty());
        assert_eq!(Authentication::SecondaryTotp.credential_field(), Some("code"));
        assert_eq!(
            serde_json::to_value(Authentication::SecondaryOobOtpEmail).unwrap(),
            json!("secondary_oob_otp_email")
        );
    }
}
