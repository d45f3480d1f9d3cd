//! A configuration exercising every step type, and seeded users.

use crate::fakes::Directory;
use authflow_declarative::AppConfig;
use authflow_declarative::model::{Authentication, LoginIdKeyType};

/// `default` login falls back to `default` signup. `strict` requires `otp` and `mfa`.
/// `enroll` makes users without a secondary password create one.
pub const CONFIG: &str = r#"
[identity]
login_id_keys = [
    { key = "email", type = "email" },
    { key = "phone", type = "phone" },
]
oauth_providers = [{ alias = "google", type = "google" }]

[bot_protection]
enabled = true
provider = { type = "cloudflare" }

[[account_linking.oauth]]
name = "google_email"
alias = "google"
oauth_claim = "/email"
user_profile = "/email"
action = "login_and_link"

[[authentication_flows.login_flows]]
name = "default"
signup_flow = "default"
required_amr = ["pwd"]

[[authentication_flows.login_flows.steps]]
type = "identify"
one_of = [
    { identification = "email", bot_protection = { mode = "always" } },
    { identification = "phone" },
    { identification = "oauth" },
]

[[authentication_flows.login_flows.steps]]
type = "authenticate"
one_of = [
    { authentication = "primary_password" },
    { authentication = "primary_oob_otp_email" },
]

[[authentication_flows.login_flows.steps]]
type = "authenticate"
optional = true
one_of = [
    { authentication = "secondary_totp" },
    { authentication = "recovery_code" },
    { authentication = "device_token" },
]

[[authentication_flows.login_flows]]
name = "strict"
required_amr = ["otp", "mfa"]

[[authentication_flows.login_flows.steps]]
type = "identify"
one_of = [{ identification = "phone" }]

[[authentication_flows.login_flows.steps]]
type = "authenticate"
one_of = [{ authentication = "primary_password" }]

[[authentication_flows.login_flows.steps]]
type = "authenticate"
optional = true
one_of = [
    { authentication = "secondary_totp" },
    { authentication = "recovery_code" },
]

[[authentication_flows.login_flows]]
name = "enroll"

[[authentication_flows.login_flows.steps]]
type = "identify"
one_of = [{ identification = "phone" }]

[[authentication_flows.login_flows.steps]]
type = "authenticate"
one_of = [{ authentication = "primary_password" }]

[[authentication_flows.login_flows.steps]]
type = "create_authenticator"
one_of = [{ authentication = "secondary_password" }]

[[authentication_flows.signup_flows]]
name = "default"

[[authentication_flows.signup_flows.steps]]
type = "identify"
one_of = [
    { identification = "email" },
    { identification = "oauth" },
]

[[authentication_flows.signup_flows.steps]]
type = "create_authenticator"
one_of = [{ authentication = "primary_password" }]

[[authentication_flows.reauth_flows]]
name = "default"

[[authentication_flows.reauth_flows.steps]]
type = "authenticate"
one_of = [
    { authentication = "primary_password" },
    { authentication = "secondary_totp" },
]

[[authentication_flows.account_recovery_flows]]
name = "default"

[[authentication_flows.account_recovery_flows.steps]]
type = "identify"
one_of = [
    { identification = "email", on_failure = "ignore" },
    { identification = "phone" },
]

[[authentication_flows.account_recovery_flows.steps]]
type = "verify_account_recovery_code"

[[authentication_flows.account_recovery_flows.steps]]
type = "reset_password"
"#;

pub fn app_config() -> anyhow::Result<AppConfig> {
    Ok(AppConfig::from_toml_str(CONFIG)?)
}

pub const ALICE: &str = "alice";
pub const ALICE_EMAIL: &str = "alice@example.com";
pub const ALICE_PHONE: &str = "+85298765432";
pub const ALICE_PASSWORD: &str = "correct horse";

/// Alice with email, phone and a primary password.
pub fn seed_alice(directory: &Directory) {
    directory.add_user(ALICE);
    directory.add_login_id(ALICE, LoginIdKeyType::Email, ALICE_EMAIL);
    directory.add_login_id(ALICE, LoginIdKeyType::Phone, ALICE_PHONE);
    directory.add_authenticator(ALICE, Authentication::PrimaryPassword, ALICE_PASSWORD);
}
