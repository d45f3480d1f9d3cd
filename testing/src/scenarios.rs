use crate::fixtures::*;
use crate::harness::{Harness, REMOTE_IP};
use authflow_core::error::FlowError;
use authflow_core::flow::FlowType;
use authflow_core::outcome::BotProtectionStatus;
use authflow_declarative::deps::{BotVerification, CookieStore, RateLimit};
use authflow_declarative::model::{
    Authentication, Event, IdentitySpec, LoginIdKeyType, OAuthAssertion,
};
use authflow_runtime::{Action, ServiceError, ServiceOutput};
use serde_json::{Map, Value, json};

fn harness() -> Harness {
    Harness::new(app_config().unwrap()).unwrap()
}

fn pointer(output: &ServiceOutput) -> Option<String> {
    match &output.action {
        Action::Input { json_pointer, .. } => json_pointer.as_ref().map(ToString::to_string),
        Action::Finished { .. } => None,
    }
}

fn data(output: &ServiceOutput) -> Value {
    match &output.action {
        Action::Input { data, .. } => data.clone(),
        Action::Finished { .. } => Value::Null,
    }
}

fn identify_email(login_id: &str) -> Value {
    json!({
        "identification": "email",
        "login_id": login_id,
        "bot_protection": {"type": "cloudflare", "response": "human"},
    })
}

fn password(secret: &str) -> Value {
    json!({"authentication": "primary_password", "password": secret})
}

#[tokio::test]
async fn test_login_with_password() {
    let h = harness();
    seed_alice(&h.directory);

    let output = h.start(FlowType::Login, "default").await.unwrap();
    assert_eq!(pointer(&output).as_deref(), Some("/steps/0"));

    let output = h.feed(&output, identify_email("Alice@Example.com")).await.unwrap();
    assert_eq!(pointer(&output).as_deref(), Some("/steps/1"));
    assert_eq!(output.bot_protection, Some(BotProtectionStatus::Verified));
    assert_eq!(
        data(&output)["candidates"],
        json!([{"authentication": "primary_password", "json_pointer": "/steps/1/one_of/0"}])
    );
    // found identities give the enumeration token back
    let limit = RateLimit::account_enumeration(Some(REMOTE_IP));
    assert_eq!(h.rate_limiter.taken(&limit), 0);

    let output = h.feed(&output, password(ALICE_PASSWORD)).await.unwrap();
    assert!(output.is_finished());
    assert!(h.outline(&output.instance_id).is_none());
    assert_eq!(h.events.dispatched_kinds(), vec![Event::USER_AUTHENTICATED]);
    assert_eq!(h.events.dispatched()[0].payload["user_id"], ALICE);

    let blocking = h.events.blocking();
    assert_eq!(blocking.len(), 1);
    assert_eq!(blocking[0].kind, Event::PRE_AUTHENTICATED);
    assert_eq!(blocking[0].payload["amr"], json!(["pwd"]));
}

#[tokio::test]
async fn test_wrong_password_keeps_step() {
    let h = harness();
    seed_alice(&h.directory);
    let output = h.start(FlowType::Login, "default").await.unwrap();
    let output = h.feed(&output, identify_email(ALICE_EMAIL)).await.unwrap();

    let err = h.feed(&output, password("wrong")).await.unwrap_err();
    assert_eq!(err.reason(), Some("InvalidCredentials"));

    let again = h.get(&output).await.unwrap();
    assert_eq!(pointer(&again).as_deref(), Some("/steps/1"));
    assert_eq!(again.state_token, output.state_token);
}

#[tokio::test]
async fn test_disabled_user_is_rejected_at_finish() {
    let h = harness();
    seed_alice(&h.directory);
    h.directory.disable_user(ALICE);

    let output = h.start(FlowType::Login, "default").await.unwrap();
    let output = h.feed(&output, identify_email(ALICE_EMAIL)).await.unwrap();
    let err = h.feed(&output, password(ALICE_PASSWORD)).await.unwrap_err();
    assert_eq!(err.reason(), Some("DisabledUser"));

    let dispatched = h.events.dispatched();
    assert_eq!(h.events.dispatched_kinds(), vec!["authentication.blocked"]);
    assert_eq!(dispatched[0].payload["user_id"], ALICE);
    assert_eq!(dispatched[0].payload["flow"], "login/default");
    assert_eq!(dispatched[0].payload["error"]["reason"], "DisabledUser");
}

#[tokio::test]
async fn test_hook_disallowing_login_is_reported_as_blocked() {
    let h = harness();
    seed_alice(&h.directory);
    h.events.disallow(true);

    let output = h.start(FlowType::Login, "default").await.unwrap();
    let output = h.feed(&output, identify_email(ALICE_EMAIL)).await.unwrap();
    let err = h.feed(&output, password(ALICE_PASSWORD)).await.unwrap_err();
    assert_eq!(err.reason(), Some("WebHookDisallowed"));
    assert_eq!(h.events.blocking().len(), 1);
    assert_eq!(h.events.dispatched_kinds(), vec!["authentication.blocked"]);
    assert_eq!(h.events.dispatched()[0].payload["user_id"], ALICE);

    // a wrong password is an ordinary failure
    h.events.disallow(false);
    let err = h.feed(&output, password("wrong")).await.unwrap_err();
    assert_eq!(err.reason(), Some("InvalidCredentials"));
    assert_eq!(h.events.dispatched_kinds(), vec!["authentication.blocked"]);

    // the refused step rolled back, so the password is asked again
    let output = h.get(&output).await.unwrap();
    let finished = h.feed(&output, password(ALICE_PASSWORD)).await.unwrap();
    assert!(finished.is_finished());
    assert_eq!(
        h.events.dispatched_kinds(),
        vec!["authentication.blocked", "user.authenticated"]
    );
}

#[tokio::test]
async fn test_unknown_login_switches_to_signup() {
    let h = harness();

    let output = h.start(FlowType::Login, "default").await.unwrap();
    let output = h.feed(&output, identify_email("new@example.com")).await.unwrap();

    assert_eq!(output.flow_reference.flow_type, FlowType::Signup);
    assert_eq!(output.flow_reference.name, "default");
    assert_eq!(pointer(&output).as_deref(), Some("/steps/1"));
    let limit = RateLimit::account_enumeration(Some(REMOTE_IP));
    assert_eq!(h.rate_limiter.taken(&limit), 1);

    let users = h.directory.user_ids();
    assert_eq!(users.len(), 1);
    let identities = h.directory.identities_of(&users[0]);
    assert_eq!(identities.len(), 1);
    assert_eq!(
        identities[0].spec,
        IdentitySpec::login_id("email", LoginIdKeyType::Email, "new@example.com")
    );
    assert_eq!(h.events.on_commit()[0].kind, Event::IDENTITY_CREATED);

    let output = h
        .feed(&output, json!({"authentication": "primary_password", "new_password": "s3cret"}))
        .await
        .unwrap();
    assert!(output.is_finished());
    assert_eq!(
        h.directory.authenticators_of(&users[0])[0].authentication,
        Authentication::PrimaryPassword
    );
    assert_eq!(h.events.dispatched_kinds(), vec![Event::USER_CREATED]);
}

#[tokio::test]
async fn test_oauth_signup_links_existing_account() {
    let h = harness();
    h.directory.add_user("owner");
    h.directory
        .add_login_id("owner", LoginIdKeyType::Email, "bob@example.com");
    h.directory
        .add_authenticator("owner", Authentication::PrimaryPassword, "pw");
    let mut claims = Map::new();
    claims.insert("email".into(), json!("bob@example.com"));
    h.oauth.add_code("google", "code-1", "g-1", claims);

    let output = h.start(FlowType::Signup, "default").await.unwrap();
    let output = h
        .feed(
            &output,
            json!({"identification": "oauth", "alias": "google", "code": "code-1"}),
        )
        .await
        .unwrap();

    assert!(output.is_finished());
    let identities = h.directory.identities_of("owner");
    assert_eq!(identities.len(), 2);
    assert!(identities.iter().any(|identity| matches!(
        &identity.spec,
        IdentitySpec::Oauth { alias, subject_id, .. } if alias == "google" && subject_id == "g-1"
    )));
    assert_eq!(h.directory.authenticators_of("owner").len(), 1);

    let dispatched = h.events.dispatched();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].kind, Event::USER_LINKED);
    assert_eq!(dispatched[0].payload["user_id"], "owner");
}

#[tokio::test]
async fn test_signup_with_taken_email() {
    let h = harness();
    seed_alice(&h.directory);

    let output = h.start(FlowType::Signup, "default").await.unwrap();
    let err = h
        .feed(&output, json!({"identification": "email", "login_id": ALICE_EMAIL}))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("DuplicatedIdentity"));
}

#[tokio::test]
async fn test_rejected_switch_leaves_no_user_behind() {
    let h = harness();
    h.directory.add_user("bob");
    let mut claims = Map::new();
    claims.insert("email".into(), json!("x@example.com"));
    h.directory.add_oauth(
        "bob",
        "google",
        OAuthAssertion {
            subject_id: "g-bob".into(),
            claims,
        },
    );

    let output = h.start(FlowType::Login, "default").await.unwrap();
    for _ in 0..2 {
        // the switched signup creates its user first, then the email conflicts with bob
        let err = h.feed(&output, identify_email("x@example.com")).await.unwrap_err();
        assert_eq!(err.reason(), Some("AccountLinkingConflict"));
    }

    assert_eq!(
        h.outline(&output.instance_id).unwrap(),
        vec![
            "IntentLoginFlow",
            "  IntentFlowSteps",
            "    IntentLoginFlowStepIdentify",
        ]
    );
    assert_eq!(h.directory.user_ids(), vec!["bob".to_string()]);
    assert_eq!(h.directory.identities_of("bob").len(), 1);
    assert!(h.events.on_commit().is_empty());
}

#[tokio::test]
async fn test_bot_protection_unavailable_is_offered_again() {
    let h = harness();
    seed_alice(&h.directory);
    h.bot_protection.set(BotVerification::ServiceUnavailable);

    let output = h.start(FlowType::Login, "default").await.unwrap();
    let err = h.feed(&output, identify_email(ALICE_EMAIL)).await.unwrap_err();
    assert_eq!(err.reason(), Some("BotProtectionServiceUnavailable"));

    let pending = h.get(&output).await.unwrap();
    assert_eq!(pointer(&pending).as_deref(), Some("/steps/0/one_of/0"));
    assert_eq!(pending.schema().unwrap()["required"], json!(["bot_protection"]));

    h.bot_protection.set(BotVerification::Verified);
    let output = h.feed(&pending, identify_email(ALICE_EMAIL)).await.unwrap();
    assert_eq!(output.bot_protection, Some(BotProtectionStatus::Verified));
    assert_eq!(pointer(&output).as_deref(), Some("/steps/1"));
    assert_eq!(h.bot_protection.calls(), 2);
}

#[tokio::test]
async fn test_bot_protection_failure_is_recorded() {
    let h = harness();
    seed_alice(&h.directory);

    let output = h.start(FlowType::Login, "default").await.unwrap();
    let mut input = identify_email(ALICE_EMAIL);
    input["bot_protection"]["response"] = json!("bot");
    h.bot_protection.set(BotVerification::Failed);
    let err = h.feed(&output, input).await.unwrap_err();
    assert_eq!(err.reason(), Some("BotProtectionVerificationFailed"));

    let outline = h.outline(&output.instance_id).unwrap();
    assert_eq!(outline.last().map(String::as_str), Some("        NodeDidVerifyBotProtection"));
}

#[tokio::test]
async fn test_amr_constraints_offer_remaining_factor() {
    let h = harness();
    h.directory.add_user("bob");
    h.directory.add_login_id("bob", LoginIdKeyType::Phone, "+85291234567");
    h.directory
        .add_authenticator("bob", Authentication::PrimaryPassword, "pw");
    h.directory
        .add_authenticator("bob", Authentication::SecondaryTotp, "123456");
    h.directory.add_recovery_code("bob", "rc-1");

    let output = h.start(FlowType::Login, "strict").await.unwrap();
    let output = h
        .feed(&output, json!({"identification": "phone", "login_id": "+85291234567"}))
        .await
        .unwrap();
    let output = h.feed(&output, password("pw")).await.unwrap();
    assert_eq!(pointer(&output).as_deref(), Some("/steps/2"));

    let output = h
        .feed(&output, json!({"authentication": "recovery_code", "recovery_code": "rc-1"}))
        .await
        .unwrap();
    assert_eq!(h.directory.unused_recovery_codes("bob"), 0);
    // pwd + recovery code make mfa; only otp is left, and only totp supplies it
    assert_eq!(pointer(&output).as_deref(), Some(""));
    assert_eq!(
        data(&output)["candidates"],
        json!([{"authentication": "secondary_totp", "json_pointer": "/steps/2/one_of/0"}])
    );

    let output = h
        .feed(&output, json!({"authentication": "secondary_totp", "code": "123456"}))
        .await
        .unwrap();
    assert!(output.is_finished());
    assert_eq!(h.events.dispatched_kinds(), vec![Event::USER_AUTHENTICATED]);
}

#[tokio::test]
async fn test_amr_constraints_unsatisfiable() {
    let h = harness();
    h.directory.add_user("carol");
    h.directory.add_login_id("carol", LoginIdKeyType::Phone, "+85290000000");
    h.directory
        .add_authenticator("carol", Authentication::PrimaryPassword, "pw");

    let output = h.start(FlowType::Login, "strict").await.unwrap();
    let output = h
        .feed(&output, json!({"identification": "phone", "login_id": "+85290000000"}))
        .await
        .unwrap();
    let err = h.feed(&output, password("pw")).await.unwrap_err();
    assert_eq!(err.reason(), Some("AMRConstraintsUnsatisfiable"));
}

#[tokio::test]
async fn test_device_token_skips_second_factor() {
    let h = harness();
    seed_alice(&h.directory);
    h.directory
        .add_authenticator(ALICE, Authentication::SecondaryTotp, "654321");

    let output = h.start(FlowType::Login, "default").await.unwrap();
    let output = h.feed(&output, identify_email(ALICE_EMAIL)).await.unwrap();
    let output = h.feed(&output, password(ALICE_PASSWORD)).await.unwrap();
    assert_eq!(pointer(&output).as_deref(), Some("/steps/2"));
    let output = h
        .feed(
            &output,
            json!({"authentication": "secondary_totp", "code": "654321", "request_device_token": true}),
        )
        .await
        .unwrap();
    assert!(output.is_finished());
    let token = h.cookies.device_token().unwrap();
    assert_eq!(h.directory.device_tokens_of(ALICE), vec![token]);

    // the cookie now stands in for the optional second factor
    let output = h.start(FlowType::Login, "default").await.unwrap();
    let output = h.feed(&output, identify_email(ALICE_EMAIL)).await.unwrap();
    let output = h.feed(&output, password(ALICE_PASSWORD)).await.unwrap();
    assert!(output.is_finished());
    assert_eq!(h.directory.device_tokens_of(ALICE).len(), 1);
}

#[tokio::test]
async fn test_finish_event_dispatched_exactly_once() {
    let h = harness();
    seed_alice(&h.directory);

    let output = h.start(FlowType::Login, "default").await.unwrap();
    let output = h.feed(&output, identify_email(ALICE_EMAIL)).await.unwrap();

    h.events.fail_dispatch(true);
    let err = h.feed(&output, password(ALICE_PASSWORD)).await.unwrap_err();
    let ServiceError::EffectFailed { output: paused, .. } = &err else {
        panic!("expected the dispatch to fail after commit: {err}");
    };
    assert!(paused.schema().is_none());
    assert!(h.events.dispatched().is_empty());

    h.events.fail_dispatch(false);
    let finished = h.service.retry_pending(&output.instance_id).await.unwrap();
    assert!(finished.is_finished());
    assert!(h.service.retry_pending(&output.instance_id).await.is_err());
    assert_eq!(h.events.dispatched_kinds(), vec![Event::USER_AUTHENTICATED]);
}

#[tokio::test]
async fn test_same_inputs_build_same_tree() {
    let mut outlines = Vec::new();
    let mut schemas = Vec::new();
    for _ in 0..2 {
        let h = harness();
        seed_alice(&h.directory);
        let output = h.start(FlowType::Login, "default").await.unwrap();
        let output = h.feed(&output, identify_email(ALICE_EMAIL)).await.unwrap();
        outlines.push(h.outline(&output.instance_id).unwrap());
        schemas.push(output.schema().cloned());
    }
    assert_eq!(outlines[0], outlines[1]);
    assert_eq!(schemas[0], schemas[1]);
    assert_eq!(
        outlines[0],
        vec![
            "IntentLoginFlow",
            "  IntentFlowSteps",
            "    IntentLoginFlowStepIdentify",
            "      IntentBotProtection",
            "        NodeDidVerifyBotProtection",
            "      NodeDoUseIdentity",
            "      IntentFlowSteps",
            "    IntentLoginFlowStepAuthenticate",
        ]
    );
}

#[tokio::test]
async fn test_stale_password_is_written_back() {
    let h = harness();
    seed_alice(&h.directory);
    let password_id = h.directory.authenticators_of(ALICE)[0].id.clone();
    h.directory.mark_stale(&password_id);

    let output = h.start(FlowType::Login, "default").await.unwrap();
    let output = h.feed(&output, identify_email(ALICE_EMAIL)).await.unwrap();
    assert!(h.directory.updated_authenticators().is_empty());

    let output = h.feed(&output, password(ALICE_PASSWORD)).await.unwrap();
    assert!(output.is_finished());
    assert_eq!(h.directory.updated_authenticators(), vec![password_id]);
}

fn identify_phone(login_id: &str) -> Value {
    json!({"identification": "phone", "login_id": login_id})
}

#[tokio::test]
async fn test_login_enrolls_secondary_password() {
    let h = harness();
    seed_alice(&h.directory);

    let output = h.start(FlowType::Login, "enroll").await.unwrap();
    let output = h.feed(&output, identify_phone(ALICE_PHONE)).await.unwrap();
    let output = h.feed(&output, password(ALICE_PASSWORD)).await.unwrap();
    assert_eq!(pointer(&output).as_deref(), Some("/steps/2"));
    assert_eq!(data(&output)["options"], json!(["secondary_password"]));

    // primary passwords are not created during login
    let err = h
        .feed(&output, json!({"authentication": "primary_password", "new_password": "x"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Flow(FlowError::Validation(_))));

    let output = h
        .feed(
            &output,
            json!({"authentication": "secondary_password", "new_password": "second secret"}),
        )
        .await
        .unwrap();
    assert!(output.is_finished());
    let owned: Vec<Authentication> = h
        .directory
        .authenticators_of(ALICE)
        .iter()
        .map(|info| info.authentication)
        .collect();
    assert_eq!(
        owned,
        vec![Authentication::PrimaryPassword, Authentication::SecondaryPassword]
    );
    assert_eq!(h.events.dispatched_kinds(), vec![Event::USER_AUTHENTICATED]);

    // enrolled users skip the step
    let output = h.start(FlowType::Login, "enroll").await.unwrap();
    let output = h.feed(&output, identify_phone(ALICE_PHONE)).await.unwrap();
    let output = h.feed(&output, password(ALICE_PASSWORD)).await.unwrap();
    assert!(output.is_finished());
    assert_eq!(h.directory.authenticators_of(ALICE).len(), 2);
}

#[tokio::test]
async fn test_reauth_signed_in_user() {
    let h = harness();
    seed_alice(&h.directory);

    let output = h
        .start_as(FlowType::Reauth, "default", Some(ALICE))
        .await
        .unwrap();
    assert_eq!(pointer(&output).as_deref(), Some("/steps/0"));
    // alice holds no totp, so only the password is offered
    assert_eq!(
        data(&output)["candidates"],
        json!([{"authentication": "primary_password", "json_pointer": "/steps/0/one_of/0"}])
    );

    let err = h.feed(&output, password("wrong")).await.unwrap_err();
    assert_eq!(err.reason(), Some("InvalidCredentials"));
    assert!(h.events.dispatched().is_empty());

    let output = h.feed(&output, password(ALICE_PASSWORD)).await.unwrap();
    assert!(output.is_finished());
    assert_eq!(h.events.dispatched_kinds(), vec![Event::USER_REAUTHENTICATED]);
    assert_eq!(h.events.dispatched()[0].payload["user_id"], ALICE);
}

#[tokio::test]
async fn test_reauth_requires_signed_in_user() {
    let h = harness();
    let err = h.start(FlowType::Reauth, "default").await.unwrap_err();
    assert_eq!(err.reason(), Some("ReauthUserRequired"));

    h.directory.add_user("dave");
    let err = h
        .start_as(FlowType::Reauth, "default", Some("dave"))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("NoAuthenticator"));
}

#[tokio::test]
async fn test_reauth_disabled_user_is_blocked() {
    let h = harness();
    seed_alice(&h.directory);
    h.directory.disable_user(ALICE);

    let output = h
        .start_as(FlowType::Reauth, "default", Some(ALICE))
        .await
        .unwrap();
    let err = h.feed(&output, password(ALICE_PASSWORD)).await.unwrap_err();
    assert_eq!(err.reason(), Some("DisabledUser"));
    assert_eq!(h.events.dispatched_kinds(), vec![Event::AUTHENTICATION_BLOCKED]);
    let payload = &h.events.dispatched()[0].payload;
    assert_eq!(payload["user_id"], ALICE);
    assert_eq!(payload["flow"], "reauth/default");
}

#[tokio::test]
async fn test_account_recovery_resets_password() {
    let h = harness();
    seed_alice(&h.directory);

    let output = h.start(FlowType::AccountRecovery, "default").await.unwrap();
    assert_eq!(pointer(&output).as_deref(), Some("/steps/0"));
    let output = h
        .feed(&output, json!({"identification": "email", "login_id": ALICE_EMAIL}))
        .await
        .unwrap();
    assert_eq!(pointer(&output).as_deref(), Some("/steps/1"));
    assert_eq!(h.directory.sent_account_recovery_codes(), 1);
    let code = h.directory.account_recovery_code(ALICE).unwrap();
    let limit = RateLimit::account_enumeration(Some(REMOTE_IP));
    assert_eq!(h.rate_limiter.taken(&limit), 0);

    let err = h
        .feed(&output, json!({"account_recovery_code": "NOTACODE"}))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("InvalidAccountRecoveryCode"));

    let output = h
        .feed(&output, json!({"account_recovery_code": code}))
        .await
        .unwrap();
    assert_eq!(pointer(&output).as_deref(), Some("/steps/2"));
    // nothing is written until the new password is set
    assert!(h.events.on_commit().is_empty());

    let output = h
        .feed(&output, json!({"new_password": "battery staple"}))
        .await
        .unwrap();
    assert!(output.is_finished());
    let on_commit = h.events.on_commit();
    assert_eq!(on_commit.len(), 1);
    assert_eq!(on_commit[0].kind, Event::PASSWORD_RESET);
    assert_eq!(on_commit[0].payload["user_id"], ALICE);

    let passwords = h.directory.authenticators_of(ALICE);
    assert_eq!(passwords.len(), 1);

    let login = h.start(FlowType::Login, "default").await.unwrap();
    let login = h.feed(&login, identify_email(ALICE_EMAIL)).await.unwrap();
    let err = h.feed(&login, password(ALICE_PASSWORD)).await.unwrap_err();
    assert_eq!(err.reason(), Some("InvalidCredentials"));
    let finished = h.feed(&login, password("battery staple")).await.unwrap();
    assert!(finished.is_finished());
}

#[tokio::test]
async fn test_account_recovery_hides_unknown_email() {
    let h = harness();
    seed_alice(&h.directory);

    let output = h.start(FlowType::AccountRecovery, "default").await.unwrap();
    let output = h
        .feed(&output, json!({"identification": "email", "login_id": "nobody@example.com"}))
        .await
        .unwrap();
    // the unknown email looks like a known one
    assert_eq!(pointer(&output).as_deref(), Some("/steps/1"));
    assert_eq!(h.directory.sent_account_recovery_codes(), 0);
    let limit = RateLimit::account_enumeration(Some(REMOTE_IP));
    assert_eq!(h.rate_limiter.taken(&limit), 1);

    let err = h
        .feed(&output, json!({"account_recovery_code": "ABCDEFGH"}))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("InvalidAccountRecoveryCode"));

    // phone branches report unknown login ids
    let output = h.start(FlowType::AccountRecovery, "default").await.unwrap();
    let err = h
        .feed(&output, identify_phone("+85200000000"))
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("UserNotFound"));
}
