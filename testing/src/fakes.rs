//! In-memory collaborators for the declarative flows.
//!
//! [`Directory`] keeps users, identities, authenticators, MFA records and account recovery
//! codes behind one lock so tests can seed and inspect them directly.

use async_trait::async_trait;
use authflow_core::error::FlowError;
use authflow_declarative::deps::{
    AccountRecoveryService, AuthenticatorService, BotProtectionVerifier, BotVerification, CookieStore, EventService,
    IdentityService, MfaService, OAuthProviderService, RateLimit, RateLimiter, Reservation,
    UserService,
};
use authflow_declarative::errors;
use authflow_declarative::model::{
    Authentication, AuthenticatorInfo, BlockingEventResponse, Event, IdentityInfo, IdentitySpec,
    LoginIdKeyType, OAuthAssertion, RecoveryCode, User, Verification,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Default)]
struct DirectoryState {
    users: HashMap<String, User>,
    identities: Vec<IdentityInfo>,
    authenticators: Vec<AuthenticatorInfo>,
    /// Secret per authenticator id, including authenticators not yet created.
    secrets: HashMap<String, String>,
    recovery_codes: Vec<(RecoveryCode, String, bool)>,
    device_tokens: Vec<(String, String)>,
    /// Authenticator ids whose next successful verification asks for a write-back.
    stale: HashSet<String>,
    updated: Vec<String>,
    account_recovery_codes: Vec<SentCode>,
}

#[derive(Debug, Clone)]
struct SentCode {
    identity_id: String,
    user_id: String,
    code: String,
    used: bool,
}

#[derive(Debug, Default)]
pub struct Directory {
    state: Mutex<DirectoryState>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: &str) {
        self.state.lock().users.insert(
            user_id.to_string(),
            User {
                id: user_id.to_string(),
                disabled: false,
            },
        );
    }

    pub fn disable_user(&self, user_id: &str) {
        if let Some(user) = self.state.lock().users.get_mut(user_id) {
            user.disabled = true;
        }
    }

    pub fn add_login_id(&self, user_id: &str, login_id_type: LoginIdKeyType, value: &str) -> IdentityInfo {
        let key = match login_id_type {
            LoginIdKeyType::Email => "email",
            LoginIdKeyType::Phone => "phone",
            LoginIdKeyType::Username => "username",
        };
        self.add_identity(user_id, IdentitySpec::login_id(key, login_id_type, value))
    }

    pub fn add_oauth(&self, user_id: &str, alias: &str, assertion: OAuthAssertion) -> IdentityInfo {
        self.add_identity(user_id, IdentitySpec::oauth(alias, assertion))
    }

    fn add_identity(&self, user_id: &str, spec: IdentitySpec) -> IdentityInfo {
        let identity = IdentityInfo {
            id: new_id(),
            user_id: user_id.to_string(),
            spec,
        };
        self.state.lock().identities.push(identity.clone());
        identity
    }

    pub fn add_authenticator(&self, user_id: &str, authentication: Authentication, secret: &str) -> AuthenticatorInfo {
        let info = AuthenticatorInfo {
            id: new_id(),
            user_id: user_id.to_string(),
            authentication,
        };
        let mut state = self.state.lock();
        state.secrets.insert(info.id.clone(), secret.to_string());
        state.authenticators.push(info.clone());
        info
    }

    /// The next successful verification of `authenticator_id` reports `requires_update`.
    pub fn mark_stale(&self, authenticator_id: &str) {
        self.state.lock().stale.insert(authenticator_id.to_string());
    }

    pub fn updated_authenticators(&self) -> Vec<String> {
        self.state.lock().updated.clone()
    }

    pub fn add_recovery_code(&self, user_id: &str, code: &str) {
        let record = RecoveryCode {
            id: new_id(),
            user_id: user_id.to_string(),
        };
        self.state
            .lock()
            .recovery_codes
            .push((record, code.to_string(), false));
    }

    pub fn add_device_token(&self, user_id: &str, token: &str) {
        self.state
            .lock()
            .device_tokens
            .push((user_id.to_string(), token.to_string()));
    }

    pub fn user(&self, user_id: &str) -> Option<User> {
        self.state.lock().users.get(user_id).cloned()
    }

    pub fn user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().users.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn identities_of(&self, user_id: &str) -> Vec<IdentityInfo> {
        self.state
            .lock()
            .identities
            .iter()
            .filter(|identity| identity.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn authenticators_of(&self, user_id: &str) -> Vec<AuthenticatorInfo> {
        self.state
            .lock()
            .authenticators
            .iter()
            .filter(|info| info.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn device_tokens_of(&self, user_id: &str) -> Vec<String> {
        self.state
            .lock()
            .device_tokens
            .iter()
            .filter(|(owner, _)| owner == user_id)
            .map(|(_, token)| token.clone())
            .collect()
    }

    /// The latest account recovery code sent to the user, used or not.
    pub fn account_recovery_code(&self, user_id: &str) -> Option<String> {
        self.state
            .lock()
            .account_recovery_codes
            .iter()
            .rev()
            .find(|sent| sent.user_id == user_id)
            .map(|sent| sent.code.clone())
    }

    pub fn sent_account_recovery_codes(&self) -> usize {
        self.state.lock().account_recovery_codes.len()
    }

    pub fn unused_recovery_codes(&self, user_id: &str) -> usize {
        self.state
            .lock()
            .recovery_codes
            .iter()
            .filter(|(record, _, used)| record.user_id == user_id && !used)
            .count()
    }
}

#[async_trait]
impl IdentityService for Directory {
    async fn search_by_spec(&self, spec: &IdentitySpec) -> Result<Option<IdentityInfo>, FlowError> {
        Ok(self
            .state
            .lock()
            .identities
            .iter()
            .find(|identity| identity.spec.is_identical(spec))
            .cloned())
    }

    async fn list_by_claim(&self, claim: &str, value: &str) -> Result<Vec<IdentityInfo>, FlowError> {
        Ok(self
            .state
            .lock()
            .identities
            .iter()
            .filter(|identity| identity.spec.claims().get(claim).and_then(Value::as_str) == Some(value))
            .cloned()
            .collect())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<IdentityInfo>, FlowError> {
        Ok(self.identities_of(user_id))
    }

    async fn new_identity(&self, user_id: &str, spec: IdentitySpec) -> Result<IdentityInfo, FlowError> {
        Ok(IdentityInfo {
            id: new_id(),
            user_id: user_id.to_string(),
            spec,
        })
    }

    async fn check_duplicated_by_unique_key(&self, identity: &IdentityInfo) -> Result<(), FlowError> {
        let duplicated = self
            .state
            .lock()
            .identities
            .iter()
            .any(|existing| existing.spec.is_identical(&identity.spec));
        if duplicated {
            return Err(errors::duplicated_identity());
        }
        Ok(())
    }

    async fn create(&self, identity: &IdentityInfo) -> Result<(), FlowError> {
        self.state.lock().identities.push(identity.clone());
        Ok(())
    }
}

#[async_trait]
impl AuthenticatorService for Directory {
    async fn list(&self, user_id: &str) -> Result<Vec<AuthenticatorInfo>, FlowError> {
        Ok(self.authenticators_of(user_id))
    }

    async fn verify_one_with_spec(
        &self,
        user_id: &str,
        authentication: Authentication,
        secret: &str,
    ) -> Result<Verification, FlowError> {
        let state = self.state.lock();
        let authenticator = state
            .authenticators
            .iter()
            .filter(|info| info.user_id == user_id && info.authentication == authentication)
            .find(|info| state.secrets.get(&info.id).map(String::as_str) == Some(secret))
            .cloned()
            .ok_or_else(errors::invalid_credentials)?;
        Ok(Verification {
            requires_update: state.stale.contains(&authenticator.id),
            authenticator,
        })
    }

    async fn new_password(
        &self,
        user_id: &str,
        authentication: Authentication,
        password: &str,
    ) -> Result<AuthenticatorInfo, FlowError> {
        let info = AuthenticatorInfo {
            id: new_id(),
            user_id: user_id.to_string(),
            authentication,
        };
        self.state
            .lock()
            .secrets
            .insert(info.id.clone(), password.to_string());
        Ok(info)
    }

    async fn create(&self, authenticator: &AuthenticatorInfo) -> Result<(), FlowError> {
        self.state.lock().authenticators.push(authenticator.clone());
        Ok(())
    }

    async fn update(&self, authenticator: &AuthenticatorInfo) -> Result<(), FlowError> {
        let mut state = self.state.lock();
        state.stale.remove(&authenticator.id);
        state.updated.push(authenticator.id.clone());
        Ok(())
    }
}

#[async_trait]
impl MfaService for Directory {
    async fn verify_recovery_code(&self, user_id: &str, code: &str) -> Result<RecoveryCode, FlowError> {
        self.state
            .lock()
            .recovery_codes
            .iter()
            .find(|(record, stored, used)| record.user_id == user_id && stored == code && !used)
            .map(|(record, _, _)| record.clone())
            .ok_or_else(errors::invalid_credentials)
    }

    async fn consume_recovery_code(&self, code: &RecoveryCode) -> Result<(), FlowError> {
        let mut state = self.state.lock();
        match state
            .recovery_codes
            .iter_mut()
            .find(|(record, _, used)| record.id == code.id && !used)
        {
            Some(entry) => {
                entry.2 = true;
                Ok(())
            }
            None => Err(errors::invalid_credentials()),
        }
    }

    async fn verify_device_token(&self, user_id: &str, token: &str) -> Result<bool, FlowError> {
        Ok(self
            .state
            .lock()
            .device_tokens
            .iter()
            .any(|(owner, stored)| owner == user_id && stored == token))
    }

    fn generate_device_token(&self) -> String {
        new_id()
    }

    async fn create_device_token(&self, user_id: &str, token: &str) -> Result<(), FlowError> {
        self.add_device_token(user_id, token);
        Ok(())
    }
}

#[async_trait]
impl AccountRecoveryService for Directory {
    async fn send_code(&self, identity: &IdentityInfo) -> Result<(), FlowError> {
        let code = new_id()[..8].to_uppercase();
        self.state.lock().account_recovery_codes.push(SentCode {
            identity_id: identity.id.clone(),
            user_id: identity.user_id.clone(),
            code,
            used: false,
        });
        Ok(())
    }

    async fn verify_code(&self, identity: &IdentityInfo, code: &str) -> Result<(), FlowError> {
        let valid = self
            .state
            .lock()
            .account_recovery_codes
            .iter()
            .any(|sent| sent.identity_id == identity.id && sent.code == code && !sent.used);
        if !valid {
            return Err(errors::invalid_account_recovery_code());
        }
        Ok(())
    }

    async fn reset_password(&self, code: &str, password: &AuthenticatorInfo) -> Result<(), FlowError> {
        let mut state = self.state.lock();
        let sent = state
            .account_recovery_codes
            .iter_mut()
            .find(|sent| sent.user_id == password.user_id && sent.code == code && !sent.used)
            .ok_or_else(errors::invalid_account_recovery_code)?;
        sent.used = true;
        state.authenticators.retain(|info| {
            info.user_id != password.user_id || info.authentication != Authentication::PrimaryPassword
        });
        state.authenticators.push(password.clone());
        Ok(())
    }
}

#[async_trait]
impl UserService for Directory {
    async fn get_raw(&self, user_id: &str) -> Result<User, FlowError> {
        self.user(user_id).ok_or_else(errors::user_not_found)
    }

    async fn create(&self, user_id: &str) -> Result<User, FlowError> {
        let user = User {
            id: user_id.to_string(),
            disabled: false,
        };
        self.state.lock().users.insert(user.id.clone(), user.clone());
        Ok(user)
    }
}

/// Records every event and answers blocking hooks with a configurable response.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    blocking: Mutex<Vec<Event>>,
    dispatched: Mutex<Vec<Event>>,
    on_commit: Mutex<Vec<Event>>,
    required_amr: Mutex<Vec<String>>,
    fail_dispatch: Mutex<bool>,
    disallow: Mutex<bool>,
}

impl RecordingEvents {
    /// AMR tokens the pre-authenticated hook will demand.
    pub fn require_amr(&self, tokens: &[&str]) {
        *self.required_amr.lock() = tokens.iter().map(|token| token.to_string()).collect();
    }

    /// Make blocking hooks refuse the operation until switched back.
    pub fn disallow(&self, disallow: bool) {
        *self.disallow.lock() = disallow;
    }

    /// Make non-blocking dispatch fail until switched back.
    pub fn fail_dispatch(&self, fail: bool) {
        *self.fail_dispatch.lock() = fail;
    }

    pub fn blocking(&self) -> Vec<Event> {
        self.blocking.lock().clone()
    }

    pub fn dispatched(&self) -> Vec<Event> {
        self.dispatched.lock().clone()
    }

    pub fn dispatched_kinds(&self) -> Vec<String> {
        self.dispatched.lock().iter().map(|event| event.kind.clone()).collect()
    }

    pub fn on_commit(&self) -> Vec<Event> {
        self.on_commit.lock().clone()
    }
}

#[async_trait]
impl EventService for RecordingEvents {
    async fn prepare_blocking_event_with_tx(&self, event: &Event) -> Result<BlockingEventResponse, FlowError> {
        self.blocking.lock().push(event.clone());
        if *self.disallow.lock() {
            return Err(errors::webhook_disallowed());
        }
        Ok(BlockingEventResponse {
            required_amr: self.required_amr.lock().clone(),
        })
    }

    async fn dispatch_event_without_tx(&self, event: &Event) -> Result<(), FlowError> {
        if *self.fail_dispatch.lock() {
            return Err(FlowError::internal("event sink unavailable"));
        }
        self.dispatched.lock().push(event.clone());
        Ok(())
    }

    async fn dispatch_event_on_commit(&self, event: &Event) -> Result<(), FlowError> {
        self.on_commit.lock().push(event.clone());
        Ok(())
    }
}

/// Fixed-size buckets keyed by limit name and key.
#[derive(Debug)]
pub struct MemoryRateLimiter {
    capacity: usize,
    taken: Mutex<HashMap<(String, String), Vec<String>>>,
}

impl MemoryRateLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            taken: Mutex::new(HashMap::new()),
        }
    }

    pub fn taken(&self, limit: &RateLimit) -> usize {
        self.taken
            .lock()
            .get(&(limit.name.to_string(), limit.key.clone()))
            .map_or(0, Vec::len)
    }
}

impl Default for MemoryRateLimiter {
    fn default() -> Self {
        Self::new(10)
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn allow(&self, limit: RateLimit) -> Result<Reservation, FlowError> {
        let mut taken = self.taken.lock();
        let bucket = taken
            .entry((limit.name.to_string(), limit.key.clone()))
            .or_default();
        if bucket.len() >= self.capacity {
            return Err(errors::too_many_request(limit.name));
        }
        let id = new_id();
        bucket.push(id.clone());
        Ok(Reservation { limit, id })
    }

    async fn cancel(&self, reservation: Reservation) {
        let mut taken = self.taken.lock();
        let key = (reservation.limit.name.to_string(), reservation.limit.key);
        if let Some(bucket) = taken.get_mut(&key) {
            bucket.retain(|id| *id != reservation.id);
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryCookies {
    device_token: Mutex<Option<String>>,
}

impl CookieStore for MemoryCookies {
    fn device_token(&self) -> Option<String> {
        self.device_token.lock().clone()
    }

    fn set_device_token(&self, token: &str) {
        *self.device_token.lock() = Some(token.to_string());
    }

    fn clear_device_token(&self) {
        *self.device_token.lock() = None;
    }
}

/// Answers every verification with the configured result.
#[derive(Debug)]
pub struct StubBotProtection {
    result: Mutex<BotVerification>,
    calls: Mutex<usize>,
}

impl StubBotProtection {
    pub fn set(&self, result: BotVerification) {
        *self.result.lock() = result;
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

impl Default for StubBotProtection {
    fn default() -> Self {
        Self {
            result: Mutex::new(BotVerification::Verified),
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl BotProtectionVerifier for StubBotProtection {
    async fn verify(
        &self,
        _provider_type: &str,
        response: &str,
        _remote_ip: Option<&str>,
    ) -> Result<BotVerification, FlowError> {
        *self.calls.lock() += 1;
        if response.is_empty() {
            return Ok(BotVerification::Failed);
        }
        Ok(*self.result.lock())
    }
}

/// Maps authorization codes to assertions, per provider alias.
#[derive(Debug, Default)]
pub struct StubOAuth {
    codes: Mutex<HashMap<(String, String), OAuthAssertion>>,
}

impl StubOAuth {
    pub fn add_code(&self, alias: &str, code: &str, subject_id: &str, claims: Map<String, Value>) {
        self.codes.lock().insert(
            (alias.to_string(), code.to_string()),
            OAuthAssertion {
                subject_id: subject_id.to_string(),
                claims,
            },
        );
    }
}

#[async_trait]
impl OAuthProviderService for StubOAuth {
    async fn exchange(&self, alias: &str, code: &str) -> Result<OAuthAssertion, FlowError> {
        self.codes
            .lock()
            .remove(&(alias.to_string(), code.to_string()))
            .ok_or_else(errors::invalid_credentials)
    }
}
