use crate::fakes::{
    Directory, MemoryCookies, MemoryRateLimiter, RecordingEvents, StubBotProtection, StubOAuth,
};
use authflow_core::bus::Bus;
use authflow_core::flow::{FlowReference, FlowType, outline};
use authflow_declarative::deps::{
    AccountRecoveryService, AuthenticatorService, BotProtectionVerifier, CookieStore, EventService, IdentityService,
    MfaService, OAuthProviderService, RateLimiter, UserService,
};
use authflow_declarative::blocked::AuthenticationBlocked;
use authflow_declarative::{AppConfig, DeclarativeFlowFactory, registry};
use authflow_runtime::{FlowService, MemoryFlowStore, ServiceConfig, ServiceError, ServiceOutput, SessionOptions};
use serde_json::Value;
use std::sync::Arc;

pub const REMOTE_IP: &str = "203.0.113.7";
pub const USER_AGENT: &str = "ua-test";

/// A [`FlowService`] over the declarative flows, wired to in-memory collaborators.
pub struct Harness {
    pub service: FlowService,
    pub store: MemoryFlowStore,
    pub directory: Arc<Directory>,
    pub events: Arc<RecordingEvents>,
    pub rate_limiter: Arc<MemoryRateLimiter>,
    pub cookies: Arc<MemoryCookies>,
    pub bot_protection: Arc<StubBotProtection>,
    pub oauth: Arc<StubOAuth>,
}

impl Harness {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        Self::with_service_config(config, ServiceConfig::default())
    }

    pub fn with_service_config(config: AppConfig, service_config: ServiceConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let directory = Arc::new(Directory::new());
        let events = Arc::new(RecordingEvents::default());
        let rate_limiter = Arc::new(MemoryRateLimiter::default());
        let cookies = Arc::new(MemoryCookies::default());
        let bot_protection = Arc::new(StubBotProtection::default());
        let oauth = Arc::new(StubOAuth::default());

        let bus = Bus::new()
            .with(Arc::new(config))
            .with::<Arc<dyn IdentityService>>(directory.clone())
            .with::<Arc<dyn AuthenticatorService>>(directory.clone())
            .with::<Arc<dyn MfaService>>(directory.clone())
            .with::<Arc<dyn UserService>>(directory.clone())
            .with::<Arc<dyn AccountRecoveryService>>(directory.clone())
            .with::<Arc<dyn EventService>>(events.clone())
            .with::<Arc<dyn RateLimiter>>(rate_limiter.clone())
            .with::<Arc<dyn CookieStore>>(cookies.clone())
            .with::<Arc<dyn BotProtectionVerifier>>(bot_protection.clone())
            .with::<Arc<dyn OAuthProviderService>>(oauth.clone());

        let store = MemoryFlowStore::new();
        let service = FlowService::new(
            bus,
            Arc::new(store.clone()),
            registry()?,
            Arc::new(DeclarativeFlowFactory),
            service_config,
        )
        .with_rejection_hook(Arc::new(AuthenticationBlocked));
        Ok(Self {
            service,
            store,
            directory,
            events,
            rate_limiter,
            cookies,
            bot_protection,
            oauth,
        })
    }

    pub async fn start(&self, flow_type: FlowType, name: &str) -> Result<ServiceOutput, ServiceError> {
        self.start_as(flow_type, name, None).await
    }

    /// Start a flow on behalf of the signed-in `user_id`, as reauth needs.
    pub async fn start_as(
        &self,
        flow_type: FlowType,
        name: &str,
        user_id: Option<&str>,
    ) -> Result<ServiceOutput, ServiceError> {
        let options = SessionOptions {
            user_agent_id: Some(USER_AGENT.to_string()),
            redirect_uri: Some("https://app.example.com/done".to_string()),
            remote_ip: Some(REMOTE_IP.to_string()),
            user_id_hint: user_id.map(str::to_string),
        };
        self.service
            .create_new_flow(FlowReference::new(flow_type, name), options)
            .await
    }

    pub async fn feed(&self, output: &ServiceOutput, input: Value) -> Result<ServiceOutput, ServiceError> {
        self.service
            .feed_input(&output.instance_id, Some(USER_AGENT), input)
            .await
    }

    pub async fn get(&self, output: &ServiceOutput) -> Result<ServiceOutput, ServiceError> {
        self.service.get(&output.instance_id, Some(USER_AGENT)).await
    }

    /// Outline of the committed tree, `None` once the flow finished.
    pub fn outline(&self, instance_id: &str) -> Option<Vec<String>> {
        let stored = self.store.snapshot(instance_id)?;
        let instance = stored.decode(self.service.registry()).ok()?;
        Some(outline(&instance.flow))
    }
}
