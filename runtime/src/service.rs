//! # FlowService
//!
//! The entry point used by transports: create a flow, read its pending step, feed client
//! input, and redeliver one-time functions that failed earlier.
//!
//! ## Step lifecycle
//!
//! 1. open a [`StepTransaction`]
//! 2. accept the input, following flow switches and rewrites
//! 3. persist the tree (or delete it once finished), apply the buffered Run effects, and
//!    finalize the transaction; any failure rolls back both
//! 4. run on-commit effects, then pending one-time functions
//! 5. while the tree pauses, repeat from 1 without client input
//!
//! Versions on stored flows make concurrent submissions on the same instance fail with a
//! conflict instead of overwriting each other.

use crate::accept::{
    AcceptInput, AcceptOutcome, AcceptResult, Frontier, accept, find_input_reactor, reactor_at,
};
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::instance::{FlowInstance, new_id};
use crate::scheduler::EffectScheduler;
use crate::store::{FlowStore, Session, StoredFlow};
use crate::transaction::StepTransaction;
use authflow_core::bus::Bus;
use authflow_core::context::Context;
use authflow_core::error::FlowError;
use authflow_core::flow::{Flow, FlowFactory, FlowReference, RejectionHook};
use authflow_core::jsonpointer::JsonPointer;
use authflow_core::outcome::BotProtectionStatus;
use authflow_core::registry::Registry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub user_agent_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub remote_ip: Option<String>,
    /// Required by reauth flows: the user already signed in.
    pub user_id_hint: Option<String>,
}

/// What the client should do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Finished {
        redirect_uri: Option<String>,
    },
    /// Submit input matching `schema`. Both are absent while a one-time function is pending.
    Input {
        json_pointer: Option<JsonPointer>,
        schema: Option<Value>,
        data: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOutput {
    pub flow_id: String,
    pub instance_id: String,
    pub state_token: String,
    pub flow_reference: FlowReference,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_protection: Option<BotProtectionStatus>,
}

impl ServiceOutput {
    pub fn is_finished(&self) -> bool {
        matches!(self.action, Action::Finished { .. })
    }

    pub fn schema(&self) -> Option<&Value> {
        match &self.action {
            Action::Input { schema, .. } => schema.as_ref(),
            Action::Finished { .. } => None,
        }
    }
}

struct Loaded {
    session: Session,
    instance: FlowInstance,
    /// Committed version; 0 until first persisted.
    version: u64,
}

struct Pass {
    outcome: AcceptOutcome,
    result: AcceptResult,
}

pub struct FlowService {
    deps: Arc<Bus>,
    store: Arc<dyn FlowStore>,
    registry: Arc<Registry>,
    factory: Arc<dyn FlowFactory>,
    scheduler: EffectScheduler,
    config: ServiceConfig,
    rejection_hooks: Vec<Arc<dyn RejectionHook>>,
}

impl FlowService {
    pub fn new(
        deps: Bus,
        store: Arc<dyn FlowStore>,
        registry: Registry,
        factory: Arc<dyn FlowFactory>,
        config: ServiceConfig,
    ) -> Self {
        let registry = Arc::new(registry);
        Self {
            deps: Arc::new(deps),
            scheduler: EffectScheduler::new(store.clone(), registry.clone()),
            store,
            registry,
            factory,
            config,
            rejection_hooks: Vec::new(),
        }
    }

    /// Notify `hook` of every submission rejected with an error.
    pub fn with_rejection_hook(mut self, hook: Arc<dyn RejectionHook>) -> Self {
        self.rejection_hooks.push(hook);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &EffectScheduler {
        &self.scheduler
    }

    /// Start a new flow and drive it up to its first pending step.
    pub async fn create_new_flow(
        &self,
        reference: FlowReference,
        options: SessionOptions,
    ) -> Result<ServiceOutput, ServiceError> {
        let span = info_span!("create_new_flow", authflow.flow = %reference);
        async move {
            let session = Session::new(
                new_id(),
                options.user_agent_id,
                options.redirect_uri,
                options.remote_ip,
                self.config.flow_ttl(),
            )
            .with_user_id_hint(options.user_id_hint);
            let ctx = self.context(&session, &reference);
            let intent = self.factory.create(&ctx, &reference)?;
            let instance = FlowInstance::new(session.flow_id.clone(), reference, intent);
            info!(
                flow_id = %instance.flow_id,
                instance_id = %instance.instance_id,
                "flow created"
            );
            let loaded = Loaded {
                session,
                instance,
                version: 0,
            };
            self.evaluate(loaded, AcceptInput::Raw(None), false).await
        }
        .instrument(span)
        .await
    }

    /// The pending step of a stored flow, without advancing it.
    pub async fn get(
        &self,
        instance_id: &str,
        user_agent_id: Option<&str>,
    ) -> Result<ServiceOutput, ServiceError> {
        let loaded = self.load(instance_id).await?;
        check_user_agent(&loaded.session, user_agent_id)?;
        self.output(&loaded, None).await
    }

    pub async fn feed_input(
        &self,
        instance_id: &str,
        user_agent_id: Option<&str>,
        input: Value,
    ) -> Result<ServiceOutput, ServiceError> {
        let span = info_span!("feed_input", authflow.instance = %instance_id);
        async move {
            let loaded = self.load(instance_id).await?;
            check_user_agent(&loaded.session, user_agent_id)?;
            self.evaluate(loaded, AcceptInput::Raw(Some(input)), true).await
        }
        .instrument(span)
        .await
    }

    /// Redeliver one-time functions that failed earlier, then resume the flow.
    pub async fn retry_pending(&self, instance_id: &str) -> Result<ServiceOutput, ServiceError> {
        let span = info_span!("retry_pending", authflow.instance = %instance_id);
        async move {
            let loaded = self.load(instance_id).await?;
            let ctx = self.context(&loaded.session, &loaded.instance.flow_reference);
            match self.scheduler.run_pending(&ctx, instance_id).await {
                Ok(_) => {}
                Err(ServiceError::Flow(source)) => {
                    let output = self.output(&loaded, None).await?;
                    return Err(ServiceError::EffectFailed {
                        output: Box::new(output),
                        source,
                    });
                }
                Err(err) => return Err(err),
            }
            let loaded = self.load(instance_id).await?;
            self.evaluate(loaded, AcceptInput::Raw(None), false).await
        }
        .instrument(span)
        .await
    }

    fn context(&self, session: &Session, reference: &FlowReference) -> Context {
        Context::new(self.deps.clone(), reference.clone())
            .with_remote_ip(session.remote_ip.clone())
            .with_user_agent_id(session.user_agent_id.clone())
            .with_user_id_hint(session.user_id_hint.clone())
    }

    async fn load(&self, instance_id: &str) -> Result<Loaded, ServiceError> {
        let mut step = StepTransaction::new(self.store.begin().await?);
        let loaded = async {
            let tx = step.tx()?;
            let stored = tx.get_flow(instance_id).await?;
            let session = tx.get_session(&stored.flow_id).await?;
            Ok::<_, ServiceError>((stored, session))
        }
        .await;
        step.rollback().await?;
        let (stored, session) = loaded?;
        Ok(Loaded {
            instance: stored.decode(&self.registry)?,
            version: stored.version,
            session,
        })
    }

    async fn evaluate(
        &self,
        mut loaded: Loaded,
        input: AcceptInput,
        client: bool,
    ) -> Result<ServiceOutput, ServiceError> {
        let mut input = input;
        let mut client = client;
        let mut retries = 0u32;

        loop {
            let mut step = StepTransaction::new(self.store.begin().await?);
            let pass = self.pass(&mut step, &mut loaded, input, client).await;
            let pass = match step.finalize(pass).await? {
                Ok(pass) => pass,
                Err(ServiceError::Flow(err)) => {
                    self.rejected(&loaded, &err).await;
                    return Err(err.into());
                }
                Err(err) => return Err(err),
            };

            let paused = matches!(pass.outcome, AcceptOutcome::Paused);
            let ctx = self.context(&loaded.session, &loaded.instance.flow_reference);
            let mut effect_error = self
                .scheduler
                .run_on_commit(&ctx, pass.result.on_commit)
                .await
                .err();

            match pass.outcome {
                AcceptOutcome::Eof => {
                    info!(instance_id = %loaded.instance.instance_id, "flow finished");
                    let output = self.envelope(
                        &loaded,
                        Action::Finished {
                            redirect_uri: loaded.session.redirect_uri.clone(),
                        },
                        pass.result.bot_protection,
                    );
                    return with_effect_error(output, effect_error);
                }
                AcceptOutcome::Rejected(err) => {
                    warn!(%err, "submission rejected");
                    self.rejected(&loaded, &err).await;
                    return Err(err.into());
                }
                _ => {}
            }

            let ran = match self
                .scheduler
                .run_pending(&ctx, &loaded.instance.instance_id)
                .await
            {
                Ok(ran) => ran,
                Err(ServiceError::Flow(err)) => {
                    effect_error.get_or_insert(err);
                    0
                }
                Err(err) => return Err(err),
            };
            if ran > 0 {
                loaded = self.load(&loaded.instance.instance_id).await?;
            }

            if paused && effect_error.is_none() {
                retries += 1;
                if retries > self.config.max_pause_retries {
                    warn!(retries, "flow still paused");
                    return Err(ServiceError::PauseRetryExhausted(self.config.max_pause_retries));
                }
                input = AcceptInput::Raw(None);
                client = false;
                continue;
            }

            let output = self.output(&loaded, pass.result.bot_protection).await?;
            return with_effect_error(output, effect_error);
        }
    }

    async fn rejected(&self, loaded: &Loaded, err: &FlowError) {
        if self.rejection_hooks.is_empty() {
            return;
        }
        let ctx = self.context(&loaded.session, &loaded.instance.flow_reference);
        for hook in &self.rejection_hooks {
            hook.rejected(&ctx, &loaded.instance.flow, err).await;
        }
    }

    /// One accept pass inside `step`, persisting the result.
    async fn pass(
        &self,
        step: &mut StepTransaction,
        loaded: &mut Loaded,
        input: AcceptInput,
        client: bool,
    ) -> Result<Pass, ServiceError> {
        let mut ctx = self.context(&loaded.session, &loaded.instance.flow_reference);
        let mut result = AcceptResult::default();
        let outcome = self
            .drive(&mut ctx, &mut loaded.instance, input, &mut result)
            .await?;

        self.persist(step, loaded, &outcome, client).await?;
        step.apply(&ctx, std::mem::take(&mut result.run)).await?;
        Ok(Pass { outcome, result })
    }

    async fn persist(
        &self,
        step: &mut StepTransaction,
        loaded: &mut Loaded,
        outcome: &AcceptOutcome,
        client: bool,
    ) -> Result<(), ServiceError> {
        let tx = step.tx()?;
        match outcome {
            AcceptOutcome::NoChange if client => return Err(FlowError::IncompatibleInput.into()),
            AcceptOutcome::NoChange if loaded.version > 0 => {}
            AcceptOutcome::Eof => {
                tx.delete_flow(&loaded.instance.instance_id, loaded.version)
                    .await?;
                tx.delete_session(&loaded.session.flow_id).await?;
            }
            _ => {
                if loaded.version == 0 {
                    tx.put_session(loaded.session.clone()).await?;
                }
                let stored = StoredFlow::from_instance(
                    &loaded.instance,
                    loaded.version + 1,
                    loaded.session.expire_at,
                )?;
                tx.put_flow(stored).await?;
                loaded.version += 1;
            }
        }
        Ok(())
    }

    /// Accept, following switch and rewrite directives.
    async fn drive(
        &self,
        ctx: &mut Context,
        instance: &mut FlowInstance,
        input: AcceptInput,
        result: &mut AcceptResult,
    ) -> Result<AcceptOutcome, FlowError> {
        let mut input = input;
        let mut redirects = 0u32;
        loop {
            let (flow, synthetic) =
                match accept(ctx, instance, input, result, self.config.max_loop).await? {
                    AcceptOutcome::SwitchFlow(switch) => {
                        info!(
                            from = %instance.flow_reference,
                            to = %switch.reference,
                            "switching flow"
                        );
                        *ctx = ctx.with_flow_reference(switch.reference.clone());
                        let intent = self.factory.create(ctx, &switch.reference)?;
                        instance.flow_reference = switch.reference;
                        (Flow::from_boxed(intent), switch.synthetic_input)
                    }
                    AcceptOutcome::RewriteFlow(rewrite) => {
                        info!(
                            flow = %instance.flow_reference,
                            intent = rewrite.intent.kind(),
                            "rewriting flow"
                        );
                        let flow = Flow {
                            intent: rewrite.intent,
                            nodes: rewrite.nodes,
                        };
                        (flow, rewrite.synthetic_input)
                    }
                    AcceptOutcome::NoChange if redirects > 0 => return Ok(AcceptOutcome::Pending),
                    outcome => return Ok(outcome),
                };

            redirects += 1;
            if redirects > self.config.max_flow_switches {
                return Err(FlowError::internal(format!(
                    "more than {} flow switches in one submission",
                    self.config.max_flow_switches
                )));
            }
            instance.flow = flow;
            instance.regenerate_state_token();
            // effects of the abandoned tree are dropped
            result.run.clear();
            result.on_commit.clear();
            result.delayed.clear();
            input = AcceptInput::Synthetic(synthetic);
        }
    }

    async fn output(
        &self,
        loaded: &Loaded,
        bot_protection: Option<BotProtectionStatus>,
    ) -> Result<ServiceOutput, ServiceError> {
        let ctx = self.context(&loaded.session, &loaded.instance.flow_reference);
        let action = match find_input_reactor(&ctx, &loaded.instance.flow).await? {
            Frontier::Eof => Action::Finished {
                redirect_uri: loaded.session.redirect_uri.clone(),
            },
            Frontier::Paused => Action::Input {
                json_pointer: None,
                schema: None,
                data: Value::Object(Map::new()),
            },
            Frontier::Reactor(location) => {
                let (reactor, flows) = reactor_at(&loaded.instance.flow, &location)?;
                let data = reactor.output_data(&ctx, flows).await?;
                let schema = location.reaction.schema();
                Action::Input {
                    json_pointer: schema.map(|schema| schema.json_pointer().clone()),
                    schema: schema.map(|schema| schema.document().clone()),
                    data,
                }
            }
        };
        Ok(self.envelope(loaded, action, bot_protection))
    }

    fn envelope(
        &self,
        loaded: &Loaded,
        action: Action,
        bot_protection: Option<BotProtectionStatus>,
    ) -> ServiceOutput {
        ServiceOutput {
            flow_id: loaded.instance.flow_id.clone(),
            instance_id: loaded.instance.instance_id.clone(),
            state_token: loaded.instance.state_token.clone(),
            flow_reference: loaded.instance.flow_reference.clone(),
            action,
            bot_protection,
        }
    }
}

impl std::fmt::Debug for FlowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowService")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

fn check_user_agent(session: &Session, user_agent_id: Option<&str>) -> Result<(), ServiceError> {
    if session.user_agent_id.as_deref() != user_agent_id {
        warn!(flow_id = %session.flow_id, "user agent mismatch");
        return Err(ServiceError::UserAgentUnmatched);
    }
    Ok(())
}

fn with_effect_error(
    output: ServiceOutput,
    effect_error: Option<FlowError>,
) -> Result<ServiceOutput, ServiceError> {
    match effect_error {
        Some(source) => Err(ServiceError::EffectFailed {
            output: Box::new(output),
            source,
        }),
        None => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::store::{FlowTransaction, MemoryFlowStore, StoreError};
    use crate::transaction::{Transaction, TransactionError};
    use async_trait::async_trait;
    use authflow_core::flow::FlowType;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    /// Commits a newer version of a flow from another transaction whenever a flow is deleted.
    struct RacingStore {
        inner: MemoryFlowStore,
    }

    #[async_trait]
    impl FlowStore for RacingStore {
        async fn begin(&self) -> Result<Box<dyn FlowTransaction>, TransactionError> {
            Ok(Box::new(RacingTransaction {
                tx: self.inner.begin().await?,
                store: self.inner.clone(),
            }))
        }
    }

    struct RacingTransaction {
        tx: Box<dyn FlowTransaction>,
        store: MemoryFlowStore,
    }

    #[async_trait]
    impl Transaction for RacingTransaction {
        async fn commit(self: Box<Self>) -> Result<(), TransactionError> {
            self.tx.commit().await
        }

        async fn rollback(self: Box<Self>) -> Result<(), TransactionError> {
            self.tx.rollback().await
        }
    }

    #[async_trait]
    impl FlowTransaction for RacingTransaction {
        async fn get_session(&mut self, flow_id: &str) -> Result<Session, StoreError> {
            self.tx.get_session(flow_id).await
        }

        async fn put_session(&mut self, session: Session) -> Result<(), StoreError> {
            self.tx.put_session(session).await
        }

        async fn delete_session(&mut self, flow_id: &str) -> Result<(), StoreError> {
            self.tx.delete_session(flow_id).await
        }

        async fn get_flow(&mut self, instance_id: &str) -> Result<StoredFlow, StoreError> {
            self.tx.get_flow(instance_id).await
        }

        async fn put_flow(&mut self, flow: StoredFlow) -> Result<(), StoreError> {
            self.tx.put_flow(flow).await
        }

        async fn delete_flow(&mut self, instance_id: &str, version: u64) -> Result<(), StoreError> {
            let mut competing = self.store.begin().await?;
            let current = competing.get_flow(instance_id).await?;
            competing
                .put_flow(StoredFlow {
                    version: current.version + 1,
                    ..current
                })
                .await?;
            competing.commit().await?;
            self.tx.delete_flow(instance_id, version).await
        }
    }

    struct Fixture {
        service: FlowService,
        store: MemoryFlowStore,
        switches: Arc<ToySwitches>,
    }

    fn fixture(config: ServiceConfig) -> Fixture {
        let (bus, switches) = toy_bus();
        let store = MemoryFlowStore::new();
        let service = FlowService::new(
            bus,
            Arc::new(store.clone()),
            toy_registry(),
            Arc::new(ToyFactory),
            config,
        );
        Fixture {
            service,
            store,
            switches,
        }
    }

    fn options(user_agent_id: &str) -> SessionOptions {
        SessionOptions {
            user_agent_id: Some(user_agent_id.into()),
            redirect_uri: Some("https://app.example/done".into()),
            remote_ip: Some("127.0.0.1".into()),
            ..SessionOptions::default()
        }
    }

    fn login() -> FlowReference {
        FlowReference::new(FlowType::Login, "default")
    }

    #[tokio::test]
    async fn test_create_then_finish() {
        let fx = fixture(ServiceConfig::default());
        let created = fx
            .service
            .create_new_flow(login(), options("ua"))
            .await
            .unwrap();
        assert_eq!(created.schema().unwrap()["required"], json!(["name"]));
        assert_eq!(fx.store.flow_count(), 1);

        let fetched = fx.service.get(&created.instance_id, Some("ua")).await.unwrap();
        assert_eq!(fetched.state_token, created.state_token);

        let finished = fx
            .service
            .feed_input(&created.instance_id, Some("ua"), json!({"name": "alice"}))
            .await
            .unwrap();
        assert_eq!(
            finished.action,
            Action::Finished {
                redirect_uri: Some("https://app.example/done".into())
            }
        );
        assert_eq!(fx.switches.run_effects.load(Ordering::SeqCst), 1);
        assert_eq!(fx.switches.notified.load(Ordering::SeqCst), 1);
        assert_eq!(*fx.switches.committed.lock(), vec!["alice".to_string()]);
        assert_eq!(fx.store.flow_count(), 0);
    }

    #[tokio::test]
    async fn test_user_agent_mismatch() {
        let fx = fixture(ServiceConfig::default());
        let created = fx
            .service
            .create_new_flow(login(), options("ua-1"))
            .await
            .unwrap();
        let err = fx
            .service
            .feed_input(&created.instance_id, Some("ua-2"), json!({"name": "alice"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UserAgentUnmatched));
        assert!(fx.service.get(&created.instance_id, None).await.is_err());
    }

    #[tokio::test]
    async fn test_client_errors_leave_the_step_in_place() {
        let fx = fixture(ServiceConfig::default());
        let created = fx
            .service
            .create_new_flow(login(), options("ua"))
            .await
            .unwrap();

        let err = fx
            .service
            .feed_input(&created.instance_id, Some("ua"), json!({"name": ""}))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Flow(FlowError::IncompatibleInput)));
        assert!(err.is_client_error());

        let err = fx
            .service
            .feed_input(&created.instance_id, Some("ua"), json!({"nickname": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Flow(FlowError::Validation(_))));

        let fetched = fx.service.get(&created.instance_id, Some("ua")).await.unwrap();
        assert_eq!(fetched.state_token, created.state_token);
        assert_eq!(fx.store.snapshot(&created.instance_id).unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_failed_one_time_function_is_redelivered() {
        let fx = fixture(ServiceConfig::default());
        let created = fx
            .service
            .create_new_flow(login(), options("ua"))
            .await
            .unwrap();

        fx.switches.fail_notify.store(true, Ordering::SeqCst);
        let err = fx
            .service
            .feed_input(&created.instance_id, Some("ua"), json!({"name": "alice"}))
            .await
            .unwrap_err();
        match err {
            ServiceError::EffectFailed { output, .. } => {
                assert!(!output.is_finished());
                assert!(output.schema().is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // the committed step is not undone
        assert_eq!(*fx.switches.committed.lock(), vec!["alice".to_string()]);

        fx.switches.fail_notify.store(false, Ordering::SeqCst);
        let finished = fx.service.retry_pending(&created.instance_id).await.unwrap();
        assert!(finished.is_finished());
        assert_eq!(fx.switches.notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_switch_flow_replays_synthetic_input() {
        let fx = fixture(ServiceConfig::default());
        let created = fx
            .service
            .create_new_flow(login(), options("ua"))
            .await
            .unwrap();
        let finished = fx
            .service
            .feed_input(&created.instance_id, Some("ua"), json!({"name": "switch"}))
            .await
            .unwrap();
        assert!(finished.is_finished());
        assert_eq!(finished.flow_reference.flow_type, FlowType::Signup);
        assert_eq!(finished.flow_id, created.flow_id);
        assert_eq!(*fx.switches.committed.lock(), vec!["switched".to_string()]);
    }

    #[tokio::test]
    async fn test_rejection_persists_and_reoffers_step() {
        let fx = fixture(ServiceConfig::default());
        let created = fx
            .service
            .create_new_flow(login(), options("ua"))
            .await
            .unwrap();
        fx.switches.bot_unavailable.store(true, Ordering::SeqCst);
        let err = fx
            .service
            .feed_input(&created.instance_id, Some("ua"), json!({"name": "captcha"}))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some("BotProtectionServiceUnavailable"));

        let fetched = fx.service.get(&created.instance_id, Some("ua")).await.unwrap();
        assert_eq!(fetched.schema(), created.schema());
        assert_eq!(fx.store.snapshot(&created.instance_id).unwrap().version, 2);
    }

    #[derive(Default)]
    struct RecordingHook {
        seen: parking_lot::Mutex<Vec<(String, usize, Option<String>)>>,
    }

    #[async_trait]
    impl RejectionHook for RecordingHook {
        async fn rejected(&self, ctx: &Context, root: &Flow, err: &FlowError) {
            assert_eq!(ctx.remote_ip(), Some("127.0.0.1"));
            self.seen.lock().push((
                root.intent.kind().to_string(),
                root.nodes.len(),
                err.reason().map(str::to_string),
            ));
        }
    }

    #[tokio::test]
    async fn test_rejection_hooks_see_the_evaluated_tree() {
        let fx = fixture(ServiceConfig::default());
        let hook = Arc::new(RecordingHook::default());
        let service = fx.service.with_rejection_hook(hook.clone());
        let created = service.create_new_flow(login(), options("ua")).await.unwrap();

        let err = service
            .feed_input(&created.instance_id, Some("ua"), json!({"nickname": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Flow(FlowError::Validation(_))));

        fx.switches.bot_unavailable.store(true, Ordering::SeqCst);
        let err = service
            .feed_input(&created.instance_id, Some("ua"), json!({"name": "captcha"}))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some("BotProtectionServiceUnavailable"));

        let seen = hook.seen.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], ("IntentToyRoot".to_string(), 0, None));
        assert_eq!(seen[1].0, "IntentToyRoot");
        assert_eq!(seen[1].2.as_deref(), Some("BotProtectionServiceUnavailable"));

        // mismatched user agents never reach evaluation
        let _ = service
            .feed_input(&created.instance_id, Some("other"), json!({"name": "x"}))
            .await
            .unwrap_err();
        assert_eq!(hook.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_pause_retries_are_bounded() {
        let fx = fixture(ServiceConfig {
            max_pause_retries: 0,
            ..ServiceConfig::default()
        });
        let created = fx
            .service
            .create_new_flow(login(), options("ua"))
            .await
            .unwrap();
        let err = fx
            .service
            .feed_input(&created.instance_id, Some("ua"), json!({"name": "alice"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PauseRetryExhausted(0)));
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let fx = fixture(ServiceConfig::default());
        let err = fx.service.get("missing", None).await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_failed_run_effect_rolls_back_the_step() {
        let fx = fixture(ServiceConfig::default());
        let created = fx
            .service
            .create_new_flow(login(), options("ua"))
            .await
            .unwrap();

        fx.switches.fail_run.store(true, Ordering::SeqCst);
        let err = fx
            .service
            .feed_input(&created.instance_id, Some("ua"), json!({"name": "alice"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Flow(FlowError::Internal(_))));
        assert_eq!(fx.store.snapshot(&created.instance_id).unwrap().version, 1);
        assert!(fx.switches.committed.lock().is_empty());
        let fetched = fx.service.get(&created.instance_id, Some("ua")).await.unwrap();
        assert_eq!(fetched.state_token, created.state_token);

        fx.switches.fail_run.store(false, Ordering::SeqCst);
        let finished = fx
            .service
            .feed_input(&created.instance_id, Some("ua"), json!({"name": "alice"}))
            .await
            .unwrap();
        assert!(finished.is_finished());
        assert_eq!(fx.switches.run_effects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finishing_delete_loses_to_concurrent_write() {
        let (bus, switches) = toy_bus();
        let store = MemoryFlowStore::new();
        let service = FlowService::new(
            bus,
            Arc::new(RacingStore {
                inner: store.clone(),
            }),
            toy_registry(),
            Arc::new(ToyFactory),
            ServiceConfig::default(),
        );
        let created = service.create_new_flow(login(), options("ua")).await.unwrap();

        let err = service
            .feed_input(&created.instance_id, Some("ua"), json!({"name": "alice"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Transaction(TransactionError::Conflict { .. })
        ));
        assert_eq!(switches.notified.load(Ordering::SeqCst), 1);
        // the competing version survives together with its session
        let survivor = store.snapshot(&created.instance_id).unwrap();
        assert_eq!(survivor.version, 4);
        let fetched = service.get(&created.instance_id, Some("ua")).await.unwrap();
        assert_eq!(fetched.state_token, survivor.state_token);
    }
}
