//! # EffectScheduler
//!
//! Runs what must happen after the step transaction committed:
//!
//! * queued [`Effect::OnCommit`] effects, in proposal order
//! * pending [`DelayedOneTimeFunction`](authflow_core::effect::DelayedOneTimeFunction)s,
//!   each claimed in its own transaction before it is invoked
//!
//! A claim flips the invoked flag and commits it under the optimistic lock, so two
//! workers racing on the same node cannot both invoke it. A failed invocation releases
//! the claim and the function is redelivered on the next retry.

use crate::error::ServiceError;
use crate::store::FlowStore;
use crate::transaction::{StepTransaction, TransactionError};
use authflow_core::context::Context;
use authflow_core::effect::Effect;
use authflow_core::error::FlowError;
use authflow_core::flow::{Flow, Node, NodePath};
use authflow_core::registry::Registry;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Paths of nodes whose one-time function has not been invoked, in pre-order.
pub fn pending_delayed(flow: &Flow) -> Vec<NodePath> {
    fn walk(flow: &Flow, prefix: &mut Vec<usize>, out: &mut Vec<NodePath>) {
        for (idx, node) in flow.nodes.iter().enumerate() {
            prefix.push(idx);
            match node {
                Node::Simple(simple) => {
                    if simple.delayed().is_some_and(|delayed| !delayed.invoked()) {
                        out.push(prefix.clone());
                    }
                }
                Node::SubFlow(child) => walk(child, prefix, out),
            }
            prefix.pop();
        }
    }

    let mut out = Vec::new();
    walk(flow, &mut Vec::new(), &mut out);
    out
}

#[derive(Clone)]
pub struct EffectScheduler {
    store: Arc<dyn FlowStore>,
    registry: Arc<Registry>,
}

impl EffectScheduler {
    pub fn new(store: Arc<dyn FlowStore>, registry: Arc<Registry>) -> Self {
        Self { store, registry }
    }

    /// Execute every effect; the first failure is returned after all were attempted.
    pub async fn run_on_commit(&self, ctx: &Context, effects: Vec<Effect>) -> Result<(), FlowError> {
        let mut first = None;
        for (idx, effect) in effects.into_iter().enumerate() {
            if let Err(err) = effect.execute(ctx.clone()).await {
                error!(idx, %err, "on-commit effect failed");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Invoke every pending one-time function of the stored instance. Returns how many ran.
    ///
    /// A failing function surfaces as [`ServiceError::Flow`] after its claim was released.
    pub async fn run_pending(&self, ctx: &Context, instance_id: &str) -> Result<usize, ServiceError> {
        let snapshot = {
            let mut step = StepTransaction::new(self.store.begin().await?);
            let stored = step.tx()?.get_flow(instance_id).await;
            step.rollback().await?;
            self.registry.decode_flow(&stored?.document)?
        };

        let mut invoked = 0;
        for path in pending_delayed(&snapshot) {
            match self.claim(instance_id, &path, true).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(?path, "one-time function already claimed");
                    continue;
                }
                Err(ServiceError::Transaction(TransactionError::Conflict { .. })) => {
                    debug!(?path, "one-time function claimed concurrently");
                    continue;
                }
                Err(err) => return Err(err),
            }

            let delayed = snapshot
                .node_at(&path)
                .and_then(Node::as_simple)
                .and_then(|simple| simple.delayed())
                .ok_or_else(|| FlowError::internal("one-time function vanished from the tree"))?;

            match delayed.invoke(ctx).await {
                Ok(()) => {
                    info!(?path, "one-time function invoked");
                    invoked += 1;
                }
                Err(err) => {
                    warn!(?path, %err, "one-time function failed, releasing claim");
                    if let Err(release) = self.claim(instance_id, &path, false).await {
                        error!(?path, %release, "failed to release one-time function claim");
                    }
                    return Err(err.into());
                }
            }
        }
        Ok(invoked)
    }

    /// Set the invoked flag at `path` in its own transaction.
    ///
    /// Returns `false` when the flag already had the requested value.
    pub async fn claim(&self, instance_id: &str, path: &[usize], invoked: bool) -> Result<bool, ServiceError> {
        let mut step = StepTransaction::new(self.store.begin().await?);
        let result: Result<bool, ServiceError> = async {
            let tx = step.tx()?;
            let stored = tx.get_flow(instance_id).await?;
            let mut flow = self.registry.decode_flow(&stored.document)?;
            let delayed = match flow.node_at_mut(path) {
                Some(Node::Simple(simple)) => simple.delayed_mut(),
                _ => None,
            }
            .ok_or_else(|| FlowError::internal("no one-time function at path"))?;
            if delayed.invoked() == invoked {
                return Ok(false);
            }
            delayed.set_invoked(invoked);
            tx.put_flow(stored.next_version(&flow)?).await?;
            Ok(true)
        }
        .await;
        step.finalize(result).await?
    }
}

impl std::fmt::Debug for EffectScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectScheduler")
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::instance::FlowInstance;
    use crate::store::{MemoryFlowStore, StoredFlow};
    use authflow_core::flow::{FlowReference, FlowType};
    use std::sync::atomic::Ordering;

    async fn seed(store: &MemoryFlowStore) -> String {
        let mut instance = FlowInstance::new(
            "f1",
            FlowReference::new(FlowType::Login, "default"),
            Box::new(IntentToyRoot::default()),
        );
        instance.flow.nodes.push(Node::simple(NodeToyName { name: "alice".into() }));
        instance.flow.nodes.push(Node::simple(NodeToyNotify { invoked: false }));
        let stored = StoredFlow::from_instance(&instance, 1, chrono::Utc::now() + chrono::Duration::minutes(5)).unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.put_flow(stored).await.unwrap();
        tx.commit().await.unwrap();
        instance.instance_id
    }

    fn scheduler(store: &MemoryFlowStore) -> EffectScheduler {
        EffectScheduler::new(Arc::new(store.clone()), Arc::new(toy_registry()))
    }

    #[test]
    fn test_pending_delayed_scan() {
        let mut root = Flow::new(IntentToyRoot::default());
        let mut child = Flow::new(IntentToyRoot::default());
        child.nodes.push(Node::simple(NodeToyNotify { invoked: true }));
        child.nodes.push(Node::simple(NodeToyNotify { invoked: false }));
        root.nodes.push(Node::simple(NodeToyNotify { invoked: false }));
        root.nodes.push(Node::SubFlow(child));
        assert_eq!(pending_delayed(&root), vec![vec![0], vec![1, 1]]);
    }

    #[tokio::test]
    async fn test_run_pending_exactly_once() {
        let store = MemoryFlowStore::new();
        let instance_id = seed(&store).await;
        let scheduler = scheduler(&store);
        let (ctx, switches) = toy_context();

        assert_eq!(scheduler.run_pending(&ctx, &instance_id).await.unwrap(), 1);
        assert_eq!(scheduler.run_pending(&ctx, &instance_id).await.unwrap(), 0);
        assert_eq!(switches.notified.load(Ordering::SeqCst), 1);
        assert_eq!(store.snapshot(&instance_id).unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_second_claim_loses() {
        let store = MemoryFlowStore::new();
        let instance_id = seed(&store).await;
        let scheduler = scheduler(&store);
        assert!(scheduler.claim(&instance_id, &[1], true).await.unwrap());
        assert!(!scheduler.claim(&instance_id, &[1], true).await.unwrap());
        assert!(scheduler.claim(&instance_id, &[0], true).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_releases_claim() {
        let store = MemoryFlowStore::new();
        let instance_id = seed(&store).await;
        let scheduler = scheduler(&store);
        let (ctx, switches) = toy_context();

        switches.fail_notify.store(true, Ordering::SeqCst);
        let err = scheduler.run_pending(&ctx, &instance_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Flow(FlowError::Other(_))));
        let registry = toy_registry();
        let released = store.snapshot(&instance_id).unwrap().decode(&registry).unwrap();
        assert_eq!(pending_delayed(&released.flow), vec![vec![1]]);

        switches.fail_notify.store(false, Ordering::SeqCst);
        assert_eq!(scheduler.run_pending(&ctx, &instance_id).await.unwrap(), 1);
        assert_eq!(switches.notified.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_commit_runs_all_and_reports_first_failure() {
        let store = MemoryFlowStore::new();
        let scheduler = scheduler(&store);
        let (ctx, switches) = toy_context();
        let effects = vec![
            Effect::on_commit(|_| async { Err(FlowError::internal("first")) }),
            Effect::on_commit(|ctx| async move {
                ctx.require::<Arc<ToySwitches>>()?.committed.lock().push("second".into());
                Ok(())
            }),
            Effect::on_commit(|_| async { Err(FlowError::internal("third")) }),
        ];
        let err = scheduler.run_on_commit(&ctx, effects).await.unwrap_err();
        assert_eq!(err.to_string(), "internal error: first");
        assert_eq!(*switches.committed.lock(), vec!["second".to_string()]);
    }
}
