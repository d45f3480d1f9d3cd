//! Side effects proposed by nodes and intents.
//!
//! * [`Effect::Run`] executes inside the transaction that persists the updated tree.
//! * [`Effect::OnCommit`] executes after that transaction commits, in proposal order.
//! * A [`DelayedOneTimeFunction`] lives on a node and runs exactly once; its invoked flag is
//!   part of the persisted node.

use crate::context::Context;
use crate::error::FlowError;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;

pub type EffectFuture = BoxFuture<'static, Result<(), FlowError>>;

type EffectFn = Box<dyn FnOnce(Context) -> EffectFuture + Send>;

pub enum Effect {
    Run(EffectFn),
    OnCommit(EffectFn),
}

impl Effect {
    pub fn run<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), FlowError>> + Send + 'static,
    {
        Effect::Run(Box::new(move |ctx| Box::pin(f(ctx))))
    }

    pub fn on_commit<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), FlowError>> + Send + 'static,
    {
        Effect::OnCommit(Box::new(move |ctx| Box::pin(f(ctx))))
    }

    pub fn is_on_commit(&self) -> bool {
        matches!(self, Effect::OnCommit(_))
    }

    pub async fn execute(self, ctx: Context) -> Result<(), FlowError> {
        match self {
            Effect::Run(f) | Effect::OnCommit(f) => f(ctx).await,
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::Run(_) => f.write_str("Effect::Run"),
            Effect::OnCommit(_) => f.write_str("Effect::OnCommit"),
        }
    }
}

/// An external call that must happen exactly once for the node carrying it.
#[async_trait]
pub trait DelayedOneTimeFunction: Send + Sync {
    fn invoked(&self) -> bool;

    fn set_invoked(&mut self, invoked: bool);

    async fn invoke(&self, ctx: &Context) -> Result<(), FlowError>;
}
