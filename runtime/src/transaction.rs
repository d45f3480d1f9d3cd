//! Transactions around one evaluation step.
//!
//! A [`StepTransaction`] holds the open [`FlowTransaction`] while a step runs and closes it
//! from the step's result: `Ok` commits, `Err` rolls back. Run effects proposed during the
//! step are buffered by the evaluation and applied through [`StepTransaction::apply`] after
//! the tree is written, so a step that fails, or a tree abandoned by a switch, leaves no
//! side effects behind.

use crate::store::FlowTransaction;
use async_trait::async_trait;
use authflow_core::context::Context;
use authflow_core::effect::Effect;
use authflow_core::error::FlowError;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("failed to begin transaction: {0}")]
    BeginFailed(String),

    #[error("failed to commit transaction: {0}")]
    CommitFailed(String),

    #[error("failed to rollback transaction: {0}")]
    RollbackFailed(String),

    #[error("transaction already completed")]
    AlreadyCompleted,

    /// Optimistic lock failure: someone else committed this record first.
    #[error("conflicting write on {key}: expected version {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Transaction: Send + Sync + 'static {
    async fn commit(self: Box<Self>) -> Result<(), TransactionError>;

    async fn rollback(self: Box<Self>) -> Result<(), TransactionError>;
}

/// The transaction of one evaluation step.
pub struct StepTransaction {
    tx: Option<Box<dyn FlowTransaction>>,
}

impl StepTransaction {
    pub fn new(tx: Box<dyn FlowTransaction>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn tx(&mut self) -> Result<&mut Box<dyn FlowTransaction>, TransactionError> {
        self.tx.as_mut().ok_or(TransactionError::AlreadyCompleted)
    }

    /// Commit on `Ok`, roll back on `Err`, and hand the result back.
    pub async fn finalize<T, E>(
        mut self,
        result: Result<T, E>,
    ) -> Result<Result<T, E>, TransactionError> {
        if let Some(tx) = self.tx.take() {
            match &result {
                Ok(_) => tx.commit().await?,
                Err(_) => tx.rollback().await?,
            }
        }
        Ok(result)
    }

    /// Execute buffered Run effects in proposal order while the transaction is open.
    ///
    /// The first failure stops the remaining effects; the caller rolls back.
    pub async fn apply(&mut self, ctx: &Context, effects: Vec<Effect>) -> Result<(), FlowError> {
        if !self.is_active() {
            return Err(FlowError::internal("effects applied after the step completed"));
        }
        let count = effects.len();
        for effect in effects {
            effect.execute(ctx.clone()).await?;
        }
        if count > 0 {
            debug!(count, "run effects applied");
        }
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<(), TransactionError> {
        match self.tx.take() {
            Some(tx) => tx.commit().await,
            None => Err(TransactionError::AlreadyCompleted),
        }
    }

    pub async fn rollback(&mut self) -> Result<(), TransactionError> {
        match self.tx.take() {
            Some(tx) => tx.rollback().await,
            None => Err(TransactionError::AlreadyCompleted),
        }
    }

    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }
}

impl std::fmt::Debug for StepTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepTransaction")
            .field("active", &self.is_active())
            .finish()
    }
}
