use crate::service::ServiceOutput;
use crate::store::StoreError;
use crate::transaction::TransactionError;
use authflow_core::error::FlowError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("user agent does not match the flow session")]
    UserAgentUnmatched,

    /// The step committed, but an effect that runs after commit failed.
    #[error("effect failed after commit: {source}")]
    EffectFailed {
        output: Box<ServiceOutput>,
        source: FlowError,
    },

    #[error("flow still paused after {0} retries")]
    PauseRetryExhausted(u32),
}

impl ServiceError {
    pub fn flow(&self) -> Option<&FlowError> {
        match self {
            ServiceError::Flow(err) | ServiceError::EffectFailed { source: err, .. } => Some(err),
            _ => None,
        }
    }

    /// Errors the client can fix by resubmitting or restarting.
    pub fn is_client_error(&self) -> bool {
        match self {
            ServiceError::Flow(err) => err.is_client_error(),
            ServiceError::UserAgentUnmatched => true,
            ServiceError::Store(StoreError::FlowNotFound(_) | StoreError::SessionNotFound(_)) => true,
            _ => false,
        }
    }

    /// Reason of the underlying user-facing error, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ServiceError::Flow(err) => err.reason(),
            _ => None,
        }
    }
}
