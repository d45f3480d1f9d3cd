//! # authflow-runtime
//!
//! Drives flow trees built with `authflow-core`:
//!
//! * [`accept`] - the evaluation loop for one submission
//! * [`scheduler`] - on-commit effects and one-time functions
//! * [`store`] / [`transaction`] - persistence with optimistic locking
//! * [`service`] - the public create / get / feed / retry surface
//! * [`config`] / [`telemetry`] - service settings and logging bootstrap

pub mod accept;
pub mod config;
pub mod error;
pub mod instance;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod transaction;

#[cfg(test)]
mod fixtures;

pub use config::{ConfigError, LogConfig, LogFormat, ServiceConfig};
pub use error::ServiceError;
pub use service::{Action, FlowService, ServiceOutput, SessionOptions};
pub use store::{FlowStore, MemoryFlowStore};

pub mod prelude {
    pub use crate::accept::{AcceptInput, AcceptOutcome, AcceptResult, accept};
    pub use crate::config::ServiceConfig;
    pub use crate::error::ServiceError;
    pub use crate::instance::FlowInstance;
    pub use crate::scheduler::EffectScheduler;
    pub use crate::service::{Action, FlowService, ServiceOutput, SessionOptions};
    pub use crate::store::{FlowStore, FlowTransaction, MemoryFlowStore, Session, StoredFlow};
    pub use crate::transaction::{StepTransaction, Transaction, TransactionError};
}
