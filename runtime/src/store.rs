//! # Flow Store
//!
//! Sessions and flow instances are read and written through a [`FlowTransaction`].
//!
//! ## Design Philosophy
//!
//! * **Optimistic locking**: a stored flow carries a `version`. A write must be exactly one
//!   version ahead of the committed copy, and a delete names the version it removes, so two
//!   evaluations racing on the same instance cannot both commit.
//! * **Expiry**: expired records behave as if they were never written, and every commit
//!   evicts them.
//! * **Buffered writes**: a transaction sees its own writes; nothing is visible to others
//!   before commit.

use crate::instance::FlowInstance;
use crate::transaction::{Transaction, TransactionError};
use async_trait::async_trait;
use authflow_core::document::FlowDocument;
use authflow_core::error::FlowError;
use authflow_core::flow::{Flow, FlowReference};
use authflow_core::registry::Registry;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The client-side handle of an evaluation, shared by every tree it goes through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub flow_id: String,
    pub user_agent_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub remote_ip: Option<String>,
    /// The signed-in user a reauth flow authenticates again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id_hint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        flow_id: impl Into<String>,
        user_agent_id: Option<String>,
        redirect_uri: Option<String>,
        remote_ip: Option<String>,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            flow_id: flow_id.into(),
            user_agent_id,
            redirect_uri,
            remote_ip,
            user_id_hint: None,
            created_at,
            expire_at: created_at + ttl,
        }
    }

    pub fn with_user_id_hint(mut self, user_id_hint: Option<String>) -> Self {
        self.user_id_hint = user_id_hint;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }
}

/// A persisted flow tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFlow {
    pub instance_id: String,
    pub flow_id: String,
    pub flow_reference: FlowReference,
    pub state_token: String,
    pub version: u64,
    pub document: FlowDocument,
    pub expire_at: DateTime<Utc>,
}

impl StoredFlow {
    pub fn from_instance(
        instance: &FlowInstance,
        version: u64,
        expire_at: DateTime<Utc>,
    ) -> Result<Self, FlowError> {
        Ok(Self {
            instance_id: instance.instance_id.clone(),
            flow_id: instance.flow_id.clone(),
            flow_reference: instance.flow_reference.clone(),
            state_token: instance.state_token.clone(),
            version,
            document: instance.flow.to_document()?,
            expire_at,
        })
    }

    pub fn decode(&self, registry: &Registry) -> Result<FlowInstance, FlowError> {
        Ok(FlowInstance {
            flow_id: self.flow_id.clone(),
            instance_id: self.instance_id.clone(),
            state_token: self.state_token.clone(),
            flow_reference: self.flow_reference.clone(),
            flow: registry.decode_flow(&self.document)?,
        })
    }

    /// Same record, one version ahead, holding `flow`.
    pub fn next_version(&self, flow: &Flow) -> Result<Self, FlowError> {
        Ok(Self {
            version: self.version + 1,
            document: flow.to_document()?,
            ..self.clone()
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("flow not found: {0}")]
    FlowNotFound(String),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn FlowTransaction>, TransactionError>;
}

#[async_trait]
pub trait FlowTransaction: Transaction {
    async fn get_session(&mut self, flow_id: &str) -> Result<Session, StoreError>;

    async fn put_session(&mut self, session: Session) -> Result<(), StoreError>;

    async fn delete_session(&mut self, flow_id: &str) -> Result<(), StoreError>;

    async fn get_flow(&mut self, instance_id: &str) -> Result<StoredFlow, StoreError>;

    async fn put_flow(&mut self, flow: StoredFlow) -> Result<(), StoreError>;

    /// Delete the flow whose committed version is `version`; 0 when it was never committed.
    async fn delete_flow(&mut self, instance_id: &str, version: u64) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    sessions: HashMap<String, Session>,
    flows: HashMap<String, StoredFlow>,
}

/// In-process store for tests and single-node deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryFlowStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) flow instances.
    pub fn flow_count(&self) -> usize {
        let now = Utc::now();
        self.state
            .lock()
            .flows
            .values()
            .filter(|flow| !flow.is_expired(now))
            .count()
    }

    /// Committed copy of a flow, bypassing transactions.
    pub fn snapshot(&self, instance_id: &str) -> Option<StoredFlow> {
        self.state.lock().flows.get(instance_id).cloned()
    }
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn begin(&self) -> Result<Box<dyn FlowTransaction>, TransactionError> {
        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            sessions: HashMap::new(),
            flows: HashMap::new(),
        }))
    }
}

enum FlowWrite {
    Put(StoredFlow),
    Delete { version: u64 },
}

impl FlowWrite {
    /// Committed version this write was based on.
    fn expected(&self) -> u64 {
        match self {
            FlowWrite::Put(flow) => flow.version.saturating_sub(1),
            FlowWrite::Delete { version } => *version,
        }
    }
}

/// Writes are buffered per key; `None` marks a session delete.
struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    sessions: HashMap<String, Option<Session>>,
    flows: HashMap<String, FlowWrite>,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), TransactionError> {
        let MemoryTransaction {
            state: shared,
            sessions,
            flows,
        } = *self;
        let mut state = shared.lock();
        let now = Utc::now();
        state.sessions.retain(|_, session| !session.is_expired(now));
        let before = state.flows.len();
        state.flows.retain(|_, flow| !flow.is_expired(now));
        let evicted = before - state.flows.len();
        if evicted > 0 {
            debug!(evicted, "expired flows evicted");
        }

        for (key, write) in &flows {
            let found = state.flows.get(key).map_or(0, |committed| committed.version);
            let expected = write.expected();
            if found != expected {
                debug!(key = %key, expected, found, "optimistic lock conflict");
                return Err(TransactionError::Conflict {
                    key: key.clone(),
                    expected,
                    found,
                });
            }
        }

        for (key, write) in sessions {
            match write {
                Some(session) => state.sessions.insert(key, session),
                None => state.sessions.remove(&key),
            };
        }
        for (key, write) in flows {
            match write {
                FlowWrite::Put(flow) => state.flows.insert(key, flow),
                FlowWrite::Delete { .. } => state.flows.remove(&key),
            };
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), TransactionError> {
        Ok(())
    }
}

#[async_trait]
impl FlowTransaction for MemoryTransaction {
    async fn get_session(&mut self, flow_id: &str) -> Result<Session, StoreError> {
        let session = match self.sessions.get(flow_id) {
            Some(write) => write.clone(),
            None => self.state.lock().sessions.get(flow_id).cloned(),
        };
        session
            .filter(|session| !session.is_expired(Utc::now()))
            .ok_or_else(|| StoreError::SessionNotFound(flow_id.to_string()))
    }

    async fn put_session(&mut self, session: Session) -> Result<(), StoreError> {
        self.sessions.insert(session.flow_id.clone(), Some(session));
        Ok(())
    }

    async fn delete_session(&mut self, flow_id: &str) -> Result<(), StoreError> {
        self.sessions.insert(flow_id.to_string(), None);
        Ok(())
    }

    async fn get_flow(&mut self, instance_id: &str) -> Result<StoredFlow, StoreError> {
        let flow = match self.flows.get(instance_id) {
            Some(FlowWrite::Put(flow)) => Some(flow.clone()),
            Some(FlowWrite::Delete { .. }) => None,
            None => self.state.lock().flows.get(instance_id).cloned(),
        };
        flow.filter(|flow| !flow.is_expired(Utc::now()))
            .ok_or_else(|| StoreError::FlowNotFound(instance_id.to_string()))
    }

    async fn put_flow(&mut self, flow: StoredFlow) -> Result<(), StoreError> {
        self.flows.insert(flow.instance_id.clone(), FlowWrite::Put(flow));
        Ok(())
    }

    async fn delete_flow(&mut self, instance_id: &str, version: u64) -> Result<(), StoreError> {
        self.flows
            .insert(instance_id.to_string(), FlowWrite::Delete { version });
        Ok(())
    }
}
