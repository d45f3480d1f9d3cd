use crate::bus::Bus;
use crate::error::FlowError;
use crate::flow::FlowReference;
use std::sync::Arc;

/// Per-request evaluation context handed to every reactor and effect.
///
/// Cloning is cheap: the dependency [`Bus`] is shared.
#[derive(Debug, Clone)]
pub struct Context {
    deps: Arc<Bus>,
    flow_reference: FlowReference,
    remote_ip: Option<String>,
    user_agent_id: Option<String>,
    user_id_hint: Option<String>,
}

impl Context {
    pub fn new(deps: Arc<Bus>, flow_reference: FlowReference) -> Self {
        Self {
            deps,
            flow_reference,
            remote_ip: None,
            user_agent_id: None,
            user_id_hint: None,
        }
    }

    pub fn with_remote_ip(mut self, remote_ip: Option<String>) -> Self {
        self.remote_ip = remote_ip;
        self
    }

    pub fn with_user_agent_id(mut self, user_agent_id: Option<String>) -> Self {
        self.user_agent_id = user_agent_id;
        self
    }

    pub fn with_user_id_hint(mut self, user_id_hint: Option<String>) -> Self {
        self.user_id_hint = user_id_hint;
        self
    }

    /// Same request, evaluating a different flow.
    pub fn with_flow_reference(&self, flow_reference: FlowReference) -> Self {
        Self {
            flow_reference,
            ..self.clone()
        }
    }

    pub fn deps(&self) -> &Bus {
        &self.deps
    }

    pub fn require<T: 'static>(&self) -> Result<&T, FlowError> {
        self.deps.require::<T>()
    }

    pub fn flow_reference(&self) -> &FlowReference {
        &self.flow_reference
    }

    pub fn remote_ip(&self) -> Option<&str> {
        self.remote_ip.as_deref()
    }

    pub fn user_agent_id(&self) -> Option<&str> {
        self.user_agent_id.as_deref()
    }

    pub fn user_id_hint(&self) -> Option<&str> {
        self.user_id_hint.as_deref()
    }
}
